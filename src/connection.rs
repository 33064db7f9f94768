//! Per-client connection handler.
//!
//! Each TCP connection gets its own [`BridgeSession`], fed by a reader task
//! for the client side and whatever task the connector spawns for SBS.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::server::BridgeContext;
use crate::session::{BridgeSession, SessionEvent};

/// Room for bursts from either side before producers wait on the session.
const EVENT_QUEUE: usize = 256;

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, ctx: BridgeContext) -> Result<()> {
    let peer = stream.peer_addr()?;
    let session_id = format!("{peer}");
    tracing::info!(%session_id, "New connection");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, session_id, ctx).await
}

pub async fn handle_io<R, W>(
    reader: BufReader<R>,
    writer: W,
    session_id: String,
    ctx: BridgeContext,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Unbounded so a slow client never stalls the session.
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    // Spawn writer task
    let write_session_id = session_id.clone();
    let mut write_half = writer;
    let write_handle = tokio::spawn(async move {
        while let Some(line) = client_rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                tracing::warn!(session_id = %write_session_id, "Write error: {e}");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let read_handle = tokio::spawn(read_lines(reader, events_tx.clone()));

    let session = BridgeSession::new(
        session_id.clone(),
        ctx.config,
        ctx.connector,
        client_tx,
        events_tx,
    );
    session.run(events_rx).await;

    read_handle.abort();
    // The session owned the only client sender, so the writer drains and stops.
    let _ = write_handle.await;
    tracing::info!(%session_id, "Connection closed");
    Ok(())
}

/// Forward client lines to the session, then report the close.
async fn read_lines<R>(mut reader: BufReader<R>, events: mpsc::Sender<SessionEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            // A partial line at EOF is dropped.
            Ok(_) if buf.last() != Some(&b'\n') => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if events.send(SessionEvent::ClientLine(line)).await.is_err() {
            return;
        }
    }
    let _ = events.send(SessionEvent::ClientClosed).await;
}
