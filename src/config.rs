use clap::Parser;

/// IRC gateway for SmileBASIC Source chat.
#[derive(Parser, Debug, Clone)]
#[command(name = "sbs-irc-bridge", version, about)]
pub struct BridgeConfig {
    /// IRC listener address.
    #[arg(long, default_value = "0.0.0.0:6667")]
    pub listen_addr: String,

    /// Server name used in IRC messages and user hostmasks.
    #[arg(long, default_value = "smilebasic")]
    pub server_name: String,

    /// SBS query API used for login.
    #[arg(long, default_value = "https://smilebasicsource.com/query")]
    pub query_endpoint: String,

    /// SBS chat websocket.
    #[arg(long, default_value = "ws://direct.smilebasicsource.com:45697/chatserver")]
    pub chat_url: String,

    /// Topic shown for every channel.
    #[arg(long, default_value = "https://smilebasicsource.com/chat")]
    pub topic: String,

    /// Tag that carries private messages sent with /pm.
    #[arg(long, default_value = "offtopic")]
    pub pm_tag: String,

    /// Ask the chat server for full user data instead of the reduced set.
    #[arg(long)]
    pub full_data: bool,

    /// Join channels automatically as they appear.
    #[arg(long)]
    pub auto_join: bool,

    /// Width of chat drawings, in pixels.
    #[arg(long, default_value = "200")]
    pub drawing_width: usize,

    /// Height of chat drawings, in pixels.
    #[arg(long, default_value = "100")]
    pub drawing_height: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6667".to_string(),
            server_name: "smilebasic".to_string(),
            query_endpoint: "https://smilebasicsource.com/query".to_string(),
            chat_url: "ws://direct.smilebasicsource.com:45697/chatserver".to_string(),
            topic: "https://smilebasicsource.com/chat".to_string(),
            pm_tag: "offtopic".to_string(),
            full_data: false,
            auto_join: false,
            drawing_width: 200,
            drawing_height: 100,
        }
    }
}

impl BridgeConfig {
    pub fn drawing_size(&self) -> (usize, usize) {
        (self.drawing_width, self.drawing_height)
    }
}
