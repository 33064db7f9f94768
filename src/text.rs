//! Message body decoding.
//!
//! SBS tags each chat message with an encoding. Most are HTML-escaped
//! text; `draw` bodies are compressed bitmaps that get replaced by a short
//! summary line.

use crate::drawing::{self, DecodeError};

/// Shown in place of a drawing that failed to decode.
pub const DRAWING_ERROR_TEXT: &str = "[ERROR] Couldn't decode drawing!";

/// Something about a body worth reporting; the text is still usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyWarning {
    #[error("unknown encoding {0:?}")]
    UnknownEncoding(String),
    #[error("couldn't decode drawing: {0}")]
    Drawing(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub text: String,
    pub warning: Option<BodyWarning>,
}

impl DecodedBody {
    fn clean(text: String) -> Self {
        DecodedBody { text, warning: None }
    }
}

/// Decode `body` according to its declared `encoding`.
///
/// Unknown encodings pass through untouched with a warning.
pub fn decode_body(encoding: &str, body: &str, drawing_size: (usize, usize)) -> DecodedBody {
    match encoding {
        "text" | "markdown" | "image" | "code" => DecodedBody::clean(unescape_html(body)),
        "raw" => DecodedBody::clean(body.to_string()),
        "draw" => match drawing::decode_drawing(body, drawing_size.0, drawing_size.1) {
            Ok(drawing) => DecodedBody::clean(drawing.summary()),
            Err(e) => DecodedBody {
                text: DRAWING_ERROR_TEXT.to_string(),
                warning: Some(BodyWarning::Drawing(e)),
            },
        },
        other => DecodedBody {
            text: body.to_string(),
            warning: Some(BodyWarning::UnknownEncoding(other.to_string())),
        },
    }
}

/// Replace HTML character references (`&amp;`, `&#39;`, `&#x1F600;`, ...).
/// Anything that is not a well-formed reference is kept verbatim.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match decode_reference(rest) {
            Some((ch, len)) => {
                out.push(ch);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode the reference at the start of `s` (which begins with `&`),
/// returning the character and the byte length consumed.
fn decode_reference(s: &str) -> Option<(char, usize)> {
    let (end, _) = s.char_indices().take(12).find(|&(_, c)| c == ';')?;
    let name = &s[1..end];
    let ch = match name.strip_prefix('#') {
        Some(number) => {
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None if number.bytes().all(|b| b.is_ascii_digit()) => number.parse().ok()?,
                None => return None,
            };
            char::from_u32(code)?
        }
        None => match name {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            "nbsp" => '\u{a0}',
            _ => return None,
        },
    };
    Some((ch, end + 1))
}
