//! Drawing message decoder.
//!
//! SBS transmits chat drawings as an lz-string stream serialized with the
//! base64 alphabet. The decompressed bytes are 2-bit palette indices packed
//! four to a byte, optionally followed by an explicit palette and a final
//! byte holding the palette's color count.

use sha2::{Digest, Sha256};

const ALPHABET: &[u8; 65] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=";

/// Bits contributed by one alphabet digit, read most significant first.
const DIGIT_BITS: u32 = 6;

/// Largest explicit palette: the trailing count byte can't name more.
const MAX_PALETTE_COLORS: usize = 255;

/// Colors used when a drawing carries no palette of its own.
pub const DEFAULT_PALETTE: [[u8; 3]; 4] = [[255, 255, 255], [0, 0, 0], [255, 0, 0], [0, 0, 255]];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown literal selector {0}")]
    InvalidSelector(u32),
    #[error("code {code} is not in the dictionary (next index {next})")]
    InvalidCode { code: u32, next: usize },
    #[error("compressed stream ended before the end marker")]
    UnexpectedEnd,
    #[error("{width}x{height} is not a valid drawing size")]
    BadGeometry { width: usize, height: usize },
    #[error("palette of {count} colors does not fit in {available} bytes")]
    BadPalette { count: usize, available: usize },
    #[error("decoded value {0:#x} does not fit in a byte")]
    NonByteValue(u16),
    #[error("decompressed data exceeds {limit} units")]
    TooLarge { limit: usize },
}

/// Bit cursor over alphabet indices.
struct BitReader {
    digits: Vec<u32>,
    next: usize,
    value: u32,
    mask: u32,
    exhausted: bool,
}

impl BitReader {
    fn new(digits: Vec<u32>) -> Self {
        let value = digits.first().copied().unwrap_or(0);
        BitReader {
            exhausted: digits.is_empty(),
            digits,
            next: 1,
            value,
            mask: 1 << (DIGIT_BITS - 1),
        }
    }

    /// Read `count` bits, assembling the value least significant bit first.
    /// Bits past the last digit read as zero, but a read may not begin once
    /// the stream is used up.
    fn read(&mut self, count: u32) -> Result<u32, DecodeError> {
        if self.exhausted {
            return Err(DecodeError::UnexpectedEnd);
        }
        let mut bits = 0;
        for i in 0..count {
            if self.value & self.mask != 0 {
                bits |= 1 << i;
            }
            self.mask >>= 1;
            if self.mask == 0 {
                self.mask = 1 << (DIGIT_BITS - 1);
                match self.digits.get(self.next) {
                    Some(&digit) => self.value = digit,
                    None => {
                        self.value = 0;
                        self.exhausted = true;
                    }
                }
                self.next += 1;
            }
        }
        Ok(bits)
    }
}

/// Decompress an lz-string `compressToBase64` payload into UTF-16 code units.
///
/// Characters outside the alphabet are skipped. Empty input decodes to an
/// empty result, as does a stream that starts with the end marker.
pub fn decompress_from_base64(input: &str) -> Result<Vec<u16>, DecodeError> {
    decompress_from_base64_limited(input, usize::MAX)
}

/// Like [`decompress_from_base64`], but gives up with
/// [`DecodeError::TooLarge`] once the output would pass `limit` units.
pub fn decompress_from_base64_limited(input: &str, limit: usize) -> Result<Vec<u16>, DecodeError> {
    let digits: Vec<u32> = input
        .bytes()
        .filter_map(|b| ALPHABET.iter().position(|&a| a == b))
        .map(|i| i as u32)
        .collect();
    if digits.is_empty() {
        return Ok(Vec::new());
    }
    decompress(BitReader::new(digits), limit)
}

fn read_literal(reader: &mut BitReader, selector: u32) -> Result<u16, DecodeError> {
    let width = if selector == 0 { 8 } else { 16 };
    Ok(reader.read(width)? as u16)
}

fn decompress(mut reader: BitReader, limit: usize) -> Result<Vec<u16>, DecodeError> {
    // Indices 0..=2 are control codes and never resolve to an entry.
    let mut dictionary: Vec<Vec<u16>> = vec![Vec::new(); 3];
    let mut enlarge_in: u64 = 4;
    let mut num_bits: u32 = 3;

    let first = match reader.read(2)? {
        2 => return Ok(Vec::new()),
        selector @ (0 | 1) => read_literal(&mut reader, selector)?,
        selector => return Err(DecodeError::InvalidSelector(selector)),
    };
    if limit == 0 {
        return Err(DecodeError::TooLarge { limit });
    }
    dictionary.push(vec![first]);
    let mut previous = vec![first];
    let mut result = vec![first];

    loop {
        let mut code = reader.read(num_bits)? as usize;
        match code {
            0 | 1 => {
                let literal = read_literal(&mut reader, code as u32)?;
                dictionary.push(vec![literal]);
                code = dictionary.len() - 1;
                enlarge_in -= 1;
            }
            2 => return Ok(result),
            _ => {}
        }

        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }

        let entry = if code >= 3 && code < dictionary.len() {
            dictionary[code].clone()
        } else if code == dictionary.len() {
            let mut entry = previous.clone();
            entry.push(previous[0]);
            entry
        } else {
            return Err(DecodeError::InvalidCode {
                code: code as u32,
                next: dictionary.len(),
            });
        };

        // Every pass adds output, so this also bounds the dictionary.
        if result.len() + entry.len() > limit {
            return Err(DecodeError::TooLarge { limit });
        }
        result.extend_from_slice(&entry);
        let mut grown = previous;
        grown.push(entry[0]);
        dictionary.push(grown);
        enlarge_in -= 1;
        previous = entry;

        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }
    }
}

/// A decoded palette-indexed bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drawing {
    pub width: usize,
    pub height: usize,
    pub palette: Vec<[u8; 3]>,
    /// One palette index per pixel, row major, `width * height` long.
    pub pixels: Vec<u8>,
    /// Hex SHA-256 of the decompressed payload.
    pub digest: String,
}

impl Drawing {
    /// One-line text stand-in for the image, used in chat.
    pub fn summary(&self) -> String {
        format!(
            "[drawing {}x{}, {} colors, sha256:{}]",
            self.width,
            self.height,
            self.palette.len(),
            &self.digest[..12.min(self.digest.len())]
        )
    }
}

/// Decode a drawing message body into a `width` x `height` pixel buffer.
pub fn decode_drawing(text: &str, width: usize, height: usize) -> Result<Drawing, DecodeError> {
    let pixel_count = width.checked_mul(height).unwrap_or(0);
    if pixel_count == 0 || pixel_count % 4 != 0 {
        return Err(DecodeError::BadGeometry { width, height });
    }
    let packed_len = pixel_count / 4;
    let limit = packed_len + 1 + 3 * MAX_PALETTE_COLORS;

    let mut bytes = decompress_from_base64_limited(text, limit)?
        .into_iter()
        .map(|unit| u8::try_from(unit).map_err(|_| DecodeError::NonByteValue(unit)))
        .collect::<Result<Vec<u8>, _>>()?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let mut palette = DEFAULT_PALETTE.to_vec();
    if bytes.len() > packed_len {
        if let Some(count) = bytes.pop().map(usize::from).filter(|&c| c > 0) {
            let available = bytes.len();
            if count * 3 > available {
                return Err(DecodeError::BadPalette { count, available });
            }
            let colors = bytes.split_off(available - count * 3);
            palette = colors
                .chunks_exact(3)
                .map(|rgb| [rgb[0], rgb[1], rgb[2]])
                .collect();
            if palette.len() < DEFAULT_PALETTE.len() {
                palette.extend_from_slice(&DEFAULT_PALETTE[palette.len()..]);
            }
        }
    }
    bytes.resize(packed_len, 0);

    let pixels = bytes
        .iter()
        .flat_map(|&b| (0..4).map(move |i| (b >> (2 * i)) & 3))
        .collect();

    Ok(Drawing {
        width,
        height,
        palette,
        pixels,
        digest,
    })
}
