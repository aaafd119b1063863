//! Stream reassembly
//!
//! Recovers discrete candidate frames from an arbitrary byte stream, with
//! no prior knowledge of chunk boundaries. The live reader feeds serial
//! chunks in as they arrive; offline analysis feeds a whole captured buffer
//! at once. Both use the declared LEN byte to slice exact frame lengths.
//!
//! Also hosts the two textual capture encodings accepted for offline
//! analysis: plain hex dumps and C-style backslash-escaped byte strings.

use super::frame::{FRAME_OVERHEAD, START_BYTE};

/// Offset of the LEN byte within a frame
const LEN_OFFSET: usize = 3;

/// Incremental frame assembler over a chunked byte stream
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of received bytes
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete candidate frame, if one has accumulated.
    ///
    /// Leading bytes before the start marker are discarded as noise. The
    /// returned slice is exactly `7 + LEN` bytes; whether it is actually
    /// well-formed is decided by frame decode.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.buf.iter().position(|b| *b == START_BYTE) {
            Some(0) => {}
            Some(pos) => {
                self.buf.drain(..pos);
            }
            None => {
                self.buf.clear();
                return None;
            }
        }

        if self.buf.len() <= LEN_OFFSET {
            return None;
        }

        let total = FRAME_OVERHEAD + self.buf[LEN_OFFSET] as usize;
        if self.buf.len() < total {
            return None;
        }

        Some(self.buf.drain(..total).collect())
    }

    /// Take whatever incomplete frame remains, for diagnostics. Returns
    /// `None` when the stream ended cleanly on a frame boundary.
    pub fn take_fragment(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }

    /// Number of buffered bytes not yet emitted
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Split a complete captured buffer into candidate frames up front.
///
/// A trailing partial frame is included as a terminal fragment so offline
/// analysis can report it rather than silently dropping bytes.
pub fn split_frames(data: &[u8]) -> Vec<Vec<u8>> {
    let mut assembler = FrameAssembler::new();
    assembler.push(data);

    let mut frames = Vec::new();
    while let Some(frame) = assembler.next_frame() {
        frames.push(frame);
    }
    if let Some(fragment) = assembler.take_fragment() {
        frames.push(fragment);
    }
    frames
}

/// Parse a hex dump, tolerating space/colon/comma/newline delimiters.
/// Returns `None` if the text contains anything that is not hex digits and
/// delimiters, or an odd number of digits.
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    let mut digits = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            c if c.is_ascii_hexdigit() => digits.push(c),
            ' ' | '\t' | '\r' | '\n' | ':' | ',' => {}
            _ => return None,
        }
    }

    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Parse a C-style backslash-escaped byte string into raw bytes.
/// Handles: \xNN (hex), \n, \r, \t, \\, \0, and regular characters.
/// Unrecognized escapes pass the bytes through as literal ASCII.
pub fn parse_escaped(s: &str) -> Vec<u8> {
    let mut result = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'x' | b'X' => {
                    // Hex escape: \xNN
                    if i + 3 < bytes.len() {
                        if let Ok(hex_str) = std::str::from_utf8(&bytes[i + 2..i + 4]) {
                            if let Ok(byte_val) = u8::from_str_radix(hex_str, 16) {
                                result.push(byte_val);
                                i += 4;
                                continue;
                            }
                        }
                    }
                    // Invalid hex, treat as literal
                    result.push(bytes[i]);
                    i += 1;
                }
                b'n' => {
                    result.push(b'\n');
                    i += 2;
                }
                b'r' => {
                    result.push(b'\r');
                    i += 2;
                }
                b't' => {
                    result.push(b'\t');
                    i += 2;
                }
                b'\\' => {
                    result.push(b'\\');
                    i += 2;
                }
                b'0' => {
                    result.push(0);
                    i += 2;
                }
                _ => {
                    // Unknown escape, treat backslash as literal
                    result.push(bytes[i]);
                    i += 1;
                }
            }
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    result
}

/// Decode pasted capture text: hex dump if it parses as one, otherwise a
/// backslash-escaped byte string.
pub fn parse_capture(s: &str) -> Vec<u8> {
    parse_hex(s).unwrap_or_else(|| parse_escaped(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{self, Frame};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_assembler_single_frame_across_chunks() {
        let frame = frame::encode_read(0x03);
        let mut assembler = FrameAssembler::new();

        assembler.push(&frame[..3]);
        assert_eq!(assembler.next_frame(), None);
        assembler.push(&frame[3..]);
        assert_eq!(assembler.next_frame(), Some(frame));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_skips_leading_noise() {
        let frame = frame::encode_read(0x04);
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0x42, 0x77]);
        assembler.push(&frame);
        assert_eq!(assembler.next_frame(), Some(frame));
    }

    #[test]
    fn test_two_concatenated_frames_emit_two_valid_frames() {
        let a = frame::encode_response(0x03, 0x00, &[0x09, 0xC4]).unwrap();
        let b = frame::encode_response(0x04, 0x00, &[0x0C, 0xE4]).unwrap();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let frames = split_frames(&joined);
        assert_eq!(frames, vec![a, b]);
        for raw in &frames {
            assert!(Frame::decode(raw).is_ok());
        }
    }

    #[test]
    fn test_split_emits_trailing_fragment() {
        let full = frame::encode_response(0x03, 0x00, &[0x09, 0xC4]).unwrap();
        let mut data = full.clone();
        data.extend_from_slice(&full[..4]);

        let frames = split_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], full);
        assert_eq!(frames[1], full[..4].to_vec());
        assert!(Frame::decode(&frames[1]).is_err());
    }

    #[test]
    fn test_pure_noise_yields_nothing() {
        assert!(split_frames(&[0x01, 0x02, 0x03, 0x42]).is_empty());
    }

    #[test]
    fn test_parse_hex_delimiters() {
        let expected = Some(vec![0xDD, 0xA5, 0x03, 0x00]);
        assert_eq!(parse_hex("DD A5 03 00"), expected);
        assert_eq!(parse_hex("dd:a5:03:00"), expected);
        assert_eq!(parse_hex("DD,A5,03,00"), expected);
        assert_eq!(parse_hex("DDA50300"), expected);
        assert_eq!(parse_hex("DD A5 0"), None);
        assert_eq!(parse_hex("hello"), None);
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn test_parse_escaped_hex_escapes() {
        assert_eq!(parse_escaped(r"\xdd\xa5\x03\x00"), vec![0xDD, 0xA5, 0x03, 0x00]);
        assert_eq!(
            parse_escaped(r"\n\r\t\\\0"),
            vec![b'\n', b'\r', b'\t', b'\\', 0]
        );
        // Unknown escapes and plain characters pass through literally
        assert_eq!(parse_escaped(r"\q"), vec![b'\\', b'q']);
        assert_eq!(parse_escaped("w5"), vec![b'w', b'5']);
    }

    #[test]
    fn test_parse_capture_prefers_hex() {
        assert_eq!(parse_capture("DD A5"), vec![0xDD, 0xA5]);
        assert_eq!(parse_capture(r"\xDD\xA5"), vec![0xDD, 0xA5]);
    }
}
