//! Frame encoding/decoding
//!
//! Implements the binary frame format used by the pack over the UART link.
//!
//! Frame layout (both directions):
//! - 1 byte:  start marker (0xDD)
//! - 1 byte:  opcode (requests) or answered register (responses)
//! - 1 byte:  register (requests) or status (responses)
//! - 1 byte:  payload length
//! - N bytes: payload
//! - 2 bytes: checksum (big-endian)
//! - 1 byte:  end marker (0x77)
//!
//! The checksum is a 16-bit accumulator that starts at zero and subtracts
//! every input byte mod 2^16. Input is the frame bytes from index 2 through
//! the end of the payload, i.e. [register, LEN, DATA...] for requests and
//! [status, LEN, DATA...] for responses. The device computes the same sum;
//! it is not a polynomial CRC and must not be replaced with one.

use byteorder::{BigEndian, ByteOrder};

use super::error::FramingError;

/// Start-of-frame marker
pub const START_BYTE: u8 = 0xDD;
/// End-of-frame marker
pub const END_BYTE: u8 = 0x77;
/// Request opcode for register reads
pub const OPCODE_READ: u8 = 0xA5;
/// Request opcode for register writes
pub const OPCODE_WRITE: u8 = 0x5A;

/// Bytes in a frame beyond the payload (markers, header, checksum)
pub const FRAME_OVERHEAD: usize = 7;
/// Maximum payload length representable in the LEN byte
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Request opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Read a register's current value
    Read,
    /// Write a register
    Write,
}

impl Opcode {
    /// The wire byte for this opcode
    pub fn wire_byte(&self) -> u8 {
        match self {
            Opcode::Read => OPCODE_READ,
            Opcode::Write => OPCODE_WRITE,
        }
    }
}

/// A parsed protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Host-to-device request
    Request {
        /// Read or write
        opcode: Opcode,
        /// Target register id
        register: u8,
        /// Write payload (empty for reads)
        payload: Vec<u8>,
    },
    /// Device-to-host response
    Response {
        /// Register the device is answering for
        register: u8,
        /// Device status; 0 = OK, anything else is a device-reported error
        status: u8,
        /// Response payload
        payload: Vec<u8>,
    },
}

/// Compute the subtract-sum checksum over the given input bytes
pub fn checksum(input: &[u8]) -> u16 {
    input
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_sub(*b as u16))
}

fn build(byte1: u8, byte2: u8, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    bytes.push(START_BYTE);
    bytes.push(byte1);
    bytes.push(byte2);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);

    // Checksum input starts at the third wire byte
    let crc = checksum(&bytes[2..]);
    let mut crc_bytes = [0u8; 2];
    BigEndian::write_u16(&mut crc_bytes, crc);
    bytes.extend_from_slice(&crc_bytes);
    bytes.push(END_BYTE);

    Ok(bytes)
}

/// Encode a request frame for the given register
pub fn encode(register: u8, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    build(opcode.wire_byte(), register, payload)
}

/// Encode a read request (no payload)
pub fn encode_read(register: u8) -> Vec<u8> {
    // An empty payload can never exceed the LEN field
    encode(register, Opcode::Read, &[]).unwrap_or_default()
}

/// Encode a device response frame (used by analysis tooling and tests)
pub fn encode_response(register: u8, status: u8, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    build(register, status, payload)
}

impl Frame {
    /// Decode a frame from raw bytes.
    ///
    /// Scans forward for the start marker, so leading line noise or the
    /// tail of a previous partial frame is tolerated. The slice must
    /// contain the complete frame from there on.
    pub fn decode(data: &[u8]) -> Result<Self, FramingError> {
        let start = data
            .iter()
            .position(|b| *b == START_BYTE)
            .ok_or(FramingError::BadStart)?;
        let data = &data[start..];

        if data.len() < FRAME_OVERHEAD {
            return Err(FramingError::TooShort(data.len()));
        }

        let len = data[3] as usize;
        let total = FRAME_OVERHEAD + len;
        if data.len() < total {
            return Err(FramingError::LengthMismatch {
                declared: len,
                available: data.len().saturating_sub(FRAME_OVERHEAD),
            });
        }

        if data[total - 1] != END_BYTE {
            return Err(FramingError::BadEnd);
        }

        let expected = checksum(&data[2..4 + len]);
        let actual = BigEndian::read_u16(&data[4 + len..6 + len]);
        if expected != actual {
            return Err(FramingError::ChecksumMismatch { expected, actual });
        }

        let payload = data[4..4 + len].to_vec();
        match data[1] {
            OPCODE_READ => Ok(Frame::Request {
                opcode: Opcode::Read,
                register: data[2],
                payload,
            }),
            OPCODE_WRITE => Ok(Frame::Request {
                opcode: Opcode::Write,
                register: data[2],
                payload,
            }),
            register => Ok(Frame::Response {
                register,
                status: data[2],
                payload,
            }),
        }
    }

    /// Total encoded size of this frame on the wire
    pub fn encoded_size(&self) -> usize {
        let payload_len = match self {
            Frame::Request { payload, .. } => payload.len(),
            Frame::Response { payload, .. } => payload.len(),
        };
        FRAME_OVERHEAD + payload_len
    }
}
