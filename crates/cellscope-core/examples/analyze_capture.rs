//! Offline capture analysis
//!
//! Splits a pasted traffic capture into frames and decodes each one.
//! Accepts hex dumps ("DD A5 03 00 FF FD 77", with space/colon/comma
//! delimiters) and backslash-escaped byte strings ("\xdd\xa5...").
//!
//! Usage:
//!   cargo run --example analyze_capture -- "DD A5 03 00 FF FD 77"

use cellscope_core::protocol::frame::Frame;
use cellscope_core::protocol::registers::{PhysicalValue, Register};
use cellscope_core::protocol::stream::{parse_capture, split_frames};

fn main() {
    let input: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if input.is_empty() {
        println!("Usage: analyze_capture <hex or escaped byte string>");
        return;
    }

    let bytes = parse_capture(&input);
    println!("{} bytes", bytes.len());

    for (i, raw) in split_frames(&bytes).iter().enumerate() {
        print!("frame {}: {} bytes, ", i, raw.len());
        match Frame::decode(raw) {
            Ok(Frame::Request {
                opcode,
                register,
                payload,
            }) => {
                let name = Register::lookup(register).map(|r| r.name).unwrap_or("?");
                println!("request {:?} reg {:#04x} ({}) {:02X?}", opcode, register, name, payload);
            }
            Ok(Frame::Response {
                register,
                status,
                payload,
            }) => {
                let name = Register::lookup(register).map(|r| r.name).unwrap_or("?");
                print!("response reg {:#04x} ({}) status {}", register, name, status);
                // Word-sized payloads of known registers decode to physical units
                if payload.len() == 2 {
                    if let Some(reg) = Register::lookup(register) {
                        let raw = u16::from_be_bytes([payload[0], payload[1]]);
                        if let Some(value) = PhysicalValue::decode(reg.kind, raw) {
                            print!(" = {:?}", value);
                        }
                    }
                }
                println!(" {:02X?}", payload);
            }
            Err(e) => println!("undecodable ({})", e),
        }
    }
}
