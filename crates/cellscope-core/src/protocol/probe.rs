//! Port probing and autodetection
//!
//! A probe is a transient, speculative open → query → close cycle that
//! asks "is this endpoint our device?" within a bounded time budget. It
//! talks the frame codec directly, without a session: one hardware-info
//! read, one shortened response window, and an unconditional close. Every
//! failure class (open failure, timeout, malformed response, some other
//! device) collapses to "not confirmed": a false negative is the safe
//! outcome for a speculative scan, so probing never raises device errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::frame::{self, Frame};
use super::registers::REG_HARDWARE_INFO;
use super::serial::{list_ports, PortInfo, SerialTransport};
use super::stream::FrameAssembler;
use super::transport::Transport;
use super::PROBE_TIMEOUT_MS;

/// An enumerated endpoint and what probing has established about it.
///
/// The list is a point-in-time view: entries are never auto-pruned, and a
/// fresh [`enumerate`] is how stale endpoints drop out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedEndpoint {
    /// Platform identity of the endpoint
    pub port: PortInfo,
    /// Whether a probe has been run against this endpoint
    pub probed: bool,
    /// Whether a probe confirmed the device type; only ever set by a
    /// successful probe
    pub confirmed: bool,
}

/// List candidate endpoints, none probed yet
pub fn enumerate() -> Vec<DetectedEndpoint> {
    list_ports()
        .into_iter()
        .map(|port| DetectedEndpoint {
            port,
            probed: false,
            confirmed: false,
        })
        .collect()
}

/// Send one hardware-info read and wait for a structurally valid response
/// addressed to it. Does not close the transport; see [`probe`].
pub async fn probe_transport<T: Transport>(transport: &mut T, budget: Duration) -> bool {
    let request = frame::encode_read(REG_HARDWARE_INFO);
    if transport.write_bytes(&request).await.is_err() {
        return false;
    }

    let deadline = Instant::now() + budget;
    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; 512];

    loop {
        let n = match timeout_at(deadline, transport.read_chunk(&mut buf)).await {
            Err(_elapsed) => return false,
            Ok(Err(_)) | Ok(Ok(0)) => return false,
            Ok(Ok(n)) => n,
        };

        assembler.push(&buf[..n]);
        while let Some(raw) = assembler.next_frame() {
            match Frame::decode(&raw) {
                Ok(Frame::Response { register, .. }) if register == REG_HARDWARE_INFO => {
                    return true;
                }
                // Anything else is noise as far as the probe is concerned;
                // keep listening until the budget runs out
                Ok(_) | Err(_) => {}
            }
        }
    }
}

/// Probe an already-open transport, consuming it. The endpoint is closed
/// whatever the outcome; it is an exclusively-owned resource and must
/// never be left open after a probe.
pub async fn probe<T: Transport>(mut transport: T) -> bool {
    let confirmed = probe_transport(
        &mut transport,
        Duration::from_millis(PROBE_TIMEOUT_MS),
    )
    .await;
    if let Err(e) = transport.close().await {
        debug!(error = %e, "probe close failed");
    }
    confirmed
}

/// Open the named serial endpoint and probe it
pub async fn probe_port(port_name: &str, baud_rate: u32) -> bool {
    match SerialTransport::open(port_name, Some(baud_rate)) {
        Ok(transport) => {
            let confirmed = probe(transport).await;
            debug!(port = port_name, confirmed, "probe finished");
            confirmed
        }
        Err(e) => {
            debug!(port = port_name, error = %e, "probe open failed");
            false
        }
    }
}

/// Enumerate all candidate endpoints and probe each in turn. Total scan
/// time is bounded by candidates × the per-probe budget.
pub async fn autodetect(baud_rate: u32) -> Vec<DetectedEndpoint> {
    let mut endpoints = enumerate();
    for endpoint in &mut endpoints {
        endpoint.confirmed = probe_port(&endpoint.port.name, baud_rate).await;
        endpoint.probed = true;
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode_response;
    use std::collections::VecDeque;
    use std::io;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Minimal scripted transport: a canned byte stream, or silence
    struct FakeEndpoint {
        rx: VecDeque<u8>,
        closed: Arc<AtomicBool>,
    }

    impl FakeEndpoint {
        fn silent() -> Self {
            Self {
                rx: VecDeque::new(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn replying(bytes: Vec<u8>) -> Self {
            Self {
                rx: bytes.into(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn closed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.closed)
        }
    }

    impl Transport for FakeEndpoint {
        async fn write_bytes(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                std::future::pending::<()>().await;
            }
            let n = buf.len().min(self.rx.len());
            for b in buf.iter_mut().take(n) {
                *b = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }

        async fn close(&mut self) -> io::Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_endpoint_not_confirmed_and_closed() {
        let endpoint = FakeEndpoint::silent();
        let closed = endpoint.closed_flag();

        let start = Instant::now();
        let confirmed = probe(endpoint).await;

        assert!(!confirmed);
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(start.elapsed(), Duration::from_millis(PROBE_TIMEOUT_MS));
    }

    #[tokio::test]
    async fn test_confirmed_endpoint_still_closed() {
        let endpoint =
            FakeEndpoint::replying(encode_response(REG_HARDWARE_INFO, 0x00, &[0u8; 25]).unwrap());
        let closed = endpoint.closed_flag();

        assert!(probe(endpoint).await);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_matching_response_confirms() {
        let response = encode_response(REG_HARDWARE_INFO, 0x00, &[0u8; 25]).unwrap();
        assert!(probe(FakeEndpoint::replying(response)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_register_does_not_confirm() {
        let response = encode_response(0x04, 0x00, &[0x0C, 0xE4]).unwrap();
        assert!(!probe(FakeEndpoint::replying(response)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_does_not_confirm() {
        let mut response = encode_response(REG_HARDWARE_INFO, 0x00, &[0u8; 4]).unwrap();
        response[5] ^= 0xFF;
        assert!(!probe(FakeEndpoint::replying(response)).await);
    }
}
