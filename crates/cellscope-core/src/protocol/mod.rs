//! Serial Protocol Communication
//!
//! Implements the binary UART protocol spoken by the pack's management
//! board: frame codec, register semantics, stream reassembly, the
//! transaction session, and port probing.

pub mod error;
pub mod frame;
pub mod probe;
pub mod registers;
pub mod serial;
mod session;
pub mod stream;
pub mod transport;

pub use error::{FramingError, ProtocolError};
pub use frame::{Frame, Opcode};
pub use probe::{autodetect, enumerate, probe, probe_port, DetectedEndpoint};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use session::{Session, SessionConfig, SessionState};
pub use stream::FrameAssembler;
pub use transport::Transport;

/// Default baud rate for the pack's UART link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-attempt response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Probe response window in milliseconds; shorter than the session timeout
/// so a multi-endpoint scan stays bounded
pub const PROBE_TIMEOUT_MS: u64 = 1500;

/// Attempts per command before the first-seen error surfaces
pub const COMMAND_ATTEMPTS: u32 = 3;

/// Linear backoff step between command attempts, milliseconds
pub const RETRY_BACKOFF_MS: u64 = 100;

/// Device turnaround delay between the reads of a full-config read,
/// milliseconds
pub const INTER_READ_DELAY_MS: u64 = 30;
