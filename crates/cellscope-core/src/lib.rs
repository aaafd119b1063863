//! # CellScope Core Library
//!
//! Core functionality for the CellScope battery monitoring software.
//!
//! This library provides:
//! - Binary frame codec and register semantics for smart BMS packs
//! - A retrying, single-flight transaction session over one serial link
//! - Stream reassembly for live reads and offline capture analysis
//! - Port probing/autodetection and endpoint enumeration
//! - Bounded recording of raw wire traffic with live subscriptions
//!
//! ## Example
//!
//! ```rust,ignore
//! use cellscope_core::protocol::{Session, SessionConfig};
//!
//! let session = Session::new(SessionConfig::default());
//! session.connect_port("/dev/ttyUSB0").await?;
//!
//! let telemetry = session.read_telemetry().await?;
//! println!("pack: {:.2} V at {:.2} A", telemetry.pack_voltage, telemetry.current);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod protocol;
pub mod telemetry;
pub mod traffic;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ConfigSnapshot;
    pub use crate::protocol::{
        DetectedEndpoint, FrameAssembler, PortInfo, ProtocolError, Session, SessionConfig,
        SessionState, Transport,
    };
    pub use crate::telemetry::{CellVoltages, ProtectionFlags, TelemetrySnapshot};
    pub use crate::traffic::{Direction, TrafficEvent, TrafficRecorder};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
