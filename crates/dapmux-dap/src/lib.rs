//! dapmux-dap — Debug Adapter Protocol client.
//!
//! Implements the DAP wire format, framed message codec, request/response
//! correlation over adapter stdio or TCP, and the multi-session routing
//! needed for adapters that spawn child debug targets.

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod process;
pub mod protocol;
pub mod router;

// Re-export key types for convenience.
pub use capabilities::AdapterCapabilities;
pub use client::{ClientEvent, ClientTimeouts, DapClient};
pub use codec::{encode_message, FrameDecoder};
pub use connection::{DapConnection, PendingReply, DEFAULT_REQUEST_TIMEOUT};
pub use error::DapError;
pub use process::{AdapterCommand, AdapterProcess, TransportMode};
pub use protocol::*;
pub use router::{ChildSession, SessionRouter};
