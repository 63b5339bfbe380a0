//! Shared plumbing for tandem workspaces.
//!
//! - `transport`: signals delivered by the real-time connector, the [`Link`]
//!   a shared document uses to publish updates, and an in-process loopback
//!   hub for tests and demos
//! - `telemetry`: tracing subscriber setup for binaries

pub mod telemetry;
pub mod transport;

pub use transport::{
    ClientInfo, Link, LoopbackHub, LoopbackLink, TransportError, TransportSignal, VoiceSignal,
};
