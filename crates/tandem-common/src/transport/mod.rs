//! Transport layer seen from the synchronization core.
//!
//! The connector itself (room membership, peer discovery, wire protocol) lives
//! outside this crate. What the core needs from it is small:
//! - `TransportSignal`: everything the connector reports back
//! - `Link`: the outbound half, used to publish local document updates
//! - `LoopbackHub`: an in-process connector joining replicas in one process

mod loopback;
mod signal;

use miette::Diagnostic;

pub use loopback::{LoopbackHub, LoopbackLink};
pub use signal::{ClientInfo, TransportSignal, VoiceSignal};

/// Error type for transport operations
#[derive(Debug, thiserror::Error, Diagnostic)]
#[diagnostic(code(tandem::transport))]
pub enum TransportError {
    #[error("link is disconnected")]
    Closed,

    #[error("participant {0} is not a member of this room")]
    UnknownParticipant(String),
}

/// Outbound half of a connection to a room.
pub trait Link {
    /// Publish an encoded document update to every other member.
    fn send_update(&mut self, update: Vec<u8>) -> Result<(), TransportError>;

    /// Leave the room. Further sends fail with [`TransportError::Closed`].
    fn disconnect(&mut self);

    /// Whether the link is still connected.
    fn is_connected(&self) -> bool;
}
