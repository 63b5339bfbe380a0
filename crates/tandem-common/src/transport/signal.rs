//! Signals raised by the connector.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Display info for another member of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Participant id assigned by the connector.
    pub participant: SmolStr,
    /// Display name chosen by the participant.
    pub nickname: SmolStr,
}

/// Opaque voice-channel negotiation payload from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSignal {
    /// Sender's participant id.
    pub from: SmolStr,
    /// Payload for the voice collaborator (SDP, ICE candidate, ...).
    pub payload: Vec<u8>,
}

/// Everything the connector reports to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// Our own participant id. Delivered once, some time after joining.
    Id(SmolStr),
    /// Another member announced itself.
    Client(ClientInfo),
    /// Voice-channel negotiation from a peer.
    Voice(VoiceSignal),
    /// Current room membership, including ourselves.
    Peers(Vec<SmolStr>),
    /// A member left the room.
    LostPeer(SmolStr),
    /// Encoded document update from another member.
    Update(Vec<u8>),
}

impl TransportSignal {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Client(_) => "client",
            Self::Voice(_) => "voice",
            Self::Peers(_) => "peers",
            Self::LostPeer(_) => "lost_peer",
            Self::Update(_) => "update",
        }
    }
}
