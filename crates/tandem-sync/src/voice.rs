//! Voice channel collaborator.

use tandem_common::VoiceSignal;

/// Audio channel owned by the host and driven by the workspace lifecycle.
pub trait VoiceChannel {
    /// The workspace became ready in `room`.
    fn join(&mut self, room: &str);

    /// A peer sent negotiation data.
    fn signal(&mut self, signal: &VoiceSignal);

    /// The workspace is shutting down.
    fn leave(&mut self);
}
