//! Notifications published to the host editor.

use serde::Serialize;
use smol_str::SmolStr;
use tandem_common::{ClientInfo, VoiceSignal};
use tokio::sync::mpsc;

use crate::presence::SelectionEntry;
use crate::translator::EditorChange;

/// Everything a workspace tells its host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkspaceEvent {
    /// Shared document is bound. Delivered once per session.
    Ready,
    /// A file was bound, with its full current content.
    CreateFile { path: SmolStr, content: String },
    CreateDir { path: SmolStr },
    DeleteFile { path: SmolStr },
    /// A file was edited by another participant.
    ChangeFile { path: SmolStr, change: EditorChange },
    /// Live selections of every other participant.
    ChangeSelection { entries: Vec<SelectionEntry> },
    /// Our participant id was assigned.
    Id { participant: SmolStr },
    Client(ClientInfo),
    Voice(VoiceSignal),
    Peers { peers: Vec<SmolStr> },
    LostPeer { participant: SmolStr },
}

/// Fan-out of [`WorkspaceEvent`]s, one unbounded queue per subscriber.
///
/// Nothing is dropped for a slow subscriber; a subscriber that is gone is
/// removed on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<WorkspaceEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<WorkspaceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: WorkspaceEvent) {
        tracing::trace!(?event, "emit");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
