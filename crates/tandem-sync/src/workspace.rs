//! Workspace lifecycle.
//!
//! A [`Workspace`] starts out connecting. Calls that need the shared document
//! before it is bound are queued and replayed in call order once it is, right
//! after the single [`WorkspaceEvent::Ready`]. After [`Workspace::destroy`]
//! every call is a no-op.
//!
//! Remote edits reach the host one [`WorkspaceEvent::ChangeFile`] at a time
//! per path. The host applies the change to its buffer, then calls
//! [`Workspace::applied`]; until then the path stays busy, so the next remote
//! edit for it is not translated against a buffer that lacks this one, and
//! the editor reporting the applied change back through
//! [`Workspace::change_file`] is dropped.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use smol_str::SmolStr;
use tandem_common::TransportSignal;
use tokio::sync::{mpsc, oneshot};

use crate::change::FileDelta;
use crate::config::{SessionOptions, WorkspaceConfig};
use crate::document::{BoundDocument, DocChange, DocumentHandle, IndexChange};
use crate::error::SyncError;
use crate::events::{EventBus, WorkspaceEvent};
use crate::guard::{ExclusiveGuard, OwnedBusyMark};
use crate::presence::{SelectionEntry, SelectionUpdate};
use crate::provider::DocumentProvider;
use crate::translator::{PositionTranslator, RemovedTranslator, UnsetTranslator};
use crate::tree::{EntryKind, TreeEntry};
use crate::voice::VoiceChannel;

/// Lifecycle stage of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Waiting for the shared document.
    Connecting,
    /// Shared document bound.
    Ready,
    /// Torn down.
    Destroyed,
}

impl WorkspaceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

pub(crate) enum Lifecycle {
    Connecting { pending: Vec<PendingOp> },
    Ready(BoundDocument),
    Destroyed,
}

/// A call that needs the shared document.
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    CreateFile { path: SmolStr, content: String },
    CreateDir { path: SmolStr },
    ReplaceFile { from: SmolStr, to: SmolStr },
    DeleteFile { path: SmolStr },
    ChangeFile { path: SmolStr, delta: FileDelta },
    ChangeSelection(SelectionUpdate),
    Import(Vec<u8>),
    RemoveParticipant(SmolStr),
}

impl PendingOp {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateFile { .. } => "create_file",
            Self::CreateDir { .. } => "create_dir",
            Self::ReplaceFile { .. } => "replace_file",
            Self::DeleteFile { .. } => "delete_file",
            Self::ChangeFile { .. } => "change_file",
            Self::ChangeSelection(_) => "change_selection",
            Self::Import(_) => "import",
            Self::RemoveParticipant(_) => "remove_participant",
        }
    }
}

/// Index change waiting for position translation.
#[derive(Debug)]
pub(crate) struct PendingTranslation {
    pub(crate) path: SmolStr,
    pub(crate) op: IndexChange,
}

/// Requests accepted by [`Workspace::run`].
#[derive(Debug)]
pub enum Command {
    CreateFile { path: SmolStr, content: String },
    CreateDir { path: SmolStr },
    ReplaceFile { from: SmolStr, to: SmolStr },
    DeleteFile { path: SmolStr },
    ChangeFile { path: SmolStr, delta: FileDelta },
    ChangeSelection(SelectionUpdate),
    /// The host applied the last remote change for `path`.
    Applied { path: SmolStr },
    GetContent {
        path: SmolStr,
        reply: oneshot::Sender<Option<String>>,
    },
    Destroy,
}

/// Synchronization core for one room.
pub struct Workspace {
    pub(crate) config: WorkspaceConfig,
    pub(crate) state: Lifecycle,
    pub(crate) local_id: Option<SmolStr>,
    pub(crate) last_tracker: Option<SmolStr>,
    /// Paths with a local edit being written.
    pub(crate) guard: Rc<ExclusiveGuard>,
    /// Paths with a remote edit being delivered to the host.
    pub(crate) deliveries: Rc<ExclusiveGuard>,
    /// Delivered remote edits waiting for [`Workspace::applied`].
    pub(crate) awaiting: HashMap<SmolStr, OwnedBusyMark>,
    pub(crate) translator: Box<dyn PositionTranslator>,
    pub(crate) voice: Option<Box<dyn VoiceChannel>>,
    pub(crate) bus: EventBus,
    pub(crate) translations: VecDeque<PendingTranslation>,
}

impl Workspace {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            state: Lifecycle::Connecting {
                pending: Vec::new(),
            },
            local_id: None,
            last_tracker: None,
            guard: Rc::new(ExclusiveGuard::new()),
            deliveries: Rc::new(ExclusiveGuard::new()),
            awaiting: HashMap::new(),
            translator: Box::new(UnsetTranslator),
            voice: None,
            bus: EventBus::new(),
            translations: VecDeque::new(),
        }
    }

    /// Use `translator` for index to position conversion.
    pub fn with_translator(mut self, translator: impl PositionTranslator + 'static) -> Self {
        self.translator = Box::new(translator);
        self
    }

    /// Attach a voice channel driven by this workspace's lifecycle.
    pub fn with_voice(mut self, voice: impl VoiceChannel + 'static) -> Self {
        self.voice = Some(Box::new(voice));
        self
    }

    /// Replace the position translator.
    pub fn set_translator(&mut self, translator: impl PositionTranslator + 'static) {
        if self.state().is_destroyed() {
            tracing::debug!("ignoring translator for destroyed workspace");
            return;
        }
        self.translator = Box::new(translator);
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<WorkspaceEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> WorkspaceState {
        match self.state {
            Lifecycle::Connecting { .. } => WorkspaceState::Connecting,
            Lifecycle::Ready(_) => WorkspaceState::Ready,
            Lifecycle::Destroyed => WorkspaceState::Destroyed,
        }
    }

    /// Our participant id, once the connector has assigned it.
    pub fn participant(&self) -> Option<&SmolStr> {
        self.local_id.as_ref()
    }

    /// Bind the shared document: the `ready` transition.
    ///
    /// Emits [`WorkspaceEvent::Ready`], announces entries already in the tree,
    /// then replays queued calls in the order they were made.
    pub fn attach(&mut self, handle: DocumentHandle) -> Result<(), SyncError> {
        let pending = match std::mem::replace(&mut self.state, Lifecycle::Destroyed) {
            Lifecycle::Connecting { pending } => pending,
            Lifecycle::Ready(bound) => {
                self.state = Lifecycle::Ready(bound);
                return Err(SyncError::AlreadyReady);
            }
            Lifecycle::Destroyed => {
                handle.disconnect();
                return Err(SyncError::Destroyed);
            }
        };

        let room = handle.room().clone();
        let existing = handle.tree_bindings();
        self.state = Lifecycle::Ready(handle.bind());
        tracing::info!(%room, deferred = pending.len(), "workspace ready");

        if let Some(voice) = self.voice.as_mut() {
            voice.join(&room);
        }
        self.bus.emit(WorkspaceEvent::Ready);
        self.apply_tree_bindings(existing);

        for op in pending {
            let name = op.name();
            if let Err(e) = self.execute(op) {
                tracing::warn!(op = name, error = %e, "deferred operation failed");
            }
        }
        Ok(())
    }

    /// Set up the shared document through `provider` and attach it.
    pub async fn connect<P: DocumentProvider>(
        &mut self,
        provider: &mut P,
        options: &SessionOptions,
    ) -> Result<(), SyncError> {
        let handle = provider.configure(options).await?;
        self.attach(handle)
    }

    /// Bind `path` to a new file holding `content`.
    pub fn create_file(&mut self, path: &str, content: &str) -> Result<(), SyncError> {
        self.submit(PendingOp::CreateFile {
            path: path.into(),
            content: content.into(),
        })
    }

    /// Bind `path` to the directory marker.
    pub fn create_dir(&mut self, path: &str) -> Result<(), SyncError> {
        self.submit(PendingOp::CreateDir { path: path.into() })
    }

    /// Bind `to` to whatever `from` is bound to. `from` stays bound.
    pub fn replace_file(&mut self, from: &str, to: &str) -> Result<(), SyncError> {
        self.submit(PendingOp::ReplaceFile {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Remove the binding for `path`.
    pub fn delete_file(&mut self, path: &str) -> Result<(), SyncError> {
        self.submit(PendingOp::DeleteFile { path: path.into() })
    }

    /// Apply an editor delta to the file at `path`, creating it if needed.
    pub fn change_file(&mut self, path: &str, delta: FileDelta) -> Result<(), SyncError> {
        self.submit(PendingOp::ChangeFile {
            path: path.into(),
            delta,
        })
    }

    /// The host applied the last [`WorkspaceEvent::ChangeFile`] for `path`.
    ///
    /// Releases the path, so its next remote edit can be delivered.
    pub fn applied(&mut self, path: &str) {
        if self.awaiting.remove(path).is_none() {
            tracing::debug!(path, "no remote change awaiting application");
        }
    }

    /// Whether a remote change for `path` was delivered and not yet applied.
    pub fn awaiting_ack(&self, path: &str) -> bool {
        self.awaiting.contains_key(path)
    }

    /// Replace our live selection.
    pub fn change_selection(&mut self, update: SelectionUpdate) -> Result<(), SyncError> {
        self.submit(PendingOp::ChangeSelection(update))
    }

    /// Current text of the file at `path`.
    pub fn get_content(&self, path: &str) -> Option<String> {
        let handle = self.handle().ok()?;
        match handle.file_at(path) {
            Ok(text) => text.map(|t| t.to_string()),
            Err(e) => {
                tracing::debug!(path, error = %e, "no content");
                None
            }
        }
    }

    /// Every bound path, sorted.
    pub fn paths(&self) -> Vec<(SmolStr, EntryKind)> {
        let Ok(handle) = self.handle() else {
            return Vec::new();
        };
        let mut paths: Vec<_> = handle
            .tree_bindings()
            .into_iter()
            .filter_map(|(path, raw)| {
                let entry = TreeEntry::decode(&raw?).ok()?;
                Some((path, entry.kind()))
            })
            .collect();
        paths.sort();
        paths
    }

    /// Whether edits to `path` are being observed.
    pub fn is_observing(&self, path: &str) -> bool {
        match &self.state {
            Lifecycle::Ready(bound) => bound.is_observing(path),
            _ => false,
        }
    }

    /// Every live selection entry, ours included.
    pub fn selections(&self) -> Vec<SelectionEntry> {
        match self.handle() {
            Ok(handle) => handle
                .selection_entries()
                .into_iter()
                .map(|(_, entry)| entry)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Export the shared document.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SyncError> {
        self.handle()?.export_snapshot()
    }

    /// React to a connector signal.
    pub fn handle_signal(&mut self, signal: TransportSignal) -> Result<(), SyncError> {
        tracing::trace!(kind = signal.kind(), "transport signal");
        match signal {
            TransportSignal::Update(data) => self.submit(PendingOp::Import(data)),
            TransportSignal::Id(participant) => {
                if let Some(current) = &self.local_id {
                    tracing::warn!(%current, %participant, "participant id already assigned");
                    return Ok(());
                }
                tracing::info!(%participant, "participant id assigned");
                self.local_id = Some(participant.clone());
                self.bus.emit(WorkspaceEvent::Id { participant });
                Ok(())
            }
            TransportSignal::LostPeer(participant) => {
                self.submit(PendingOp::RemoveParticipant(participant.clone()))?;
                self.bus.emit(WorkspaceEvent::LostPeer { participant });
                Ok(())
            }
            TransportSignal::Voice(voice_signal) => {
                if let Some(voice) = self.voice.as_mut() {
                    voice.signal(&voice_signal);
                }
                self.bus.emit(WorkspaceEvent::Voice(voice_signal));
                Ok(())
            }
            TransportSignal::Client(client) => {
                self.bus.emit(WorkspaceEvent::Client(client));
                Ok(())
            }
            TransportSignal::Peers(peers) => {
                self.bus.emit(WorkspaceEvent::Peers { peers });
                Ok(())
            }
        }
    }

    /// Leave the room and release every handle.
    ///
    /// Queued calls are dropped; later calls do nothing. Translations already
    /// queued go through [`RemovedTranslator`] and are not delivered.
    pub fn destroy(&mut self) {
        match std::mem::replace(&mut self.state, Lifecycle::Destroyed) {
            Lifecycle::Ready(bound) => bound.disconnect(),
            Lifecycle::Connecting { pending } => {
                tracing::debug!(dropped = pending.len(), "destroyed before ready");
            }
            Lifecycle::Destroyed => return,
        }
        self.translator = Box::new(RemovedTranslator);
        self.awaiting.clear();
        if let Some(mut voice) = self.voice.take() {
            voice.leave();
        }
        tracing::info!("workspace destroyed");
    }

    /// Drive the workspace from channels until destroyed.
    ///
    /// Setup runs concurrently with the loop; commands and signals that arrive
    /// first are deferred like direct calls. Transport signals are handled
    /// before host commands, so a command sees every update received so far.
    pub async fn run<P: DocumentProvider>(
        mut self,
        mut provider: P,
        options: SessionOptions,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::UnboundedReceiver<TransportSignal>,
    ) -> Result<(), SyncError> {
        let mut setup = provider.configure(&options);
        let mut setup_done = false;
        let mut signals_open = true;

        loop {
            tokio::select! {
                biased;

                configured = &mut setup, if !setup_done => {
                    setup_done = true;
                    self.attach(configured?)?;
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => {
                        if let Err(e) = self.handle_signal(signal) {
                            tracing::warn!(error = %e, "failed to handle transport signal");
                        }
                    }
                    None => {
                        tracing::debug!("transport signal stream closed");
                        signals_open = false;
                    }
                },
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.destroy();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
            }
            self.process_pending().await;
        }
        Ok(())
    }

    /// Returns false once the workspace is destroyed.
    fn handle_command(&mut self, command: Command) -> bool {
        let result = match command {
            Command::CreateFile { path, content } => {
                self.submit(PendingOp::CreateFile { path, content })
            }
            Command::CreateDir { path } => self.submit(PendingOp::CreateDir { path }),
            Command::ReplaceFile { from, to } => self.submit(PendingOp::ReplaceFile { from, to }),
            Command::DeleteFile { path } => self.submit(PendingOp::DeleteFile { path }),
            Command::ChangeFile { path, delta } => {
                self.submit(PendingOp::ChangeFile { path, delta })
            }
            Command::ChangeSelection(update) => self.submit(PendingOp::ChangeSelection(update)),
            Command::Applied { path } => {
                self.applied(&path);
                Ok(())
            }
            Command::GetContent { path, reply } => {
                let _ = reply.send(self.get_content(&path));
                Ok(())
            }
            Command::Destroy => {
                self.destroy();
                return false;
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "command failed");
        }
        true
    }

    /// Run `op` now, queue it, or drop it, depending on the lifecycle stage.
    fn submit(&mut self, op: PendingOp) -> Result<(), SyncError> {
        match &mut self.state {
            Lifecycle::Connecting { pending } => {
                tracing::debug!(op = op.name(), "deferring until ready");
                pending.push(op);
                return Ok(());
            }
            Lifecycle::Destroyed => {
                tracing::debug!(op = op.name(), "dropping call on destroyed workspace");
                return Ok(());
            }
            Lifecycle::Ready(_) => {}
        }
        self.execute(op)
    }

    fn execute(&mut self, op: PendingOp) -> Result<(), SyncError> {
        let chunk_size = self.config.chunk_size;
        let result = match op {
            PendingOp::ChangeFile { path, delta } => return self.apply_file_delta(&path, &delta),
            PendingOp::ChangeSelection(update) => self.publish_selection(update),
            PendingOp::CreateFile { path, content } => self
                .handle()
                .and_then(|h| h.create_file(&path, &content, chunk_size)),
            PendingOp::CreateDir { path } => self.handle().and_then(|h| h.create_dir(&path)),
            PendingOp::ReplaceFile { from, to } => {
                self.handle().and_then(|h| h.replace_file(&from, &to))
            }
            PendingOp::DeleteFile { path } => self.handle().and_then(|h| h.delete_file(&path)),
            PendingOp::Import(data) => self.handle().and_then(|h| h.import(&data)),
            PendingOp::RemoveParticipant(participant) => self
                .handle()
                .and_then(|h| h.remove_participant(&participant))
                .map(|removed| {
                    tracing::debug!(%participant, removed, "pruned departed selections");
                }),
        };
        self.settle();
        result
    }

    pub(crate) fn handle(&self) -> Result<&DocumentHandle, SyncError> {
        match &self.state {
            Lifecycle::Ready(bound) => Ok(bound.handle()),
            Lifecycle::Connecting { .. } => Err(SyncError::NotReady),
            Lifecycle::Destroyed => Err(SyncError::Destroyed),
        }
    }

    /// Dispatch every queued document change, then publish local updates.
    pub(crate) fn settle(&mut self) {
        loop {
            let change = match &mut self.state {
                Lifecycle::Ready(bound) => bound.next_change(),
                _ => return,
            };
            let Some(change) = change else {
                break;
            };
            self.dispatch(change);
        }
        if let Lifecycle::Ready(bound) = &mut self.state {
            bound.flush_outbound();
        }
    }

    fn dispatch(&mut self, change: DocChange) {
        match change {
            DocChange::Tree(bindings) => self.apply_tree_bindings(bindings),
            DocChange::Text { path, ops } => self.queue_remote_edit(path, ops),
            DocChange::Selections { inserted, deleted } => {
                self.selections_changed(inserted, deleted)
            }
        }
    }
}
