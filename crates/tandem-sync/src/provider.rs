//! Asynchronous setup of the shared document.

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use loro::LoroDoc;
use tandem_common::LoopbackLink;

use crate::config::SessionOptions;
use crate::document::DocumentHandle;
use crate::error::SyncError;

/// Produces the shared document for a room.
///
/// The returned future resolves once the document is usable; the workspace
/// defers handle-dependent calls until then.
pub trait DocumentProvider {
    fn configure(
        &mut self,
        options: &SessionOptions,
    ) -> LocalBoxFuture<'static, Result<DocumentHandle, SyncError>>;
}

/// Standalone replica, optionally seeded from a snapshot.
#[derive(Debug, Default, Clone)]
pub struct LocalProvider {
    snapshot: Option<Vec<u8>>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Vec<u8>) -> Self {
        Self {
            snapshot: Some(snapshot),
        }
    }
}

impl DocumentProvider for LocalProvider {
    fn configure(
        &mut self,
        options: &SessionOptions,
    ) -> LocalBoxFuture<'static, Result<DocumentHandle, SyncError>> {
        let room = options.room.clone();
        let snapshot = self.snapshot.clone();
        async move {
            match snapshot {
                Some(bytes) => DocumentHandle::from_snapshot(room, &bytes),
                None => Ok(DocumentHandle::local(room)),
            }
        }
        .boxed_local()
    }
}

/// Replica connected through a [`LoopbackLink`].
///
/// The document starts empty; history arrives as update signals on the
/// member's signal stream.
pub struct LoopbackProvider {
    link: Option<LoopbackLink>,
}

impl LoopbackProvider {
    pub fn new(link: LoopbackLink) -> Self {
        Self { link: Some(link) }
    }
}

impl DocumentProvider for LoopbackProvider {
    fn configure(
        &mut self,
        options: &SessionOptions,
    ) -> LocalBoxFuture<'static, Result<DocumentHandle, SyncError>> {
        let room = options.room.clone();
        let link = self.link.take();
        async move {
            let link = link.ok_or_else(|| SyncError::Setup("loopback link already used".into()))?;
            tracing::debug!(participant = %link.participant(), %room, "loopback document ready");
            Ok(DocumentHandle::new(LoroDoc::new(), room, Some(Box::new(link))))
        }
        .boxed_local()
    }
}
