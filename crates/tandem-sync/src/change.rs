//! File tree and text changes, in both directions.
//!
//! Local calls write to the shared document. Remote changes come back as
//! document changes and become host events; text edits go through the position
//! translator first, which may be asynchronous, so they are queued and
//! delivered by [`Workspace::process_pending`], one unacknowledged edit per
//! path.

use std::convert::Infallible;
use std::rc::Rc;

use loro::LoroText;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::document::{DocumentHandle, IndexChange, insert_chunked};
use crate::error::SyncError;
use crate::events::{EventBus, WorkspaceEvent};
use crate::guard::{ExclusiveGuard, OwnedBusyMark};
use crate::translator::EditorChange;
use crate::tree::{TreeEntry, new_token};
use crate::workspace::{Lifecycle, PendingTranslation, Workspace};

/// An editor edit: at `start`, remove the span spelled by `removed` and put
/// `text` in its place.
///
/// Both sides are line lists, as editors report them; lines are joined with
/// `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    /// Character index of the edit.
    pub start: usize,
    pub removed: Vec<String>,
    pub text: Vec<String>,
}

impl FileDelta {
    pub fn new(start: usize, removed: Vec<String>, text: Vec<String>) -> Self {
        Self {
            start,
            removed,
            text,
        }
    }

    /// Pure insertion of `text` at `start`.
    pub fn insert(start: usize, text: &str) -> Self {
        Self::new(start, Vec::new(), text.split('\n').map(String::from).collect())
    }

    /// Characters removed: every line's length plus one per line break.
    pub fn removed_len(&self) -> usize {
        if self.removed.is_empty() {
            return 0;
        }
        let chars: usize = self.removed.iter().map(|line| line.chars().count()).sum();
        chars + self.removed.len() - 1
    }

    /// Replacement text.
    pub fn inserted(&self) -> String {
        self.text.join("\n")
    }
}

impl DocumentHandle {
    pub(crate) fn create_file(
        &self,
        path: &str,
        content: &str,
        chunk_size: usize,
    ) -> Result<(), SyncError> {
        let text = self.bind_new_file(path)?;
        insert_chunked(&text, 0, content, chunk_size)?;
        self.commit();
        Ok(())
    }

    pub(crate) fn create_dir(&self, path: &str) -> Result<(), SyncError> {
        self.tree().insert(path, TreeEntry::Directory.encode()?)?;
        self.commit();
        Ok(())
    }

    /// Bind `to` to the same entry as `from`. A missing `from` is a no-op.
    pub(crate) fn replace_file(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let Some(entry) = self.entry(from)? else {
            tracing::debug!(from, to, "nothing bound at source path");
            return Ok(());
        };
        self.tree().insert(to, entry.encode()?)?;
        self.commit();
        Ok(())
    }

    pub(crate) fn delete_file(&self, path: &str) -> Result<(), SyncError> {
        self.tree().delete(path)?;
        self.commit();
        Ok(())
    }

    /// Apply `delta` to the file at `path`. A missing file is created empty
    /// first; the removal span is clamped to the text.
    pub(crate) fn change_file(
        &self,
        path: &str,
        delta: &FileDelta,
        chunk_size: usize,
    ) -> Result<(), SyncError> {
        let text = match self.file_at(path)? {
            Some(text) => text,
            None => self.bind_new_file(path)?,
        };
        let len = text.len_unicode();
        let start = delta.start.min(len);
        let removed = delta.removed_len().min(len - start);
        if removed > 0 {
            text.delete(start, removed)?;
        }
        insert_chunked(&text, start, &delta.inserted(), chunk_size)?;
        self.commit();
        Ok(())
    }

    /// Allocate an empty file node and bind it at `path`. Not committed.
    fn bind_new_file(&self, path: &str) -> Result<LoroText, SyncError> {
        let node = new_token();
        let text = self.files().insert_container(&node, LoroText::new())?;
        self.tree().insert(path, TreeEntry::File { node }.encode()?)?;
        Ok(text)
    }
}

impl Workspace {
    /// Apply a local edit under the guard for `path`.
    ///
    /// The document reports the edit back while the path is still busy, so the
    /// report is dropped rather than echoed to the host. An edit arriving while
    /// a remote change for `path` awaits [`Workspace::applied`] is the editor
    /// reporting that change back, and is dropped too.
    pub(crate) fn apply_file_delta(
        &mut self,
        path: &str,
        delta: &FileDelta,
    ) -> Result<(), SyncError> {
        if self.deliveries.is_busy(path) {
            tracing::debug!(path, "dropping editor echo of remote change");
            return Ok(());
        }
        let guard = Rc::clone(&self.guard);
        let chunk_size = self.config.chunk_size;
        let applied = guard.run(path, || {
            let result = self.handle()?.change_file(path, delta, chunk_size);
            self.settle();
            result
        })?;
        if applied.is_none() {
            tracing::debug!(path, "change dropped, edit already in progress");
        }
        Ok(())
    }

    /// React to changed tree bindings.
    pub(crate) fn apply_tree_bindings(&mut self, bindings: Vec<(SmolStr, Option<String>)>) {
        let Lifecycle::Ready(bound) = &mut self.state else {
            return;
        };
        let bus: &mut EventBus = &mut self.bus;

        for (path, raw) in bindings {
            let entry = match raw.as_deref().map(TreeEntry::decode).transpose() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(%path, error = %e, "ignoring undecodable tree entry");
                    continue;
                }
            };
            match entry {
                None => {
                    bound.forget_file(&path);
                    bus.emit(WorkspaceEvent::DeleteFile { path });
                }
                Some(TreeEntry::Directory) => {
                    bound.forget_file(&path);
                    bus.emit(WorkspaceEvent::CreateDir { path });
                }
                Some(TreeEntry::File { node }) => {
                    let Some(text) = bound.handle().file_node(&node) else {
                        tracing::warn!(%path, %node, "file node missing");
                        continue;
                    };
                    bound.observe_file(&path, &text);
                    bus.emit(WorkspaceEvent::CreateFile {
                        path,
                        content: text.to_string(),
                    });
                }
            }
        }
    }

    /// Queue a reported text edit for translation, unless it is the report of
    /// our own edit.
    pub(crate) fn queue_remote_edit(&mut self, path: SmolStr, ops: Vec<IndexChange>) {
        let guard = Rc::clone(&self.guard);
        let queued = guard.run(&path, || {
            self.translations.extend(ops.into_iter().map(|op| PendingTranslation {
                path: path.clone(),
                op,
            }));
            Ok::<_, Infallible>(())
        });
        if matches!(queued, Ok(None)) {
            tracing::trace!(%path, "suppressed report of local edit");
        }
    }

    /// Translate queued remote edits and publish them as
    /// [`WorkspaceEvent::ChangeFile`].
    ///
    /// Each delivered edit keeps its path busy until the host calls
    /// [`Workspace::applied`], and later edits for that path stay queued. The
    /// path is busy while its positions are looked up, so an edit reported back
    /// by the editor meanwhile is dropped. A delete needs two positions; they
    /// are looked up one after the other. An edit whose position cannot be
    /// found is dropped and releases the path.
    pub async fn process_pending(&mut self) {
        while let Some((PendingTranslation { path, op }, mark)) = self.next_delivery() {
            let change = match op {
                IndexChange::Insert { index, text } => self
                    .translator
                    .translate(&path, index)
                    .await
                    .map(|at| EditorChange {
                        from: at,
                        to: at,
                        text,
                    }),
                IndexChange::Delete { index, len } => {
                    match self.translator.translate(&path, index).await {
                        Some(from) => self
                            .translator
                            .translate(&path, index + len)
                            .await
                            .map(|to| EditorChange {
                                from,
                                to,
                                text: String::new(),
                            }),
                        None => None,
                    }
                }
            };
            let Some(change) = change else {
                continue;
            };
            self.awaiting.insert(mark.key().clone(), mark);
            self.bus.emit(WorkspaceEvent::ChangeFile { path, change });
        }
    }

    /// Oldest queued edit whose path has nothing in flight, with that path
    /// marked busy.
    fn next_delivery(&mut self) -> Option<(PendingTranslation, OwnedBusyMark)> {
        let index = self
            .translations
            .iter()
            .position(|pending| !self.deliveries.is_busy(&pending.path))?;
        let pending = self.translations.remove(index)?;
        let mark = ExclusiveGuard::try_enter_owned(&self.deliveries, &pending.path)?;
        Some((pending, mark))
    }

    /// Number of remote edits waiting for translation.
    pub fn pending_translations(&self) -> usize {
        self.translations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_removed_len_counts_line_breaks() {
        assert_eq!(FileDelta::new(0, vec![], lines(&["x"])).removed_len(), 0);
        assert_eq!(FileDelta::new(0, lines(&["abc"]), vec![]).removed_len(), 3);
        assert_eq!(FileDelta::new(0, lines(&["", ""]), vec![]).removed_len(), 1);
        assert_eq!(FileDelta::new(0, lines(&["ab", "cd"]), vec![]).removed_len(), 5);
    }

    #[test]
    fn test_inserted_joins_lines() {
        let delta = FileDelta::new(0, vec![], lines(&["ab", "cd"]));
        assert_eq!(delta.inserted(), "ab\ncd");
        assert_eq!(FileDelta::insert(3, "x\ny").text, lines(&["x", "y"]));
    }

    #[test]
    fn test_change_file_creates_missing_file() {
        let handle = DocumentHandle::local("room");
        let delta = FileDelta::new(0, vec![], lines(&["ab", "cd"]));
        handle.change_file("a.rs", &delta, 64).unwrap();

        let text = handle.file_at("a.rs").unwrap().unwrap();
        assert_eq!(text.to_string(), "ab\ncd");
    }

    #[test]
    fn test_change_file_replaces_span() {
        let handle = DocumentHandle::local("room");
        handle.create_file("a.rs", "abc", 64).unwrap();

        let delta = FileDelta::new(1, lines(&["b"]), vec![]);
        handle.change_file("a.rs", &delta, 64).unwrap();
        assert_eq!(handle.file_at("a.rs").unwrap().unwrap().to_string(), "ac");
    }

    #[test]
    fn test_change_file_clamps_removal() {
        let handle = DocumentHandle::local("room");
        handle.create_file("a.rs", "abc", 64).unwrap();

        let delta = FileDelta::new(10, lines(&["zzzz"]), lines(&["!"]));
        handle.change_file("a.rs", &delta, 64).unwrap();
        assert_eq!(handle.file_at("a.rs").unwrap().unwrap().to_string(), "abc!");
    }

    #[test]
    fn test_change_file_rejects_directory() {
        let handle = DocumentHandle::local("room");
        handle.create_dir("src").unwrap();

        let err = handle
            .change_file("src", &FileDelta::insert(0, "x"), 64)
            .unwrap_err();
        assert!(matches!(err, SyncError::NotAFile { .. }));
    }

    #[test]
    fn test_replace_file_aliases_node() {
        let handle = DocumentHandle::local("room");
        handle.create_file("old.rs", "fn a() {}", 64).unwrap();
        handle.replace_file("old.rs", "new.rs").unwrap();

        assert_eq!(handle.entry("old.rs").unwrap(), handle.entry("new.rs").unwrap());
        handle
            .change_file("new.rs", &FileDelta::insert(0, "// "), 64)
            .unwrap();
        assert_eq!(
            handle.file_at("old.rs").unwrap().unwrap().to_string(),
            "// fn a() {}"
        );
    }

    #[test]
    fn test_replace_missing_source_is_noop() {
        let handle = DocumentHandle::local("room");
        handle.replace_file("ghost.rs", "new.rs").unwrap();
        assert_eq!(handle.entry("new.rs").unwrap(), None);
    }
}
