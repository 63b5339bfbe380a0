//! Loro-backed shared document handle.
//!
//! One `LoroDoc` per room holds three root containers:
//! - `tree`: path -> encoded [`TreeEntry`]
//! - `files`: node id -> `LoroText`
//! - `selections`: list of encoded selection entries
//!
//! Loro invokes subscribers from inside `commit`/`import` and requires them to
//! be `Send + Sync`, so subscribers only turn the diff into an owned
//! [`DocChange`] and queue it. The workspace drains that queue right after
//! each commit or import.

use std::collections::HashMap;
use std::sync::Arc;

use loro::event::{Diff, DiffEvent, ListDiffItem};
use loro::{
    Container, ContainerTrait, ExportMode, LoroDoc, LoroList, LoroMap, LoroText, LoroValue,
    Subscription, TextDelta, ValueOrContainer,
};
use smol_str::SmolStr;
use tandem_common::Link;
use tokio::sync::mpsc;

use crate::SyncError;
use crate::tree::TreeEntry;

const TREE: &str = "tree";
const FILES: &str = "files";
const SELECTIONS: &str = "selections";

/// Index-based edit reported by a text container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}

/// Owned copy of a container diff, queued by loro subscribers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DocChange {
    /// Tree bindings changed. `None` means the path was removed.
    Tree(Vec<(SmolStr, Option<String>)>),
    /// A file node bound at `path` was edited.
    Text { path: SmolStr, ops: Vec<IndexChange> },
    /// Entries were appended to or removed from the selection list.
    Selections { inserted: Vec<String>, deleted: usize },
}

/// Handles to the shared containers of one room.
pub struct DocumentHandle {
    doc: LoroDoc,
    tree: LoroMap,
    files: LoroMap,
    selections: LoroList,
    room: SmolStr,
    link: Option<Box<dyn Link>>,
}

impl DocumentHandle {
    /// Wrap a document. `link` receives every local update once bound.
    pub fn new(doc: LoroDoc, room: impl Into<SmolStr>, link: Option<Box<dyn Link>>) -> Self {
        let tree = doc.get_map(TREE);
        let files = doc.get_map(FILES);
        let selections = doc.get_list(SELECTIONS);
        Self {
            doc,
            tree,
            files,
            selections,
            room: room.into(),
            link,
        }
    }

    /// A standalone replica with no connection.
    pub fn local(room: impl Into<SmolStr>) -> Self {
        Self::new(LoroDoc::new(), room, None)
    }

    /// A standalone replica restored from a snapshot.
    pub fn from_snapshot(room: impl Into<SmolStr>, snapshot: &[u8]) -> Result<Self, SyncError> {
        let doc = LoroDoc::new();
        doc.import(snapshot)?;
        Ok(Self::new(doc, room, None))
    }

    pub fn room(&self) -> &SmolStr {
        &self.room
    }

    pub(crate) fn tree(&self) -> &LoroMap {
        &self.tree
    }

    pub(crate) fn files(&self) -> &LoroMap {
        &self.files
    }

    pub(crate) fn selections(&self) -> &LoroList {
        &self.selections
    }

    /// Export full snapshot.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, SyncError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| SyncError::Loro(e.to_string()))
    }

    /// Import remote changes.
    pub fn import(&self, data: &[u8]) -> Result<(), SyncError> {
        self.doc.import(data)?;
        Ok(())
    }

    /// Commit pending operations, firing subscribers.
    pub(crate) fn commit(&self) {
        self.doc.commit();
    }

    /// Decoded tree entry at `path`.
    pub(crate) fn entry(&self, path: &str) -> Result<Option<TreeEntry>, SyncError> {
        match self.tree.get(path).as_ref().and_then(value_string) {
            Some(raw) => Ok(Some(TreeEntry::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Text container for a node id.
    pub(crate) fn file_node(&self, node: &str) -> Option<LoroText> {
        match self.files.get(node)? {
            ValueOrContainer::Container(Container::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Text container bound at `path`, if `path` is a file.
    pub(crate) fn file_at(&self, path: &str) -> Result<Option<LoroText>, SyncError> {
        match self.entry(path)? {
            Some(TreeEntry::File { node }) => Ok(self.file_node(&node)),
            Some(TreeEntry::Directory) => Err(SyncError::NotAFile { path: path.into() }),
            None => Ok(None),
        }
    }

    /// Raw tree bindings, in map order.
    pub(crate) fn tree_bindings(&self) -> Vec<(SmolStr, Option<String>)> {
        let mut out = Vec::new();
        self.tree.for_each(|path, value| {
            out.push((SmolStr::new(path), value_string(&value)));
        });
        out
    }

    /// Leave the room without binding.
    pub(crate) fn disconnect(mut self) {
        if let Some(mut link) = self.link.take() {
            link.disconnect();
        }
    }

    /// Subscribe to the document and start forwarding local updates.
    pub(crate) fn bind(self) -> BoundDocument {
        let (sink, changes) = mpsc::unbounded_channel();
        let (update_tx, outbound) = mpsc::unbounded_channel();

        let tree_sub = {
            let sink = sink.clone();
            self.doc.subscribe(
                &self.tree.id(),
                Arc::new(move |event: DiffEvent| {
                    let mut bindings = Vec::new();
                    for container in event.events {
                        if let Diff::Map(delta) = container.diff {
                            for (key, value) in delta.updated.iter() {
                                bindings.push((
                                    SmolStr::new(key.to_string()),
                                    value.as_ref().and_then(value_string),
                                ));
                            }
                        }
                    }
                    if !bindings.is_empty() {
                        let _ = sink.send(DocChange::Tree(bindings));
                    }
                }),
            )
        };

        let selections_sub = {
            let sink = sink.clone();
            self.doc.subscribe(
                &self.selections.id(),
                Arc::new(move |event: DiffEvent| {
                    let mut inserted = Vec::new();
                    let mut deleted = 0;
                    for container in event.events {
                        if let Diff::List(items) = container.diff {
                            for item in items {
                                match item {
                                    ListDiffItem::Insert { insert, .. } => {
                                        inserted.extend(insert.iter().filter_map(value_string));
                                    }
                                    ListDiffItem::Delete { delete } => deleted += delete,
                                    ListDiffItem::Retain { .. } => {}
                                }
                            }
                        }
                    }
                    if !inserted.is_empty() || deleted > 0 {
                        let _ = sink.send(DocChange::Selections { inserted, deleted });
                    }
                }),
            )
        };

        let update_sub = self
            .doc
            .subscribe_local_update(Box::new(move |update| {
                let _ = update_tx.send(update.to_vec());
                true
            }));

        BoundDocument {
            handle: self,
            sink,
            changes,
            outbound,
            observers: HashMap::new(),
            _subscriptions: [tree_sub, selections_sub, update_sub],
        }
    }
}

/// A document handle with live subscriptions.
pub(crate) struct BoundDocument {
    handle: DocumentHandle,
    sink: mpsc::UnboundedSender<DocChange>,
    changes: mpsc::UnboundedReceiver<DocChange>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Text subscriptions by bound path.
    observers: HashMap<SmolStr, Subscription>,
    _subscriptions: [Subscription; 3],
}

impl BoundDocument {
    pub(crate) fn handle(&self) -> &DocumentHandle {
        &self.handle
    }

    /// Next queued change, if any.
    pub(crate) fn next_change(&mut self) -> Option<DocChange> {
        self.changes.try_recv().ok()
    }

    /// Watch `text` for edits, reported under `path`. Replaces any previous
    /// observer for `path`.
    pub(crate) fn observe_file(&mut self, path: &SmolStr, text: &LoroText) {
        let sink = self.sink.clone();
        let reported_path = path.clone();
        let subscription = self.handle.doc.subscribe(
            &text.id(),
            Arc::new(move |event: DiffEvent| {
                let mut ops = Vec::new();
                for container in event.events {
                    if let Diff::Text(delta) = container.diff {
                        ops.extend(index_changes(&delta));
                    }
                }
                if !ops.is_empty() {
                    let _ = sink.send(DocChange::Text {
                        path: reported_path.clone(),
                        ops,
                    });
                }
            }),
        );
        self.observers.insert(path.clone(), subscription);
    }

    /// Stop watching `path`. Returns whether an observer was registered.
    pub(crate) fn forget_file(&mut self, path: &str) -> bool {
        self.observers.remove(path).is_some()
    }

    pub(crate) fn is_observing(&self, path: &str) -> bool {
        self.observers.contains_key(path)
    }

    /// Hand queued local updates to the link.
    pub(crate) fn flush_outbound(&mut self) {
        while let Ok(update) = self.outbound.try_recv() {
            let Some(link) = self.handle.link.as_mut() else {
                continue;
            };
            if let Err(e) = link.send_update(update) {
                tracing::warn!(error = %e, "failed to publish local update");
            }
        }
    }

    /// Drop every subscription and leave the room.
    pub(crate) fn disconnect(mut self) {
        self.observers.clear();
        self.handle.disconnect();
    }
}

/// String payload of a primitive value.
pub(crate) fn value_string(value: &ValueOrContainer) -> Option<String> {
    match value {
        ValueOrContainer::Value(LoroValue::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

/// Flatten a text delta into positional inserts and deletes.
///
/// Each index is relative to the text as left by the previous op.
pub(crate) fn index_changes(delta: &[TextDelta]) -> Vec<IndexChange> {
    let mut index = 0;
    let mut ops = Vec::new();
    for item in delta {
        match item {
            TextDelta::Retain { retain, .. } => index += retain,
            TextDelta::Insert { insert, .. } => {
                ops.push(IndexChange::Insert {
                    index,
                    text: insert.clone(),
                });
                index += insert.chars().count();
            }
            TextDelta::Delete { delete } => ops.push(IndexChange::Delete {
                index,
                len: *delete,
            }),
        }
    }
    ops
}

/// Insert `content` at `index` in segments of at most `chunk_size` characters.
pub(crate) fn insert_chunked(
    text: &LoroText,
    index: usize,
    content: &str,
    chunk_size: usize,
) -> Result<(), SyncError> {
    let mut offset = index;
    let mut rest = content;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(chunk_size.max(1))
            .map_or(rest.len(), |(i, _)| i);
        let (chunk, tail) = rest.split_at(split);
        text.insert(offset, chunk)?;
        offset += chunk.chars().count();
        rest = tail;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_insert_is_transparent() {
        let doc = LoroDoc::new();
        let text = doc.get_text("t");
        let content: String = "héllo 🌍 wörld\n".repeat(40);

        insert_chunked(&text, 0, &content, 7).unwrap();
        assert_eq!(text.to_string(), content);
    }

    #[test]
    fn test_chunked_insert_at_offset() {
        let doc = LoroDoc::new();
        let text = doc.get_text("t");
        text.insert(0, "[]").unwrap();

        insert_chunked(&text, 1, "abcdefghij", 3).unwrap();
        assert_eq!(text.to_string(), "[abcdefghij]");
    }

    #[test]
    fn test_chunked_insert_empty() {
        let doc = LoroDoc::new();
        let text = doc.get_text("t");
        insert_chunked(&text, 0, "", 3).unwrap();
        assert_eq!(text.to_string(), "");
    }

    #[test]
    fn test_index_changes_track_offsets() {
        let delta = vec![
            TextDelta::Retain {
                retain: 2,
                attributes: None,
            },
            TextDelta::Insert {
                insert: "xy".into(),
                attributes: None,
            },
            TextDelta::Delete { delete: 3 },
        ];
        assert_eq!(
            index_changes(&delta),
            vec![
                IndexChange::Insert {
                    index: 2,
                    text: "xy".into()
                },
                IndexChange::Delete { index: 4, len: 3 },
            ]
        );
    }

    #[test]
    fn test_missing_entry_reads_as_none() {
        let handle = DocumentHandle::local("room");
        assert_eq!(handle.entry("nope.rs").unwrap(), None);
        assert!(handle.file_at("nope.rs").unwrap().is_none());
    }

    #[test]
    fn test_bound_document_reports_tree_and_text() {
        let mut bound = DocumentHandle::local("room").bind();
        bound.handle().create_file("a.rs", "ab", 64).unwrap();

        match bound.next_change() {
            Some(DocChange::Tree(bindings)) => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(bindings[0].0, "a.rs");
                assert!(bindings[0].1.is_some());
            }
            other => panic!("expected tree change, got {other:?}"),
        }
        assert_eq!(bound.next_change(), None);

        let text = bound.handle().file_at("a.rs").unwrap().unwrap();
        bound.observe_file(&"a.rs".into(), &text);
        text.insert(2, "c").unwrap();
        bound.handle().commit();
        assert_eq!(
            bound.next_change(),
            Some(DocChange::Text {
                path: "a.rs".into(),
                ops: vec![IndexChange::Insert {
                    index: 2,
                    text: "c".into()
                }],
            })
        );
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let handle = DocumentHandle::local("room");
        handle
            .tree()
            .insert("src", TreeEntry::Directory.encode().unwrap())
            .unwrap();
        handle.commit();

        let snapshot = handle.export_snapshot().unwrap();
        let restored = DocumentHandle::from_snapshot("room", &snapshot).unwrap();
        assert_eq!(restored.entry("src").unwrap(), Some(TreeEntry::Directory));
    }
}
