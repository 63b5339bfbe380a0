//! Live selections.
//!
//! Each participant keeps at most one entry in the shared selection list. An
//! entry is found again by its tracker token, so replacing a selection is a
//! delete of the last tracker we issued followed by an append.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::document::DocumentHandle;
use crate::error::SyncError;
use crate::events::WorkspaceEvent;
use crate::translator::Position;
use crate::tree::new_token;
use crate::workspace::Workspace;

/// One selected span. `anchor == head` is a bare cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub anchor: Position,
    pub head: Position,
}

impl SelectionRange {
    pub fn cursor(at: Position) -> Self {
        Self {
            anchor: at,
            head: at,
        }
    }
}

/// Selection reported by the local editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionUpdate {
    pub path: SmolStr,
    pub ranges: Vec<SelectionRange>,
}

/// A selection as stored in the shared list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntry {
    /// Author. Unset if the author had no id yet.
    pub participant: Option<SmolStr>,
    /// Token identifying this entry.
    pub tracker: SmolStr,
    pub path: SmolStr,
    pub ranges: Vec<SelectionRange>,
}

impl SelectionEntry {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn authored_by(&self, participant: Option<&SmolStr>) -> bool {
        self.participant.as_ref() == participant
    }
}

impl DocumentHandle {
    /// Decoded selection entries with their list index.
    pub(crate) fn selection_entries(&self) -> Vec<(usize, SelectionEntry)> {
        let list = self.selections();
        (0..list.len())
            .filter_map(|index| {
                let raw = crate::document::value_string(&list.get(index)?)?;
                match SelectionEntry::decode(&raw) {
                    Ok(entry) => Some((index, entry)),
                    Err(e) => {
                        tracing::warn!(index, error = %e, "skipping undecodable selection");
                        None
                    }
                }
            })
            .collect()
    }

    /// Append `entry`, first removing the entry tracked by `previous`.
    pub(crate) fn replace_selection(
        &self,
        entry: &SelectionEntry,
        previous: Option<&str>,
    ) -> Result<(), SyncError> {
        if let Some(previous) = previous {
            let found = self
                .selection_entries()
                .into_iter()
                .rev()
                .find(|(_, e)| e.tracker == previous);
            if let Some((index, _)) = found {
                self.selections().delete(index, 1)?;
            }
        }
        self.selections().push(entry.encode()?)?;
        self.commit();
        Ok(())
    }

    /// Remove every entry authored by `participant`. Returns how many went.
    pub(crate) fn remove_participant(&self, participant: &str) -> Result<usize, SyncError> {
        let doomed: Vec<usize> = self
            .selection_entries()
            .into_iter()
            .filter(|(_, e)| e.participant.as_deref() == Some(participant))
            .map(|(index, _)| index)
            .collect();
        // Back to front so earlier indices stay valid.
        for index in doomed.iter().rev() {
            self.selections().delete(*index, 1)?;
        }
        if !doomed.is_empty() {
            self.commit();
        }
        Ok(doomed.len())
    }
}

impl Workspace {
    /// Stamp `update` with our id and a fresh tracker and publish it in place
    /// of our previous selection.
    pub(crate) fn publish_selection(&mut self, update: SelectionUpdate) -> Result<(), SyncError> {
        let entry = SelectionEntry {
            participant: self.local_id.clone(),
            tracker: new_token(),
            path: update.path,
            ranges: update.ranges,
        };
        self.handle()?
            .replace_selection(&entry, self.last_tracker.as_deref())?;
        self.last_tracker = Some(entry.tracker);
        Ok(())
    }

    /// React to a change of the selection list.
    ///
    /// Entries we appended ourselves are not worth a notification. Removals
    /// are: a departed peer's cursor has to disappear from the editor.
    pub(crate) fn selections_changed(&mut self, inserted: Vec<String>, deleted: usize) {
        let local = self.local_id.as_ref();
        let foreign = inserted
            .iter()
            .filter_map(|raw| SelectionEntry::decode(raw).ok())
            .any(|entry| local.is_none() || !entry.authored_by(local));
        let removal_only = inserted.is_empty() && deleted > 0;
        if !foreign && !removal_only {
            return;
        }
        let entries = self.foreign_selections();
        self.bus.emit(WorkspaceEvent::ChangeSelection { entries });
    }

    fn foreign_selections(&self) -> Vec<SelectionEntry> {
        let Ok(handle) = self.handle() else {
            return Vec::new();
        };
        let local = self.local_id.as_ref();
        handle
            .selection_entries()
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.authored_by(local))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(participant: Option<&str>, tracker: &str) -> SelectionEntry {
        SelectionEntry {
            participant: participant.map(SmolStr::new),
            tracker: tracker.into(),
            path: "a.rs".into(),
            ranges: vec![SelectionRange::cursor(Position::new(0, 1))],
        }
    }

    #[test]
    fn test_replace_removes_previous_tracker() {
        let handle = DocumentHandle::local("room");
        handle.replace_selection(&entry(Some("p1"), "t1"), None).unwrap();
        handle
            .replace_selection(&entry(Some("p1"), "t2"), Some("t1"))
            .unwrap();

        let entries = handle.selection_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.tracker, "t2");
    }

    #[test]
    fn test_replace_with_unknown_tracker_appends() {
        let handle = DocumentHandle::local("room");
        handle.replace_selection(&entry(Some("p1"), "t1"), None).unwrap();
        handle
            .replace_selection(&entry(Some("p2"), "t9"), Some("gone"))
            .unwrap();
        assert_eq!(handle.selection_entries().len(), 2);
    }

    #[test]
    fn test_remove_participant_keeps_others() {
        let handle = DocumentHandle::local("room");
        for (who, tracker) in [("p1", "a"), ("p2", "b"), ("p1", "c"), ("p3", "d")] {
            handle.replace_selection(&entry(Some(who), tracker), None).unwrap();
        }

        assert_eq!(handle.remove_participant("p1").unwrap(), 2);
        let left: Vec<_> = handle
            .selection_entries()
            .into_iter()
            .map(|(_, e)| e.tracker)
            .collect();
        assert_eq!(left, vec![SmolStr::new("b"), SmolStr::new("d")]);
        assert_eq!(handle.remove_participant("nobody").unwrap(), 0);
    }

    #[test]
    fn test_entry_json_shape() {
        let raw = entry(None, "t").encode().unwrap();
        assert!(raw.contains(r#""participant":null"#));
        assert_eq!(SelectionEntry::decode(&raw).unwrap(), entry(None, "t"));
    }
}
