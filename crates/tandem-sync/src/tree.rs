//! Directory tree values.
//!
//! The tree is a flat map from path to entry. File contents live in a
//! separate map keyed by node id, so several paths may point at one node.

use rand::Rng;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Value bound to a path in the directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeEntry {
    /// Directory marker.
    Directory,
    /// A file backed by the text node with this id.
    File { node: SmolStr },
}

/// Whether a path names a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

impl TreeEntry {
    /// Entry for a freshly allocated file node.
    pub fn new_file() -> Self {
        Self::File { node: new_token() }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Directory => EntryKind::Directory,
            Self::File { .. } => EntryKind::File,
        }
    }

    pub fn node(&self) -> Option<&SmolStr> {
        match self {
            Self::File { node } => Some(node),
            Self::Directory => None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Random 64-bit token, hex encoded. Used for node ids and selection trackers.
pub(crate) fn new_token() -> SmolStr {
    let value: u64 = rand::rng().random();
    format_smolstr!("{value:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_encoding() {
        let raw = TreeEntry::Directory.encode().unwrap();
        assert_eq!(raw, r#"{"kind":"directory"}"#);
        assert_eq!(TreeEntry::decode(&raw).unwrap(), TreeEntry::Directory);
    }

    #[test]
    fn test_file_entries_get_distinct_nodes() {
        let a = TreeEntry::new_file();
        let b = TreeEntry::new_file();
        assert_ne!(a.node(), b.node());
        assert_eq!(a.kind(), EntryKind::File);
        assert_eq!(a.node().map(|n| n.len()), Some(16));
    }

    #[test]
    fn test_decode_rejects_foreign_values() {
        assert!(TreeEntry::decode("true").is_err());
        assert!(TreeEntry::decode(r#"{"kind":"socket"}"#).is_err());
    }
}
