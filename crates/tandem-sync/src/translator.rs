//! Index to line/column translation.
//!
//! Text containers address characters by index; editors address them by
//! line and column. The conversion belongs to the editor, so the workspace
//! asks a pluggable [`PositionTranslator`] and can have it swapped at runtime.

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

/// A line/column position in an editor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub ch: u32,
}

impl Position {
    pub fn new(line: u32, ch: u32) -> Self {
        Self { line, ch }
    }

    /// Position of character `index` in `text`, counting `\n` as a line break.
    ///
    /// Indices past the end clamp to the end of the text.
    pub fn from_index(text: &str, index: usize) -> Self {
        let mut line = 0;
        let mut ch = 0;
        for c in text.chars().take(index) {
            if c == '\n' {
                line += 1;
                ch = 0;
            } else {
                ch += 1;
            }
        }
        Self { line, ch }
    }
}

/// An edit in editor coordinates: replace `from..to` with `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorChange {
    pub from: Position,
    pub to: Position,
    pub text: String,
}

/// Converts a character index in a file into an editor position.
///
/// Resolving to `None` means no position is available; the change that needed
/// it is not delivered.
pub trait PositionTranslator {
    fn translate<'a>(
        &'a self,
        path: &'a str,
        index: usize,
    ) -> LocalBoxFuture<'a, Option<Position>>;
}

/// Translator installed until the host provides one.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsetTranslator;

impl PositionTranslator for UnsetTranslator {
    fn translate<'a>(
        &'a self,
        path: &'a str,
        index: usize,
    ) -> LocalBoxFuture<'a, Option<Position>> {
        tracing::warn!(path, index, "no position translator installed, dropping change");
        std::future::ready(None).boxed_local()
    }
}

/// Translator installed once the workspace is destroyed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemovedTranslator;

impl PositionTranslator for RemovedTranslator {
    fn translate<'a>(
        &'a self,
        path: &'a str,
        index: usize,
    ) -> LocalBoxFuture<'a, Option<Position>> {
        tracing::warn!(path, index, "position translator was removed, dropping change");
        std::future::ready(None).boxed_local()
    }
}

/// Adapter for synchronous translation closures.
pub struct FnTranslator<F>(F);

/// Wrap a closure as a [`PositionTranslator`].
pub fn from_fn<F>(f: F) -> FnTranslator<F>
where
    F: Fn(&str, usize) -> Option<Position>,
{
    FnTranslator(f)
}

impl<F> PositionTranslator for FnTranslator<F>
where
    F: Fn(&str, usize) -> Option<Position>,
{
    fn translate<'a>(
        &'a self,
        path: &'a str,
        index: usize,
    ) -> LocalBoxFuture<'a, Option<Position>> {
        std::future::ready((self.0)(path, index)).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index() {
        let text = "fn main() {\n    x\n}";
        assert_eq!(Position::from_index(text, 0), Position::new(0, 0));
        assert_eq!(Position::from_index(text, 11), Position::new(0, 11));
        assert_eq!(Position::from_index(text, 12), Position::new(1, 0));
        assert_eq!(Position::from_index(text, 16), Position::new(1, 4));
        assert_eq!(Position::from_index(text, 999), Position::new(2, 1));
    }

    #[test]
    fn test_from_index_counts_chars() {
        assert_eq!(Position::from_index("é🌍x", 2), Position::new(0, 2));
    }

    #[tokio::test]
    async fn test_unset_translator_yields_nothing() {
        assert_eq!(UnsetTranslator.translate("a.rs", 3).await, None);
        assert_eq!(RemovedTranslator.translate("a.rs", 3).await, None);
    }

    #[tokio::test]
    async fn test_fn_translator() {
        let translator = from_fn(|path, index| {
            (path == "a.rs").then(|| Position::new(0, index as u32))
        });
        assert_eq!(
            translator.translate("a.rs", 4).await,
            Some(Position::new(0, 4))
        );
        assert_eq!(translator.translate("b.rs", 4).await, None);
    }
}
