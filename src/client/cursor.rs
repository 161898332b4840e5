//! Cursor and selection remapping across a full-text replacement.
//!
//! Positions are zero-based; columns count characters, not bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A selection; a bare cursor has `anchor == head`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub head: Position,
}

impl Selection {
    pub const fn cursor(at: Position) -> Self {
        Self { anchor: at, head: at }
    }

    pub fn is_cursor(&self) -> bool {
        self.anchor == self.head
    }
}

/// Map `old` from `old_text` into `new_text`.
///
/// The line and column are kept where they still exist and clamped to the
/// nearest valid position where they don't.
pub fn resolve_position(old: Position, old_text: &str, new_text: &str) -> Position {
    let old = clamp(old, old_text);
    clamp(old, new_text)
}

pub fn remap_selection(selection: Selection, old_text: &str, new_text: &str) -> Selection {
    Selection {
        anchor: resolve_position(selection.anchor, old_text, new_text),
        head: resolve_position(selection.head, old_text, new_text),
    }
}

/// Nearest valid position in `text`.
pub fn clamp(position: Position, text: &str) -> Position {
    let line_count = line_count(text);
    let line = position.line.min(line_count - 1);
    let column = position.column.min(line_len(text, line));
    Position { line, column }
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

fn line_len(text: &str, line: usize) -> usize {
    text.split('\n')
        .nth(line)
        .map(|l| l.strip_suffix('\r').unwrap_or(l).chars().count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_survives_when_it_still_exists() {
        let old = "fn main() {\n    let x = 1;\n}\n";
        let new = "fn main() {\n    let x = 2;\n    let y = 3;\n}\n";
        let at = Position::new(1, 11);
        assert_eq!(resolve_position(at, old, new), at);
    }

    #[test]
    fn test_line_clamps_to_last_line() {
        let old = "a\nb\nc\nd";
        let new = "a\nbb";
        assert_eq!(resolve_position(Position::new(3, 1), old, new), Position::new(1, 1));
    }

    #[test]
    fn test_column_clamps_to_line_end() {
        let old = "abcdef";
        let new = "ab";
        assert_eq!(resolve_position(Position::new(0, 5), old, new), Position::new(0, 2));
    }

    #[test]
    fn test_empty_new_text() {
        assert_eq!(resolve_position(Position::new(4, 4), "x\ny\nz\nw\nvvvv", ""), Position::default());
    }

    #[test]
    fn test_columns_count_chars_and_ignore_cr() {
        let text = "héllo\r\nwörld";
        assert_eq!(clamp(Position::new(0, 99), text), Position::new(0, 5));
        assert_eq!(clamp(Position::new(1, 99), text), Position::new(1, 5));
    }

    #[test]
    fn test_selection_remap() {
        let old = "one\ntwo\nthree";
        let new = "one\ntw";
        let selection = Selection {
            anchor: Position::new(0, 1),
            head: Position::new(2, 4),
        };
        let remapped = remap_selection(selection, old, new);
        assert_eq!(remapped.anchor, Position::new(0, 1));
        assert_eq!(remapped.head, Position::new(1, 2));
        assert!(!remapped.is_cursor());
    }
}
