//! Source span tracking for error reporting.

use serde::{Deserialize, Serialize};

/// Represents a position in the source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Byte offset from the start of the file
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// Translate a position measured inside an embedded fragment so that it
    /// is relative to the file the fragment was cut from. `origin` is where
    /// the fragment starts in that file.
    pub fn relative_to(self, origin: Position) -> Position {
        let column = if self.line == 1 {
            origin.column + self.column - 1
        } else {
            self.column
        };
        Position::new(origin.line + self.line - 1, column, origin.offset + self.offset)
    }
}

/// Represents a span in the source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Start position
    pub start: Position,
    /// End position
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Create a span from byte offsets and source text
    pub fn from_offsets(source: &str, start_offset: usize, end_offset: usize) -> Self {
        let index = LineIndex::new(source);
        Self {
            start: index.position(start_offset),
            end: index.position(end_offset),
        }
    }

    /// Merge two spans into one that covers both
    pub fn merge(&self, other: &Span) -> Span {
        let start = if self.start.offset < other.start.offset {
            self.start
        } else {
            other.start
        };
        let end = if self.end.offset > other.end.offset {
            self.end
        } else {
            other.end
        };
        Span { start, end }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start.offset, span.len()).into()
    }
}

/// Byte offsets of every line start, used to turn offsets into positions
/// without rescanning the source for each token.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    source_len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            source_len: source.len(),
        }
    }

    /// Convert a byte offset to a position
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source_len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Position::new(line + 1, offset - self.line_starts[line] + 1, offset)
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.position(start), self.position(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_positions() {
        let index = LineIndex::new("var a;\nvar b;\n");
        assert_eq!(index.position(0), Position::new(1, 1, 0));
        assert_eq!(index.position(4), Position::new(1, 5, 4));
        assert_eq!(index.position(7), Position::new(2, 1, 7));
        assert_eq!(index.position(11), Position::new(2, 5, 11));
    }

    #[test]
    fn test_position_past_end_is_clamped() {
        let index = LineIndex::new("ab");
        assert_eq!(index.position(10), Position::new(1, 3, 2));
    }

    #[test]
    fn test_merge() {
        let source = "a + b";
        let left = Span::from_offsets(source, 0, 1);
        let right = Span::from_offsets(source, 4, 5);
        let merged = left.merge(&right);
        assert_eq!(merged.start.offset, 0);
        assert_eq!(merged.end.offset, 5);
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_relative_to_origin() {
        let origin = Position::new(3, 10, 40);
        assert_eq!(
            Position::new(1, 2, 1).relative_to(origin),
            Position::new(3, 11, 41)
        );
        assert_eq!(
            Position::new(2, 4, 8).relative_to(origin),
            Position::new(4, 4, 48)
        );
    }
}
