//! Source spans and span-carrying wrappers.

use std::ops::{Deref, Range};

/// Byte range into a source file.
pub type Span = Range<usize>;

/// A value paired with the source span it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }

    /// Transform the inner value, keeping the span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            value: f(self.value),
            span: self.span,
        }
    }

    pub fn as_ref(&self) -> Spanned<&T> {
        Spanned {
            value: &self.value,
            span: self.span.clone(),
        }
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Translate a byte offset into a line/column pair.
///
/// Columns count characters, not bytes. Offsets past the end clamp to the
/// end of the source.
pub fn position_at(source: &str, offset: usize) -> Position {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            line_start = idx + 1;
        }
    }
    let column = source
        .get(line_start..offset)
        .map(|s| s.chars().count())
        .unwrap_or(0)
        + 1;
    Position { line, column }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_first_line() {
        assert_eq!(position_at("key id int;", 4), Position { line: 1, column: 5 });
    }

    #[test]
    fn test_position_after_newlines() {
        let source = "key id int;\nkey name string;\n  select";
        let offset = source.find("select").unwrap();
        assert_eq!(position_at(source, offset), Position { line: 3, column: 3 });
    }

    #[test]
    fn test_position_clamps() {
        assert_eq!(position_at("ab", 99), Position { line: 1, column: 3 });
    }

    #[test]
    fn test_spanned_map_keeps_span() {
        let s = Spanned::new(2, 4..6).map(|v| v * 10);
        assert_eq!(s.value, 20);
        assert_eq!(s.span, 4..6);
        assert_eq!(*s, 20);
    }
}
