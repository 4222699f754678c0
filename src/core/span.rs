// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source positions shared by the lexer, parser and diagnostics.

/// An inclusive column range on one source line, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub col_start: usize,
    pub col_end: usize,
}

impl Span {
    pub fn new(line: u32, col_start: usize, col_end: usize) -> Self {
        Self {
            line,
            col_start,
            col_end,
        }
    }

    /// Span covering a single column.
    pub fn point(line: u32, col: usize) -> Self {
        Self {
            line,
            col_start: col,
            col_end: col,
        }
    }

    /// Smallest span covering both inputs. Lines are expected to match;
    /// when they do not, the earlier line wins so the caret stays anchored
    /// at the start of the statement.
    pub fn merge(self, other: Span) -> Span {
        if self.line != other.line {
            return if self.line < other.line { self } else { other };
        }
        Span {
            line: self.line,
            col_start: self.col_start.min(other.col_start),
            col_end: self.col_end.max(other.col_end),
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::point(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_widens_to_cover_both_spans() {
        let a = Span::new(4, 3, 7);
        let b = Span::new(4, 9, 12);
        assert_eq!(a.merge(b), Span::new(4, 3, 12));
    }

    #[test]
    fn merge_across_lines_keeps_earlier_line() {
        let a = Span::new(2, 5, 8);
        let b = Span::new(3, 1, 2);
        assert_eq!(a.merge(b), a);
    }
}
