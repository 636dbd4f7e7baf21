//! Source-position utilities shared by the parser and the diagnostics
//! machinery.

use nom_locate::LocatedSpan;
use serde::Serialize;
use std::fmt::{self, Formatter};

/// The input type fed to the parser: raw source text with position tracking.
pub type RawSpan<'a> = LocatedSpan<&'a str>;

/// A region of the source code, identified by byte offset and line/column
/// positions. Every AST node and every diagnostic carries one of these, so
/// that messages can point back at the offending source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    /// Byte offset of the start of the region
    pub offset: usize,
    /// Length of the region, in bytes
    pub length: usize,
    /// 1-based line of the first character
    pub start_line: usize,
    /// 1-based column of the first character
    pub start_col: usize,
    /// 1-based line of the character just past the region
    pub end_line: usize,
    /// 1-based column of the character just past the region
    pub end_col: usize,
}

impl Span {
    /// Build a span covering the full fragment of a raw parser span.
    pub fn from_raw_span(raw_span: &RawSpan<'_>) -> Self {
        let fragment: &str = raw_span.fragment();
        let start_line = raw_span.location_line() as usize;
        let start_col = raw_span.get_column();
        let (end_line, end_col) = match fragment.rfind('\n') {
            // Column restarts after the last contained line break
            Some(idx) => (
                start_line + fragment.matches('\n').count(),
                fragment.len() - idx,
            ),
            None => (start_line, start_col + fragment.len()),
        };
        Self {
            offset: raw_span.location_offset(),
            length: fragment.len(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Build a zero-length span at the position of a raw parser span. Used
    /// for syntax errors, where the fragment is just the remaining source.
    pub fn from_position(raw_span: &RawSpan<'_>) -> Self {
        let start_line = raw_span.location_line() as usize;
        let start_col = raw_span.get_column();
        Self {
            offset: raw_span.location_offset(),
            length: 0,
            start_line,
            start_col,
            end_line: start_line,
            end_col: start_col,
        }
    }

    /// Slice the region of source code that this span covers.
    pub fn get_source_slice<'a>(&self, src: &'a str) -> &'a str {
        &src[self.offset..self.offset + self.length]
    }
}

/// Write the source line a span starts on, with a caret marker underneath
/// the offending columns. Used by the alternate `Display` of error
/// collections.
pub fn fmt_src_highlights(
    f: &mut Formatter<'_>,
    span: &Span,
    src: &str,
) -> fmt::Result {
    let line = match src.lines().nth(span.start_line.saturating_sub(1)) {
        Some(line) => line,
        None => return Ok(()),
    };
    // At least one caret, even for zero-length (positional) spans
    let width = span
        .length
        .max(1)
        .min((line.len() + 1).saturating_sub(span.start_col).max(1));
    writeln!(f)?;
    writeln!(f, "{} | {}", span.start_line, line)?;
    write!(
        f,
        "{:pad$} | {:>carets$}",
        "",
        "^".repeat(width),
        pad = span.start_line.to_string().len(),
        carets = span.start_col - 1 + width,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_from_raw_span() {
        let raw = RawSpan::new("abc\ndef");
        let span = Span::from_raw_span(&raw);
        assert_eq!(
            span,
            Span {
                offset: 0,
                length: 7,
                start_line: 1,
                start_col: 1,
                end_line: 2,
                end_col: 4,
            }
        );
        assert_eq!(span.get_source_slice("abc\ndef"), "abc\ndef");
    }

    #[test]
    fn test_span_single_line() {
        let raw = RawSpan::new("hello");
        let span = Span::from_raw_span(&raw);
        assert_eq!(span.start_line, 1);
        assert_eq!(span.end_line, 1);
        assert_eq!(span.end_col, 6);
    }
}
