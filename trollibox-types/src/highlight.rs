//! Keyword highlighting for search results.
//!
//! The server reports every keyword match as a `[start, end)` byte span over
//! an attribute value. Spans from different keywords may overlap, so they are
//! merged into an ordered, non-overlapping set before the text is cut into
//! literal and highlighted segments.

use serde::{Deserialize, Serialize};

/// A `[start, end)` match over a string's byte indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

impl MatchSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Merge possibly-overlapping spans into a sorted, non-overlapping set.
///
/// Spans are ordered by start, then longer-first for equal starts, and folded
/// left to right: a span starting inside the previous output span extends it
/// (or is dropped when fully covered). Spans that merely touch stay separate.
pub fn merge_spans(spans: &[MatchSpan]) -> Vec<MatchSpan> {
    let mut sorted: Vec<MatchSpan> = spans.iter().copied().filter(|s| !s.is_empty()).collect();
    sorted.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut merged: Vec<MatchSpan> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match merged.last_mut() {
            Some(prev) if span.start < prev.end => {
                prev.end = prev.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }
    merged
}

/// A piece of a highlighted string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Highlight(&'a str),
}

impl<'a> Segment<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Segment::Literal(s) | Segment::Highlight(s) => s,
        }
    }
}

/// Lazily cuts a string into alternating literal/highlighted segments.
///
/// Concatenating every segment's text yields the original string.
pub struct Segments<'a> {
    text: &'a str,
    spans: std::vec::IntoIter<MatchSpan>,
    next_span: Option<MatchSpan>,
    pos: usize,
}

impl<'a> Segments<'a> {
    pub fn new(text: &'a str, spans: &[MatchSpan]) -> Self {
        let bounded: Vec<MatchSpan> = merge_spans(spans)
            .into_iter()
            .map(|s| MatchSpan::new(floor_boundary(text, s.start), floor_boundary(text, s.end)))
            .filter(|s| !s.is_empty())
            .collect();
        let mut spans = merge_spans(&bounded).into_iter();
        let next_span = spans.next();
        Self {
            text,
            spans,
            next_span,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }
        match self.next_span {
            Some(span) if span.start > self.pos => {
                let literal = &self.text[self.pos..span.start];
                self.pos = span.start;
                Some(Segment::Literal(literal))
            }
            Some(span) => {
                let highlighted = &self.text[self.pos..span.end];
                self.pos = span.end;
                self.next_span = self.spans.next();
                Some(Segment::Highlight(highlighted))
            }
            None => {
                let rest = &self.text[self.pos..];
                self.pos = self.text.len();
                Some(Segment::Literal(rest))
            }
        }
    }
}

/// Clamp an index into `text` and move it back onto a char boundary.
fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Escape the characters that are significant in HTML markup.
pub fn escape_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render `text` as HTML with every matched region wrapped in `<em>`.
pub fn highlight_html(text: &str, spans: &[MatchSpan]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 9);
    for segment in Segments::new(text, spans) {
        match segment {
            Segment::Literal(s) => out.push_str(&escape_markup(s)),
            Segment::Highlight(s) => {
                out.push_str("<em>");
                out.push_str(&escape_markup(s));
                out.push_str("</em>");
            }
        }
    }
    out
}
