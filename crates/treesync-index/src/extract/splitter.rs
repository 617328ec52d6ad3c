//! Blank-line paragraph splitter with line tracking.

use super::{RawSpan, Splitter};

/// Default upper bound on span length in characters.
pub const DEFAULT_MAX_CHARS: usize = 2000;

/// Language-agnostic splitter.
///
/// Consecutive non-blank lines form a paragraph; paragraphs are packed
/// into spans of at most `max_chars` characters. A paragraph longer than
/// the limit is cut at line boundaries. Span content is the exact source
/// lines it covers.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphSplitter {
    max_chars: usize,
}

impl ParagraphSplitter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    /// Cut an oversized paragraph into line ranges that fit.
    fn fit(&self, lines: &[&str], start: usize, end: usize) -> Vec<(usize, usize)> {
        if span_len(lines, start, end) <= self.max_chars {
            return vec![(start, end)];
        }
        let mut pieces = Vec::new();
        let mut piece_start = start;
        for i in start..=end {
            if i > piece_start && span_len(lines, piece_start, i) > self.max_chars {
                pieces.push((piece_start, i - 1));
                piece_start = i;
            }
        }
        pieces.push((piece_start, end));
        pieces
    }
}

impl Default for ParagraphSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

/// Length of lines `start..=end` joined with newlines.
fn span_len(lines: &[&str], start: usize, end: usize) -> usize {
    lines[start..=end].iter().map(|l| l.len()).sum::<usize>() + (end - start)
}

fn paragraphs(lines: &[&str]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut open: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), open) {
            (false, None) => open = Some(i),
            (true, Some(start)) => {
                out.push((start, i - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        out.push((start, lines.len() - 1));
    }
    out
}

fn make_span(lines: &[&str], start: usize, end: usize) -> RawSpan {
    RawSpan {
        content: lines[start..=end].join("\n"),
        start_line: Some(start + 1),
        end_line: Some(end + 1),
    }
}

impl Splitter for ParagraphSplitter {
    fn split(&self, content: &str, _lang: &str) -> Vec<RawSpan> {
        let lines: Vec<&str> = content.lines().collect();
        let mut spans = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for (start, end) in paragraphs(&lines) {
            for (s, e) in self.fit(&lines, start, end) {
                current = match current {
                    None => Some((s, e)),
                    Some((cs, ce)) if span_len(&lines, cs, e) > self.max_chars => {
                        spans.push(make_span(&lines, cs, ce));
                        Some((s, e))
                    }
                    Some((cs, _)) => Some((cs, e)),
                };
            }
        }
        if let Some((cs, ce)) = current {
            spans.push(make_span(&lines, cs, ce));
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_span() {
        let spans = ParagraphSplitter::default().split("a\nb\n\nc", "markdown");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].content, "a\nb\n\nc");
        assert_eq!(spans[0].start_line, Some(1));
        assert_eq!(spans[0].end_line, Some(4));
    }

    #[test]
    fn test_splits_on_paragraphs() {
        let spans = ParagraphSplitter::new(3).split("a\nb\n\nc", "markdown");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].content, "a\nb");
        assert_eq!(spans[1].content, "c");
        assert_eq!(spans[1].start_line, Some(4));
        assert_eq!(spans[1].end_line, Some(4));
    }

    #[test]
    fn test_oversized_paragraph_cut_at_lines() {
        let text = "aaaa\nbbbb\ncccc";
        let spans = ParagraphSplitter::new(9).split(text, "python");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].content, "aaaa\nbbbb");
        assert_eq!(spans[1].content, "cccc");
        assert_eq!(spans[1].start_line, Some(3));
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(ParagraphSplitter::default().split("", "python").is_empty());
        assert!(ParagraphSplitter::default().split("\n\n  \n", "python").is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = (0..40)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let splitter = ParagraphSplitter::new(30);
        assert_eq!(splitter.split(&text, "markdown"), splitter.split(&text, "markdown"));
    }
}
