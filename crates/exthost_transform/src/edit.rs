use std::cmp::Reverse;

use oxc_span::Span;

/// A replacement of the source bytes `start..end`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    start: u32,
    end: u32,
    replacement: String,
    seq: usize,
}

/// Span-based rewrites collected over one source text.
///
/// Edits are applied outermost first; an edit that overlaps one that was
/// already applied is dropped, so deleting a node also drops every rewrite
/// collected inside it.
#[derive(Debug, Default)]
pub struct Edits {
    edits: Vec<Edit>,
}

impl Edits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, start: u32, end: u32, replacement: impl Into<String>) {
        let seq = self.edits.len();
        self.edits.push(Edit {
            start,
            end,
            replacement: replacement.into(),
            seq,
        });
    }

    pub fn replace_span(&mut self, span: Span, replacement: impl Into<String>) {
        self.replace(span.start, span.end, replacement)
    }

    pub fn delete(&mut self, start: u32, end: u32) {
        if start < end {
            self.replace(start, end, "")
        }
    }

    pub fn delete_span(&mut self, span: Span) {
        self.delete(span.start, span.end)
    }

    pub fn insert(&mut self, at: u32, text: impl Into<String>) {
        self.replace(at, at, text)
    }

    pub fn extend(&mut self, other: Edits) {
        for edit in other.edits {
            self.replace(edit.start, edit.end, edit.replacement);
        }
    }


    /// Applies the edits to `source`, which must be the text the spans were
    /// taken from.
    pub fn apply(mut self, source: &str) -> String {
        self.edits
            .sort_by_key(|edit| (edit.start, Reverse(edit.end), edit.seq));

        let mut output = String::with_capacity(source.len());
        let mut cursor = 0usize;
        for edit in self.edits {
            let (start, end) = (edit.start as usize, edit.end as usize);
            if start < cursor || end > source.len() {
                continue;
            }
            output.push_str(&source[cursor..start]);
            output.push_str(&edit.replacement);
            cursor = end;
        }
        output.push_str(&source[cursor..]);
        output
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn applies_edits_in_source_order() {
        let mut edits = Edits::new();
        edits.replace(6, 11, "there");
        edits.delete(0, 1);
        edits.insert(11, "!");

        assert_eq!(edits.apply("hello world"), "ello there!");
    }

    #[test]
    fn outer_edit_wins_over_nested_ones() {
        let mut edits = Edits::new();
        edits.replace(4, 5, "b");
        edits.delete(2, 8);

        assert_eq!(edits.apply("0123456789"), "0189");
    }
}
