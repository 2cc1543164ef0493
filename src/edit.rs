use std::ops::Range;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// The fundamental edit primitive: byte-span replacement with verification.
///
/// Every match strategy compiles down to this single primitive. Strategies
/// only acquire spans; [`splice`] is the one place where text is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until spliced"]
pub struct Edit {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// New text to insert at [byte_start, byte_end)
    pub new_text: String,
    /// What we expect to find in the span before replacing it
    pub expected_before: EditVerification,
}

/// Verification strategy for edit safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (cheaper to carry for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("before-text verification failed at byte {byte_start}")]
    BeforeTextMismatch {
        byte_start: usize,
        byte_end: usize,
        found: String,
    },

    #[error("invalid byte range: [{byte_start}, {byte_end}) in document of length {len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        len: usize,
    },

    #[error("overlapping edits: [{}, {}) and [{}, {})", first.start, first.end, second.start, second.end)]
    Overlap {
        first: Range<usize>,
        second: Range<usize>,
    },
}

/// Outcome of splicing a batch of edits into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spliced {
    pub content: String,
    /// Edits whose span text actually changed
    pub applied: usize,
    /// Sum of `max(old, new)` span lengths over applied edits
    pub bytes_changed: usize,
}

impl Edit {
    /// Create a new edit with automatic verification generation.
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected_before: &str,
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected_before: EditVerification::from_text(expected_before),
        }
    }

    pub fn span(&self) -> Range<usize> {
        self.byte_start..self.byte_end
    }

    /// Validate the edit against the document.
    ///
    /// Returns the current text at [byte_start, byte_end) if validation succeeds.
    fn validate<'a>(&self, content: &'a str) -> Result<&'a str, EditError> {
        let current = content
            .get(self.byte_start..self.byte_end)
            .ok_or(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                len: content.len(),
            })?;

        // Already applied
        if current == self.new_text {
            return Ok(current);
        }

        if !self.expected_before.matches(current) {
            return Err(EditError::BeforeTextMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                found: current.to_string(),
            });
        }

        Ok(current)
    }
}

/// Apply a batch of non-overlapping edits to a document in one pass.
///
/// Every edit is validated before any text is produced, so a failing edit
/// never yields a half-spliced document.
///
/// This is the public, guarded entry point for callers that computed their
/// edits against an earlier snapshot of a file: a span whose text no longer
/// matches `expected_before` (exactly, or by xxh3 hash for large spans) is
/// rejected with [`EditError::BeforeTextMismatch`] instead of clobbering
/// whatever moved into it. The patcher locates and splices against the same
/// buffer, where verification holds by construction.
pub fn splice(content: &str, edits: &[Edit]) -> Result<Spliced, EditError> {
    let mut ordered: Vec<&Edit> = edits.iter().collect();
    ordered.sort_by_key(|edit| (edit.byte_start, edit.byte_end));

    for window in ordered.windows(2) {
        let (earlier, later) = (window[0], window[1]);
        if earlier.byte_end > later.byte_start {
            return Err(EditError::Overlap {
                first: earlier.span(),
                second: later.span(),
            });
        }
    }

    let mut currents = Vec::with_capacity(ordered.len());
    for edit in &ordered {
        currents.push(edit.validate(content)?);
    }

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    let mut applied = 0;
    let mut bytes_changed = 0;

    for (edit, current) in ordered.iter().zip(currents) {
        out.push_str(&content[cursor..edit.byte_start]);
        out.push_str(&edit.new_text);
        cursor = edit.byte_end;

        if current != edit.new_text {
            applied += 1;
            bytes_changed += current.len().max(edit.new_text.len());
        }
    }
    out.push_str(&content[cursor..]);

    Ok(Spliced {
        content: out,
        applied,
        bytes_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_verification_exact_match() {
        let verify = EditVerification::ExactMatch("hello world".to_string());
        assert!(verify.matches("hello world"));
        assert!(!verify.matches("hello"));
    }

    #[test]
    fn test_edit_verification_hash() {
        let hash = xxh3_64(b"hello world");
        let verify = EditVerification::Hash(hash);
        assert!(verify.matches("hello world"));
        assert!(!verify.matches("goodbye world"));
    }

    #[test]
    fn test_edit_verification_from_text_large() {
        let text = "x".repeat(2000);
        assert!(matches!(
            EditVerification::from_text(&text),
            EditVerification::Hash(_)
        ));
        assert!(matches!(
            EditVerification::from_text("small"),
            EditVerification::ExactMatch(_)
        ));
    }

    #[test]
    fn test_splice_invalid_range() {
        let edit = Edit::new(5, 20, "replacement", "");
        let result = splice("hello world", &[edit]);
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_inverted_range() {
        let edit = Edit::new(10, 5, "replacement", "");
        let result = splice("hello world", &[edit]);
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_rejects_non_char_boundary() {
        // 'é' is two bytes; offset 1 splits it
        let edit = Edit::new(1, 2, "x", "");
        let result = splice("é", &[edit]);
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_before_text_mismatch() {
        let edit = Edit::new(0, 5, "HELLO", "jello");
        let result = splice("hello world", &[edit]);
        assert!(matches!(result, Err(EditError::BeforeTextMismatch { .. })));
    }

    #[test]
    fn test_splice_rejects_stale_snapshot_by_hash() {
        let snapshot = format!("[global]\n{}\n", "x".repeat(2048));
        let block = 9..9 + 2048;
        let edit = Edit::new(block.start, block.end, "y", &snapshot[block.clone()]);
        assert!(matches!(edit.expected_before, EditVerification::Hash(_)));

        // the file changed inside the span since the edit was computed
        let current = format!("[global]\n{}z\n", "x".repeat(2047));
        let result = splice(&current, &[edit.clone()]);
        assert!(matches!(result, Err(EditError::BeforeTextMismatch { .. })));

        let spliced = splice(&snapshot, &[edit]).unwrap();
        assert_eq!(spliced.content, "[global]\ny\n");
    }

    #[test]
    fn test_splice_already_applied_counts_nothing() {
        let edit = Edit::new(0, 5, "hello", "other");
        let spliced = splice("hello world", &[edit]).unwrap();
        assert_eq!(spliced.content, "hello world");
        assert_eq!(spliced.applied, 0);
        assert_eq!(spliced.bytes_changed, 0);
    }

    #[test]
    fn test_splice_batch_out_of_order() {
        let content = "line1\nline2\nline3\n";
        let edits = vec![
            Edit::new(12, 17, "LINE3", "line3"),
            Edit::new(0, 5, "L1", "line1"),
            Edit::new(6, 11, "LINE_TWO", "line2"),
        ];

        let spliced = splice(content, &edits).unwrap();
        assert_eq!(spliced.content, "L1\nLINE_TWO\nLINE3\n");
        assert_eq!(spliced.applied, 3);
        assert_eq!(spliced.bytes_changed, 5 + 8 + 5);
    }

    #[test]
    fn test_splice_overlap_rejected() {
        let edits = vec![Edit::new(0, 5, "a", "hello"), Edit::new(3, 8, "b", "lo wo")];
        let result = splice("hello world", &edits);
        assert!(matches!(result, Err(EditError::Overlap { .. })));
    }

    #[test]
    fn test_splice_empty_batch_is_identity() {
        let spliced = splice("unchanged", &[]).unwrap();
        assert_eq!(spliced.content, "unchanged");
        assert_eq!(spliced.applied, 0);
    }
}
