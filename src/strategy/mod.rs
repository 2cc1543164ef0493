//! Span acquisition for each [`MatchStrategy`].
//!
//! Strategies never rewrite text themselves. They report [`Occurrence`]s
//! (a byte span, what is there now, and what should be there), which the
//! patcher turns into [`Edit`](crate::edit::Edit)s and splices in one pass.

pub mod capture;
pub mod ini;
pub mod json;
pub mod quoted;

use crate::error::PatchError;
use crate::request::{MatchStrategy, SubstitutionRule};
use std::cell::OnceCell;
use std::ops::Range;
use thiserror::Error;

pub use capture::CaptureMatcher;
pub use ini::IniMatcher;
pub use json::{JsonIndex, JsonMatcher};
pub use quoted::QuotedMatcher;

/// One located value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// Byte span of the value inside the document
    pub span: Range<usize>,
    /// Raw text currently occupying the span
    pub current: String,
    /// Raw text the span should hold once patched
    pub replacement: String,
    /// Current value as a human would read it (JSON strings decoded etc.)
    pub value: String,
}

impl Occurrence {
    pub fn is_current(&self) -> bool {
        self.current == self.replacement
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("{0}")]
    Malformed(String),
}

/// The text being patched, with lazily built format indexes shared by all
/// rules of one request.
pub struct Document<'a> {
    text: &'a str,
    json: OnceCell<Result<JsonIndex, String>>,
}

impl<'a> Document<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            json: OnceCell::new(),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn json(&self) -> Result<&JsonIndex, LocateError> {
        self.json
            .get_or_init(|| JsonIndex::build(self.text))
            .as_ref()
            .map_err(|reason| LocateError::Malformed(reason.clone()))
    }
}

/// A rule compiled against its strategy, ready to scan documents.
#[derive(Debug, Clone)]
pub enum Matcher {
    Quoted(QuotedMatcher),
    Json(JsonMatcher),
    Capture(CaptureMatcher),
    Ini(IniMatcher),
}

impl Matcher {
    pub fn compile(rule: &SubstitutionRule) -> Result<Self, PatchError> {
        Ok(match &rule.strategy {
            MatchStrategy::ExactQuoted => Matcher::Quoted(QuotedMatcher::new(&rule.key, &rule.value)),
            MatchStrategy::KeyValueJson => Matcher::Json(JsonMatcher::new(&rule.key, &rule.value)?),
            MatchStrategy::RegexCapture { pattern } => {
                single_line(rule)?;
                Matcher::Capture(CaptureMatcher::new(&rule.key, pattern, &rule.value)?)
            }
            MatchStrategy::IniValue => {
                single_line(rule)?;
                Matcher::Ini(IniMatcher::new(&rule.key, &rule.value))
            }
        })
    }

    /// Locate every occurrence, in document order.
    pub fn locate(&self, document: &Document<'_>) -> Result<Vec<Occurrence>, LocateError> {
        match self {
            Matcher::Quoted(m) => Ok(m.locate(document.text())),
            Matcher::Json(m) => Ok(m.locate(document.text(), document.json()?)),
            Matcher::Capture(m) => Ok(m.locate(document.text())),
            Matcher::Ini(m) => Ok(m.locate(document.text())),
        }
    }
}

/// Line-oriented strategies splice the value into a single line; a line
/// terminator would inject new lines that the next run matches again.
fn single_line(rule: &SubstitutionRule) -> Result<(), PatchError> {
    if rule.value.contains(|ch: char| ch == '\n' || ch == '\r') {
        return Err(PatchError::InvalidPattern {
            key: rule.key.clone(),
            reason: format!("{} values cannot contain line breaks", rule.strategy),
        });
    }
    Ok(())
}

/// Lines of `text` with their starting byte offsets, line terminators
/// (`\n` or `\r\n`) stripped.
pub(crate) fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        (start, line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_with_offsets_handles_crlf() {
        let lines: Vec<_> = lines_with_offsets("a\r\nbc\nd").collect();
        assert_eq!(lines, vec![(0, "a"), (3, "bc"), (6, "d")]);
    }

    #[test]
    fn test_document_reports_malformed_json_once_per_rule() {
        let document = Document::new("{ not json");
        assert!(matches!(document.json(), Err(LocateError::Malformed(_))));
        assert!(matches!(document.json(), Err(LocateError::Malformed(_))));
    }

    #[test]
    fn test_compile_rejects_multiline_values_for_line_strategies() {
        let rules = [
            SubstitutionRule::ini("pishare.path", "/srv\nguest ok = yes"),
            SubstitutionRule::regex("home", r"^HOME=(.*)$", "/srv\r\nEVIL=1"),
        ];
        for rule in &rules {
            match Matcher::compile(rule) {
                Err(PatchError::InvalidPattern { key, reason }) => {
                    assert_eq!(key, rule.key);
                    assert!(reason.contains("line breaks"));
                }
                other => panic!("expected InvalidPattern, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_compile_accepts_multiline_values_for_escaping_strategies() {
        assert!(Matcher::compile(&SubstitutionRule::json("motd", "a\nb")).is_ok());
        assert!(Matcher::compile(&SubstitutionRule::quoted("motd", "a\nb")).is_ok());
    }

    #[test]
    fn test_compile_rejects_pattern_without_group() {
        let rule = SubstitutionRule::regex("port", r"port\s*=\s*\d+", "8080");
        assert!(matches!(
            Matcher::compile(&rule),
            Err(PatchError::InvalidPattern { .. })
        ));
    }
}
