//! `"key": "value"` rewriting without a parser.
//!
//! Each line is tokenized into double-quoted literals. A token whose text
//! equals the key only counts when the very next token follows it after a
//! lone `:` or `=`, so a key string sitting in a value position, or inside
//! a longer literal, never matches.

use super::{lines_with_offsets, Occurrence};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedMatcher {
    key: String,
    replacement: String,
}

/// A double-quoted literal; `start` is the opening quote, `end` is one past
/// the closing quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    start: usize,
    end: usize,
}

impl Token {
    fn inner(&self) -> Range<usize> {
        self.start + 1..self.end - 1
    }
}

impl QuotedMatcher {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            replacement: escape(value),
        }
    }

    pub fn locate(&self, text: &str) -> Vec<Occurrence> {
        let mut found = Vec::new();

        for (offset, line) in lines_with_offsets(text) {
            let tokens = quoted_tokens(line);
            for pair in tokens.windows(2) {
                let (name, value) = (pair[0], pair[1]);
                if line[name.inner()] != *self.key {
                    continue;
                }
                if !matches!(line[name.end..value.start].trim(), ":" | "=") {
                    continue;
                }

                let inner = value.inner();
                let current = &line[inner.clone()];
                found.push(Occurrence {
                    span: offset + inner.start..offset + inner.end,
                    current: current.to_string(),
                    replacement: self.replacement.clone(),
                    value: unescape(current),
                });
            }
        }

        found
    }
}

fn quoted_tokens(line: &str) -> Vec<Token> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'"' {
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != b'"' {
            i += if bytes[i] == b'\\' { 2 } else { 1 };
        }
        if i >= bytes.len() {
            // unterminated literal
            break;
        }
        i += 1;
        tokens.push(Token { start, end: i });
    }

    tokens
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(next) => out.push(next),
                None => {}
            }
            continue;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(text: &str, found: &[Occurrence]) -> String {
        let mut out = text.to_string();
        for occ in found.iter().rev() {
            out.replace_range(occ.span.clone(), &occ.replacement);
        }
        out
    }

    #[test]
    fn test_replaces_value_after_colon() {
        let text = r#"{"share_name": "shared", "path": "/tmp/old"}"#;
        let matcher = QuotedMatcher::new("share_name", "pishare");
        let found = matcher.locate(text);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, "shared");
        assert_eq!(
            apply(text, &found),
            r#"{"share_name": "pishare", "path": "/tmp/old"}"#
        );
    }

    #[test]
    fn test_accepts_equals_separator() {
        let text = "\"user\" = \"pi\"\n";
        let found = QuotedMatcher::new("user", "cooper").locate(text);
        assert_eq!(apply(text, &found), "\"user\" = \"cooper\"\n");
    }

    #[test]
    fn test_key_in_value_position_is_ignored() {
        let text = r#"{"label": "path", "other": 1}"#;
        let found = QuotedMatcher::new("path", "/srv").locate(text);
        assert!(found.is_empty());
    }

    #[test]
    fn test_key_inside_longer_literal_is_ignored() {
        let text = r#"{"comment": "set path: here", "path_x": "a"}"#;
        let found = QuotedMatcher::new("path", "/srv").locate(text);
        assert!(found.is_empty());
    }

    #[test]
    fn test_escaped_quotes_do_not_split_tokens() {
        let text = r#"{"motd": "say \"hi\"", "host": "old"}"#;
        let found = QuotedMatcher::new("host", "new").locate(text);
        assert_eq!(found.len(), 1);
        assert_eq!(apply(text, &found), r#"{"motd": "say \"hi\"", "host": "new"}"#);
    }

    #[test]
    fn test_value_is_escaped_and_decoded() {
        let text = "\"motd\": \"x\"";
        let matcher = QuotedMatcher::new("motd", r#"a "b" c\d"#);
        let found = matcher.locate(text);
        let patched = apply(text, &found);
        assert_eq!(patched, r#""motd": "a \"b\" c\\d""#);

        let again = matcher.locate(&patched);
        assert!(again[0].is_current());
        assert_eq!(again[0].value, r#"a "b" c\d"#);
    }

    #[test]
    fn test_line_breaks_are_escaped() {
        let text = "{\"motd\": \"x\"}\n";
        let matcher = QuotedMatcher::new("motd", "a\nb\r\tc");
        let patched = apply(text, &matcher.locate(text));
        assert_eq!(patched, "{\"motd\": \"a\\nb\\r\\tc\"}\n");
        assert_eq!(patched.lines().count(), 1);

        let again = matcher.locate(&patched);
        assert_eq!(again.len(), 1);
        assert!(again[0].is_current());
        assert_eq!(again[0].value, "a\nb\r\tc");
    }

    #[test]
    fn test_every_line_is_scanned() {
        let text = "\"port\": \"1\",\n\"port\": \"2\"\n";
        let found = QuotedMatcher::new("port", "9").locate(text);
        assert_eq!(found.len(), 2);
        assert_eq!(apply(text, &found), "\"port\": \"9\",\n\"port\": \"9\"\n");
    }

    #[test]
    fn test_unterminated_literal_stops_the_line() {
        let text = "\"key\": \"value";
        assert!(QuotedMatcher::new("key", "x").locate(text).is_empty());
    }
}
