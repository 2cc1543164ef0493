//! Structural field rewriting for JSON documents.
//!
//! The document is validated with `serde_json`, then indexed by a span
//! scanner that records where every field value lives. Rewrites replace
//! only a value's byte span, so key order, whitespace and every untouched
//! field come through byte-identical.
//!
//! Keys name a field (`"smb.conf"`) or, failing that, a dotted path from
//! the root (`share.path`). Array elements do
//! not contribute a path segment: `shares.path` names the `path` field of
//! every object in the `shares` array.

use super::Occurrence;
use crate::error::PatchError;
use serde_json::Value;
use std::ops::Range;

/// A field value located in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonField {
    pub path: Vec<String>,
    pub span: Range<usize>,
    /// False for object and array values
    pub scalar: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonIndex {
    fields: Vec<JsonField>,
}

impl JsonIndex {
    pub fn build(text: &str) -> Result<Self, String> {
        serde_json::from_str::<Value>(text).map_err(|err| err.to_string())?;

        let mut scanner = Scanner {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            path: Vec::new(),
            fields: Vec::new(),
        };
        scanner.skip_ws();
        scanner.value()?;

        Ok(Self {
            fields: scanner.fields,
        })
    }

    pub fn fields(&self) -> &[JsonField] {
        &self.fields
    }
}

/// Locates scalar fields by name.
///
/// A field named exactly `key` (say `"smb.conf"`) wins; only when none
/// exists is the key read as a dotted path from the root object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonMatcher {
    name: Vec<String>,
    path: Option<Vec<String>>,
    value: String,
    replacement: String,
}

impl JsonMatcher {
    pub fn new(key: &str, value: &str) -> Result<Self, PatchError> {
        if key.is_empty() {
            return Err(PatchError::InvalidPattern {
                key: key.to_string(),
                reason: "field name is empty".to_string(),
            });
        }

        // `a..b` has no dotted reading, only a literal one
        let path: Vec<String> = key.split('.').map(str::to_string).collect();
        let path = (path.len() > 1 && path.iter().all(|segment| !segment.is_empty())).then_some(path);

        Ok(Self {
            name: vec![key.to_string()],
            path,
            value: value.to_string(),
            replacement: Value::String(value.to_string()).to_string(),
        })
    }

    pub fn locate(&self, text: &str, index: &JsonIndex) -> Vec<Occurrence> {
        let by_name = |want: &Vec<String>| -> Vec<&JsonField> {
            index
                .fields()
                .iter()
                .filter(|field| field.scalar && field.path == *want)
                .collect()
        };

        let mut fields = by_name(&self.name);
        if fields.is_empty() {
            if let Some(path) = &self.path {
                fields = by_name(path);
            }
        }

        let mut found: Vec<Occurrence> = fields
            .into_iter()
            .map(|field| {
                let current = &text[field.span.clone()];
                let decoded = serde_json::from_str::<Value>(current).ok();
                let already_set = matches!(&decoded, Some(Value::String(s)) if *s == self.value);

                Occurrence {
                    span: field.span.clone(),
                    current: current.to_string(),
                    // keep the existing spelling when it already decodes to the value
                    replacement: if already_set {
                        current.to_string()
                    } else {
                        self.replacement.clone()
                    },
                    value: match decoded {
                        Some(Value::String(s)) => s,
                        _ => current.to_string(),
                    },
                }
            })
            .collect();

        found.sort_by_key(|occ| occ.span.start);
        found
    }
}

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    path: Vec<String>,
    fields: Vec<JsonField>,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), String> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{}' at byte {}", byte as char, self.pos))
        }
    }

    fn value(&mut self) -> Result<Range<usize>, String> {
        let start = self.pos;
        match self.peek() {
            Some(b'{') => self.object()?,
            Some(b'[') => self.array()?,
            Some(b'"') => {
                self.string()?;
            }
            Some(_) => self.bare(),
            None => return Err("unexpected end of document".to_string()),
        }
        Ok(start..self.pos)
    }

    fn string(&mut self) -> Result<Range<usize>, String> {
        let start = self.pos;
        self.expect(b'"')?;
        loop {
            match self.peek() {
                Some(b'\\') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(start..self.pos);
                }
                Some(_) => self.pos += 1,
                None => return Err(format!("unterminated string at byte {start}")),
            }
        }
    }

    /// Numbers, booleans and null.
    fn bare(&mut self) {
        while let Some(byte) = self.peek() {
            if matches!(byte, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.pos += 1;
        }
    }

    fn object(&mut self) -> Result<(), String> {
        self.expect(b'{')?;
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(());
        }

        loop {
            self.skip_ws();
            let key_span = self.string()?;
            let key: String =
                serde_json::from_str(&self.text[key_span]).map_err(|err| err.to_string())?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();

            let scalar = !matches!(self.peek(), Some(b'{' | b'['));
            self.path.push(key);
            let span = self.value()?;
            self.fields.push(JsonField {
                path: self.path.clone(),
                span,
                scalar,
            });
            self.path.pop();

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => return Err(format!("expected ',' or '}}' at byte {}", self.pos)),
            }
        }
    }

    fn array(&mut self) -> Result<(), String> {
        self.expect(b'[')?;
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(());
        }

        loop {
            self.skip_ws();
            self.value()?;
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => return Err(format!("expected ',' or ']' at byte {}", self.pos)),
            }
        }
    }
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

    fn locate(text: &str, key: &str, value: &str) -> Vec<Occurrence> {
        let index = JsonIndex::build(text).expect("valid json");
        JsonMatcher::new(key, value).unwrap().locate(text, &index)
    }

    #[test]
    fn test_index_records_nested_paths() {
        let index = JsonIndex::build(r#"{"a": {"b": 1, "c": [true, {"d": null}]}}"#).unwrap();
        let paths: Vec<String> = index
            .fields()
            .iter()
            .map(|field| field.path.join("."))
            .collect();
        assert!(paths.contains(&"a.b".to_string()));
        assert!(paths.contains(&"a.c.d".to_string()));
        assert!(paths.contains(&"a".to_string()));
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(JsonIndex::build(r#"{"a": }"#).is_err());
        assert!(JsonIndex::build(r#"{"a": 1} trailing"#).is_err());
    }

    #[test]
    fn test_top_level_field_preserves_formatting() {
        let text = "{\n  \"share_name\":   \"shared\",\n  \"path\" : \"/tmp/old\"\n}\n";
        let found = locate(text, "share_name", "pishare");
        assert_eq!(found.len(), 1);
        assert_eq!(
            apply(text, &found),
            "{\n  \"share_name\":   \"pishare\",\n  \"path\" : \"/tmp/old\"\n}\n"
        );
    }

    #[test]
    fn test_nested_path_only_matches_that_field() {
        let text = r#"{"path": "/a", "share": {"path": "/b"}}"#;
        let found = locate(text, "share.path", "/c");
        assert_eq!(found.len(), 1);
        assert_eq!(apply(text, &found), r#"{"path": "/a", "share": {"path": "/c"}}"#);
    }

    #[test]
    fn test_array_fans_out() {
        let text = r#"{"shares": [{"path": "/a"}, {"path": "/b"}, {"name": "x"}]}"#;
        let found = locate(text, "shares.path", "/srv");
        assert_eq!(found.len(), 2);
        assert_eq!(
            apply(text, &found),
            r#"{"shares": [{"path": "/srv"}, {"path": "/srv"}, {"name": "x"}]}"#
        );
    }

    #[test]
    fn test_scalar_of_other_type_becomes_string() {
        let text = r#"{"port": 445}"#;
        let found = locate(text, "port", "139");
        assert_eq!(apply(text, &found), r#"{"port": "139"}"#);
    }

    #[test]
    fn test_container_values_are_not_matched() {
        let text = r#"{"share": {"path": "/a"}}"#;
        assert!(locate(text, "share", "flat").is_empty());
    }

    #[test]
    fn test_value_is_json_escaped() {
        let text = r#"{"comment": ""}"#;
        let found = locate(text, "comment", "say \"hi\"\n");
        assert_eq!(apply(text, &found), r#"{"comment": "say \"hi\"\n"}"#);
    }

    #[test]
    fn test_equivalent_spelling_counts_as_current() {
        let text = r#"{"path": "\/srv\/data"}"#;
        let found = locate(text, "path", "/srv/data");
        assert_eq!(found.len(), 1);
        assert!(found[0].is_current());
        assert_eq!(found[0].value, "/srv/data");
    }

    #[test]
    fn test_key_text_inside_value_is_not_a_field() {
        let text = r#"{"note": "\"path\": \"/x\"", "path": "/y"}"#;
        let found = locate(text, "path", "/z");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, r#""/y""#);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(matches!(
            JsonMatcher::new("", "x"),
            Err(PatchError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_field_named_with_dot() {
        let text = r#"{"smb.conf": "/etc/old", "smb": {"conf": "/nested"}}"#;
        let found = locate(text, "smb.conf", "/etc/new");
        assert_eq!(found.len(), 1);
        assert_eq!(
            apply(text, &found),
            r#"{"smb.conf": "/etc/new", "smb": {"conf": "/nested"}}"#
        );
    }

    #[test]
    fn test_dotted_path_used_without_literal_field() {
        let text = r#"{"smb": {"conf": "/nested"}}"#;
        let found = locate(text, "smb.conf", "/x");
        assert_eq!(apply(text, &found), r#"{"smb": {"conf": "/x"}}"#);
    }

    #[test]
    fn test_empty_segment_only_matches_literally() {
        let text = r#"{"share..path": "/a", "share": {"path": "/b"}}"#;
        let found = locate(text, "share..path", "/c");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "/a");
    }
}
