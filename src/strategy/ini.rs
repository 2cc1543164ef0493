//! `name = value` options inside `[section]` blocks, as in `smb.conf`.
//!
//! The key is `section.name`, split at the last dot (option names never
//! contain one). A key without a dot addresses options that precede the
//! first section header. Section and option names compare the way Samba
//! compares them: case-insensitively, option names ignoring whitespace, so
//! `read only` and `ReadOnly` are the same option.

use super::{lines_with_offsets, Occurrence};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniMatcher {
    section: Option<String>,
    name: String,
    value: String,
}

impl IniMatcher {
    pub fn new(key: &str, value: &str) -> Self {
        let (section, name) = match key.rsplit_once('.') {
            Some((section, name)) => (Some(section.trim().to_string()), name),
            None => (None, key),
        };

        Self {
            section,
            name: normalize_name(name),
            value: value.to_string(),
        }
    }

    pub fn locate(&self, text: &str) -> Vec<Occurrence> {
        let mut found = Vec::new();
        let mut section: Option<&str> = None;

        for (offset, line) in lines_with_offsets(text) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            // text after the closing bracket is ignored, as Samba does
            if let Some(header) = trimmed.strip_prefix('[') {
                if let Some(close) = header.find(']') {
                    section = Some(header[..close].trim());
                }
                continue;
            }
            if !self.in_section(section) {
                continue;
            }

            let Some(eq) = line.find('=') else {
                continue;
            };
            if normalize_name(&line[..eq]) != self.name {
                continue;
            }

            let after = &line[eq + 1..];
            let start = eq + 1 + (after.len() - after.trim_start().len());
            let end = start.max(eq + 1 + after.trim_end().len());
            let current = &line[start..end];

            found.push(Occurrence {
                span: offset + start..offset + end,
                current: current.to_string(),
                replacement: self.value.clone(),
                value: current.to_string(),
            });
        }

        found
    }

    fn in_section(&self, current: Option<&str>) -> bool {
        match (&self.section, current) {
            (None, None) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            _ => false,
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMB_CONF: &str = "\
# global settings
workgroup = IGNORED

[global]
   workgroup = WORKGROUP
   server string = %h server

[shared]
   path = /tmp/old
   read only = no
;  path = /commented/out

[Media]
   Path = /mnt/media
";

    fn apply(text: &str, found: &[Occurrence]) -> String {
        let mut out = text.to_string();
        for occ in found.iter().rev() {
            out.replace_range(occ.span.clone(), &occ.replacement);
        }
        out
    }

    #[test]
    fn test_option_in_named_section() {
        let found = IniMatcher::new("shared.path", "/home/cooper/shared").locate(SMB_CONF);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "/tmp/old");
        let patched = apply(SMB_CONF, &found);
        assert!(patched.contains("   path = /home/cooper/shared\n"));
        assert!(patched.contains(";  path = /commented/out"));
        assert!(patched.contains("Path = /mnt/media"));
    }

    #[test]
    fn test_section_and_option_case_insensitive() {
        let found = IniMatcher::new("media.PATH", "/srv/media").locate(SMB_CONF);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, "/mnt/media");
    }

    #[test]
    fn test_option_name_ignores_whitespace() {
        let found = IniMatcher::new("shared.readonly", "yes").locate(SMB_CONF);
        assert_eq!(found.len(), 1);
        assert!(apply(SMB_CONF, &found).contains("read only = yes"));
    }

    #[test]
    fn test_value_with_spaces_keeps_surrounding_whitespace() {
        let text = "[global]\nserver string = %h server  \n";
        let found = IniMatcher::new("global.server string", "home box").locate(text);
        assert_eq!(apply(text, &found), "[global]\nserver string = home box  \n");
    }

    #[test]
    fn test_key_without_section_targets_preamble() {
        let found = IniMatcher::new("workgroup", "HOME").locate(SMB_CONF);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, "IGNORED");
    }

    #[test]
    fn test_empty_value_is_located() {
        let text = "[s]\npath =\n";
        let found = IniMatcher::new("s.path", "/x").locate(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, "");
        assert_eq!(apply(text, &found), "[s]\npath =/x\n");
    }

    #[test]
    fn test_header_with_trailing_comment_opens_section() {
        let text = "[global]\n path = /g\n[pishare] ; media share\n path = /tmp/old\n";

        let found = IniMatcher::new("global.path", "/x").locate(text);
        assert_eq!(found.len(), 1);
        assert_eq!(
            apply(text, &found),
            "[global]\n path = /x\n[pishare] ; media share\n path = /tmp/old\n"
        );

        let found = IniMatcher::new("pishare.path", "/srv").locate(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].current, "/tmp/old");
    }

    #[test]
    fn test_missing_section_matches_nothing() {
        assert!(IniMatcher::new("printers.path", "/x").locate(SMB_CONF).is_empty());
    }
}
