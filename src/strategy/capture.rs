use super::{lines_with_offsets, Occurrence};
use crate::error::PatchError;
use regex::Regex;

/// Rewrites capture group 1 of a caller-supplied pattern, line by line.
///
/// The replacement is spliced into the group's span verbatim, so `$1` or
/// `${name}` in the value stay literal text.
#[derive(Debug, Clone)]
pub struct CaptureMatcher {
    regex: Regex,
    value: String,
}

impl CaptureMatcher {
    pub fn new(key: &str, pattern: &str, value: &str) -> Result<Self, PatchError> {
        let regex = Regex::new(pattern).map_err(|err| PatchError::InvalidPattern {
            key: key.to_string(),
            reason: err.to_string(),
        })?;

        // group 0 is the whole match
        if regex.captures_len() < 2 {
            return Err(PatchError::InvalidPattern {
                key: key.to_string(),
                reason: "pattern has no capture group".to_string(),
            });
        }

        Ok(Self {
            regex,
            value: value.to_string(),
        })
    }

    pub fn locate(&self, text: &str) -> Vec<Occurrence> {
        let mut found = Vec::new();

        for (offset, line) in lines_with_offsets(text) {
            for caps in self.regex.captures_iter(line) {
                // optional groups may not participate
                let Some(group) = caps.get(1) else {
                    continue;
                };
                found.push(Occurrence {
                    span: offset + group.start()..offset + group.end(),
                    current: group.as_str().to_string(),
                    replacement: self.value.clone(),
                    value: group.as_str().to_string(),
                });
            }
        }

        found
    }
}
