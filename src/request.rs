//! Immutable patch requests and the rules they carry.

use std::fmt;
use std::path::{Path, PathBuf};

/// How a rule's key is located inside the target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    /// A quoted `"key"` token followed by `:` or `=` and a quoted value.
    ExactQuoted,
    /// A dotted field path resolved against a parsed JSON document.
    KeyValueJson,
    /// Capture group 1 of a caller-supplied pattern, applied per line.
    RegexCapture { pattern: String },
    /// A `section.name` option in an INI-style file such as `smb.conf`.
    IniValue,
}

impl MatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MatchStrategy::ExactQuoted => "quoted",
            MatchStrategy::KeyValueJson => "json",
            MatchStrategy::RegexCapture { .. } => "regex",
            MatchStrategy::IniValue => "ini",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single key → value substitution.
///
/// The value is literal text. It is never expanded or interpreted as a
/// pattern, whatever the strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionRule {
    pub key: String,
    pub value: String,
    pub strategy: MatchStrategy,
    /// Fail the whole patch when this rule matches nothing
    pub required: bool,
    /// Rewrite only the first occurrence instead of all of them
    pub first_match_only: bool,
}

impl SubstitutionRule {
    pub fn new(key: impl Into<String>, value: impl Into<String>, strategy: MatchStrategy) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            strategy,
            required: false,
            first_match_only: false,
        }
    }

    pub fn json(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, value, MatchStrategy::KeyValueJson)
    }

    pub fn quoted(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, value, MatchStrategy::ExactQuoted)
    }

    pub fn regex(
        key: impl Into<String>,
        pattern: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            key,
            value,
            MatchStrategy::RegexCapture {
                pattern: pattern.into(),
            },
        )
    }

    pub fn ini(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, value, MatchStrategy::IniValue)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn first_match_only(mut self) -> Self {
        self.first_match_only = true;
        self
    }
}

/// Where the pre-patch copy of the target goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPolicy {
    /// `<target>.bak` next to the target
    Beside,
    /// An explicit path
    At(PathBuf),
}

impl BackupPolicy {
    pub fn resolve(&self, target: &Path) -> PathBuf {
        match self {
            BackupPolicy::At(path) => path.clone(),
            BackupPolicy::Beside => {
                let mut name = target
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_default();
                name.push(".bak");
                target.with_file_name(name)
            }
        }
    }
}

/// Everything one `patch` call needs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    target_path: PathBuf,
    rules: Vec<SubstitutionRule>,
    dry_run: bool,
    backup: Option<BackupPolicy>,
    lock: bool,
}

impl PatchRequest {
    pub fn builder(target_path: impl Into<PathBuf>) -> PatchRequestBuilder {
        PatchRequestBuilder {
            target_path: target_path.into(),
            rules: Vec::new(),
            dry_run: false,
            backup: None,
            lock: true,
        }
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn rules(&self) -> &[SubstitutionRule] {
        &self.rules
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn backup(&self) -> Option<&BackupPolicy> {
        self.backup.as_ref()
    }

    pub fn lock(&self) -> bool {
        self.lock
    }
}

#[derive(Debug, Clone)]
#[must_use = "call build() to obtain a PatchRequest"]
pub struct PatchRequestBuilder {
    target_path: PathBuf,
    rules: Vec<SubstitutionRule>,
    dry_run: bool,
    backup: Option<BackupPolicy>,
    lock: bool,
}

impl PatchRequestBuilder {
    pub fn rule(mut self, rule: SubstitutionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = SubstitutionRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backup(mut self, backup: Option<BackupPolicy>) -> Self {
        self.backup = backup;
        self
    }

    /// Take an advisory lock on the target for the duration of the patch.
    /// On by default.
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn build(self) -> PatchRequest {
        PatchRequest {
            target_path: self.target_path,
            rules: self.rules,
            dry_run: self.dry_run,
            backup: self.backup,
            lock: self.lock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_beside_appends_suffix() {
        let path = BackupPolicy::Beside.resolve(Path::new("/etc/samba/smb.conf"));
        assert_eq!(path, PathBuf::from("/etc/samba/smb.conf.bak"));
    }

    #[test]
    fn test_backup_explicit_path() {
        let policy = BackupPolicy::At(PathBuf::from("/var/backups/smb.conf"));
        assert_eq!(
            policy.resolve(Path::new("/etc/samba/smb.conf")),
            PathBuf::from("/var/backups/smb.conf")
        );
    }

    #[test]
    fn test_builder_defaults() {
        let request = PatchRequest::builder("settings.json")
            .rule(SubstitutionRule::json("path", "/srv"))
            .build();

        assert!(!request.dry_run());
        assert!(request.lock());
        assert!(request.backup().is_none());
        assert_eq!(request.rules().len(), 1);
        assert_eq!(request.rules()[0].strategy, MatchStrategy::KeyValueJson);
    }

    #[test]
    fn test_rule_modifiers() {
        let rule = SubstitutionRule::ini("global.workgroup", "HOME")
            .required()
            .first_match_only();
        assert!(rule.required);
        assert!(rule.first_match_only);
        assert_eq!(rule.strategy.to_string(), "ini");
    }
}
