use crate::request::{BackupPolicy, MatchStrategy, PatchRequest, SubstitutionRule};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RulesConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RulesConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.rules.is_empty() {
            issues.push(ValidationIssue::EmptyRuleList);
        }

        if let Some(target) = &self.meta.target {
            if target.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_key: None,
                    field: "meta.target",
                });
            }
        }

        if let Some(Backup::Path(path)) = &self.meta.backup {
            if path.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_key: None,
                    field: "meta.backup",
                });
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.key.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_key: None,
                    field: "key",
                });
                continue;
            }
            if !seen.insert(rule.key.as_str()) {
                issues.push(ValidationIssue::DuplicateKey {
                    key: rule.key.clone(),
                });
            }

            match (&rule.strategy, &rule.pattern) {
                (StrategyKind::Regex, None) => issues.push(ValidationIssue::MissingField {
                    rule_key: Some(rule.key.clone()),
                    field: "pattern",
                }),
                (StrategyKind::Regex, Some(pattern)) if pattern.trim().is_empty() => {
                    issues.push(ValidationIssue::MissingField {
                        rule_key: Some(rule.key.clone()),
                        field: "pattern",
                    })
                }
                (other, Some(_)) if *other != StrategyKind::Regex => {
                    issues.push(ValidationIssue::InvalidCombo {
                        rule_key: Some(rule.key.clone()),
                        message: format!("pattern is only used by the regex strategy, not {other}"),
                    })
                }
                _ => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Build the request this file describes.
    ///
    /// A relative `meta.target` or backup path resolves against `base_dir`
    /// (normally the directory holding the rules file).
    pub fn to_request(
        &self,
        base_dir: Option<&Path>,
        dry_run: bool,
    ) -> Result<PatchRequest, ValidationError> {
        let Some(target) = self.meta.target.as_deref() else {
            return Err(ValidationError {
                issues: vec![ValidationIssue::MissingField {
                    rule_key: None,
                    field: "meta.target",
                }],
            });
        };

        let resolve = |raw: &str| -> PathBuf {
            let path = PathBuf::from(raw);
            match base_dir {
                Some(base) if path.is_relative() => base.join(path),
                _ => path,
            }
        };

        let backup = match &self.meta.backup {
            None | Some(Backup::Enabled(false)) => None,
            Some(Backup::Enabled(true)) => Some(BackupPolicy::Beside),
            Some(Backup::Path(path)) => Some(BackupPolicy::At(resolve(path))),
        };

        Ok(PatchRequest::builder(resolve(target))
            .rules(self.rules.iter().map(RuleDefinition::to_rule))
            .dry_run(dry_run)
            .backup(backup)
            .lock(self.meta.lock)
            .build())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub backup: Option<Backup>,
    #[serde(default = "default_lock")]
    pub lock: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            target: None,
            backup: None,
            lock: default_lock(),
        }
    }
}

fn default_lock() -> bool {
    true
}

/// `backup = true` for `<target>.bak`, or a path string.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Backup {
    Enabled(bool),
    Path(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuleDefinition {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub first_match_only: bool,
}

impl RuleDefinition {
    pub fn to_rule(&self) -> SubstitutionRule {
        let strategy = self
            .strategy
            .to_strategy(self.pattern.as_deref().unwrap_or_default());
        SubstitutionRule {
            key: self.key.clone(),
            value: self.value.clone(),
            strategy,
            required: self.required,
            first_match_only: self.first_match_only,
        }
    }
}

/// Strategy names as written in rules files and on the command line.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    #[serde(alias = "key-value-json")]
    Json,
    #[serde(alias = "exact-quoted")]
    Quoted,
    #[serde(alias = "regex-capture")]
    Regex,
    #[serde(alias = "ini-value")]
    Ini,
}

impl StrategyKind {
    pub fn to_strategy(self, pattern: &str) -> MatchStrategy {
        match self {
            StrategyKind::Json => MatchStrategy::KeyValueJson,
            StrategyKind::Quoted => MatchStrategy::ExactQuoted,
            StrategyKind::Regex => MatchStrategy::RegexCapture {
                pattern: pattern.to_string(),
            },
            StrategyKind::Ini => MatchStrategy::IniValue,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Json => "json",
            StrategyKind::Quoted => "quoted",
            StrategyKind::Regex => "regex",
            StrategyKind::Ini => "ini",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyRuleList,
    MissingField {
        rule_key: Option<String>,
        field: &'static str,
    },
    DuplicateKey {
        key: String,
    },
    InvalidCombo {
        rule_key: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyRuleList => write!(f, "rules file contains no rules"),
            ValidationIssue::MissingField { rule_key, field } => match rule_key {
                Some(key) => write!(f, "rule '{key}' missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::DuplicateKey { key } => write!(f, "duplicate rule key '{key}'"),
            ValidationIssue::InvalidCombo { rule_key, message } => match rule_key {
                Some(key) => write!(f, "rule '{key}' has invalid configuration: {message}"),
                None => write!(f, "invalid rules configuration: {message}"),
            },
        }
    }
}
