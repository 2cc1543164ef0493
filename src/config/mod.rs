//! TOML rules files: a target plus an ordered list of substitutions.

pub mod loader;
pub mod schema;

pub use loader::{discover, load_from_path, load_from_str, ConfigError};
pub use schema::{
    Backup, Metadata, RuleDefinition, RulesConfig, StrategyKind, ValidationError, ValidationIssue,
};
