use crate::config::schema::{RulesConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Discovery {
        path: PathBuf,
        source: walkdir::Error,
    },
    NoRulesFiles {
        path: PathBuf,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read rules from {}: {}", path.display(), source)
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse rules TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse rules TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid rules file ({}): {}", path.display(), source),
                None => write!(f, "invalid rules file: {}", source),
            },
            ConfigError::Discovery { path, source } => {
                write!(f, "failed to scan {} for rules files: {}", path.display(), source)
            }
            ConfigError::NoRulesFiles { path } => {
                write!(f, "no .toml rules files found in {}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Discovery { source, .. } => Some(source),
            ConfigError::NoRulesFiles { .. } => None,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<RulesConfig, ConfigError> {
    let config: RulesConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RulesConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Rules files to run for `path`: the file itself, or every `*.toml`
/// directly inside a directory, sorted by name so numeric prefixes order a
/// provisioning sequence.
pub fn discover(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).max_depth(1) {
        let entry = entry.map_err(|source| ConfigError::Discovery {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
        {
            files.push(entry.path().to_path_buf());
        }
    }

    if files.is_empty() {
        return Err(ConfigError::NoRulesFiles {
            path: path.to_path_buf(),
        });
    }

    files.sort();
    Ok(files)
}
