//! confpatch: atomic, idempotent rewriting of configuration values
//!
//! Provisioning flows install a service, then adjust a handful of values in
//! its configuration file before restarting it. This crate does the
//! adjusting: given a target file and a set of key → value rules, it
//! rewrites exactly the matched values and leaves every other byte alone.
//!
//! # Architecture
//!
//! All rewrites compile down to a single primitive: [`Edit`], a verified
//! byte-span replacement. Strategies ([`MatchStrategy`]) only acquire spans:
//!
//! - `KeyValueJson` locates fields structurally in a parsed JSON document
//! - `IniValue` locates `section.option` values in `smb.conf`-style files
//! - `ExactQuoted` finds `"key": "value"` pairs without a parser
//! - `RegexCapture` rewrites capture group 1 of a caller pattern
//!
//! # Safety
//!
//! - Atomic file replacement (tempfile + fsync + rename)
//! - Original mode and ownership carried onto the new file
//! - Non-blocking advisory lock against concurrent patchers
//! - Idempotent: values already in place are matched but not rewritten
//!
//! # Example
//!
//! ```no_run
//! use confpatch::{patch, PatchRequest, SubstitutionRule};
//!
//! let request = PatchRequest::builder("/etc/samba/smb.conf")
//!     .rule(SubstitutionRule::ini("pishare.path", "/home/cooper/shared").required())
//!     .build();
//!
//! match patch(&request) {
//!     Ok(result) => println!("{result}"),
//!     Err(e) => eprintln!("patch failed: {e}"),
//! }
//! ```

pub mod atomic;
pub mod config;
pub mod edit;
pub mod error;
pub mod patcher;
pub mod request;
pub mod strategy;

// Re-exports
pub use atomic::StagedWrite;
pub use config::{load_from_path, load_from_str, ConfigError, RulesConfig};
pub use edit::{splice, Edit, EditError, EditVerification};
pub use error::PatchError;
pub use patcher::{
    inspect, patch, plan, KeyValues, PatchOutcome, PatchPlan, PatchResult, PatchState,
};
pub use request::{BackupPolicy, MatchStrategy, PatchRequest, PatchRequestBuilder, SubstitutionRule};
