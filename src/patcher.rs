//! The configuration patcher.
//!
//! A patch walks a fixed state machine:
//!
//! ```text
//! Idle -> Reading -> Scanning -> DryRunComplete
//!                             -> Unchanged
//!                             -> Writing -> Renaming -> Committed
//! ```
//!
//! Any failure before `Renaming` ends in `Failed` with the target exactly as
//! it was. `Renaming` is a single `rename(2)`, so the target holds either
//! the old or the new content, never a mix.

use crate::atomic::{self, StagedWrite};
use crate::edit::{splice, Edit};
use crate::error::PatchError;
use crate::request::{PatchRequest, SubstitutionRule};
use crate::strategy::{Document, LocateError, Matcher};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Idle,
    Reading,
    Scanning,
    DryRunComplete,
    Unchanged,
    Writing,
    Renaming,
    Committed,
    Failed,
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchState::Idle => "idle",
            PatchState::Reading => "reading",
            PatchState::Scanning => "scanning",
            PatchState::DryRunComplete => "dry_run_complete",
            PatchState::Unchanged => "unchanged",
            PatchState::Writing => "writing",
            PatchState::Renaming => "renaming",
            PatchState::Committed => "committed",
            PatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(path: &Path, state: PatchState) {
    debug!(path = %path.display(), state = %state, "patch state transition");
}

/// How a successful patch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// New content was renamed over the target
    Committed,
    /// Every match already held its value; nothing was written
    Unchanged,
    /// Nothing was written by request
    DryRun,
}

/// Result of a successful patch. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult reports per-rule match counts that may need checking"]
pub struct PatchResult {
    pub original_path: PathBuf,
    pub bytes_changed: usize,
    pub matches_applied: BTreeMap<String, usize>,
    pub backup_path: Option<PathBuf>,
    pub outcome: PatchOutcome,
}

impl PatchResult {
    /// Keys of rules that found nothing to rewrite.
    pub fn unmatched(&self) -> impl Iterator<Item = &str> {
        self.matches_applied
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| key.as_str())
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            PatchOutcome::Committed => write!(
                f,
                "Patched {} ({} bytes changed)",
                self.original_path.display(),
                self.bytes_changed
            ),
            PatchOutcome::Unchanged => {
                write!(f, "Already up to date: {}", self.original_path.display())
            }
            PatchOutcome::DryRun => write!(f, "Dry run on {}", self.original_path.display()),
        }
    }
}

/// The rewritten content of a target, computed but not yet written.
#[derive(Debug)]
pub struct PatchPlan {
    requested: PathBuf,
    target: PathBuf,
    metadata: Metadata,
    original: String,
    patched: String,
    matches_applied: BTreeMap<String, usize>,
    bytes_changed: usize,
}

impl PatchPlan {
    /// Path as given in the request.
    pub fn requested_path(&self) -> &Path {
        &self.requested
    }

    /// Resolved path that will be replaced.
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn patched(&self) -> &str {
        &self.patched
    }

    pub fn matches_applied(&self) -> &BTreeMap<String, usize> {
        &self.matches_applied
    }

    pub fn bytes_changed(&self) -> usize {
        self.bytes_changed
    }

    pub fn is_noop(&self) -> bool {
        self.original == self.patched
    }

    /// Write the patched content next to the target without renaming it.
    pub fn stage(&self) -> Result<StagedWrite, PatchError> {
        atomic::stage(&self.target, self.patched.as_bytes(), &self.metadata)
    }

    fn into_result(self, outcome: PatchOutcome, backup_path: Option<PathBuf>) -> PatchResult {
        PatchResult {
            original_path: self.requested,
            bytes_changed: match outcome {
                PatchOutcome::Committed => self.bytes_changed,
                PatchOutcome::Unchanged | PatchOutcome::DryRun => 0,
            },
            matches_applied: self.matches_applied,
            backup_path,
            outcome,
        }
    }
}

/// Current values a rule matches in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValues {
    pub key: String,
    pub values: Vec<String>,
}

/// Apply a patch request.
///
/// Reads the target under an advisory lock (unless disabled), rewrites every
/// located occurrence, and atomically replaces the file. Dry runs and
/// requests whose values are already in place never write.
pub fn patch(request: &PatchRequest) -> Result<PatchResult, PatchError> {
    let path = request.target_path();
    transition(path, PatchState::Idle);

    let result = run(request);
    if let Err(err) = &result {
        transition(path, PatchState::Failed);
        warn!(path = %path.display(), error = %err, "patch failed");
    }
    result
}

fn run(request: &PatchRequest) -> Result<PatchResult, PatchError> {
    let matchers = prepare(request.rules())?;
    let path = request.target_path();

    transition(path, PatchState::Reading);
    let target = OpenTarget::open(path, request.lock())?;
    let original = target.read()?;

    transition(path, PatchState::Scanning);
    let plan = compute(&target, original, request.rules(), &matchers)?;

    if request.dry_run() {
        transition(path, PatchState::DryRunComplete);
        return Ok(plan.into_result(PatchOutcome::DryRun, None));
    }

    if plan.is_noop() {
        transition(path, PatchState::Unchanged);
        info!(path = %path.display(), "values already in place");
        return Ok(plan.into_result(PatchOutcome::Unchanged, None));
    }

    // only now, so an up-to-date read-only target is still Unchanged
    target.check_writable()?;

    let backup_path = match request.backup() {
        Some(policy) => {
            let backup = policy.resolve(&plan.target);
            atomic::write(&backup, plan.original.as_bytes(), &plan.metadata)?;
            info!(path = %path.display(), backup = %backup.display(), "wrote backup");
            Some(backup)
        }
        None => None,
    };

    transition(path, PatchState::Writing);
    let staged = plan.stage()?;

    transition(path, PatchState::Renaming);
    staged.commit()?;

    transition(path, PatchState::Committed);
    info!(
        path = %path.display(),
        bytes_changed = plan.bytes_changed,
        "patch committed"
    );

    // the lock is held until after the rename
    drop(target);
    Ok(plan.into_result(PatchOutcome::Committed, backup_path))
}

/// Compute the patched content without writing anything.
///
/// The lock, if requested, is only held while reading; callers that go on
/// to [`PatchPlan::stage`] and commit themselves must serialize writers.
pub fn plan(request: &PatchRequest) -> Result<PatchPlan, PatchError> {
    let matchers = prepare(request.rules())?;
    let target = OpenTarget::open(request.target_path(), request.lock())?;
    let original = target.read()?;
    compute(&target, original, request.rules(), &matchers)
}

/// Report the values each rule currently matches. Rule values are ignored.
pub fn inspect(path: &Path, rules: &[SubstitutionRule]) -> Result<Vec<KeyValues>, PatchError> {
    let matchers = prepare(rules)?;
    let target = OpenTarget::open(path, false)?;
    let content = target.read()?;
    let document = Document::new(&content);

    rules
        .iter()
        .zip(&matchers)
        .map(|(rule, matcher)| {
            let found = matcher
                .locate(&document)
                .map_err(|err| malformed(path, err))?;
            Ok(KeyValues {
                key: rule.key.clone(),
                values: found.into_iter().map(|occ| occ.value).collect(),
            })
        })
        .collect()
}

fn prepare(rules: &[SubstitutionRule]) -> Result<Vec<Matcher>, PatchError> {
    if rules.is_empty() {
        return Err(PatchError::NoRulesProvided);
    }

    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.key.as_str()) {
            return Err(PatchError::DuplicateRuleKey {
                key: rule.key.clone(),
            });
        }
    }

    rules.iter().map(Matcher::compile).collect()
}

fn malformed(path: &Path, err: LocateError) -> PatchError {
    match err {
        LocateError::Malformed(reason) => PatchError::MalformedStructuredDocument {
            path: path.to_path_buf(),
            reason,
        },
    }
}

fn compute(
    target: &OpenTarget,
    original: String,
    rules: &[SubstitutionRule],
    matchers: &[Matcher],
) -> Result<PatchPlan, PatchError> {
    let document = Document::new(&original);
    let mut matches_applied = BTreeMap::new();
    let mut keyed_edits: Vec<(&str, Edit)> = Vec::new();

    for (rule, matcher) in rules.iter().zip(matchers) {
        let mut found = matcher
            .locate(&document)
            .map_err(|err| malformed(&target.requested, err))?;

        if rule.first_match_only {
            found.truncate(1);
        }

        if found.is_empty() {
            if rule.required {
                return Err(PatchError::NoMatchForRequiredRule {
                    key: rule.key.clone(),
                    path: target.requested.clone(),
                });
            }
            warn!(key = %rule.key, strategy = %rule.strategy, "rule matched nothing");
        }

        debug!(
            key = %rule.key,
            strategy = %rule.strategy,
            matches = found.len(),
            current = found.iter().filter(|occ| occ.is_current()).count(),
            "rule located"
        );
        matches_applied.insert(rule.key.clone(), found.len());

        for occ in found {
            let edit = Edit::new(occ.span.start, occ.span.end, occ.replacement, &occ.current);
            keyed_edits.push((rule.key.as_str(), edit));
        }
    }

    keyed_edits.sort_by_key(|(_, edit)| (edit.byte_start, edit.byte_end));
    for window in keyed_edits.windows(2) {
        let ((first, earlier), (second, later)) = (&window[0], &window[1]);
        if earlier.byte_end > later.byte_start {
            return Err(PatchError::OverlappingMatches {
                first: first.to_string(),
                second: second.to_string(),
                path: target.requested.clone(),
            });
        }
    }

    let edits: Vec<Edit> = keyed_edits.into_iter().map(|(_, edit)| edit).collect();
    drop(document);
    let spliced = splice(&original, &edits)?;

    Ok(PatchPlan {
        requested: target.requested.clone(),
        target: target.path.clone(),
        metadata: target.metadata.clone(),
        patched: spliced.content,
        original,
        matches_applied,
        bytes_changed: spliced.bytes_changed,
    })
}

enum Handle {
    Locked(Flock<File>),
    Unlocked(File),
}

impl Handle {
    fn file(&self) -> &File {
        match self {
            Handle::Locked(lock) => lock,
            Handle::Unlocked(file) => file,
        }
    }
}

/// An opened (and possibly locked) target. Dropping it releases the lock.
struct OpenTarget {
    requested: PathBuf,
    path: PathBuf,
    handle: Handle,
    metadata: Metadata,
}

impl OpenTarget {
    fn open(requested: &Path, lock: bool) -> Result<Self, PatchError> {
        // symlinks are followed so the link target is what gets replaced
        let path = fs::canonicalize(requested)
            .map_err(|source| classify_stat(requested, source))?;

        let metadata = fs::metadata(&path).map_err(|source| classify_stat(requested, source))?;
        if !metadata.is_file() {
            return Err(PatchError::TargetNotRegularFile {
                path: requested.to_path_buf(),
            });
        }

        // flock works on a read-only descriptor; writes go through a temp file
        let file = File::open(&path).map_err(|source| classify_open(requested, false, source))?;

        let handle = if lock {
            Handle::Locked(acquire(file, requested)?)
        } else {
            Handle::Unlocked(file)
        };

        let metadata = handle
            .file()
            .metadata()
            .map_err(|source| PatchError::io("stat", requested, source))?;

        if lock {
            // a writer that renamed over the path while we waited on the old
            // inode would have its update lost
            let current = fs::metadata(&path).map_err(|source| classify_stat(requested, source))?;
            if current.dev() != metadata.dev() || current.ino() != metadata.ino() {
                return Err(PatchError::TargetLocked {
                    path: requested.to_path_buf(),
                });
            }
        }

        Ok(Self {
            requested: requested.to_path_buf(),
            path,
            handle,
            metadata,
        })
    }

    /// Fail with `TargetNotWritable` unless the target could be opened for
    /// writing (permissions, read-only filesystem).
    fn check_writable(&self) -> Result<(), PatchError> {
        OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map(drop)
            .map_err(|source| classify_open(&self.requested, true, source))
    }

    fn read(&self) -> Result<String, PatchError> {
        let mut content = String::new();
        let mut file = self.handle.file();
        file.read_to_string(&mut content).map_err(|source| {
            if source.kind() == io::ErrorKind::InvalidData {
                PatchError::TargetNotReadable {
                    path: self.requested.clone(),
                    reason: "content is not valid UTF-8".to_string(),
                }
            } else {
                PatchError::io("read", &self.requested, source)
            }
        })?;
        Ok(content)
    }
}

fn acquire(file: File, path: &Path) -> Result<Flock<File>, PatchError> {
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        if errno == Errno::EWOULDBLOCK {
            PatchError::TargetLocked {
                path: path.to_path_buf(),
            }
        } else {
            PatchError::io("lock", path, io::Error::from(errno))
        }
    })
}

fn classify_stat(path: &Path, source: io::Error) -> PatchError {
    match source.kind() {
        io::ErrorKind::NotFound => PatchError::TargetNotFound {
            path: path.to_path_buf(),
        },
        io::ErrorKind::PermissionDenied => PatchError::TargetNotReadable {
            path: path.to_path_buf(),
            reason: source.to_string(),
        },
        _ => PatchError::io("stat", path, source),
    }
}

fn classify_open(path: &Path, writable: bool, source: io::Error) -> PatchError {
    let read_only_fs = source.raw_os_error() == Some(Errno::EROFS as i32);
    match source.kind() {
        io::ErrorKind::PermissionDenied if writable => PatchError::TargetNotWritable {
            path: path.to_path_buf(),
            source,
        },
        _ if writable && read_only_fs => PatchError::TargetNotWritable {
            path: path.to_path_buf(),
            source,
        },
        io::ErrorKind::PermissionDenied => PatchError::TargetNotReadable {
            path: path.to_path_buf(),
            reason: source.to_string(),
        },
        io::ErrorKind::NotFound => PatchError::TargetNotFound {
            path: path.to_path_buf(),
        },
        _ => PatchError::io("open", path, source),
    }
}
