//! Crash-safe replacement of a file's content.
//!
//! New content goes to a temporary file in the target's directory (same
//! filesystem, so the rename is atomic), picks up the original mode and
//! ownership, is fsynced, and only then renamed over the target. The
//! rename is the single mutating step on the target path.

use crate::error::PatchError;
use nix::unistd::{chown, Gid, Uid};
use std::fs::{File, Metadata};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// New content written and synced next to the target, not yet renamed.
///
/// Dropping it without [`commit`](StagedWrite::commit) removes the
/// temporary file and leaves the target untouched.
#[derive(Debug)]
#[must_use = "StagedWrite does nothing until commit() is called"]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged file over the target and sync the directory.
    pub fn commit(self) -> Result<(), PatchError> {
        let target = self.target;
        debug!(path = %target.display(), temp = %self.temp.path().display(), "renaming staged file");

        if let Err(err) = self.temp.persist(&target) {
            let temp_path = match err.file.keep() {
                Ok((_, path)) => path,
                Err(keep_err) => keep_err.file.path().to_path_buf(),
            };
            return Err(PatchError::RenameFailed {
                temp_path,
                target,
                source: err.error,
            });
        }

        // the rename already happened; a failed directory sync only weakens
        // durability across power loss
        if let Some(parent) = target.parent() {
            if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
                warn!(dir = %parent.display(), error = %err, "failed to sync directory after rename");
            }
        }

        Ok(())
    }
}

/// Write `content` to a temporary sibling of `target` carrying the mode and
/// ownership recorded in `metadata`.
pub fn stage(target: &Path, content: &[u8], metadata: &Metadata) -> Result<StagedWrite, PatchError> {
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = NamedTempFile::new_in(parent).map_err(|source| {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            PatchError::TargetNotWritable {
                path: target.to_path_buf(),
                source,
            }
        } else {
            PatchError::io("create temporary file", parent, source)
        }
    })?;

    temp.write_all(content)
        .map_err(|source| PatchError::io("write temporary file", temp.path(), source))?;

    preserve_ownership(&temp, metadata)?;

    // after chown, which may clear setuid/setgid bits
    temp.as_file()
        .set_permissions(metadata.permissions())
        .map_err(|source| PatchError::io("set permissions", temp.path(), source))?;

    temp.as_file()
        .sync_all()
        .map_err(|source| PatchError::io("sync temporary file", temp.path(), source))?;

    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

/// Atomic write of a complete file. Used for backups.
pub fn write(target: &Path, content: &[u8], metadata: &Metadata) -> Result<(), PatchError> {
    stage(target, content, metadata)?.commit()
}

fn preserve_ownership(temp: &NamedTempFile, metadata: &Metadata) -> Result<(), PatchError> {
    let created = temp
        .as_file()
        .metadata()
        .map_err(|source| PatchError::io("stat temporary file", temp.path(), source))?;

    if created.uid() == metadata.uid() && created.gid() == metadata.gid() {
        return Ok(());
    }

    chown(
        temp.path(),
        Some(Uid::from_raw(metadata.uid())),
        Some(Gid::from_raw(metadata.gid())),
    )
    .map_err(|source| PatchError::Ownership {
        path: temp.path().to_path_buf(),
        source,
    })
}
