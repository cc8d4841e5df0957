//! Shared state files: the applied-profile lock, the advisory guard and
//! the read/write helpers both the lock and the profile store go through.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{KisitError, Result};
use crate::permissions::STATE_FILE_MODE;
use crate::privilege::PrivilegeEscalator;
use crate::profile::{Profile, to_document_string};

/// Read a state file. `Ok(None)` when it does not exist.
///
/// A permission failure triggers one escalated repair and a single retry.
/// A second failure is reported as [`KisitError::PermissionDenied`].
pub fn read_state_file(path: &Path, escalator: &dyn PrivilegeEscalator) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!(path = %path.display(), "state file is not readable, repairing permissions");
            repair(path, escalator)?;
            match fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                    Err(KisitError::permission_denied(path))
                }
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Replace a state file with `contents`, with the same repair-and-retry
/// behavior as [`read_state_file`].
pub fn write_state_file(path: &Path, contents: &str, escalator: &dyn PrivilegeEscalator) -> Result<()> {
    match write_atomic(path, contents) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!(path = %path.display(), "state file is not writable, repairing permissions");
            repair(path, escalator)?;
            write_atomic(path, contents).map_err(|err| {
                if err.kind() == io::ErrorKind::PermissionDenied {
                    KisitError::permission_denied(path)
                } else {
                    err.into()
                }
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn repair(path: &Path, escalator: &dyn PrivilegeEscalator) -> Result<()> {
    escalator.repair_permissions().map_err(|err| {
        tracing::error!(path = %path.display(), error = %err, "permission repair failed");
        KisitError::permission_denied(path)
    })
}

/// Write through a sibling temp file and rename it into place, so readers
/// never observe a half-written document.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    // Keep the mode of the file being replaced.
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions())?;
    }

    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Move an unparsable state file aside. Returns the backup path.
pub(crate) fn back_up_corrupt(path: &Path) -> Result<PathBuf> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".backup");
    let backup = PathBuf::from(backup);
    fs::rename(path, &backup)?;
    tracing::warn!(
        path = %path.display(),
        backup = %backup.display(),
        "state file was corrupt and has been reset to defaults"
    );
    Ok(backup)
}

/// The applied-profile lock. Its presence is the "restriction active" flag;
/// its content is the profile snapshot in force.
#[derive(Debug, Clone)]
pub struct AppliedProfileLock {
    path: PathBuf,
}

impl AppliedProfileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.path.is_file()
    }

    /// The frozen profile, or `None` when no restriction is active.
    pub fn snapshot(&self, escalator: &dyn PrivilegeEscalator) -> Result<Option<Profile>> {
        match read_state_file(&self.path, escalator)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn write(&self, profile: &Profile) -> Result<()> {
        let text = to_document_string(profile)?;
        write_atomic(&self.path, &text).map_err(|source| KisitError::LockWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Delete the lock. Deleting an absent lock succeeds.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Exclusive advisory lock serializing privileged invocations. Released on
/// drop.
#[derive(Debug)]
pub struct StateGuard {
    _lock: Flock<File>,
}

impl StateGuard {
    /// Block until the guard at `path` is free.
    ///
    /// flock needs no write access, so an existing guard file is opened
    /// read-only and any account that can read it may take the guard.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => create_guard_file(path)?,
            Err(err) => return Err(err.into()),
        };

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| io::Error::from(errno))?;
        tracing::debug!(path = %path.display(), "state guard acquired");
        Ok(Self { _lock: lock })
    }
}

fn create_guard_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .mode(STATE_FILE_MODE)
        .open(path)
}
