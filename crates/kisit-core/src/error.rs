//! Restriction engine error types.

use std::path::PathBuf;

/// Remediation shown when state files stay inaccessible after a repair attempt.
pub const ADMIN_REMEDIATION: &str =
    "ensure you are an administrator (root or a member of the administrative group)";

#[derive(Debug, thiserror::Error)]
pub enum KisitError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("profile already exists: {0}")]
    ProfileExists(String),

    #[error("profile '{0}' is managed externally and cannot be changed")]
    DefaultProfile(String),

    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("permission denied for {}: {remediation}", path.display())]
    PermissionDenied {
        path: PathBuf,
        remediation: &'static str,
    },

    #[error("corrupt state file {}, moved to {}", path.display(), backup.display())]
    CorruptState { path: PathBuf, backup: PathBuf },

    #[error("nothing selected: the current profile restricts neither applications nor websites")]
    NothingSelected,

    #[error("you are not privileged to run this command")]
    NotPrivileged,

    #[error("privilege escalation failed: {0}")]
    Escalation(String),

    #[error("failed to write applied profile lock {}: {source}", path.display())]
    LockWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KisitError {
    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            remediation: ADMIN_REMEDIATION,
        }
    }
}

pub type Result<T> = std::result::Result<T, KisitError>;
