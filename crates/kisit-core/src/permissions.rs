//! File mode and ownership primitives used by every enforcement pass.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::unistd::{Gid, Group, Uid, User, chown};

use crate::config::AccountsConfig;
use crate::error::Result;

/// rw-r----- root:admin
pub const RESTRICTED_DESKTOP_MODE: u32 = 0o640;
/// rw-r--r-- root:root
pub const PERMISSIVE_DESKTOP_MODE: u32 = 0o644;
/// rwxrwxr-x owned by the restricted account
pub const LOCAL_DESKTOP_MODE: u32 = 0o775;
/// rwxr-x--- root:admin
pub const RESTRICTED_EXECUTABLE_MODE: u32 = 0o750;
/// rwxr-xr-x root:root
pub const PERMISSIVE_EXECUTABLE_MODE: u32 = 0o755;
/// rwxrwxr-x root:admin
pub const STATE_FILE_MODE: u32 = 0o775;

/// What a file is, which decides the modes it cycles between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    DesktopEntry,
    /// Entry in the restricted account's own applications directory.
    LocalDesktopEntry,
    Executable,
    /// Profile store, lock file and their directory.
    StateFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Restricted,
    Permissive,
}

impl FileKind {
    pub fn mode(self, access: Access) -> u32 {
        match (self, access) {
            (FileKind::DesktopEntry | FileKind::LocalDesktopEntry, Access::Restricted) => {
                RESTRICTED_DESKTOP_MODE
            }
            (FileKind::DesktopEntry, Access::Permissive) => PERMISSIVE_DESKTOP_MODE,
            (FileKind::LocalDesktopEntry, Access::Permissive) => LOCAL_DESKTOP_MODE,
            (FileKind::Executable, Access::Restricted) => RESTRICTED_EXECUTABLE_MODE,
            (FileKind::Executable, Access::Permissive) => PERMISSIVE_EXECUTABLE_MODE,
            (FileKind::StateFile, _) => STATE_FILE_MODE,
        }
    }
}

/// Resolved account ids used for chown. Lookups that fail leave the field
/// empty, which turns the matching chown into a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ownership {
    enabled: bool,
    admin_gid: Option<Gid>,
    restricted: Option<(Uid, Gid)>,
}

impl Ownership {
    pub fn resolve(accounts: &AccountsConfig) -> Self {
        if !accounts.apply_ownership {
            return Self::disabled();
        }

        let admin_gid = match Group::from_name(&accounts.admin_group) {
            Ok(group) => group.map(|g| g.gid),
            Err(err) => {
                tracing::warn!(group = %accounts.admin_group, error = %err, "group lookup failed");
                None
            }
        };
        let restricted = match User::from_name(&accounts.restricted_user) {
            Ok(user) => user.map(|u| (u.uid, u.gid)),
            Err(err) => {
                tracing::warn!(user = %accounts.restricted_user, error = %err, "user lookup failed");
                None
            }
        };

        if admin_gid.is_none() {
            tracing::warn!(group = %accounts.admin_group, "administrative group not found");
        }

        Self {
            enabled: true,
            admin_gid,
            restricted,
        }
    }

    /// Only file modes are changed.
    pub fn disabled() -> Self {
        Self::default()
    }

    fn owner_for(&self, kind: FileKind, access: Access) -> Option<(Uid, Gid)> {
        if !self.enabled {
            return None;
        }
        let root = (Uid::from_raw(0), Gid::from_raw(0));
        match (kind, access) {
            (FileKind::StateFile, _) | (_, Access::Restricted) => {
                self.admin_gid.map(|gid| (root.0, gid))
            }
            (FileKind::LocalDesktopEntry, Access::Permissive) => self.restricted,
            (FileKind::DesktopEntry | FileKind::Executable, Access::Permissive) => Some(root),
        }
    }
}

/// Put `path` into the mode and ownership `kind`/`access` call for.
/// Returns `Ok(false)` without touching anything when `path` is not a
/// regular file.
pub fn set_access(path: &Path, kind: FileKind, access: Access, ownership: &Ownership) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    apply_mode_and_owner(path, kind, access, ownership)?;
    Ok(true)
}

/// Same as [`set_access`] for directories and files alike.
pub fn set_state_access(path: &Path, ownership: &Ownership) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    apply_mode_and_owner(path, FileKind::StateFile, Access::Restricted, ownership)?;
    Ok(true)
}

/// Bits above the rwx triplets: setuid, setgid and sticky.
const SPECIAL_BITS: u32 = 0o7000;

fn apply_mode_and_owner(path: &Path, kind: FileKind, access: Access, ownership: &Ownership) -> Result<()> {
    // Executables such as pkexec carry setuid, which the mode table does not know about.
    let special = match kind {
        FileKind::Executable => mode_of(path).unwrap_or(0) & SPECIAL_BITS,
        _ => 0,
    };

    // chown clears setuid and setgid, so it has to come before the chmod.
    if let Some((uid, gid)) = ownership.owner_for(kind, access) {
        chown(path, Some(uid), Some(gid)).map_err(std::io::Error::from)?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(kind.mode(access) | special))?;
    Ok(())
}

/// Permission bits of `path`, if it exists.
pub fn mode_of(path: &Path) -> Option<u32> {
    fs::metadata(path)
        .ok()
        .map(|meta| meta.permissions().mode() & 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_entry_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = tmp.path().join("org.example.Game.desktop");
        fs::write(&entry, "[Desktop Entry]\n").unwrap();
        let ownership = Ownership::disabled();

        assert!(set_access(&entry, FileKind::DesktopEntry, Access::Restricted, &ownership).unwrap());
        assert_eq!(mode_of(&entry), Some(0o640));

        assert!(set_access(&entry, FileKind::DesktopEntry, Access::Permissive, &ownership).unwrap());
        assert_eq!(mode_of(&entry), Some(0o644));
    }

    #[test]
    fn test_executable_keeps_setuid_bit() {
        let tmp = tempfile::tempdir().unwrap();
        let binary = tmp.path().join("pkexec");
        fs::write(&binary, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o4755)).unwrap();
        let ownership = Ownership::disabled();

        set_access(&binary, FileKind::Executable, Access::Restricted, &ownership).unwrap();
        assert_eq!(mode_of(&binary), Some(0o4750));

        set_access(&binary, FileKind::Executable, Access::Permissive, &ownership).unwrap();
        assert_eq!(mode_of(&binary), Some(0o4755));
    }

    #[test]
    fn test_desktop_entry_drops_special_bits() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = tmp.path().join("odd.desktop");
        fs::write(&entry, "[Desktop Entry]\n").unwrap();
        fs::set_permissions(&entry, fs::Permissions::from_mode(0o4644)).unwrap();

        set_access(&entry, FileKind::DesktopEntry, Access::Restricted, &Ownership::disabled()).unwrap();
        assert_eq!(mode_of(&entry), Some(0o640));
    }

    #[test]
    fn test_executable_and_local_modes() {
        assert_eq!(FileKind::Executable.mode(Access::Restricted), 0o750);
        assert_eq!(FileKind::Executable.mode(Access::Permissive), 0o755);
        assert_eq!(FileKind::LocalDesktopEntry.mode(Access::Restricted), 0o640);
        assert_eq!(FileKind::LocalDesktopEntry.mode(Access::Permissive), 0o775);
        assert_eq!(FileKind::StateFile.mode(Access::Permissive), 0o775);
    }

    #[test]
    fn test_missing_and_directory_paths_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let ownership = Ownership::disabled();
        let missing = tmp.path().join("missing");
        assert!(!set_access(&missing, FileKind::Executable, Access::Restricted, &ownership).unwrap());
        assert!(!set_access(tmp.path(), FileKind::Executable, Access::Restricted, &ownership).unwrap());
        assert_eq!(mode_of(&missing), None);
    }

    #[test]
    fn test_state_access_applies_to_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        fs::create_dir(&dir).unwrap();
        assert!(set_state_access(&dir, &Ownership::disabled()).unwrap());
        assert_eq!(mode_of(&dir), Some(0o775));
    }

    #[test]
    fn test_disabled_ownership_never_chowns() {
        let ownership = Ownership::disabled();
        assert!(ownership.owner_for(FileKind::Executable, Access::Restricted).is_none());
        assert!(ownership.owner_for(FileKind::LocalDesktopEntry, Access::Permissive).is_none());
    }
}
