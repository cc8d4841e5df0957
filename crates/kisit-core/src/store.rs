//! Profile store.
//!
//! A single JSON document holding every profile, the current profile name
//! and the always-restricted application list. Every mutation is written
//! through to disk before it returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KisitError, Result};
use crate::privilege::PrivilegeEscalator;
use crate::profile::{Profile, StoreDocument, to_document_string};
use crate::state::{back_up_corrupt, read_state_file, write_state_file};

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    escalator: Arc<dyn PrivilegeEscalator>,
    document: StoreDocument,
    /// Where an unparsable file was moved during load.
    recovered_backup: Option<PathBuf>,
}

impl ProfileStore {
    /// Load the store at `path`.
    ///
    /// A missing file yields the built-in defaults without writing them.
    /// An unparsable file is moved to `<path>.backup` and replaced by the
    /// defaults in memory.
    pub fn load(path: impl Into<PathBuf>, escalator: Arc<dyn PrivilegeEscalator>) -> Result<Self> {
        let path = path.into();
        let (document, recovered_backup) = read_document(&path, escalator.as_ref())?;
        Ok(Self {
            path,
            escalator,
            document,
            recovered_backup,
        })
    }

    /// The corruption recovered from while loading, if any.
    pub fn corruption(&self) -> Option<KisitError> {
        self.recovered_backup.as_ref().map(|backup| KisitError::CorruptState {
            path: self.path.clone(),
            backup: backup.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &StoreDocument {
        &self.document
    }

    /// Persist the whole document.
    pub fn save(&self) -> Result<()> {
        let text = to_document_string(&self.document)?;
        write_state_file(&self.path, &text, self.escalator.as_ref())?;
        tracing::debug!(path = %self.path.display(), "profile store saved");
        Ok(())
    }

    pub fn profiles(&self) -> &BTreeMap<String, Profile> {
        &self.document.profile_list
    }

    pub fn get_profile(&self, name: &str) -> Result<&Profile> {
        self.document
            .profile_list
            .get(name)
            .ok_or_else(|| KisitError::ProfileNotFound(name.to_string()))
    }

    pub fn current_profile_name(&self) -> &str {
        &self.document.current_profile
    }

    pub fn current_profile(&self) -> Result<&Profile> {
        self.get_profile(&self.document.current_profile)
    }

    pub fn set_current_profile(&mut self, name: &str) -> Result<()> {
        self.get_profile(name)?;
        self.document.current_profile = name.to_string();
        self.save()
    }

    /// Add an unrestricted profile named `name`.
    pub fn insert_default_profile(&mut self, name: &str, created_by: Option<&str>) -> Result<()> {
        self.ensure_vacant(name)?;
        self.document.profile_list.insert(
            name.to_string(),
            Profile::unrestricted(created_by.map(str::to_string)),
        );
        tracing::info!(profile = name, "profile created");
        self.save()
    }

    /// Copy `src` to `dst`. The copy is always locally owned.
    pub fn duplicate_profile(&mut self, src: &str, dst: &str, created_by: Option<&str>) -> Result<()> {
        let mut copy = self.get_profile(src)?.clone();
        self.ensure_vacant(dst)?;

        copy.is_default = false;
        copy.created_by = created_by.filter(|owner| !owner.is_empty()).map(str::to_string);
        self.document.profile_list.insert(dst.to_string(), copy);
        tracing::info!(src, dst, "profile duplicated");
        self.save()
    }

    /// Remove `name`. Removing a profile that does not exist does nothing.
    pub fn remove_profile(&mut self, name: &str) -> Result<()> {
        let Some(profile) = self.document.profile_list.get(name) else {
            tracing::debug!(profile = name, "profile to remove does not exist");
            return Ok(());
        };
        if profile.is_default {
            return Err(KisitError::DefaultProfile(name.to_string()));
        }

        self.document.profile_list.remove(name);
        self.document.normalize();
        tracing::info!(profile = name, "profile removed");
        self.save()
    }

    /// Rename `old` to `new`, following the current profile along.
    ///
    /// Returns `Ok(false)` without changing anything when `old` does not
    /// exist or `new` is taken.
    pub fn rename_profile(&mut self, old: &str, new: &str) -> Result<bool> {
        let Some(profile) = self.document.profile_list.get(old) else {
            tracing::warn!(profile = old, "profile to rename does not exist");
            return Ok(false);
        };
        if profile.is_default {
            return Err(KisitError::DefaultProfile(old.to_string()));
        }
        if self.document.profile_list.contains_key(new) {
            tracing::warn!(old, new, "rename target already exists");
            return Ok(false);
        }

        if let Some(profile) = self.document.profile_list.remove(old) {
            self.document.profile_list.insert(new.to_string(), profile);
        }
        if self.document.current_profile == old {
            self.document.current_profile = new.to_string();
        }
        tracing::info!(old, new, "profile renamed");
        self.save()?;
        Ok(true)
    }

    /// Edit the rules of a locally managed profile.
    pub fn update_profile<F>(&mut self, name: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Profile),
    {
        let profile = self
            .document
            .profile_list
            .get_mut(name)
            .ok_or_else(|| KisitError::ProfileNotFound(name.to_string()))?;
        if profile.is_default {
            return Err(KisitError::DefaultProfile(name.to_string()));
        }
        edit(profile);
        self.save()
    }

    pub fn always_restricted_applications(&self) -> &[String] {
        &self.document.always_restricted_applications
    }

    pub fn set_always_restricted_applications(&mut self, ids: Vec<String>) -> Result<()> {
        let mut ids = ids;
        ids.sort();
        ids.dedup();
        self.document.always_restricted_applications = ids;
        self.save()
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        match self.document.profile_list.get(name) {
            Some(existing) if existing.is_default => Err(KisitError::DefaultProfile(name.to_string())),
            Some(_) => Err(KisitError::ProfileExists(name.to_string())),
            None => Ok(()),
        }
    }
}

/// Parse the store, returning the backup path when a corrupt file was
/// set aside.
fn read_document(path: &Path, escalator: &dyn PrivilegeEscalator) -> Result<(StoreDocument, Option<PathBuf>)> {
    let Some(text) = read_state_file(path, escalator)? else {
        tracing::info!(path = %path.display(), "no profile store yet, using defaults");
        return Ok((StoreDocument::default(), None));
    };

    match serde_json::from_str::<StoreDocument>(&text) {
        Ok(mut document) => {
            if document.normalize() {
                tracing::warn!(path = %path.display(), "profile store repaired on load");
            }
            Ok((document, None))
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "profile store is corrupt");
            let backup = back_up_corrupt(path)?;
            Ok((StoreDocument::default(), Some(backup)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::{NoEscalation, PkexecEscalator};
    use crate::profile::{DEFAULT_PROFILE_NAME, RestrictionType, RuleList};
    use crate::system::{CommandOutput, RecordingRunner};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn store_at(dir: &Path) -> ProfileStore {
        ProfileStore::load(dir.join("profiles.json"), Arc::new(NoEscalation)).unwrap()
    }

    #[test]
    fn test_missing_file_gives_defaults_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_at(tmp.path());
        assert_eq!(store.current_profile_name(), DEFAULT_PROFILE_NAME);
        assert!(!store.current_profile().unwrap().has_restrictions());
        assert_eq!(
            store.always_restricted_applications(),
            &["tr.org.pardus.eta-help.desktop".to_string()]
        );
        assert!(!store.path().exists());
    }

    #[test]
    fn test_mutations_are_written_through() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        store.insert_default_profile("Sınav", Some("ogretmen")).unwrap();
        store.set_current_profile("Sınav").unwrap();
        store
            .update_profile("Sınav", |profile| {
                profile.website.restriction_type = RestrictionType::Allowlist;
                profile.website.insert(RuleList::Allowlist, "eba.gov.tr");
            })
            .unwrap();

        let reloaded = store_at(tmp.path());
        assert_eq!(reloaded.current_profile_name(), "Sınav");
        let profile = reloaded.get_profile("Sınav").unwrap();
        assert_eq!(profile.created_by.as_deref(), Some("ogretmen"));
        assert!(profile.website.allowlist.contains("eba.gov.tr"));
        assert_eq!(reloaded.document(), store.document());
    }

    #[test]
    fn test_saved_document_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        store.insert_default_profile("B", None).unwrap();
        store.insert_default_profile("A", None).unwrap();
        let first = fs::read(store.path()).unwrap();
        store.save().unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), first);
    }

    #[test]
    fn test_rename_follows_current_and_refuses_taken_names() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        store.insert_default_profile("Ders", None).unwrap();
        store.set_current_profile("Ders").unwrap();

        assert!(!store.rename_profile("Ders", DEFAULT_PROFILE_NAME).unwrap());
        assert_eq!(store.current_profile_name(), "Ders");

        assert!(store.rename_profile("Ders", "Ders 2").unwrap());
        assert_eq!(store.current_profile_name(), "Ders 2");
        assert!(matches!(
            store.get_profile("Ders"),
            Err(KisitError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_rename_missing_profile_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        let before = store.document().clone();

        assert!(!store.rename_profile("Yok", "Yeni").unwrap());
        assert_eq!(store.document(), &before);
        assert!(!store.profiles().contains_key("Yeni"));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_remove_missing_is_noop_and_store_never_empties() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        store.remove_profile("yok").unwrap();
        assert!(!store.path().exists());

        store.remove_profile(DEFAULT_PROFILE_NAME).unwrap();
        assert_eq!(store.profiles().len(), 1);
        assert!(store.get_profile(store.current_profile_name()).is_ok());
    }

    #[test]
    fn test_duplicate_copies_rules_and_clears_default_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"current_profile": "Lider", "profile_list": {"Lider": {
                "application": {"restriction_type": "denylist", "denylist": ["org.example.Game.desktop"]},
                "created_by": "ogretmen", "is_default": true}}}"#,
        )
        .unwrap();
        let mut store = ProfileStore::load(&path, Arc::new(NoEscalation)).unwrap();

        store.duplicate_profile("Lider", "Kopya", Some("mudur")).unwrap();
        let copy = store.get_profile("Kopya").unwrap();
        assert!(!copy.is_default);
        assert_eq!(copy.created_by.as_deref(), Some("mudur"));
        assert!(copy.application.denylist.contains("org.example.Game.desktop"));

        assert!(matches!(
            store.duplicate_profile("Kopya", "Kopya", None),
            Err(KisitError::ProfileExists(_))
        ));
        assert!(matches!(
            store.duplicate_profile("Yok", "Yeni", None),
            Err(KisitError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_default_profiles_are_immutable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"current_profile": "Lider", "profile_list": {"Lider": {"is_default": true}}}"#,
        )
        .unwrap();
        let mut store = ProfileStore::load(&path, Arc::new(NoEscalation)).unwrap();

        assert!(matches!(store.remove_profile("Lider"), Err(KisitError::DefaultProfile(_))));
        assert!(matches!(store.rename_profile("Lider", "X"), Err(KisitError::DefaultProfile(_))));
        assert!(matches!(
            store.insert_default_profile("Lider", None),
            Err(KisitError::DefaultProfile(_))
        ));
        assert!(matches!(
            store.update_profile("Lider", |p| p.activate_on_startup = true),
            Err(KisitError::DefaultProfile(_))
        ));
        assert!(store.get_profile("Lider").unwrap().is_default);
    }

    #[test]
    fn test_corrupt_store_is_backed_up_and_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        fs::write(&path, "{\"profile_list\": [").unwrap();

        let store = ProfileStore::load(&path, Arc::new(NoEscalation)).unwrap();
        assert_eq!(store.current_profile_name(), DEFAULT_PROFILE_NAME);
        assert!(!path.exists());
        let backup = tmp.path().join("profiles.json.backup");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{\"profile_list\": [");

        match store.corruption() {
            Some(KisitError::CorruptState { path: corrupt, backup: moved }) => {
                assert_eq!(corrupt, path);
                assert_eq!(moved, backup);
            }
            other => panic!("expected corrupt state, got {other:?}"),
        }
        assert!(store_at(tmp.path()).corruption().is_none());
    }

    #[test]
    fn test_unreadable_store_escalates_once() {
        if nix::unistd::geteuid().is_root() {
            // root reads through any mode
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        let runner = Arc::new(RecordingRunner::new());
        runner.respond("pkexec", CommandOutput::ok_with(""));
        let escalator = PkexecEscalator::new(runner.clone(), PathBuf::from("/usr/bin/kisit"), vec![]);

        let err = ProfileStore::load(&path, Arc::new(escalator)).unwrap_err();
        assert!(matches!(err, KisitError::PermissionDenied { .. }));
        assert!(err.to_string().contains("administrator"));
        assert_eq!(runner.calls_for("pkexec").len(), 1);
    }

    #[test]
    fn test_always_restricted_list_is_sorted_and_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store_at(tmp.path());
        store
            .set_always_restricted_applications(vec![
                "b.desktop".to_string(),
                "a.desktop".to_string(),
                "b.desktop".to_string(),
            ])
            .unwrap();
        assert_eq!(
            store.always_restricted_applications(),
            &["a.desktop".to_string(), "b.desktop".to_string()]
        );
    }
}
