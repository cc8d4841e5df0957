//! Activation state machine.
//!
//! Inactive: no applied-profile lock. Active: the lock exists and holds the
//! profile in force. Every transition runs under the state guard and writes
//! or deletes the lock as its very last step, so an interrupted run never
//! reports a state it did not reach.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::catalog::ApplicationCatalog;
use crate::context::{EnforcementContext, EnforcementReport};
use crate::error::{KisitError, Result};
use crate::permissions::set_state_access;
use crate::profile::Profile;
use crate::restriction::{ApplicationRestrictionEngine, NetworkRestrictionEngine, compile_domain_list};
use crate::state::{AppliedProfileLock, StateGuard};
use crate::store::ProfileStore;

/// Browser processes closed in the restricted account on every transition.
pub const BROWSER_PROCESSES: &[&str] = &["chrome", "chromium", "firefox-esr", "firefox", "brave"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Activated,
    Deactivated,
    AlreadyActive,
    AlreadyInactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub transition: Transition,
    /// Profile that was applied, for activations.
    pub profile: Option<String>,
    pub report: EnforcementReport,
}

impl TransitionReport {
    fn unchanged(transition: Transition) -> Self {
        Self {
            transition,
            profile: None,
            report: EnforcementReport::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub active: bool,
    pub current_profile: String,
    /// Snapshot held by the lock while active.
    pub applied_profile: Option<Profile>,
    pub dns_redirect: bool,
}

pub struct ActivationCoordinator<'a> {
    ctx: &'a EnforcementContext,
    catalog: ApplicationCatalog,
    lock: AppliedProfileLock,
}

impl<'a> ActivationCoordinator<'a> {
    pub fn new(ctx: &'a EnforcementContext) -> Self {
        Self {
            ctx,
            catalog: ApplicationCatalog::new(&ctx.config),
            lock: AppliedProfileLock::new(ctx.config.applied_profile_path()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock.is_active()
    }

    /// Enforce the store's current profile. A no-op when already active.
    pub fn restrict(&self) -> Result<TransitionReport> {
        let _guard = self.guard()?;
        let store = self.load_store()?;
        self.restrict_guarded(&store)
    }

    /// Lift the active restriction. A no-op when inactive.
    pub fn unrestrict(&self) -> Result<TransitionReport> {
        let _guard = self.guard()?;
        let store = self.load_store()?;
        self.unrestrict_guarded(&store)
    }

    /// Re-apply from the current profile: unrestrict, then restrict.
    /// A current profile without restrictions leaves the system inactive.
    pub fn reload(&self) -> Result<TransitionReport> {
        let _guard = self.guard()?;
        let store = self.load_store()?;
        let released = self.unrestrict_guarded(&store)?;
        match self.restrict_guarded(&store) {
            Err(KisitError::NothingSelected) => {
                tracing::warn!(profile = store.current_profile_name(), "nothing to restrict after reload");
                Ok(released)
            }
            other => other,
        }
    }

    /// Put website filtering back in place for the applied profile, e.g.
    /// when the restricted account logs in.
    pub fn enable_website_restriction(&self) -> Result<EnforcementReport> {
        let _guard = self.guard()?;
        let mut report = EnforcementReport::default();
        let Some(profile) = self.lock.snapshot(self.ctx.escalator.as_ref())? else {
            tracing::info!("no restriction active, website restriction not enabled");
            return Ok(report);
        };
        if let Some(list) = compile_domain_list(&profile) {
            self.close_browser_sessions(&mut report);
            report.merge(NetworkRestrictionEngine::new(self.ctx).apply(&list));
        }
        Ok(report)
    }

    /// Lift website filtering while keeping the restriction active.
    pub fn disable_website_restriction(&self) -> Result<EnforcementReport> {
        let _guard = self.guard()?;
        let mut report = EnforcementReport::default();
        if !self.lock.is_active() {
            tracing::info!("no restriction active, nothing to disable");
            return Ok(report);
        }
        self.close_browser_sessions(&mut report);
        report.merge(NetworkRestrictionEngine::new(self.ctx).revert());
        Ok(report)
    }

    /// Restrict only the always-restricted applications.
    pub fn apply_always_restricted(&self) -> Result<EnforcementReport> {
        let _guard = self.guard()?;
        let store = self.load_store()?;
        Ok(self.applications().apply_always_restricted(store.always_restricted_applications()))
    }

    /// Give the state directory and files their administrative mode and
    /// owner. Returns the paths that were fixed.
    pub fn fix_permissions(&self) -> Result<Vec<PathBuf>> {
        let config = &self.ctx.config;
        fs::create_dir_all(&config.paths.state_dir)?;

        let mut fixed = Vec::new();
        for path in [
            config.paths.state_dir.clone(),
            config.profiles_path(),
            config.applied_profile_path(),
            config.installed_applications_path(),
            config.guard_path(),
        ] {
            if set_state_access(&path, &self.ctx.ownership)? {
                tracing::info!(path = %path.display(), "permissions fixed");
                fixed.push(path);
            }
        }
        Ok(fixed)
    }

    pub fn status(&self) -> Result<Status> {
        let store = self.load_store()?;
        Ok(Status {
            active: self.lock.is_active(),
            current_profile: store.current_profile_name().to_string(),
            applied_profile: self.lock.snapshot(self.ctx.escalator.as_ref())?,
            dns_redirect: NetworkRestrictionEngine::new(self.ctx).is_applied(),
        })
    }

    fn restrict_guarded(&self, store: &ProfileStore) -> Result<TransitionReport> {
        if self.lock.is_active() {
            tracing::info!("restriction already active");
            return Ok(TransitionReport::unchanged(Transition::AlreadyActive));
        }

        let name = store.current_profile_name().to_string();
        let profile = store.current_profile()?.clone();
        if !profile.has_restrictions() {
            return Err(KisitError::NothingSelected);
        }
        tracing::info!(profile = %name, "restricting");

        let mut report = EnforcementReport::default();
        self.close_browser_sessions(&mut report);
        if let Some(list) = compile_domain_list(&profile) {
            report.merge(NetworkRestrictionEngine::new(self.ctx).apply(&list));
        }
        let applications = self.applications();
        if !profile.application.restriction_type.is_none() {
            report.merge(applications.apply(&profile));
        }
        report.merge(applications.apply_always_restricted(store.always_restricted_applications()));

        self.lock.write(&profile)?;
        if let Err(err) = set_state_access(self.lock.path(), &self.ctx.ownership) {
            tracing::warn!(path = %self.lock.path().display(), error = %err, "could not set lock permissions");
        }
        tracing::info!(
            profile = %name,
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "restriction active"
        );

        Ok(TransitionReport {
            transition: Transition::Activated,
            profile: Some(name),
            report,
        })
    }

    fn unrestrict_guarded(&self, store: &ProfileStore) -> Result<TransitionReport> {
        if !self.lock.is_active() {
            tracing::info!("no restriction active");
            return Ok(TransitionReport::unchanged(Transition::AlreadyInactive));
        }
        match self.lock.snapshot(self.ctx.escalator.as_ref()) {
            Ok(_) => tracing::info!("unrestricting"),
            Err(err) => tracing::warn!(error = %err, "applied profile unreadable, releasing everything"),
        }

        let mut report = EnforcementReport::default();
        self.close_browser_sessions(&mut report);
        report.merge(NetworkRestrictionEngine::new(self.ctx).revert());
        let applications = self.applications();
        report.merge(applications.revert());
        report.merge(applications.apply_always_restricted(store.always_restricted_applications()));

        self.lock.remove()?;
        tracing::info!(
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "restriction lifted"
        );

        Ok(TransitionReport {
            transition: Transition::Deactivated,
            profile: None,
            report,
        })
    }

    /// Kill browsers of the restricted account and drop its Firefox cache so
    /// no page loaded under the previous policy survives.
    fn close_browser_sessions(&self, report: &mut EnforcementReport) {
        let user = self.ctx.config.accounts.restricted_user.as_str();
        for &process in BROWSER_PROCESSES {
            // pkill exits 1 when nothing matched
            if let Err(err) = self.ctx.runner().run("pkill", &["-KILL", "-u", user, process]) {
                tracing::debug!(process, error = %err, "pkill unavailable");
            }
        }

        let Some(home) = self.ctx.config.restricted_home() else {
            return;
        };
        let cache = home.join(".cache/mozilla/firefox");
        if cache.is_dir() {
            match fs::remove_dir_all(&cache) {
                Ok(()) => report.touched(&cache),
                Err(err) => report.fail(cache.display(), err),
            }
        }
    }

    fn applications(&self) -> ApplicationRestrictionEngine<'_> {
        ApplicationRestrictionEngine::new(self.ctx, &self.catalog)
    }

    fn guard(&self) -> Result<StateGuard> {
        StateGuard::acquire(&self.ctx.config.guard_path())
    }

    /// Read the profile store. Transitions call this with the guard held so
    /// a concurrent profile edit is either fully in or fully out.
    fn load_store(&self) -> Result<ProfileStore> {
        let store = ProfileStore::load(self.ctx.config.profiles_path(), self.ctx.escalator.clone())?;
        if let Some(corruption) = store.corruption() {
            tracing::warn!(error = %corruption, "continuing with default profiles");
        }
        Ok(store)
    }
}
