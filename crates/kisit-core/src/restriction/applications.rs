//! Application restriction through desktop-entry and executable modes.

use std::collections::BTreeSet;
use std::path::Path;

use super::sandboxed::{FlatpakBlocklist, SnapControl};
use crate::catalog::{ApplicationCatalog, CatalogEntry, ExecutableFilter, PackagingOrigin, ResolvedApplication};
use crate::context::{EnforcementContext, EnforcementReport};
use crate::permissions::{Access, FileKind, RESTRICTED_EXECUTABLE_MODE, mode_of, set_access};
use crate::profile::{AxisRules, Profile, RestrictionType};

/// Session essentials no profile can take away.
pub const ALWAYS_ALLOWED_APPLICATIONS: &[&str] = &[
    // restart and exit
    "tr.org.pardus.eta-exit.desktop",
    "eta-r.desktop",
    "eta-keyboard.desktop",
    "eta-keyboard-autostart.desktop",
    "tr.org.pardus.eta-resolution.desktop",
    "org.gnome.Screenshot.desktop",
    "nemo.desktop",
    "eta-poweroff.desktop",
    "tr.org.pardus.pen.desktop",
    "tr.org.pardus.eta-qr-reader.desktop",
    "tr.org.pardus.eta-screen-cover.desktop",
    "tr.org.pardus.eta.count.desktop",
    "tr.org.pardus.night-light.desktop",
    "ogretmen-lock.desktop",
    "org.gnome.Evince.desktop",
    "org.gnome.Calculator.desktop",
    "org.gnome.FileRoller.desktop",
    "cinnamon-settings-sound.desktop",
    // office
    "libreoffice-base.desktop",
    "libreoffice-calc.desktop",
    "libreoffice-draw.desktop",
    "libreoffice-impress.desktop",
    "libreoffice-math.desktop",
    "libreoffice-startcenter.desktop",
    "libreoffice-writer.desktop",
];

pub fn is_always_allowed(app_id: &str) -> bool {
    ALWAYS_ALLOWED_APPLICATIONS.contains(&app_id)
}

/// Sandboxed apps gathered during a pass, blocked in one batch at the end.
#[derive(Debug, Default)]
struct SandboxBatch {
    flatpak: BTreeSet<String>,
    snap: BTreeSet<String>,
}

impl SandboxBatch {
    fn add(&mut self, app: &ResolvedApplication) {
        let Some(id) = app.sandbox_id() else {
            return;
        };
        match app.origin {
            PackagingOrigin::Flatpak => self.flatpak.insert(id),
            PackagingOrigin::Snap => self.snap.insert(id),
            PackagingOrigin::Native => false,
        };
    }
}

pub struct ApplicationRestrictionEngine<'a> {
    ctx: &'a EnforcementContext,
    catalog: &'a ApplicationCatalog,
}

impl<'a> ApplicationRestrictionEngine<'a> {
    pub fn new(ctx: &'a EnforcementContext, catalog: &'a ApplicationCatalog) -> Self {
        Self { ctx, catalog }
    }

    /// Enforce the application rules of `profile`.
    pub fn apply(&self, profile: &Profile) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        let mut batch = SandboxBatch::default();
        let rules = &profile.application;

        match rules.restriction_type {
            RestrictionType::None => return report,
            RestrictionType::Denylist => {
                tracing::info!(count = rules.denylist.len(), "restricting denylisted applications");
                for app_id in &rules.denylist {
                    self.restrict_id(app_id, &mut batch, &mut report);
                }
            }
            RestrictionType::Allowlist => {
                tracing::info!(count = rules.allowlist.len(), "restricting applications outside the allowlist");
                for entry in self.catalog.list_applications() {
                    if !is_listed(rules, entry) {
                        self.restrict_id(&entry.id, &mut batch, &mut report);
                    }
                }
            }
        }

        self.block_sandboxed(&batch, &mut report);
        report
    }

    /// Release every application in the catalog, whichever profile restricted
    /// it, and clear the sandboxed block-lists.
    pub fn revert(&self) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        let ids: BTreeSet<&str> = self
            .catalog
            .entries()
            .iter()
            .map(|entry| entry.id.as_str())
            .collect();
        tracing::info!(count = ids.len(), "releasing applications");

        for app_id in ids {
            match self.catalog.resolve(app_id, ExecutableFilter::Unfiltered) {
                Ok(app) if app.origin == PackagingOrigin::Native => self.release(&app, &mut report),
                Ok(_) => {}
                Err(err) => report.skip(app_id, &err),
            }
        }

        FlatpakBlocklist::new(self.ctx.runner(), &self.ctx.config.accounts.restricted_user).clear(&mut report);
        SnapControl::new(self.ctx.runner()).enable_all(&mut report);
        report
    }

    /// Restrict `app_ids` regardless of any profile.
    pub fn apply_always_restricted(&self, app_ids: &[String]) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        let mut batch = SandboxBatch::default();
        for app_id in app_ids {
            self.restrict_id(app_id, &mut batch, &mut report);
        }
        if !batch.snap.is_empty() {
            let names: Vec<String> = batch.snap.into_iter().collect();
            SnapControl::new(self.ctx.runner()).disable(&names, &mut report);
        }
        // The flatpak filter is a single list owned by the profile pass.
        for id in batch.flatpak {
            tracing::warn!(app = %id, "always-restricted flatpak apps are not supported");
        }
        report
    }

    fn restrict_id(&self, app_id: &str, batch: &mut SandboxBatch, report: &mut EnforcementReport) {
        let app = match self.catalog.resolve(app_id, ExecutableFilter::RespectAlwaysAllowed) {
            Ok(app) => app,
            Err(err) => {
                report.skip(app_id, &err);
                return;
            }
        };

        if is_always_allowed(&app.id) {
            tracing::debug!(app = %app.id, "always allowed");
            return;
        }

        match app.origin {
            PackagingOrigin::Native => self.restrict(&app, report),
            PackagingOrigin::Flatpak | PackagingOrigin::Snap => batch.add(&app),
        }
    }

    fn restrict(&self, app: &ResolvedApplication, report: &mut EnforcementReport) {
        if let Some(local) = &app.local_entry_path {
            self.set(local, FileKind::LocalDesktopEntry, Access::Restricted, report);
        }
        for path in &app.desktop_entry_paths {
            self.set(path, FileKind::DesktopEntry, Access::Restricted, report);
        }
        if let Some(executable) = &app.executable {
            self.set(executable, FileKind::Executable, Access::Restricted, report);
        }

        tracing::info!(
            app = %app.id,
            executable = %app.executable.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            "restricted"
        );
    }

    fn release(&self, app: &ResolvedApplication, report: &mut EnforcementReport) {
        if let Some(local) = &app.local_entry_path {
            self.set(local, FileKind::LocalDesktopEntry, Access::Permissive, report);
        }
        for path in &app.desktop_entry_paths {
            self.set(path, FileKind::DesktopEntry, Access::Permissive, report);
        }
        // Only executables left in the restricted mode are ours to open up.
        if let Some(executable) = &app.executable {
            match mode_of(executable) {
                Some(mode) if mode & 0o777 == RESTRICTED_EXECUTABLE_MODE => {
                    self.set(executable, FileKind::Executable, Access::Permissive, report);
                }
                _ => tracing::debug!(path = %executable.display(), "executable not restricted, left as is"),
            }
        }
        tracing::debug!(app = %app.id, "released");
    }

    fn set(&self, path: &Path, kind: FileKind, access: Access, report: &mut EnforcementReport) {
        match set_access(path, kind, access, &self.ctx.ownership) {
            Ok(true) => report.touched(path),
            Ok(false) => tracing::debug!(path = %path.display(), "not a regular file"),
            Err(err) => report.fail(path.display(), err),
        }
    }

    fn block_sandboxed(&self, batch: &SandboxBatch, report: &mut EnforcementReport) {
        let runner = self.ctx.runner();
        if !batch.flatpak.is_empty() {
            let ids: Vec<String> = batch.flatpak.iter().cloned().collect();
            FlatpakBlocklist::new(runner, &self.ctx.config.accounts.restricted_user).apply(&ids, report);
        }
        if !batch.snap.is_empty() {
            let names: Vec<String> = batch.snap.iter().cloned().collect();
            SnapControl::new(runner).disable(&names, report);
        }
    }
}

/// Whether an allowlist names `entry` by id or by desktop-file path.
fn is_listed(rules: &AxisRules, entry: &CatalogEntry) -> bool {
    rules.allowlist.contains(&entry.id)
        || rules
            .allowlist
            .contains(entry.path.to_string_lossy().as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{fixture_config, write_entry};
    use crate::permissions::mode_of;
    use crate::privilege::NoEscalation;
    use crate::profile::RuleList;
    use crate::system::{CommandOutput, RecordingRunner};
    use std::sync::Arc;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: std::path::PathBuf,
        ctx: EnforcementContext,
        runner: Arc<RecordingRunner>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let runner = Arc::new(RecordingRunner::new());
        let ctx = EnforcementContext::new(fixture_config(&root), runner.clone(), Arc::new(NoEscalation));
        Fixture {
            _tmp: tmp,
            root,
            ctx,
            runner,
        }
    }

    fn app_profile(kind: RestrictionType, list: RuleList, ids: &[&str]) -> Profile {
        let mut profile = Profile::default();
        profile.application.restriction_type = kind;
        for id in ids {
            profile.application.insert(list, *id);
        }
        profile
    }

    fn mode(root: &Path, rel: &str) -> u32 {
        mode_of(&root.join(rel)).unwrap()
    }

    #[test]
    fn test_denylist_restricts_entries_and_executable() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let engine = ApplicationRestrictionEngine::new(&f.ctx, &catalog);

        let report = engine.apply(&app_profile(
            RestrictionType::Denylist,
            RuleList::Denylist,
            &["org.example.Game.desktop", "org.example.Missing.desktop"],
        ));
        assert_eq!(report.skipped, vec!["org.example.Missing.desktop"]);
        assert!(report.failures.is_empty());

        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Game.desktop"), 0o640);
        assert_eq!(mode(&f.root, "usr/share/etap/applications/org.example.Game.desktop"), 0o640);
        assert_eq!(
            mode(&f.root, "home/restricted/.local/share/applications/org.example.Game.desktop"),
            0o640
        );
        assert_eq!(mode(&f.root, "usr/bin/game"), 0o750);
        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Editor.desktop"), 0o644);
    }

    #[test]
    fn test_shared_interpreter_is_never_restricted() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        ApplicationRestrictionEngine::new(&f.ctx, &catalog).apply(&app_profile(
            RestrictionType::Denylist,
            RuleList::Denylist,
            &["org.example.Script.desktop"],
        ));
        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Script.desktop"), 0o640);
        assert_eq!(mode(&f.root, "usr/bin/python3"), 0o755);
    }

    #[test]
    fn test_allowlist_restricts_everything_else() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let editor = f.root.join("usr/share/applications/org.example.Editor.desktop");
        let report = ApplicationRestrictionEngine::new(&f.ctx, &catalog).apply(&app_profile(
            RestrictionType::Allowlist,
            RuleList::Allowlist,
            &["org.example.Game.desktop", editor.to_str().unwrap()],
        ));
        assert!(report.is_clean(), "{report:?}");

        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Game.desktop"), 0o644);
        assert_eq!(mode_of(&editor), Some(0o644));
        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Script.desktop"), 0o640);
        // hidden entries are not part of the visible catalog
        assert_eq!(mode(&f.root, "usr/share/applications/hidden.desktop"), 0o644);

        assert_eq!(
            f.runner.calls_for("malcontent-client"),
            vec![vec!["set-app-filter", "--quiet", "--noninteractive", "ogrenci", "org.example.Paint"]]
        );
        assert_eq!(f.runner.calls_for("snap"), vec![vec!["disable", "chat"]]);
    }

    #[test]
    fn test_always_allowed_applications_are_untouched() {
        let f = fixture();
        let apps = f.root.join("usr/share/applications");
        write_entry(&apps, "org.gnome.Calculator.desktop", "Calculator", "game", false);
        let catalog = ApplicationCatalog::new(&f.ctx.config);

        ApplicationRestrictionEngine::new(&f.ctx, &catalog).apply(&app_profile(
            RestrictionType::Allowlist,
            RuleList::Allowlist,
            &[],
        ));
        assert_eq!(mode(&f.root, "usr/share/applications/org.gnome.Calculator.desktop"), 0o644);
    }

    #[test]
    fn test_revert_releases_whole_catalog() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let engine = ApplicationRestrictionEngine::new(&f.ctx, &catalog);
        engine.apply(&app_profile(RestrictionType::Allowlist, RuleList::Allowlist, &[]));
        assert_eq!(mode(&f.root, "usr/bin/editor"), 0o750);

        // python3 was blocked by an older rule set
        std::fs::set_permissions(
            f.root.join("usr/bin/python3"),
            std::os::unix::fs::PermissionsExt::from_mode(0o750),
        )
        .unwrap();
        f.runner.respond(
            "snap",
            CommandOutput::ok_with("Name Version Rev Tracking Publisher Notes\nchat 1 1 latest/stable x disabled\n"),
        );

        let report = engine.revert();
        assert!(report.failures.is_empty(), "{report:?}");
        for rel in [
            "usr/share/applications/org.example.Game.desktop",
            "usr/share/etap/applications/org.example.Game.desktop",
            "usr/share/applications/org.example.Script.desktop",
            "usr/share/applications/hidden.desktop",
        ] {
            assert_eq!(mode(&f.root, rel), 0o644, "{rel}");
        }
        assert_eq!(
            mode(&f.root, "home/restricted/.local/share/applications/org.example.Game.desktop"),
            0o775
        );
        for program in ["game", "editor", "python3"] {
            assert_eq!(mode(&f.root, &format!("usr/bin/{program}")), 0o755, "{program}");
        }
        assert!(
            f.runner
                .calls_for("malcontent-client")
                .contains(&vec!["set-app-filter".to_string(), "--quiet".to_string(), "--noninteractive".to_string(), "ogrenci".to_string()])
        );
        assert!(f.runner.calls_for("snap").contains(&vec!["enable".to_string(), "chat".to_string()]));
    }

    #[test]
    fn test_revert_leaves_unrestricted_executables_alone() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture();
        let bin = f.root.join("usr/bin");
        let apps = f.root.join("usr/share/applications");
        for (program, mode) in [("pkexec", 0o4755), ("tool", 0o700)] {
            std::fs::write(bin.join(program), "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(bin.join(program), std::fs::Permissions::from_mode(mode)).unwrap();
        }
        write_entry(&apps, "gparted.desktop", "GParted", "pkexec /usr/bin/gparted", false);
        write_entry(&apps, "tool.desktop", "Tool", "tool", false);

        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let engine = ApplicationRestrictionEngine::new(&f.ctx, &catalog);
        let report = engine.revert();

        assert!(report.failures.is_empty(), "{report:?}");
        assert_eq!(mode(&f.root, "usr/bin/pkexec"), 0o4755);
        assert_eq!(mode(&f.root, "usr/bin/tool"), 0o700);
        assert_eq!(mode(&f.root, "usr/share/applications/gparted.desktop"), 0o644);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let engine = ApplicationRestrictionEngine::new(&f.ctx, &catalog);
        let profile = app_profile(RestrictionType::Denylist, RuleList::Denylist, &["org.example.Game.desktop"]);

        let first = engine.apply(&profile);
        let second = engine.apply(&profile);
        assert_eq!(first, second);
        assert_eq!(mode(&f.root, "usr/bin/game"), 0o750);
    }

    #[test]
    fn test_always_restricted_ids_ignore_profile() {
        let f = fixture();
        let catalog = ApplicationCatalog::new(&f.ctx.config);
        let report = ApplicationRestrictionEngine::new(&f.ctx, &catalog)
            .apply_always_restricted(&["org.example.Editor.desktop".to_string(), "gone.desktop".to_string()]);
        assert_eq!(report.skipped, vec!["gone.desktop"]);
        assert_eq!(mode(&f.root, "usr/share/applications/org.example.Editor.desktop"), 0o640);
        assert_eq!(mode(&f.root, "usr/bin/editor"), 0o750);
    }
}
