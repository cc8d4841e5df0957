//! Block-lists for sandboxed packaging formats. Flatpak and Snap apps share
//! runtimes on disk, so they are blocked through their own tooling instead of
//! file modes.

use crate::context::EnforcementReport;
use crate::error::Result;
use crate::system::{CommandRunner, run_logged};

const MALCONTENT: &str = "malcontent-client";
const SNAP: &str = "snap";

/// Parental-controls app filter of the restricted account.
pub struct FlatpakBlocklist<'a> {
    runner: &'a dyn CommandRunner,
    user: &'a str,
}

impl<'a> FlatpakBlocklist<'a> {
    pub fn new(runner: &'a dyn CommandRunner, user: &'a str) -> Self {
        Self { runner, user }
    }

    /// Replace the account's filter with `app_ids`.
    pub fn apply(&self, app_ids: &[String], report: &mut EnforcementReport) {
        for id in app_ids {
            tracing::info!(app = %id, origin = "flatpak", "blocked");
        }
        let mut args = vec!["set-app-filter", "--quiet", "--noninteractive", self.user];
        args.extend(app_ids.iter().map(String::as_str));
        if !run_logged(self.runner, MALCONTENT, &args) {
            report.fail(MALCONTENT, "could not set the flatpak app filter");
        }
    }

    /// Drop every entry from the account's filter.
    pub fn clear(&self, report: &mut EnforcementReport) {
        let args = ["set-app-filter", "--quiet", "--noninteractive", self.user];
        if !run_logged(self.runner, MALCONTENT, &args) {
            report.fail(MALCONTENT, "could not clear the flatpak app filter");
        }
    }
}

/// Snap packages, toggled system-wide with `snap disable` / `snap enable`.
pub struct SnapControl<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SnapControl<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Disable `names`. Without a usable `snap` binary this is a logged skip.
    pub fn disable(&self, names: &[String], report: &mut EnforcementReport) {
        for name in names {
            match self.runner.run(SNAP, &["disable", name.as_str()]) {
                Ok(output) if output.success() => {
                    tracing::info!(app = %name, origin = "snap", "blocked");
                }
                Ok(output) => {
                    tracing::warn!(
                        app = %name,
                        status = ?output.status,
                        stderr = %output.stderr.trim(),
                        "snap disable failed"
                    );
                    report.fail(format!("snap {name}"), "could not disable");
                }
                Err(err) => {
                    tracing::info!(error = %err, count = names.len(), "snap is not available, snaps left enabled");
                    return;
                }
            }
        }
    }

    /// Enable every snap currently reported as disabled.
    pub fn enable_all(&self, report: &mut EnforcementReport) {
        let disabled = match self.disabled() {
            Ok(disabled) => disabled,
            Err(err) => {
                tracing::debug!(error = %err, "snap is not available");
                return;
            }
        };
        for name in disabled {
            if run_logged(self.runner, SNAP, &["enable", name.as_str()]) {
                tracing::info!(app = %name, origin = "snap", "unblocked");
            } else {
                report.fail(format!("snap {name}"), "could not enable");
            }
        }
    }

    fn disabled(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run(SNAP, &["list", "--color=never", "--unicode=never"])?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(parse_disabled_snaps(&output.stdout))
    }
}

/// Names of snaps whose `Notes` column says `disabled`.
fn parse_disabled_snaps(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match (columns.first(), columns.last()) {
                (Some(name), Some(notes)) if notes.split(',').any(|note| note == "disabled") => {
                    Some(name.to_string())
                }
                _ => None,
            }
        })
        .collect()
}
