//! Per-invocation enforcement context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::KisitConfig;
use crate::error::KisitError;
use crate::permissions::Ownership;
use crate::privilege::PrivilegeEscalator;
use crate::system::CommandRunner;

/// Everything an enforcement pass needs, built once per invocation and
/// passed down explicitly.
#[derive(Debug, Clone)]
pub struct EnforcementContext {
    pub config: KisitConfig,
    pub ownership: Ownership,
    pub runner: Arc<dyn CommandRunner>,
    pub escalator: Arc<dyn PrivilegeEscalator>,
}

impl EnforcementContext {
    pub fn new(
        config: KisitConfig,
        runner: Arc<dyn CommandRunner>,
        escalator: Arc<dyn PrivilegeEscalator>,
    ) -> Self {
        let ownership = Ownership::resolve(&config.accounts);
        Self {
            config,
            ownership,
            runner,
            escalator,
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
}

/// Outcome of one enforcement pass. Individual failures never abort a pass;
/// they end up here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    /// Files whose mode or contents were set.
    pub touched: Vec<PathBuf>,
    /// Ids that could not be resolved.
    pub skipped: Vec<String>,
    pub failures: Vec<String>,
}

impl EnforcementReport {
    pub fn touched(&mut self, path: &Path) {
        self.touched.push(path.to_path_buf());
    }

    pub fn skip(&mut self, id: &str, reason: &KisitError) {
        tracing::warn!(id, reason = %reason, "skipped");
        self.skipped.push(id.to_string());
    }

    pub fn fail(&mut self, subject: impl std::fmt::Display, err: impl std::fmt::Display) {
        tracing::warn!(subject = %subject, error = %err, "enforcement step failed");
        self.failures.push(format!("{subject}: {err}"));
    }

    pub fn merge(&mut self, other: EnforcementReport) {
        self.touched.extend(other.touched);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failures.is_empty()
    }
}
