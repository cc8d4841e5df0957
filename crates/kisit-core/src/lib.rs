//! Profile-based restriction of desktop applications and websites for a
//! shared, unprivileged account.
//!
//! A [`ProfileStore`] holds named rule sets. The [`ActivationCoordinator`]
//! enforces the current one by switching desktop entries and executables to
//! administrator-only modes, redirecting DNS through a local filter and
//! writing managed browser policies, then records the applied profile in a
//! lock file whose presence means "restricted".
//!
//! # Usage
//!
//! Every invocation builds one [`EnforcementContext`] and passes it down:
//! 1. Load a [`KisitConfig`] and the [`ProfileStore`].
//! 2. Check [`is_privileged`]; unprivileged callers re-run through a
//!    [`PrivilegeEscalator`].
//! 3. Call a transition on the [`ActivationCoordinator`].

pub mod catalog;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod permissions;
pub mod privilege;
pub mod profile;
pub mod restriction;
pub mod state;
pub mod store;
pub mod system;

pub use catalog::{ApplicationCatalog, ExecutableFilter, PackagingOrigin, ResolvedApplication};
pub use config::KisitConfig;
pub use context::{EnforcementContext, EnforcementReport};
pub use coordinator::{ActivationCoordinator, Status, Transition, TransitionReport};
pub use error::{KisitError, Result};
pub use privilege::{NoEscalation, PkexecEscalator, PrivilegeEscalator, is_privileged, is_root};
pub use profile::{Profile, RestrictionType, RuleList};
pub use state::StateGuard;
pub use store::ProfileStore;
pub use system::{CommandRunner, SystemCommandRunner};
