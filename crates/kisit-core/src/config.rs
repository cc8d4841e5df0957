//! Engine configuration.
//!
//! Loaded from `/etc/eta-kisit/config.toml` (or the file named by
//! `KISIT_CONFIG`). Every path the engine touches is configurable so a whole
//! enforcement pass can be redirected into a scratch directory.

use nix::unistd::User;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KisitError, Result};

const DEFAULT_CONFIG_PATH: &str = "/etc/eta-kisit/config.toml";

/// Environment variable to override the configuration file location.
pub const CONFIG_ENV: &str = "KISIT_CONFIG";

const GUARD_FILE: &str = ".kisit.lock";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KisitConfig {
    pub paths: PathsConfig,
    pub accounts: AccountsConfig,
    pub network: NetworkConfig,
    pub catalog: CatalogConfig,
    /// Managed browser policy files, one per browser family/variant.
    pub browsers: Vec<BrowserTarget>,
}

/// Locations of state and generated files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: PathBuf,
    pub profiles_file: String,
    pub applied_profile_file: String,
    pub installed_applications_file: String,
    pub resolv_conf: PathBuf,
    pub dns_filter_config: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/eta/eta-kisit"),
            profiles_file: "profiles.json".to_string(),
            applied_profile_file: "applied_profile.lock.json".to_string(),
            installed_applications_file: "installed_applications.json".to_string(),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            dns_filter_config: PathBuf::from("/etc/smartdns/smartdns.conf"),
            log_dir: PathBuf::from("/var/log/eta-kisit"),
        }
    }
}

/// Accounts involved in enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Group whose members administer restrictions and may still read
    /// restricted files.
    pub admin_group: String,
    /// The managed account restrictions are aimed at.
    pub restricted_user: String,
    /// Home directory of the restricted account. Looked up in the user
    /// database when unset.
    pub restricted_home: Option<PathBuf>,
    /// Change file ownership on top of file modes.
    pub apply_ownership: bool,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            admin_group: "floppy".to_string(),
            restricted_user: "ogrenci".to_string(),
            restricted_home: None,
            apply_ownership: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upstream resolvers the local filtering service forwards to.
    pub upstream_dns: Vec<String>,
    pub dns_filter_service: String,
    pub network_service: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            upstream_dns: vec!["195.175.37.137".to_string(), "195.175.37.138".to_string()],
            dns_filter_service: "smartdns".to_string(),
            network_service: "NetworkManager.service".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// XDG data directories searched for `applications/`, highest precedence first.
    pub data_dirs: Vec<PathBuf>,
    pub flatpak_dir: PathBuf,
    pub snap_dir: PathBuf,
    /// Search path for resolving executables. `PATH` when unset.
    pub search_path: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dirs: [
                "/usr/share/etap",
                "/var/lib/wine-prefix/.local/share",
                "/usr/share/gnome",
                "/usr/local/share",
                "/usr/share",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            flatpak_dir: PathBuf::from("/var/lib/flatpak/exports/share/applications"),
            snap_dir: PathBuf::from("/var/lib/snapd/desktop/applications"),
            search_path: None,
        }
    }
}

/// Browser family, selecting the policy translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserFamily {
    Chromium,
    Firefox,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserTarget {
    pub family: BrowserFamily,
    pub path: PathBuf,
}

impl BrowserTarget {
    fn new(family: BrowserFamily, path: &str) -> Self {
        Self {
            family,
            path: PathBuf::from(path),
        }
    }
}

/// Policy files of every supported browser and packaging variant.
pub fn default_browser_targets() -> Vec<BrowserTarget> {
    use BrowserFamily::{Chromium, Firefox};
    vec![
        BrowserTarget::new(Chromium, "/etc/opt/chrome/policies/managed/policies.json"),
        BrowserTarget::new(Chromium, "/etc/brave/policies/managed/policies.json"),
        BrowserTarget::new(Chromium, "/etc/chromium/policies/managed/policies.json"),
        BrowserTarget::new(Chromium, "/etc/chromium-browser/policies/managed/policies.json"),
        BrowserTarget::new(Firefox, "/usr/share/firefox-esr/distribution/policies.json"),
        BrowserTarget::new(Firefox, "/etc/firefox/policies/policies.json"),
        BrowserTarget::new(
            Firefox,
            "/var/lib/flatpak/extension/org.mozilla.firefox.systemconfig/x86_64/stable/policies/policies.json",
        ),
    ]
}

impl KisitConfig {
    /// Load configuration from `KISIT_CONFIG` or the default location.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::resolve_path())
    }

    /// Load configuration from a specific file. A missing file yields the
    /// built-in defaults; a malformed one is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default().with_default_browsers());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|err| KisitError::Config(format!("{}: {err}", path.display())))?;
        Ok(config.with_default_browsers())
    }

    /// Resolve the configuration path.
    /// Priority: KISIT_CONFIG env var > /etc/eta-kisit/config.toml
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return PathBuf::from(path);
        }
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    fn with_default_browsers(mut self) -> Self {
        if self.browsers.is_empty() {
            self.browsers = default_browser_targets();
        }
        self
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.paths.state_dir.join(&self.paths.profiles_file)
    }

    pub fn applied_profile_path(&self) -> PathBuf {
        self.paths.state_dir.join(&self.paths.applied_profile_file)
    }

    pub fn installed_applications_path(&self) -> PathBuf {
        self.paths.state_dir.join(&self.paths.installed_applications_file)
    }

    /// Home directory of the restricted account, if it can be determined.
    pub fn restricted_home(&self) -> Option<PathBuf> {
        if let Some(home) = &self.accounts.restricted_home {
            return Some(home.clone());
        }
        match User::from_name(&self.accounts.restricted_user) {
            Ok(Some(user)) => Some(user.dir),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(user = %self.accounts.restricted_user, error = %err, "user lookup failed");
                None
            }
        }
    }

    /// The restricted account's own desktop-entry override directory.
    pub fn local_applications_dir(&self) -> Option<PathBuf> {
        self.restricted_home()
            .map(|home| home.join(".local/share/applications"))
    }

    /// Advisory lock file serializing privileged invocations.
    pub fn guard_path(&self) -> PathBuf {
        self.paths.state_dir.join(GUARD_FILE)
    }

    /// Rebase every absolute path under `root`. Used to run the engine
    /// against a scratch tree.
    pub fn rooted_at(root: &Path) -> Self {
        fn rebase(root: &Path, path: &Path) -> PathBuf {
            root.join(path.strip_prefix("/").unwrap_or(path))
        }
        let defaults = Self::default();

        let paths = PathsConfig {
            state_dir: rebase(root, &defaults.paths.state_dir),
            resolv_conf: rebase(root, &defaults.paths.resolv_conf),
            dns_filter_config: rebase(root, &defaults.paths.dns_filter_config),
            log_dir: rebase(root, &defaults.paths.log_dir),
            ..defaults.paths
        };
        let catalog = CatalogConfig {
            data_dirs: defaults.catalog.data_dirs.iter().map(|dir| rebase(root, dir)).collect(),
            flatpak_dir: rebase(root, &defaults.catalog.flatpak_dir),
            snap_dir: rebase(root, &defaults.catalog.snap_dir),
            search_path: Some(root.join("usr/bin").to_string_lossy().into_owned()),
        };
        let browsers = default_browser_targets()
            .into_iter()
            .map(|target| BrowserTarget {
                path: rebase(root, &target.path),
                ..target
            })
            .collect();

        Self {
            paths,
            accounts: AccountsConfig {
                restricted_home: Some(root.join("home/restricted")),
                apply_ownership: false,
                ..defaults.accounts
            },
            network: defaults.network,
            catalog,
            browsers,
        }
    }
}
