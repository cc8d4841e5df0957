//! Desktop application catalog.
//!
//! Resolves an application id to everything enforcement acts on: the desktop
//! entries that launch it, the executable behind them and the packaging
//! origin. Lookups never modify anything.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{CatalogConfig, KisitConfig};
use crate::error::{KisitError, Result};
use crate::profile::to_document_string;

const DESKTOP_SUFFIX: &str = ".desktop";
const DESKTOP_GROUP: &str = "[Desktop Entry]";

/// Shared tools that restricting one application must never take down.
pub const ALWAYS_ALLOWED_EXECUTABLES: &[&str] = &[
    "flatpak",
    "bash",
    "sh",
    "env",
    "exo-open",
    "libreoffice",
    "xfce4-panel",
    "xfce4-session-logout",
    "sudo",
    "pkexec",
    "xfwm4",
    "python",
    "python3",
    "cinnamon-session-quit",
    "cinnamon-settings",
    "eta-resolution",
    "system-config-printer",
    "dm-tool",
];

/// Parsed `[Desktop Entry]` group of a desktop file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    pub name: Option<String>,
    pub exec: Option<String>,
    pub icon: Option<String>,
    pub entry_type: Option<String>,
    pub no_display: bool,
    pub hidden: bool,
}

impl DesktopEntry {
    pub fn parse(content: &str) -> Self {
        let mut entry = Self::default();
        let mut in_group = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_group = line == DESKTOP_GROUP;
                continue;
            }
            if !in_group {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "Name" => entry.name = Some(value),
                "Exec" => entry.exec = Some(value),
                "Icon" => entry.icon = Some(value),
                "Type" => entry.entry_type = Some(value),
                "NoDisplay" => entry.no_display = value.eq_ignore_ascii_case("true"),
                "Hidden" => entry.hidden = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        entry
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn is_visible(&self) -> bool {
        !self.no_display && !self.hidden
    }
}

/// Where an application comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagingOrigin {
    Native,
    Flatpak,
    Snap,
}

impl PackagingOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            PackagingOrigin::Native => "native",
            PackagingOrigin::Flatpak => "flatpak",
            PackagingOrigin::Snap => "snap",
        }
    }
}

/// One desktop file found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub path: PathBuf,
    pub origin: PackagingOrigin,
    pub entry: DesktopEntry,
}

/// Whether the always-allowed executable set filters resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableFilter {
    /// Report no executable for always-allowed tools. Used when restricting.
    RespectAlwaysAllowed,
    /// Report the executable regardless. Used when reverting, so binaries
    /// blocked under an earlier rule set are released as well.
    Unfiltered,
}

/// Everything enforcement needs to know about one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApplication {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    /// System-wide desktop entries in precedence order.
    pub desktop_entry_paths: Vec<PathBuf>,
    /// Override in the restricted account's own applications directory.
    pub local_entry_path: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    pub origin: PackagingOrigin,
}

impl ResolvedApplication {
    /// Identifier the sandboxing system knows the application by: the
    /// Flatpak app id, or the snap name.
    pub fn sandbox_id(&self) -> Option<String> {
        let stem = self.id.strip_suffix(DESKTOP_SUFFIX).unwrap_or(&self.id);
        match self.origin {
            PackagingOrigin::Native => None,
            PackagingOrigin::Flatpak => Some(stem.to_string()),
            PackagingOrigin::Snap => Some(stem.split('_').next().unwrap_or(stem).to_string()),
        }
    }
}

#[derive(Debug)]
pub struct ApplicationCatalog {
    config: CatalogConfig,
    local_dir: Option<PathBuf>,
    entries: OnceLock<Vec<CatalogEntry>>,
}

impl ApplicationCatalog {
    pub fn new(config: &KisitConfig) -> Self {
        Self {
            config: config.catalog.clone(),
            local_dir: config.local_applications_dir(),
            entries: OnceLock::new(),
        }
    }

    /// Directories holding desktop files, highest precedence first.
    fn application_dirs(&self) -> Vec<(PathBuf, PackagingOrigin)> {
        let mut dirs: Vec<(PathBuf, PackagingOrigin)> = self
            .config
            .data_dirs
            .iter()
            .map(|dir| (dir.join("applications"), PackagingOrigin::Native))
            .collect();
        dirs.push((self.config.flatpak_dir.clone(), PackagingOrigin::Flatpak));
        dirs.push((self.config.snap_dir.clone(), PackagingOrigin::Snap));
        dirs
    }

    /// Every desktop file in every catalog directory, in precedence order.
    /// Duplicated ids are kept.
    pub fn entries(&self) -> &[CatalogEntry] {
        self.entries.get_or_init(|| {
            let mut entries = Vec::new();
            let mut seen_dirs = HashSet::new();
            for (dir, origin) in self.application_dirs() {
                if !dir.is_dir() || !seen_dirs.insert(dir.clone()) {
                    continue;
                }
                entries.extend(scan_directory(&dir, origin));
            }
            entries
        })
    }

    /// Visible applications, one per id (highest precedence wins), sorted by id.
    pub fn list_applications(&self) -> Vec<&CatalogEntry> {
        let mut by_id: BTreeMap<&str, &CatalogEntry> = BTreeMap::new();
        for entry in self.entries() {
            by_id.entry(entry.id.as_str()).or_insert(entry);
        }
        by_id
            .into_values()
            .filter(|entry| entry.entry.is_visible())
            .collect()
    }

    /// Applications of a sandboxed packaging origin.
    pub fn sandboxed_applications(&self, origin: PackagingOrigin) -> Vec<&CatalogEntry> {
        self.list_applications()
            .into_iter()
            .filter(|entry| entry.origin == origin)
            .collect()
    }

    /// Resolve an application id, or an absolute path to a desktop file.
    pub fn resolve(&self, app_id: &str, filter: ExecutableFilter) -> Result<ResolvedApplication> {
        let id = desktop_id_of(app_id);
        let mut matches: Vec<&CatalogEntry> =
            self.entries().iter().filter(|entry| entry.id == id).collect();

        let explicit = if app_id.starts_with('/') && Path::new(app_id).is_file() {
            Some(CatalogEntry {
                id: id.clone(),
                path: PathBuf::from(app_id),
                origin: self.origin_of(Path::new(app_id)),
                entry: DesktopEntry::load(Path::new(app_id))?,
            })
        } else {
            None
        };

        let local_entry_path = self
            .local_dir
            .as_ref()
            .map(|dir| dir.join(&id))
            .filter(|path| path.is_file());

        let primary = match (&explicit, matches.first()) {
            (Some(entry), _) => entry.clone(),
            (None, Some(entry)) => (*entry).clone(),
            (None, None) => return Err(KisitError::ApplicationNotFound(app_id.to_string())),
        };

        if let Some(local) = &local_entry_path {
            matches.retain(|entry| &entry.path != local);
        }
        let mut desktop_entry_paths: Vec<PathBuf> =
            matches.iter().map(|entry| entry.path.clone()).collect();
        if let Some(entry) = &explicit
            && !desktop_entry_paths.contains(&entry.path)
            && local_entry_path.as_ref() != Some(&entry.path)
        {
            desktop_entry_paths.insert(0, entry.path.clone());
        }

        let executable = match primary.origin {
            PackagingOrigin::Native => self.executable_for(&primary.entry, &id, filter),
            // Flatpak runtimes and the snap launcher are shared by every app.
            PackagingOrigin::Flatpak | PackagingOrigin::Snap => None,
        };

        Ok(ResolvedApplication {
            name: primary.entry.name.clone().unwrap_or_else(|| id.clone()),
            icon: primary.entry.icon.clone(),
            id,
            desktop_entry_paths,
            local_entry_path,
            executable,
            origin: primary.origin,
        })
    }

    fn origin_of(&self, path: &Path) -> PackagingOrigin {
        if path.starts_with(&self.config.flatpak_dir) {
            PackagingOrigin::Flatpak
        } else if path.starts_with(&self.config.snap_dir) {
            PackagingOrigin::Snap
        } else {
            PackagingOrigin::Native
        }
    }

    fn executable_for(&self, entry: &DesktopEntry, id: &str, filter: ExecutableFilter) -> Option<PathBuf> {
        let Some(exec) = entry.exec.as_deref() else {
            tracing::debug!(id, "desktop entry has no Exec line");
            return None;
        };
        let program = launch_program(exec)?;
        let name = Path::new(&program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())?;

        // Site shortcuts launch the browser; blocking them must not block it.
        if name.contains("chrom") && !id.contains("chrom") {
            return None;
        }

        if filter == ExecutableFilter::RespectAlwaysAllowed && ALWAYS_ALLOWED_EXECUTABLES.contains(&name.as_str()) {
            tracing::debug!(id, executable = %name, "executable is always allowed");
            return None;
        }

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let resolved = match &self.config.search_path {
            Some(search_path) => which::which_in(&name, Some(search_path), cwd),
            None => which::which(&name),
        };

        match resolved {
            Ok(path) => Some(path),
            Err(_) if program.starts_with('/') && Path::new(&program).is_file() => {
                Some(PathBuf::from(program))
            }
            Err(_) => {
                tracing::debug!(id, executable = %name, "executable not on search path");
                None
            }
        }
    }
}

/// Desktop id for an id or an absolute path to a desktop file.
fn desktop_id_of(app_id: &str) -> String {
    if app_id.starts_with('/') {
        return Path::new(app_id)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| app_id.to_string());
    }
    app_id.to_string()
}

/// Desktop files below `dir`. Files in sub-directories get ids joined with
/// `-`, e.g. `kde4/foo.desktop` becomes `kde4-foo.desktop`.
fn scan_directory(dir: &Path, origin: PackagingOrigin) -> Vec<CatalogEntry> {
    let mut found: Vec<CatalogEntry> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let relative = path.strip_prefix(dir).ok()?;
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("-");
            if !id.ends_with(DESKTOP_SUFFIX) {
                return None;
            }
            match DesktopEntry::load(&path) {
                Ok(entry) => Some(CatalogEntry {
                    id,
                    path,
                    origin,
                    entry,
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unreadable desktop file");
                    None
                }
            }
        })
        .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
}

/// The program a desktop `Exec` line starts, with quoting and `env`
/// wrappers removed.
pub fn launch_program(exec: &str) -> Option<String> {
    let tokens = shell_words::split(exec)
        .unwrap_or_else(|_| exec.split_whitespace().map(str::to_string).collect());

    let mut tokens = tokens.into_iter().peekable();
    while let Some(token) = tokens.peek() {
        let is_env = Path::new(token).file_name().is_some_and(|name| name == "env");
        if !is_env {
            break;
        }
        tokens.next();
        while let Some(arg) = tokens.peek() {
            if arg.starts_with('-') || (arg.contains('=') && !arg.starts_with('/')) {
                tokens.next();
            } else {
                break;
            }
        }
    }

    tokens.next().filter(|program| !program.is_empty())
}

#[derive(Debug, Serialize)]
struct InstalledApplication<'a> {
    bin: Option<String>,
    cmdline: Option<&'a str>,
    name: &'a str,
}

/// Write the visible catalog to `path` as `{id: {name, bin, cmdline}}`.
pub fn write_installed_applications(catalog: &ApplicationCatalog, path: &Path) -> Result<usize> {
    let applications: BTreeMap<&str, InstalledApplication<'_>> = catalog
        .list_applications()
        .into_iter()
        .map(|entry| {
            let exec = entry.entry.exec.as_deref();
            (
                entry.id.as_str(),
                InstalledApplication {
                    bin: exec.and_then(launch_program),
                    cmdline: exec,
                    name: entry.entry.name.as_deref().unwrap_or(entry.id.as_str()),
                },
            )
        })
        .collect();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_document_string(&applications)?)?;
    Ok(applications.len())
}
