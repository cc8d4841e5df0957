//! Profile data model.
//!
//! Profiles are stored as JSON documents with sorted keys, so struct fields
//! below are declared in alphabetical order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the built-in profile present in a fresh store.
pub const DEFAULT_PROFILE_NAME: &str = "Varsayılan Ayar";

/// Applications restricted on every activation regardless of profile.
pub const DEFAULT_ALWAYS_RESTRICTED_APPLICATIONS: &[&str] = &["tr.org.pardus.eta-help.desktop"];

/// How a rule axis is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionType {
    #[default]
    None,
    Allowlist,
    Denylist,
}

impl RestrictionType {
    pub fn is_none(self) -> bool {
        matches!(self, RestrictionType::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RestrictionType::None => "none",
            RestrictionType::Allowlist => "allowlist",
            RestrictionType::Denylist => "denylist",
        }
    }
}

/// Which of the two lists of an axis an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleList {
    Allowlist,
    Denylist,
}

/// Rules of one axis (applications or websites).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRules {
    #[serde(default)]
    pub allowlist: BTreeSet<String>,
    #[serde(default)]
    pub denylist: BTreeSet<String>,
    #[serde(default)]
    pub restriction_type: RestrictionType,
}

impl AxisRules {
    /// Add an entry. Returns false when it was already present.
    pub fn insert(&mut self, list: RuleList, entry: impl Into<String>) -> bool {
        self.list_mut(list).insert(entry.into())
    }

    /// Remove an entry. Returns false when it was not present.
    pub fn remove(&mut self, list: RuleList, entry: &str) -> bool {
        self.list_mut(list).remove(entry)
    }

    /// The list the current restriction type enforces, if any.
    pub fn active_list(&self) -> Option<&BTreeSet<String>> {
        match self.restriction_type {
            RestrictionType::None => None,
            RestrictionType::Allowlist => Some(&self.allowlist),
            RestrictionType::Denylist => Some(&self.denylist),
        }
    }

    fn list_mut(&mut self, list: RuleList) -> &mut BTreeSet<String> {
        match list {
            RuleList::Allowlist => &mut self.allowlist,
            RuleList::Denylist => &mut self.denylist,
        }
    }
}

/// Named bundle of application and website rules plus ownership metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Apply automatically when the owner logs in.
    #[serde(default)]
    pub activate_on_startup: bool,
    #[serde(default)]
    pub application: AxisRules,
    /// Owning account. `None` means the profile belongs to the account named
    /// like the profile itself.
    #[serde(
        default,
        serialize_with = "serialize_owner",
        deserialize_with = "deserialize_owner"
    )]
    pub created_by: Option<String>,
    /// Managed externally; never changed by local edits.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
    #[serde(default)]
    pub website: AxisRules,
}

impl Profile {
    /// A fresh profile with no restrictions.
    pub fn unrestricted(created_by: Option<String>) -> Self {
        Self {
            created_by: created_by.filter(|owner| !owner.is_empty()),
            ..Self::default()
        }
    }

    /// Whether activating this profile would enforce anything at all.
    pub fn has_restrictions(&self) -> bool {
        !self.application.restriction_type.is_none() || !self.website.restriction_type.is_none()
    }

    /// Effective owner of a profile stored under `name`.
    pub fn owner<'a>(&'a self, name: &'a str) -> &'a str {
        self.created_by.as_deref().unwrap_or(name)
    }
}

fn serialize_owner<S: Serializer>(owner: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(owner.as_deref().unwrap_or(""))
}

fn deserialize_owner<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let owner: Option<String> = Option::deserialize(deserializer)?;
    Ok(owner.filter(|owner| !owner.is_empty()))
}

fn default_always_restricted() -> Vec<String> {
    DEFAULT_ALWAYS_RESTRICTED_APPLICATIONS
        .iter()
        .map(|id| id.to_string())
        .collect()
}

/// On-disk shape of the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default = "default_always_restricted")]
    pub always_restricted_applications: Vec<String>,
    pub current_profile: String,
    pub profile_list: BTreeMap<String, Profile>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        let mut profile_list = BTreeMap::new();
        profile_list.insert(DEFAULT_PROFILE_NAME.to_string(), Profile::unrestricted(None));
        Self {
            always_restricted_applications: default_always_restricted(),
            current_profile: DEFAULT_PROFILE_NAME.to_string(),
            profile_list,
        }
    }
}

impl StoreDocument {
    /// Restore the store invariants: at least one profile and a current
    /// profile that exists. Returns true when anything changed.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        if self.profile_list.is_empty() {
            self.profile_list
                .insert(DEFAULT_PROFILE_NAME.to_string(), Profile::unrestricted(None));
            changed = true;
        }
        if !self.profile_list.contains_key(&self.current_profile)
            && let Some(first) = self.profile_list.keys().next()
        {
            self.current_profile = first.clone();
            changed = true;
        }
        changed
    }
}

/// Serialize a value the way every state file is written: pretty JSON with a
/// trailing newline. Map keys come out sorted because all maps are ordered.
pub fn to_document_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}
