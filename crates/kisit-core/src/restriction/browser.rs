//! Managed browser policies.
//!
//! Each browser family expresses website filtering differently. A
//! [`BrowserPolicyTranslator`] turns the compiled domain list into the keys
//! of one family's policy document; writing and removing go through the
//! same key-wise merge so policies set by anyone else survive.

use std::fs;
use std::io;
use std::path::Path;

use serde_json::{Map, Value, json};

use crate::config::BrowserFamily;
use crate::error::Result;
use crate::profile::to_document_string;

pub trait BrowserPolicyTranslator: Sync {
    /// Key holding the policy object, or `None` when policies sit at the
    /// document root.
    fn policy_root(&self) -> Option<&'static str>;

    /// Every key [`compile`](Self::compile) may produce.
    fn owned_keys(&self) -> &'static [&'static str];

    fn compile(&self, domains: &[String], is_allowlist: bool) -> Map<String, Value>;
}

/// Chrome, Chromium and Brave. Policies are top-level keys of a managed
/// policy file.
#[derive(Debug, Clone, Copy)]
pub struct ChromiumPolicy;

impl BrowserPolicyTranslator for ChromiumPolicy {
    fn policy_root(&self) -> Option<&'static str> {
        None
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        &["DnsOverHttpsMode", "URLAllowlist", "URLBlocklist"]
    }

    fn compile(&self, domains: &[String], is_allowlist: bool) -> Map<String, Value> {
        let (block, allow) = if is_allowlist {
            (json!(["*"]), json!(domains))
        } else {
            (json!(domains), json!([]))
        };

        let mut policy = Map::new();
        policy.insert("DnsOverHttpsMode".to_string(), json!("off"));
        policy.insert("URLAllowlist".to_string(), allow);
        policy.insert("URLBlocklist".to_string(), block);
        policy
    }
}

/// Firefox. Filtering uses match patterns under `policies.WebsiteFilter`.
#[derive(Debug, Clone, Copy)]
pub struct FirefoxPolicy;

impl FirefoxPolicy {
    fn match_patterns(domains: &[String]) -> Vec<String> {
        domains
            .iter()
            .flat_map(|domain| [format!("http://*.{domain}/*"), format!("https://*.{domain}/*")])
            .collect()
    }
}

impl BrowserPolicyTranslator for FirefoxPolicy {
    fn policy_root(&self) -> Option<&'static str> {
        Some("policies")
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        &["DNSOverHTTPS", "SanitizeOnShutdown", "WebsiteFilter"]
    }

    fn compile(&self, domains: &[String], is_allowlist: bool) -> Map<String, Value> {
        let patterns = Self::match_patterns(domains);
        let website_filter = if is_allowlist {
            json!({ "Block": ["<all_urls>"], "Exceptions": patterns })
        } else {
            json!({ "Block": patterns })
        };

        let mut policy = Map::new();
        policy.insert(
            "DNSOverHTTPS".to_string(),
            json!({ "Enabled": false, "Locked": true }),
        );
        policy.insert(
            "SanitizeOnShutdown".to_string(),
            json!({
                "Cache": true,
                "Cookies": true,
                "History": true,
                "Locked": true,
                "Sessions": true,
                "SiteSettings": true,
            }),
        );
        policy.insert("WebsiteFilter".to_string(), website_filter);
        policy
    }
}

static CHROMIUM: ChromiumPolicy = ChromiumPolicy;
static FIREFOX: FirefoxPolicy = FirefoxPolicy;

pub fn translator_for(family: BrowserFamily) -> &'static dyn BrowserPolicyTranslator {
    match family {
        BrowserFamily::Chromium => &CHROMIUM,
        BrowserFamily::Firefox => &FIREFOX,
    }
}

/// Merge the compiled policy into the file at `path`. Returns whether the
/// file changed.
pub fn write_policy(
    path: &Path,
    translator: &dyn BrowserPolicyTranslator,
    domains: &[String],
    is_allowlist: bool,
) -> Result<bool> {
    let original = read_existing(path)?;
    let mut document = match original.as_deref().map(parse_document) {
        Some(Some(document)) => document,
        Some(None) => {
            tracing::warn!(path = %path.display(), "unparsable browser policy replaced");
            Map::new()
        }
        None => Map::new(),
    };

    let policies = policy_object(&mut document, translator.policy_root());
    for (key, value) in translator.compile(domains, is_allowlist) {
        policies.insert(key, value);
    }

    let text = to_document_string(&document)?;
    if original.as_deref() == Some(text.as_str()) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    tracing::info!(path = %path.display(), "browser policy written");
    Ok(true)
}

/// Remove the translator's keys from the file at `path`. The file is deleted
/// when nothing else is left in it. Returns whether anything changed.
pub fn remove_policy(path: &Path, translator: &dyn BrowserPolicyTranslator) -> Result<bool> {
    let Some(original) = read_existing(path)? else {
        return Ok(false);
    };
    let Some(mut document) = parse_document(&original) else {
        tracing::warn!(path = %path.display(), "unparsable browser policy left untouched");
        return Ok(false);
    };

    let policies = policy_object(&mut document, translator.policy_root());
    let mut removed = false;
    for key in translator.owned_keys() {
        removed |= policies.remove(*key).is_some();
    }
    if !removed {
        return Ok(false);
    }

    let empty = match translator.policy_root() {
        None => document.is_empty(),
        Some(root) => {
            document.len() == 1
                && document
                    .get(root)
                    .and_then(Value::as_object)
                    .is_some_and(Map::is_empty)
        }
    };
    if empty {
        fs::remove_file(path)?;
        tracing::info!(path = %path.display(), "browser policy removed");
    } else {
        fs::write(path, to_document_string(&document)?)?;
        tracing::info!(path = %path.display(), "browser policy keys removed");
    }
    Ok(true)
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_document(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The object policies live in, created when missing.
fn policy_object<'a>(document: &'a mut Map<String, Value>, root: Option<&str>) -> &'a mut Map<String, Value> {
    let Some(root) = root else {
        return document;
    };
    let slot = document
        .entry(root.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("policy root was just made an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_chromium_allowlist_blocks_everything_else() {
        let policy = ChromiumPolicy.compile(&domains(&["eba.gov.tr", "ntp.org"]), true);
        assert_eq!(policy["URLBlocklist"], json!(["*"]));
        assert_eq!(policy["URLAllowlist"], json!(["eba.gov.tr", "ntp.org"]));
        assert_eq!(policy["DnsOverHttpsMode"], json!("off"));
    }

    #[test]
    fn test_chromium_denylist_blocks_listed() {
        let policy = ChromiumPolicy.compile(&domains(&["youtube.com"]), false);
        assert_eq!(policy["URLBlocklist"], json!(["youtube.com"]));
        assert_eq!(policy["URLAllowlist"], json!([]));
    }

    #[test]
    fn test_firefox_patterns() {
        let allow = FirefoxPolicy.compile(&domains(&["eba.gov.tr"]), true);
        assert_eq!(
            allow["WebsiteFilter"],
            json!({
                "Block": ["<all_urls>"],
                "Exceptions": ["http://*.eba.gov.tr/*", "https://*.eba.gov.tr/*"],
            })
        );

        let deny = FirefoxPolicy.compile(&domains(&["youtube.com"]), false);
        assert_eq!(
            deny["WebsiteFilter"],
            json!({ "Block": ["http://*.youtube.com/*", "https://*.youtube.com/*"] })
        );
        assert_eq!(deny["DNSOverHTTPS"]["Locked"], json!(true));
    }

    #[test]
    fn test_compiled_keys_are_owned() {
        for family in [BrowserFamily::Chromium, BrowserFamily::Firefox] {
            let translator = translator_for(family);
            for key in translator.compile(&domains(&["a.org"]), true).keys() {
                assert!(translator.owned_keys().contains(&key.as_str()), "{key}");
            }
        }
    }

    #[test]
    fn test_firefox_merge_keeps_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("distribution/policies.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"policies": {"DisableTelemetry": true, "WebsiteFilter": {"Block": ["old"]}}}"#,
        )
        .unwrap();

        assert!(write_policy(&path, &FirefoxPolicy, &domains(&["eba.gov.tr"]), true).unwrap());
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["policies"]["DisableTelemetry"], json!(true));
        assert_eq!(written["policies"]["WebsiteFilter"]["Block"], json!(["<all_urls>"]));

        assert!(remove_policy(&path, &FirefoxPolicy).unwrap());
        let reverted: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reverted, json!({"policies": {"DisableTelemetry": true}}));
    }

    #[test]
    fn test_write_is_idempotent_and_remove_deletes_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("managed/policies.json");

        assert!(write_policy(&path, &ChromiumPolicy, &domains(&["eba.gov.tr"]), true).unwrap());
        let first = fs::read(&path).unwrap();
        assert!(!write_policy(&path, &ChromiumPolicy, &domains(&["eba.gov.tr"]), true).unwrap());
        assert_eq!(fs::read(&path).unwrap(), first);

        assert!(remove_policy(&path, &ChromiumPolicy).unwrap());
        assert!(!path.exists());
        assert!(!remove_policy(&path, &ChromiumPolicy).unwrap());
    }

    #[test]
    fn test_unparsable_policy_is_left_on_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("policies.json");
        fs::write(&path, "not json").unwrap();
        assert!(!remove_policy(&path, &FirefoxPolicy).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }
}
