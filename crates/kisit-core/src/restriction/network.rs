//! Website restriction through local DNS filtering and browser policies.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use super::browser::{remove_policy, translator_for, write_policy};
use crate::context::{EnforcementContext, EnforcementReport};
use crate::profile::{Profile, RestrictionType};
use crate::system::run_logged;

/// Domains that stay reachable under every profile.
pub const ALWAYS_ALLOWED_DOMAINS: &[&str] = &["ntp.org", "eba.gov.tr", "etap.org.tr"];

/// Domains an allowlisted site cannot work without.
pub const ALLOWLIST_DOMAIN_GROUPS: &[(&str, &[&str])] = &[
    (
        "youtubekids.com",
        &[
            "google.com",
            "gstatic.com",
            "googleapis.com",
            "googlevideo.com",
            "ytimg.com",
            "googleusercontent.com",
        ],
    ),
    ("turkiye.gov.tr", &["e-devlet.gov.tr"]),
];

/// First line of every file this engine generates.
pub const GENERATED_HEADER: &str = "# This file is generated & locked by eta-kisit app. Please do not change.";

const LOCAL_RESOLVER: &str = "nameserver 127.0.0.1";

/// Domain list ready to be enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainList {
    /// Sorted, without duplicates.
    pub domains: Vec<String>,
    pub is_allowlist: bool,
}

/// Compile the website rules of `profile`. `None` when websites are not
/// restricted.
///
/// Allowlists grow by the dependency groups of listed umbrella domains and
/// by the always-allowed domains. Denylists lose any always-allowed domain.
pub fn compile_domain_list(profile: &Profile) -> Option<DomainList> {
    let rules = &profile.website;
    match rules.restriction_type {
        RestrictionType::None => None,
        RestrictionType::Allowlist => {
            let mut domains: BTreeSet<String> = rules.allowlist.clone();
            for (umbrella, group) in ALLOWLIST_DOMAIN_GROUPS {
                if rules.allowlist.contains(*umbrella) {
                    tracing::debug!(umbrella, ?group, "domain group added");
                    domains.extend(group.iter().map(|d| d.to_string()));
                }
            }
            domains.extend(ALWAYS_ALLOWED_DOMAINS.iter().map(|d| d.to_string()));
            Some(DomainList {
                domains: domains.into_iter().collect(),
                is_allowlist: true,
            })
        }
        RestrictionType::Denylist => Some(DomainList {
            domains: rules
                .denylist
                .iter()
                .filter(|domain| !ALWAYS_ALLOWED_DOMAINS.contains(&domain.as_str()))
                .cloned()
                .collect(),
            is_allowlist: false,
        }),
    }
}

pub struct NetworkRestrictionEngine<'a> {
    ctx: &'a EnforcementContext,
}

impl<'a> NetworkRestrictionEngine<'a> {
    pub fn new(ctx: &'a EnforcementContext) -> Self {
        Self { ctx }
    }

    pub fn apply(&self, list: &DomainList) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        if !list.is_allowlist && list.domains.is_empty() {
            tracing::info!("empty denylist, website restriction skipped");
            return report;
        }
        tracing::info!(
            mode = if list.is_allowlist { "allowlist" } else { "denylist" },
            domains = ?list.domains,
            "restricting websites"
        );

        let filter_changed = self.write_filter_config(list, &mut report);
        let redirect_changed = self.lock_resolver(&mut report);

        if filter_changed || redirect_changed {
            let service = self.ctx.config.network.dns_filter_service.as_str();
            for action in ["enable", "restart"] {
                if !run_logged(self.ctx.runner(), "systemctl", &[action, service]) {
                    report.fail(format!("systemctl {action} {service}"), "failed");
                }
            }
        } else {
            tracing::info!("dns filtering already in place");
        }

        for target in &self.ctx.config.browsers {
            let translator = translator_for(target.family);
            match write_policy(&target.path, translator, &list.domains, list.is_allowlist) {
                Ok(true) => report.touched(&target.path),
                Ok(false) => {}
                Err(err) => report.fail(target.path.display(), err),
            }
        }
        report
    }

    /// Undo [`apply`](Self::apply). Safe on a system that was never
    /// restricted.
    pub fn revert(&self) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        let network = &self.ctx.config.network;
        let runner = self.ctx.runner();

        let resolv_conf = &self.ctx.config.paths.resolv_conf;
        if is_generated(resolv_conf) {
            let path_arg = resolv_conf.to_string_lossy();
            run_logged(runner, "chattr", &["-i", path_arg.as_ref()]);
            match fs::remove_file(resolv_conf) {
                Ok(()) => {
                    report.touched(resolv_conf);
                    tracing::info!(path = %resolv_conf.display(), "dns redirect removed");
                }
                Err(err) => report.fail(resolv_conf.display(), err),
            }
            if !run_logged(runner, "systemctl", &["restart", network.network_service.as_str()]) {
                report.fail(format!("systemctl restart {}", network.network_service), "failed");
            }
        }

        let filter_config = &self.ctx.config.paths.dns_filter_config;
        if is_generated(filter_config) {
            match fs::remove_file(filter_config) {
                Ok(()) => report.touched(filter_config),
                Err(err) => report.fail(filter_config.display(), err),
            }
            for action in ["stop", "disable"] {
                run_logged(runner, "systemctl", &[action, network.dns_filter_service.as_str()]);
            }
        }

        for target in &self.ctx.config.browsers {
            match remove_policy(&target.path, translator_for(target.family)) {
                Ok(true) => report.touched(&target.path),
                Ok(false) => {}
                Err(err) => report.fail(target.path.display(), err),
            }
        }
        report
    }

    /// Whether a DNS redirect written by this engine is in place.
    pub fn is_applied(&self) -> bool {
        is_generated(&self.ctx.config.paths.resolv_conf)
    }

    fn write_filter_config(&self, list: &DomainList, report: &mut EnforcementReport) -> bool {
        let path = &self.ctx.config.paths.dns_filter_config;
        let contents = render_filter_config(list, &self.ctx.config.network.upstream_dns);
        if fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
            return false;
        }

        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(path, &contents));
        match written {
            Ok(()) => {
                report.touched(path);
                true
            }
            Err(err) => {
                report.fail(path.display(), err);
                false
            }
        }
    }

    /// Point resolution at the local filter and make the file immutable.
    fn lock_resolver(&self, report: &mut EnforcementReport) -> bool {
        let path = &self.ctx.config.paths.resolv_conf;
        let contents = resolver_contents();
        if fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
            return false;
        }

        let path_arg = path.to_string_lossy();
        let runner = self.ctx.runner();
        run_logged(runner, "chattr", &["-i", path_arg.as_ref()]);
        if let Err(err) = write_replacing_symlink(path, &contents) {
            report.fail(path.display(), err);
            return false;
        }
        if !run_logged(runner, "chattr", &["+i", path_arg.as_ref()]) {
            report.fail(path.display(), "could not set the immutable flag");
        }
        report.touched(path);
        tracing::info!(path = %path.display(), "dns redirect locked");
        true
    }
}

fn resolver_contents() -> String {
    format!("{GENERATED_HEADER}\n\n{LOCAL_RESOLVER}\n\n")
}

/// smartdns configuration forwarding to `upstream` and filtering `list`.
pub fn render_filter_config(list: &DomainList, upstream: &[String]) -> String {
    let mut out = format!("{GENERATED_HEADER}\n\nbind :53\n\n");
    for server in upstream {
        out.push_str(&format!("server {server}\n"));
    }
    out.push('\n');

    if list.is_allowlist {
        out.push_str("address /#/#\n");
        for domain in &list.domains {
            out.push_str(&format!("address /{domain}/-\n"));
        }
    } else {
        for domain in &list.domains {
            out.push_str(&format!("address /{domain}/#\n"));
        }
    }
    out
}

fn is_generated(path: &Path) -> bool {
    fs::read_to_string(path).is_ok_and(|text| text.lines().any(|line| line.contains("eta-kisit")))
}

/// resolv.conf is often a symlink into a resolver's runtime directory. Replace
/// the link itself rather than writing through it.
fn write_replacing_symlink(path: &Path, contents: &str) -> io::Result<()> {
    if fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KisitConfig;
    use crate::privilege::NoEscalation;
    use crate::profile::RuleList;
    use crate::system::RecordingRunner;
    use serde_json::Value;
    use std::sync::Arc;

    fn website_profile(kind: RestrictionType, list: RuleList, domains: &[&str]) -> Profile {
        let mut profile = Profile::default();
        profile.website.restriction_type = kind;
        for domain in domains {
            profile.website.insert(list, *domain);
        }
        profile
    }

    fn context(root: &Path) -> (EnforcementContext, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::new());
        let ctx = EnforcementContext::new(
            KisitConfig::rooted_at(root),
            runner.clone(),
            Arc::new(NoEscalation),
        );
        (ctx, runner)
    }

    #[test]
    fn test_denylist_never_blocks_always_allowed_domains() {
        let profile = website_profile(
            RestrictionType::Denylist,
            RuleList::Denylist,
            &["youtube.com", "eba.gov.tr", "ntp.org"],
        );
        let list = compile_domain_list(&profile).unwrap();
        assert!(!list.is_allowlist);
        assert_eq!(list.domains, vec!["youtube.com"]);
    }

    #[test]
    fn test_allowlist_expands_domain_groups_without_duplicates() {
        let profile = website_profile(
            RestrictionType::Allowlist,
            RuleList::Allowlist,
            &["youtubekids.com", "google.com", "ntp.org"],
        );
        let list = compile_domain_list(&profile).unwrap();
        assert!(list.is_allowlist);

        for expected in ["youtubekids.com", "googlevideo.com", "ytimg.com", "google.com", "etap.org.tr"] {
            assert!(list.domains.iter().any(|d| d == expected), "{expected}");
        }
        let unique: BTreeSet<&String> = list.domains.iter().collect();
        assert_eq!(unique.len(), list.domains.len());
        assert!(!list.domains.iter().any(|d| d == "e-devlet.gov.tr"));
    }

    #[test]
    fn test_no_website_rules_compile_to_nothing() {
        assert_eq!(compile_domain_list(&Profile::default()), None);
    }

    #[test]
    fn test_filter_config_rendering() {
        let upstream = vec!["195.175.37.137".to_string()];
        let allow = render_filter_config(
            &DomainList {
                domains: vec!["eba.gov.tr".to_string()],
                is_allowlist: true,
            },
            &upstream,
        );
        assert!(allow.starts_with(GENERATED_HEADER));
        assert!(allow.contains("server 195.175.37.137\n"));
        assert!(allow.contains("address /#/#\naddress /eba.gov.tr/-\n"));

        let deny = render_filter_config(
            &DomainList {
                domains: vec!["youtube.com".to_string()],
                is_allowlist: false,
            },
            &upstream,
        );
        assert!(deny.contains("address /youtube.com/#\n"));
        assert!(!deny.contains("address /#/#"));
    }

    #[test]
    fn test_apply_twice_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(tmp.path());
        let profile = website_profile(RestrictionType::Allowlist, RuleList::Allowlist, &["eba.gov.tr"]);
        let list = compile_domain_list(&profile).unwrap();
        let engine = NetworkRestrictionEngine::new(&ctx);

        let report = engine.apply(&list);
        assert!(report.is_clean(), "{report:?}");
        let snapshot = |paths: &[&Path]| -> Vec<Vec<u8>> { paths.iter().map(|p| fs::read(p).unwrap()).collect() };
        let files: Vec<&Path> = std::iter::once(ctx.config.paths.resolv_conf.as_path())
            .chain(std::iter::once(ctx.config.paths.dns_filter_config.as_path()))
            .chain(ctx.config.browsers.iter().map(|b| b.path.as_path()))
            .collect();
        let first = snapshot(&files);
        let restarts = runner.calls_for("systemctl").len();

        engine.apply(&list);
        assert_eq!(snapshot(&files), first);
        assert_eq!(runner.calls_for("systemctl").len(), restarts);
        assert_eq!(
            runner.calls_for("chattr"),
            vec![
                vec!["-i".to_string(), ctx.config.paths.resolv_conf.to_string_lossy().into_owned()],
                vec!["+i".to_string(), ctx.config.paths.resolv_conf.to_string_lossy().into_owned()],
            ]
        );
    }

    #[test]
    fn test_chromium_policy_for_allowlisted_site() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, _runner) = context(tmp.path());
        let profile = website_profile(RestrictionType::Allowlist, RuleList::Allowlist, &["eba.gov.tr"]);
        NetworkRestrictionEngine::new(&ctx).apply(&compile_domain_list(&profile).unwrap());

        let chrome = tmp.path().join("etc/opt/chrome/policies/managed/policies.json");
        let policy: Value = serde_json::from_str(&fs::read_to_string(chrome).unwrap()).unwrap();
        assert_eq!(policy["URLBlocklist"], serde_json::json!(["*"]));
        assert_eq!(
            policy["URLAllowlist"],
            serde_json::json!(["eba.gov.tr", "etap.org.tr", "ntp.org"])
        );
        let resolv = fs::read_to_string(&ctx.config.paths.resolv_conf).unwrap();
        assert!(resolv.contains("nameserver 127.0.0.1"));
    }

    #[test]
    fn test_empty_denylist_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(tmp.path());
        let report = NetworkRestrictionEngine::new(&ctx).apply(&DomainList {
            domains: vec![],
            is_allowlist: false,
        });
        assert!(report.touched.is_empty());
        assert!(runner.calls().is_empty());
        assert!(!ctx.config.paths.resolv_conf.exists());
    }

    #[test]
    fn test_revert_restores_and_tolerates_reverted_state() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(tmp.path());
        let firefox = tmp.path().join("etc/firefox/policies/policies.json");
        fs::create_dir_all(firefox.parent().unwrap()).unwrap();
        fs::write(&firefox, r#"{"policies": {"DisableTelemetry": true}}"#).unwrap();

        let engine = NetworkRestrictionEngine::new(&ctx);
        let profile = website_profile(RestrictionType::Denylist, RuleList::Denylist, &["youtube.com"]);
        engine.apply(&compile_domain_list(&profile).unwrap());
        assert!(engine.is_applied());

        let report = engine.revert();
        assert!(report.is_clean(), "{report:?}");
        assert!(!engine.is_applied());
        assert!(!ctx.config.paths.resolv_conf.exists());
        assert!(!ctx.config.paths.dns_filter_config.exists());
        assert!(!tmp.path().join("etc/opt/chrome/policies/managed/policies.json").exists());
        let kept: Value = serde_json::from_str(&fs::read_to_string(&firefox).unwrap()).unwrap();
        assert_eq!(kept, serde_json::json!({"policies": {"DisableTelemetry": true}}));
        assert!(
            runner
                .calls_for("systemctl")
                .contains(&vec!["restart".to_string(), "NetworkManager.service".to_string()])
        );

        let calls = runner.calls().len();
        let again = engine.revert();
        assert!(again.is_clean());
        assert!(again.touched.is_empty());
        assert_eq!(runner.calls().len(), calls);
    }

    #[test]
    fn test_revert_leaves_foreign_resolver_config() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, runner) = context(tmp.path());
        let resolv = &ctx.config.paths.resolv_conf;
        fs::create_dir_all(resolv.parent().unwrap()).unwrap();
        fs::write(resolv, "nameserver 1.1.1.1\n").unwrap();

        NetworkRestrictionEngine::new(&ctx).revert();
        assert_eq!(fs::read_to_string(resolv).unwrap(), "nameserver 1.1.1.1\n");
        assert!(runner.calls().is_empty());
    }
}
