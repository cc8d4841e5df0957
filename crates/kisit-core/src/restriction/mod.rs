pub mod applications;
pub mod browser;
pub mod network;
pub mod sandboxed;

pub use applications::{ALWAYS_ALLOWED_APPLICATIONS, ApplicationRestrictionEngine};
pub use browser::{BrowserPolicyTranslator, ChromiumPolicy, FirefoxPolicy, translator_for};
pub use network::{
    ALLOWLIST_DOMAIN_GROUPS, ALWAYS_ALLOWED_DOMAINS, DomainList, NetworkRestrictionEngine, compile_domain_list,
};
