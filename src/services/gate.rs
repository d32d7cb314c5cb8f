use std::time::Duration;

use regex::RegexBuilder;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::cache::AllowlistCacheEntry;
use crate::model::manifest::Manifest;
use crate::model::package::{normalize_host, DomainAllowlist, DomainRule, Package, RuleType};
use crate::services::fetch::Fetcher;
use crate::services::storage::{LocalStore, DOMAIN_ALLOWLIST_CACHE, MANIFEST_CACHE};

const DOMAIN_PACKAGE_ID: &str = "overlaylex-domain-allowlist";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdmitSource {
    Cache,
    Remote,
    /// Remote fetch failed; an older cached allowlist decided.
    StaleCache,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SeedMiss,
    AllowlistMiss,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Admitted { source: AdmitSource },
    Rejected { reason: RejectReason },
    /// No allowlist could be obtained and none was cached: fail closed.
    Unavailable { error: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Admitted { .. })
    }
}

/// `host` must already be normalized; literal rule values are normalized here.
pub fn rule_matches(rule: &DomainRule, host: &str) -> bool {
    match rule.rule_type {
        RuleType::Exact => host == normalize_host(&rule.value),
        RuleType::Suffix => host.ends_with(normalize_host(&rule.value).as_str()),
        RuleType::Contains => host.contains(normalize_host(&rule.value).as_str()),
        RuleType::Regex => match RegexBuilder::new(&rule.value).case_insensitive(true).build() {
            Ok(re) => re.is_match(host),
            Err(e) => {
                warn!(pattern = %rule.value, error = %e, "invalid allowlist regex ignored");
                false
            }
        },
    }
}

pub fn is_allowed(rules: &[DomainRule], host: &str) -> bool {
    let host = normalize_host(host);
    rules.iter().any(|r| rule_matches(r, &host))
}

pub struct DomainGate {
    seed_rules: Vec<DomainRule>,
    fallback_url: String,
    timeout: Duration,
    ttl: Duration,
}

impl DomainGate {
    pub fn new(cfg: &EngineConfig) -> Self {
        DomainGate {
            seed_rules: cfg.seed_rules.clone(),
            fallback_url: cfg.domain_package_url(),
            timeout: cfg.allowlist_timeout(),
            ttl: Duration::from_secs(cfg.allowlist_ttl_secs),
        }
    }

    pub fn check(
        &self,
        host: &str,
        store: &LocalStore,
        fetcher: &dyn Fetcher,
        now: OffsetDateTime,
    ) -> GateDecision {
        if !is_allowed(&self.seed_rules, host) {
            info!(host, "host rejected by seed rules");
            return GateDecision::Rejected {
                reason: RejectReason::SeedMiss,
            };
        }

        let cached: Option<AllowlistCacheEntry> = store.get(DOMAIN_ALLOWLIST_CACHE);

        if let Some(entry) = &cached {
            if self.is_fresh(entry, now) {
                return decide(&entry.data, host, AdmitSource::Cache);
            }
        }

        match self.fetch_allowlist(store, fetcher) {
            Ok(list) => {
                let entry = AllowlistCacheEntry {
                    version: list.version.clone(),
                    fetched_at: format_timestamp(now),
                    stale: false,
                    data: list,
                };
                store.set_logged(DOMAIN_ALLOWLIST_CACHE, &entry);
                decide(&entry.data, host, AdmitSource::Remote)
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!(error = %e, "allowlist fetch failed, using cached allowlist");
                    decide(&entry.data, host, AdmitSource::StaleCache)
                }
                None => {
                    warn!(error = %e, "allowlist fetch failed with no cache, engine disabled");
                    GateDecision::Unavailable {
                        error: e.to_string(),
                    }
                }
            },
        }
    }

    fn is_fresh(&self, entry: &AllowlistCacheEntry, now: OffsetDateTime) -> bool {
        if entry.stale {
            return false;
        }
        match OffsetDateTime::parse(&entry.fetched_at, &Rfc3339) {
            Ok(fetched_at) => {
                let age = now - fetched_at;
                age >= time::Duration::ZERO && age.unsigned_abs() < self.ttl
            }
            Err(_) => false,
        }
    }

    /// The cached manifest knows where the allowlist lives; before the first
    /// manifest arrives the API's fixed route is used.
    fn allowlist_url(&self, store: &LocalStore) -> String {
        store
            .get::<Manifest>(MANIFEST_CACHE)
            .and_then(|m| m.domain_package)
            .and_then(|d| d.url)
            .unwrap_or_else(|| self.fallback_url.clone())
    }

    fn fetch_allowlist(
        &self,
        store: &LocalStore,
        fetcher: &dyn Fetcher,
    ) -> Result<DomainAllowlist, EngineError> {
        let url = self.allowlist_url(store);
        let body = fetcher.get_json(&url, self.timeout)?;
        Package::from_value(body, DOMAIN_PACKAGE_ID)?
            .into_allowlist()
            .ok_or_else(|| EngineError::InvalidPackage {
                id: DOMAIN_PACKAGE_ID.into(),
                reason: "expected a domain-allowlist package".into(),
            })
    }
}

/// Marks the cached allowlist stale when a manifest announces another version.
pub fn note_announced_version(store: &LocalStore, manifest: &Manifest) {
    let Some(announced) = &manifest.domain_package else {
        return;
    };
    let Some(mut entry) = store.get::<AllowlistCacheEntry>(DOMAIN_ALLOWLIST_CACHE) else {
        return;
    };
    if entry.version != announced.version && !entry.stale {
        info!(
            cached = %entry.version,
            announced = %announced.version,
            "allowlist version changed, refetching on next start"
        );
        entry.stale = true;
        store.set_logged(DOMAIN_ALLOWLIST_CACHE, &entry);
    }
}

fn decide(list: &DomainAllowlist, host: &str, source: AdmitSource) -> GateDecision {
    if is_allowed(&list.rules, host) {
        info!(host, ?source, "host admitted");
        GateDecision::Admitted { source }
    } else {
        info!(host, "host not in allowlist");
        GateDecision::Rejected {
            reason: RejectReason::AllowlistMiss,
        }
    }
}

pub fn format_timestamp(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}
