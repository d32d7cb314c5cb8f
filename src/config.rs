use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::package::{DomainRule, RuleType};

const CONFIG_ENV: &str = "OVERLAYLEX_CONFIG";
const API_BASE_ENV: &str = "OVERLAYLEX_API_BASE_URL";
const STORAGE_DIR_ENV: &str = "OVERLAYLEX_STORAGE_DIR";

fn default_api_base_url() -> String {
    "https://overlaylex-demo.example.workers.dev".to_string()
}

fn default_manifest_path() -> String {
    "/manifest".to_string()
}

fn default_package_path_prefix() -> String {
    "/packages/".to_string()
}

fn default_domain_package_path() -> String {
    "/domain-package.json".to_string()
}

fn default_observer_debounce_ms() -> u64 {
    80
}

fn default_manifest_timeout_ms() -> u64 {
    5000
}

fn default_manifest_retry_ms() -> u64 {
    30_000
}

fn default_package_timeout_ms() -> u64 {
    6000
}

fn default_allowlist_timeout_ms() -> u64 {
    5000
}

fn default_allowlist_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Hosts worth asking the remote allowlist about: the VTT itself, its
/// ecosystem domain, and the static hosts plugins are usually served from.
pub fn default_seed_rules() -> Vec<DomainRule> {
    let rule = |rule_type, value: &str| DomainRule {
        rule_type,
        value: value.to_string(),
        comment: None,
    };

    vec![
        rule(RuleType::Exact, "owlbear.rodeo"),
        rule(RuleType::Suffix, ".owlbear.rodeo"),
        rule(RuleType::Exact, "owlbear.app"),
        rule(RuleType::Suffix, ".owlbear.app"),
        rule(RuleType::Suffix, ".github.io"),
        rule(RuleType::Suffix, ".netlify.app"),
        rule(RuleType::Suffix, ".vercel.app"),
        rule(RuleType::Suffix, ".pages.dev"),
        rule(RuleType::Suffix, ".workers.dev"),
        rule(RuleType::Exact, "localhost"),
    ]
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    #[serde(default = "default_package_path_prefix")]
    pub package_path_prefix: String,

    #[serde(default = "default_domain_package_path")]
    pub domain_package_path: String,

    #[serde(default = "default_observer_debounce_ms")]
    pub observer_debounce_ms: u64,

    #[serde(default = "default_manifest_timeout_ms")]
    pub manifest_timeout_ms: u64,

    /// Delay before retrying a failed background refresh while the manifest is empty.
    #[serde(default = "default_manifest_retry_ms")]
    pub manifest_retry_ms: u64,

    #[serde(default = "default_package_timeout_ms")]
    pub package_timeout_ms: u64,

    #[serde(default = "default_allowlist_timeout_ms")]
    pub allowlist_timeout_ms: u64,

    #[serde(default = "default_allowlist_ttl_secs")]
    pub allowlist_ttl_secs: u64,

    #[serde(default = "default_seed_rules")]
    pub seed_rules: Vec<DomainRule>,

    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            api_base_url: default_api_base_url(),
            manifest_path: default_manifest_path(),
            package_path_prefix: default_package_path_prefix(),
            domain_package_path: default_domain_package_path(),
            observer_debounce_ms: default_observer_debounce_ms(),
            manifest_timeout_ms: default_manifest_timeout_ms(),
            manifest_retry_ms: default_manifest_retry_ms(),
            package_timeout_ms: default_package_timeout_ms(),
            allowlist_timeout_ms: default_allowlist_timeout_ms(),
            allowlist_ttl_secs: default_allowlist_ttl_secs(),
            seed_rules: default_seed_rules(),
            storage_dir: None,
        }
    }
}

impl EngineConfig {
    /// Config file named by `OVERLAYLEX_CONFIG` (if any), then env overrides.
    pub fn from_env() -> Self {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_file(Path::new(path.trim())),
            _ => EngineConfig::default(),
        };

        if let Ok(base) = std::env::var(API_BASE_ENV) {
            if !base.trim().is_empty() {
                cfg.api_base_url = base.trim().to_string();
            }
        }

        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            if !dir.trim().is_empty() {
                cfg.storage_dir = Some(PathBuf::from(dir.trim()));
            }
        }

        cfg
    }

    fn load_file(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                return EngineConfig::default();
            }
        };

        match serde_json::from_str::<EngineConfig>(&data) {
            Ok(cfg) => {
                info!(path = %path.display(), "loaded config");
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                EngineConfig::default()
            }
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage_dir {
            return dir.clone();
        }
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local).join("OverlayLex").join("storage");
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("storage")
    }

    pub fn manifest_url(&self) -> String {
        join_url(&self.api_base_url, &self.manifest_path)
    }

    pub fn domain_package_url(&self) -> String {
        join_url(&self.api_base_url, &self.domain_package_path)
    }

    /// Fallback location for a package whose manifest entry carries no `url`.
    pub fn package_url(&self, package_id: &str) -> String {
        let prefix = join_url(&self.api_base_url, &self.package_path_prefix);
        format!("{prefix}{}.json", encode_path_segment(package_id))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.observer_debounce_ms)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_timeout_ms)
    }

    pub fn manifest_retry(&self) -> Duration {
        Duration::from_millis(self.manifest_retry_ms)
    }

    pub fn package_timeout(&self) -> Duration {
        Duration::from_millis(self.package_timeout_ms)
    }

    pub fn allowlist_timeout(&self) -> Duration {
        Duration::from_millis(self.allowlist_timeout_ms)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        let unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~');
        if unreserved {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_file_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{ "api_base_url": "https://api.test/" }"#).unwrap();
        assert_eq!(cfg.observer_debounce_ms, 80);
        assert_eq!(cfg.manifest_url(), "https://api.test/manifest");
        assert!(!cfg.seed_rules.is_empty());
    }

    #[test]
    fn package_url_encodes_id() {
        let cfg = EngineConfig {
            api_base_url: "https://api.test".into(),
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.package_url("obr room/core"),
            "https://api.test/packages/obr%20room%2Fcore.json"
        );
    }
}
