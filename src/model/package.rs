use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Exact,
    Suffix,
    Contains,
    Regex,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DomainRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,

    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTargetScope {
    #[serde(default)]
    hosts: Option<Vec<String>>,

    #[serde(default)]
    host: Option<String>,

    #[serde(default)]
    path_prefix: Option<String>,
}

/// Where a translation package applies. Empty `hosts` means any host.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(from = "RawTargetScope", rename_all = "camelCase")]
pub struct TargetScope {
    pub hosts: BTreeSet<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

impl From<RawTargetScope> for TargetScope {
    fn from(raw: RawTargetScope) -> Self {
        let hosts: BTreeSet<String> = raw
            .hosts
            .unwrap_or_default()
            .into_iter()
            .chain(raw.host)
            .map(|h| normalize_host(&h))
            .filter(|h| !h.is_empty())
            .collect();

        let path_prefix = raw.path_prefix.filter(|p| !p.trim().is_empty());

        TargetScope { hosts, path_prefix }
    }
}

impl TargetScope {
    /// A scoped host also covers its subdomains (`owlbear.rodeo` covers `www.owlbear.rodeo`).
    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host = normalize_host(host);

        let host_ok = self.hosts.is_empty()
            || self
                .hosts
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{h}")));

        let path_ok = match &self.path_prefix {
            Some(prefix) => path.starts_with(prefix.as_str()),
            None => true,
        };

        host_ok && path_ok
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TranslationPackage {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetScope>,

    pub translations: BTreeMap<String, String>,
}

impl TranslationPackage {
    pub fn applies_to(&self, host: &str, path: &str) -> bool {
        self.target
            .as_ref()
            .map(|t| t.matches(host, path))
            .unwrap_or(true)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DomainAllowlist {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub version: String,

    pub rules: Vec<DomainRule>,
}

/// A package body as served by the API, tagged by `kind`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Package {
    Translation(TranslationPackage),
    DomainAllowlist(DomainAllowlist),
}

impl Package {
    /// Validates an untyped body. Bodies without a `kind` are translation packages.
    pub fn from_value(mut value: Value, expected_id: &str) -> Result<Package, EngineError> {
        let obj = value.as_object_mut().ok_or_else(|| EngineError::InvalidPackage {
            id: expected_id.to_string(),
            reason: "package body must be an object".into(),
        })?;

        if !obj.contains_key("kind") {
            obj.insert("kind".into(), Value::String("translation".into()));
        }

        let pkg: Package =
            serde_json::from_value(value).map_err(|e| EngineError::InvalidPackage {
                id: expected_id.to_string(),
                reason: e.to_string(),
            })?;

        if pkg.version().trim().is_empty() {
            return Err(EngineError::InvalidPackage {
                id: expected_id.to_string(),
                reason: "empty version".into(),
            });
        }

        Ok(pkg)
    }

    pub fn id(&self) -> &str {
        match self {
            Package::Translation(p) => &p.id,
            Package::DomainAllowlist(p) => &p.id,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Package::Translation(p) => &p.version,
            Package::DomainAllowlist(p) => &p.version,
        }
    }

    pub fn as_translation(&self) -> Option<&TranslationPackage> {
        match self {
            Package::Translation(p) => Some(p),
            Package::DomainAllowlist(_) => None,
        }
    }

    pub fn into_allowlist(self) -> Option<DomainAllowlist> {
        match self {
            Package::DomainAllowlist(p) => Some(p),
            Package::Translation(_) => None,
        }
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_without_kind_is_translation() {
        let pkg = Package::from_value(
            json!({
                "id": "obr-room-core",
                "name": "OBR",
                "target": { "host": "owlbear.rodeo", "pathPrefix": "/room" },
                "version": "0.1.0",
                "translations": { "Players": "玩家" }
            }),
            "obr-room-core",
        )
        .unwrap();

        let t = pkg.as_translation().unwrap();
        assert_eq!(t.translations["Players"], "玩家");
        let target = t.target.as_ref().unwrap();
        assert!(target.hosts.contains("owlbear.rodeo"));
        assert_eq!(target.path_prefix.as_deref(), Some("/room"));
    }

    #[test]
    fn allowlist_body_is_tagged() {
        let pkg = Package::from_value(
            json!({
                "id": "overlaylex-domain-allowlist",
                "kind": "domain-allowlist",
                "version": "0.1.0",
                "rules": [
                    { "type": "suffix", "value": ".owlbear.rodeo", "comment": "subdomains" }
                ]
            }),
            "overlaylex-domain-allowlist",
        )
        .unwrap();

        let list = pkg.into_allowlist().unwrap();
        assert_eq!(list.rules[0].rule_type, RuleType::Suffix);
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        let non_string = json!({
            "id": "p", "version": "1", "translations": { "OK": 3 }
        });
        assert!(matches!(
            Package::from_value(non_string, "p"),
            Err(EngineError::InvalidPackage { .. })
        ));

        let empty_version = json!({ "id": "p", "version": " ", "translations": {} });
        assert!(Package::from_value(empty_version, "p").is_err());

        assert!(Package::from_value(json!(["not", "an", "object"]), "p").is_err());
    }

    #[test]
    fn cached_package_survives_serialization() {
        let pkg = Package::from_value(
            json!({
                "id": "p",
                "version": "2",
                "target": { "hosts": ["a.com"] },
                "translations": { "OK": "确定" }
            }),
            "p",
        )
        .unwrap();

        let stored = serde_json::to_value(&pkg).unwrap();
        let back: Package = serde_json::from_value(stored).unwrap();
        assert_eq!(back, pkg);
    }

    #[test]
    fn scope_matches_host_and_path() {
        let scope = TargetScope {
            hosts: ["owlbear.rodeo".to_string()].into_iter().collect(),
            path_prefix: Some("/room".into()),
        };

        assert!(scope.matches("owlbear.rodeo", "/room/abc"));
        assert!(scope.matches("www.owlbear.rodeo", "/room"));
        assert!(!scope.matches("owlbear.rodeo", "/profile"));
        assert!(!scope.matches("notowlbear.rodeo", "/room"));
        assert!(!scope.matches("b.com", "/room"));
    }
}
