use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::model::cache::{PackageCache, UserSwitches};
use crate::model::manifest::{Manifest, PackageKind};

/// Immutable merged lookup table for one page location.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: HashMap<String, String>,
    packages: Vec<String>,
    fingerprint: String,
}

impl Dictionary {
    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of the packages merged in, in merge order.
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let entries: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let fingerprint = fingerprint(&entries);
        Dictionary {
            entries,
            packages: Vec::new(),
            fingerprint,
        }
    }
}

/// Merges enabled, in-scope translation packages in manifest order; a later
/// package overwrites an earlier one on the same source string. Packages
/// whose cached body does not match the manifest version are left out.
pub fn build(
    manifest: &Manifest,
    switches: &UserSwitches,
    cache: &PackageCache,
    host: &str,
    path: &str,
) -> Arc<Dictionary> {
    let mut entries: HashMap<String, String> = HashMap::new();
    let mut packages = Vec::new();

    for meta in &manifest.packages {
        let enabled = switches
            .get(&meta.id)
            .copied()
            .unwrap_or(meta.enabled_by_default);
        if !enabled || meta.kind != PackageKind::Translation {
            continue;
        }

        let Some(entry) = cache.get(&meta.id).filter(|e| e.version == meta.version) else {
            debug!(package = %meta.id, "no current body cached, skipped");
            continue;
        };
        let Some(pkg) = entry.data.as_translation() else {
            continue;
        };

        if !pkg.applies_to(host, path) {
            debug!(package = %meta.id, host, path, "package out of scope");
            continue;
        }

        for (source, target) in &pkg.translations {
            entries.insert(source.clone(), target.clone());
        }
        packages.push(meta.id.clone());
    }

    let fingerprint = fingerprint(&entries);
    info!(
        entries = entries.len(),
        packages = packages.len(),
        "dictionary built"
    );

    Arc::new(Dictionary {
        entries,
        packages,
        fingerprint,
    })
}

fn fingerprint(entries: &HashMap<String, String>) -> String {
    let mut sorted: Vec<(&String, &String)> = entries.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (k, v) in sorted {
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cache::PackageCacheEntry;
    use crate::model::manifest::PackageMeta;
    use crate::model::package::Package;
    use serde_json::json;

    fn meta(id: &str, enabled_by_default: bool) -> PackageMeta {
        PackageMeta {
            id: id.into(),
            name: id.into(),
            kind: PackageKind::Translation,
            version: "1".into(),
            url: None,
            enabled_by_default,
            description: String::new(),
        }
    }

    fn cache_with(cache: &mut PackageCache, body: serde_json::Value) {
        let id = body["id"].as_str().unwrap().to_string();
        let data = Package::from_value(body, &id).unwrap();
        cache.insert(
            id,
            PackageCacheEntry {
                version: "1".into(),
                fetched_at: "2026-01-01T00:00:00Z".into(),
                data,
            },
        );
    }

    #[test]
    fn later_packages_override_earlier_ones() {
        let manifest = Manifest {
            packages: vec![meta("p1", true), meta("p2", true)],
            ..Manifest::default()
        };
        let mut cache = PackageCache::new();
        cache_with(&mut cache, json!({ "id": "p1", "version": "1", "translations": { "OK": "好", "Map": "地图" } }));
        cache_with(&mut cache, json!({ "id": "p2", "version": "1", "translations": { "OK": "确定" } }));

        let dict = build(&manifest, &UserSwitches::new(), &cache, "owlbear.rodeo", "/");
        assert_eq!(dict.get("OK"), Some("确定"));
        assert_eq!(dict.get("Map"), Some("地图"));
        assert_eq!(dict.packages(), ["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn out_of_scope_packages_contribute_nothing() {
        let manifest = Manifest {
            packages: vec![meta("scoped", true)],
            ..Manifest::default()
        };
        let mut cache = PackageCache::new();
        cache_with(
            &mut cache,
            json!({
                "id": "scoped", "version": "1",
                "target": { "hosts": ["a.com"] },
                "translations": { "OK": "确定" }
            }),
        );

        let dict = build(&manifest, &UserSwitches::new(), &cache, "b.com", "/");
        assert!(dict.is_empty());
        let dict = build(&manifest, &UserSwitches::new(), &cache, "a.com", "/");
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn switches_override_defaults() {
        let manifest = Manifest {
            packages: vec![meta("on", true), meta("off", false)],
            ..Manifest::default()
        };
        let mut cache = PackageCache::new();
        cache_with(&mut cache, json!({ "id": "on", "version": "1", "translations": { "A": "甲" } }));
        cache_with(&mut cache, json!({ "id": "off", "version": "1", "translations": { "B": "乙" } }));

        let dict = build(&manifest, &UserSwitches::new(), &cache, "h", "/");
        assert_eq!((dict.get("A"), dict.get("B")), (Some("甲"), None));

        let mut switches = UserSwitches::new();
        switches.insert("on".into(), false);
        switches.insert("off".into(), true);
        let dict = build(&manifest, &switches, &cache, "h", "/");
        assert_eq!((dict.get("A"), dict.get("B")), (None, Some("乙")));
    }

    #[test]
    fn stale_cache_entries_and_other_kinds_are_skipped() {
        let mut stale = meta("stale", true);
        stale.version = "2".into();
        let mut allow = meta("allow", true);
        allow.kind = PackageKind::DomainAllowlist;
        let manifest = Manifest {
            packages: vec![stale, allow],
            ..Manifest::default()
        };
        let mut cache = PackageCache::new();
        cache_with(&mut cache, json!({ "id": "stale", "version": "1", "translations": { "A": "甲" } }));
        cache_with(&mut cache, json!({ "id": "allow", "version": "1", "translations": { "B": "乙" } }));

        assert!(build(&manifest, &UserSwitches::new(), &cache, "h", "/").is_empty());
    }

    #[test]
    fn fingerprint_depends_only_on_content() {
        let a = Dictionary::from_pairs(&[("OK", "确定"), ("Map", "地图")]);
        let b = Dictionary::from_pairs(&[("Map", "地图"), ("OK", "确定")]);
        let c = Dictionary::from_pairs(&[("OK", "好"), ("Map", "地图")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
