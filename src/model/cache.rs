use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::package::{DomainAllowlist, Package};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageCacheEntry {
    pub version: String,

    pub fetched_at: String,

    pub data: Package,
}

/// Cached package bodies by package id.
pub type PackageCache = BTreeMap<String, PackageCacheEntry>;

/// Per-package user overrides of `enabledByDefault`.
pub type UserSwitches = BTreeMap<String, bool>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistCacheEntry {
    pub version: String,

    pub fetched_at: String,

    /// Set when a newer manifest announces a different allowlist version.
    #[serde(default)]
    pub stale: bool,

    pub data: DomainAllowlist,
}
