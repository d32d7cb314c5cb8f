use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::cache::{PackageCache, PackageCacheEntry, UserSwitches};
use crate::model::manifest::{Manifest, PackageKind, PackageMeta};
use crate::model::package::Package;
use crate::services::fetch::Fetcher;
use crate::services::gate::format_timestamp;
use crate::services::storage::{LocalStore, MANIFEST_CACHE, PACKAGE_CACHE, USER_SWITCHES};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    Cache,
    Network,
    /// Nothing cached and the first fetch failed.
    Empty,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Updated { script_version_changed: bool },
    Failed(EngineError),
}

#[derive(Debug, Serialize, Clone)]
pub struct PackageFailure {
    pub id: String,
    pub error: String,
}

pub struct PackageStore {
    store: LocalStore,
    fetcher: Arc<dyn Fetcher>,
    manifest_url: String,
    manifest_timeout: Duration,
    package_timeout: Duration,
    cfg: EngineConfig,
    manifest: Manifest,
    cache: PackageCache,
    switches: UserSwitches,
    refresh: Option<Receiver<Result<Manifest, EngineError>>>,
}

impl PackageStore {
    pub fn open(cfg: &EngineConfig, store: LocalStore, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache: PackageCache = store.get_or_default(PACKAGE_CACHE);
        let switches: UserSwitches = store.get_or_default(USER_SWITCHES);

        PackageStore {
            store,
            fetcher,
            manifest_url: cfg.manifest_url(),
            manifest_timeout: cfg.manifest_timeout(),
            package_timeout: cfg.package_timeout(),
            cfg: cfg.clone(),
            manifest: Manifest::default(),
            cache,
            switches,
            refresh: None,
        }
    }

    pub fn local_store(&self) -> &LocalStore {
        &self.store
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn switches(&self) -> &UserSwitches {
        &self.switches
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Cached manifest first (with a background refresh behind it); with no
    /// cache, one bounded blocking fetch, and a background refresh if that
    /// fails.
    pub fn load_manifest(&mut self) -> ManifestSource {
        if let Some(cached) = self.store.get::<Manifest>(MANIFEST_CACHE) {
            info!(packages = cached.packages.len(), "loaded cached manifest");
            self.manifest = cached;
            self.spawn_refresh();
            return ManifestSource::Cache;
        }

        match fetch_manifest(self.fetcher.as_ref(), &self.manifest_url, self.manifest_timeout) {
            Ok(manifest) => {
                self.apply_manifest(manifest);
                ManifestSource::Network
            }
            Err(e) => {
                warn!(error = %e, "no cached manifest and fetch failed, starting empty");
                self.manifest = Manifest::default();
                self.spawn_refresh();
                ManifestSource::Empty
            }
        }
    }

    /// Starts a background manifest fetch unless one is already in flight.
    pub fn spawn_refresh(&mut self) {
        if self.refresh.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel();
        let fetcher = Arc::clone(&self.fetcher);
        let url = self.manifest_url.clone();
        let timeout = self.manifest_timeout;

        thread::spawn(move || {
            let _ = tx.send(fetch_manifest(fetcher.as_ref(), &url, timeout));
        });

        self.refresh = Some(rx);
    }

    /// Applies a finished background refresh, waiting at most `wait` for it.
    pub fn poll_refresh(&mut self, wait: Duration) -> Option<RefreshOutcome> {
        let rx = self.refresh.as_ref()?;

        let result = match rx.recv_timeout(wait) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => {
                self.refresh = None;
                return None;
            }
        };
        self.refresh = None;

        Some(match result {
            Ok(manifest) => RefreshOutcome::Updated {
                script_version_changed: self.apply_manifest(manifest),
            },
            Err(e) => {
                warn!(error = %e, "background manifest refresh failed, keeping cache");
                RefreshOutcome::Failed(e)
            }
        })
    }

    /// Blocking refresh for an explicit update check.
    pub fn refresh_now(&mut self) -> Result<bool, EngineError> {
        let manifest = fetch_manifest(self.fetcher.as_ref(), &self.manifest_url, self.manifest_timeout)?;
        Ok(self.apply_manifest(manifest))
    }

    /// Returns whether the script version changed.
    fn apply_manifest(&mut self, manifest: Manifest) -> bool {
        let old = std::mem::replace(&mut self.manifest, manifest);
        self.store.set_logged(MANIFEST_CACHE, &self.manifest);

        let changed = !old.script_version.is_empty()
            && old.script_version != self.manifest.script_version;
        if changed {
            info!(
                from = %old.script_version,
                to = %self.manifest.script_version,
                "script version changed"
            );
        }
        changed
    }

    pub fn is_enabled(&self, meta: &PackageMeta) -> bool {
        self.switches
            .get(&meta.id)
            .copied()
            .unwrap_or(meta.enabled_by_default)
    }

    pub fn set_enabled(&mut self, package_id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut next = self.switches.clone();
        next.insert(package_id.to_string(), enabled);
        self.store.set(USER_SWITCHES, &next)?;
        self.switches = next;
        info!(package = package_id, enabled, "package switch updated");
        Ok(())
    }

    /// The cached body when its version equals the manifest's, otherwise a
    /// fresh fetch that replaces the cache entry.
    pub fn ensure_package_ready(&mut self, meta: &PackageMeta) -> Result<&Package, EngineError> {
        let cached = self
            .cache
            .get(&meta.id)
            .is_some_and(|entry| entry.version == meta.version);

        if !cached {
            let url = meta
                .url
                .clone()
                .unwrap_or_else(|| self.cfg.package_url(&meta.id));
            let body = self.fetcher.get_json(&url, self.package_timeout)?;
            let data = Package::from_value(body, &meta.id)?;

            let mut next = self.cache.clone();
            next.insert(
                meta.id.clone(),
                PackageCacheEntry {
                    version: meta.version.clone(),
                    fetched_at: format_timestamp(OffsetDateTime::now_utc()),
                    data,
                },
            );
            self.store.set_logged(PACKAGE_CACHE, &next);
            self.cache = next;
            info!(package = %meta.id, version = %meta.version, "package fetched");
        } else {
            debug!(package = %meta.id, "package cache hit");
        }

        self.cache
            .get(&meta.id)
            .map(|entry| &entry.data)
            .ok_or_else(|| EngineError::Storage(format!("package {} missing from cache", meta.id)))
    }

    /// Makes every enabled translation package ready. Failures are collected,
    /// never propagated, so one package cannot block the others.
    pub fn prepare_enabled(&mut self) -> Vec<PackageFailure> {
        let metas: Vec<PackageMeta> = self
            .manifest
            .packages
            .iter()
            .filter(|m| m.kind == PackageKind::Translation && self.is_enabled(m))
            .cloned()
            .collect();

        let mut failures = Vec::new();
        for meta in &metas {
            if let Err(e) = self.ensure_package_ready(meta) {
                warn!(package = %meta.id, error = %e, "failed to load package");
                failures.push(PackageFailure {
                    id: meta.id.clone(),
                    error: e.to_string(),
                });
            }
        }
        failures
    }
}

fn fetch_manifest(fetcher: &dyn Fetcher, url: &str, timeout: Duration) -> Result<Manifest, EngineError> {
    let body = fetcher.get_json(url, timeout)?;
    Manifest::from_value(body)
}
