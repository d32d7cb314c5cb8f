use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::dom::Page;
use crate::model::manifest::PackageKind;
use crate::services::dictionary;
use crate::services::fetch::Fetcher;
use crate::services::gate::{self, DomainGate, GateDecision};
use crate::services::matcher::Matcher;
use crate::services::observer::{FlushReport, MutationEngine};
use crate::services::package_store::{
    ManifestSource, PackageFailure, PackageStore, RefreshOutcome,
};
use crate::services::storage::LocalStore;

#[derive(Debug, Serialize, Clone, Default)]
pub struct StatusLine {
    pub message: String,
    pub changed: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Connectivity,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct BootReport {
    pub gate: GateDecision,
    pub manifest: Option<ManifestSource>,
    pub entries: usize,
    pub failures: Vec<PackageFailure>,
    /// Pass over a page attached before this boot.
    pub flush: Option<FlushReport>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct TickReport {
    pub flush: Option<FlushReport>,
    pub refreshed: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct PackageView {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub cached: bool,
    pub description: String,
}

/// One translation session per page context.
pub struct Session {
    cfg: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    gate: DomainGate,
    packages: PackageStore,
    host: String,
    path: String,
    decision: Option<GateDecision>,
    matcher: Matcher,
    page: Option<Page>,
    engine: MutationEngine,
    retry_at: Option<Instant>,
    status: StatusLine,
    notices: Vec<Notice>,
    notice_raised: bool,
}

impl Session {
    pub fn new(cfg: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let store = LocalStore::new(cfg.storage_dir());
        let packages = PackageStore::open(&cfg, store, Arc::clone(&fetcher));

        Session {
            gate: DomainGate::new(&cfg),
            engine: MutationEngine::new(cfg.debounce()),
            retry_at: None,
            cfg,
            fetcher,
            packages,
            host: String::new(),
            path: String::from("/"),
            decision: None,
            matcher: Matcher::default(),
            page: None,
            status: StatusLine::default(),
            notices: Vec::new(),
            notice_raised: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.decision.as_ref().is_some_and(|d| d.is_allowed())
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn page_mut(&mut self) -> Option<&mut Page> {
        self.page.as_mut()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Gate, then manifest, packages and dictionary.
    pub fn boot(&mut self, host: &str, path: &str) -> BootReport {
        self.host = host.to_string();
        self.path = if path.is_empty() { "/".into() } else { path.to_string() };

        let decision = self.gate.check(
            host,
            self.packages.local_store(),
            self.fetcher.as_ref(),
            OffsetDateTime::now_utc(),
        );
        self.decision = Some(decision.clone());

        if let GateDecision::Unavailable { error } = &decision {
            self.status.last_error = Some(error.clone());
            self.raise_notice(format!(
                "OverlayLex could not reach its server and has no cached allowlist; translation is off ({error})"
            ));
        }

        if !decision.is_allowed() {
            self.status.message = format!("inactive on {host}");
            return BootReport {
                gate: decision,
                manifest: None,
                entries: 0,
                failures: Vec::new(),
                flush: None,
            };
        }

        let source = self.packages.load_manifest();
        gate::note_announced_version(self.packages.local_store(), self.packages.manifest());
        if source == ManifestSource::Empty {
            self.status.last_error = Some("manifest unavailable".into());
        }

        let (failures, _) = self.reload_packages();
        self.status.message = format!("started ({} entries)", self.matcher.dictionary().len());
        let flush = self.activate_page(Instant::now());

        BootReport {
            gate: decision,
            manifest: Some(source),
            entries: self.matcher.dictionary().len(),
            failures,
            flush,
        }
    }

    /// Starts observing an already attached page, or re-passes it when the
    /// engine is running.
    fn activate_page(&mut self, now: Instant) -> Option<FlushReport> {
        let page = self.page.as_mut()?;
        if self.engine.observed_documents() == 0 {
            self.engine.start(page, now);
        } else {
            self.engine.queue_all(page, now);
        }
        let report = self.engine.flush(page, &self.matcher, now);
        self.status.changed = report.changed;
        Some(report)
    }

    /// Loads enabled packages and rebuilds the dictionary. Returns per-package
    /// failures and whether the dictionary content changed.
    fn reload_packages(&mut self) -> (Vec<PackageFailure>, bool) {
        let failures = self.packages.prepare_enabled();
        if let Some(last) = failures.last() {
            self.status.last_error = Some(format!("{}: {}", last.id, last.error));
        }
        let changed = self.rebuild_dictionary();
        (failures, changed)
    }

    /// Returns whether the dictionary content changed.
    fn rebuild_dictionary(&mut self) -> bool {
        let dict = dictionary::build(
            self.packages.manifest(),
            self.packages.switches(),
            self.packages.cache(),
            &self.host,
            &self.path,
        );
        let changed = dict.fingerprint() != self.matcher.dictionary().fingerprint();
        self.matcher = Matcher::new(dict);
        self.update_counts();
        changed
    }

    fn update_counts(&mut self) {
        let (enabled, disabled) = self
            .packages
            .manifest()
            .packages
            .iter()
            .filter(|m| m.kind == PackageKind::Translation)
            .fold((0, 0), |(on, off), m| {
                if self.packages.is_enabled(m) {
                    (on + 1, off)
                } else {
                    (on, off + 1)
                }
            });
        self.status.enabled = enabled;
        self.status.disabled = disabled;
    }

    fn raise_notice(&mut self, message: String) {
        if self.notice_raised {
            return;
        }
        self.notice_raised = true;
        warn!("{message}");
        self.notices.push(Notice {
            kind: NoticeKind::Connectivity,
            message,
        });
    }

    /// Takes over `page`: observers are attached and, when the gate admitted
    /// this host, the whole page is translated once.
    pub fn attach_page(&mut self, page: Page, now: Instant) -> Option<FlushReport> {
        self.page = Some(page);
        self.engine = MutationEngine::new(self.cfg.debounce());

        if !self.is_active() {
            return None;
        }

        let report = self.activate_page(now)?;
        self.status.message = format!("initial pass replaced {} texts", report.changed);
        info!(changed = report.changed, documents = self.engine.observed_documents(), "page attached");
        Some(report)
    }

    /// Drives the session: applies a finished background refresh and runs a
    /// flush when one is due.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if !self.is_active() {
            return report;
        }

        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            self.packages.spawn_refresh();
        }

        match self.packages.poll_refresh(Duration::ZERO) {
            Some(RefreshOutcome::Updated { .. }) => {
                gate::note_announced_version(self.packages.local_store(), self.packages.manifest());
                let (_, changed) = self.reload_packages();
                report.refreshed = true;
                if changed {
                    report.flush = self.reapply(now);
                }
                self.status.message = "background update applied".into();
            }
            Some(RefreshOutcome::Failed(e)) => {
                self.status.message = "background update failed, using cache".into();
                self.status.last_error = Some(e.to_string());
                if self.packages.manifest().packages.is_empty() {
                    self.retry_at = Some(now + self.cfg.manifest_retry());
                }
            }
            None => {}
        }

        if let Some(page) = self.page.as_mut() {
            if let Some(flush) = self.engine.poll(page, &self.matcher, now) {
                if flush.changed > 0 {
                    self.status.changed = flush.changed;
                    self.status.message = format!("incremental pass replaced {} texts", flush.changed);
                }
                report.flush = Some(merge(report.flush, flush));
            }
        }

        report
    }

    /// Re-translates every observed document at once.
    fn reapply(&mut self, now: Instant) -> Option<FlushReport> {
        let page = self.page.as_mut()?;
        self.engine.queue_all(page, now);
        let report = self.engine.flush(page, &self.matcher, now);
        self.status.changed = report.changed;
        Some(report)
    }

    pub fn set_enabled(
        &mut self,
        package_id: &str,
        enabled: bool,
        now: Instant,
    ) -> Result<Option<FlushReport>, EngineError> {
        self.packages.set_enabled(package_id, enabled)?;
        if !self.is_active() {
            return Ok(None);
        }
        self.reload_packages();
        let report = self.reapply(now);
        self.status.message = format!(
            "{} {package_id}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(report)
    }

    /// Explicit update check: a blocking manifest fetch. On failure the
    /// cached manifest stays in use.
    pub fn check_updates(&mut self, now: Instant) -> Result<Option<FlushReport>, EngineError> {
        if let Err(e) = self.packages.refresh_now() {
            self.status.message = "update check failed, keeping local cache".into();
            self.status.last_error = Some(e.to_string());
            return Err(e);
        }
        gate::note_announced_version(self.packages.local_store(), self.packages.manifest());

        if !self.is_active() {
            return Ok(None);
        }
        self.reload_packages();
        let report = self.reapply(now);
        self.status.message = "update check complete".into();
        Ok(report)
    }

    pub fn translate_text(&self, text: &str) -> Option<String> {
        self.matcher.translate(text)
    }

    pub fn package_views(&self) -> Vec<PackageView> {
        self.packages
            .manifest()
            .packages
            .iter()
            .filter(|m| m.kind == PackageKind::Translation)
            .map(|m| PackageView {
                id: m.id.clone(),
                name: m.name.clone(),
                version: m.version.clone(),
                enabled: self.packages.is_enabled(m),
                cached: self
                    .packages
                    .cache()
                    .get(&m.id)
                    .is_some_and(|e| e.version == m.version),
                description: m.description.clone(),
            })
            .collect()
    }
}

fn merge(a: Option<FlushReport>, b: FlushReport) -> FlushReport {
    match a {
        Some(a) => FlushReport {
            nodes: a.nodes + b.nodes,
            changed: a.changed + b.changed,
        },
        None => b,
    }
}
