use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::model::dom::{
    DocId, MutationKind, NodeId, NodeRef, ObserveOptions, ObserverId, Page, PageEvent,
};

use super::apply::{translate_subtree, OBSERVED_ATTRIBUTES};
use super::matcher::Matcher;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub nodes: usize,
    pub changed: usize,
}

/// Debounced change queue over every observed document of a page: the top
/// document and each reachable same-origin iframe document.
#[derive(Debug)]
pub struct MutationEngine {
    debounce: Duration,
    pending: Vec<NodeRef>,
    queued: HashSet<NodeRef>,
    deadline: Option<Instant>,
    observers: HashMap<DocId, ObserverId>,
}

fn observe_options() -> ObserveOptions {
    ObserveOptions {
        child_list: true,
        subtree: true,
        character_data: true,
        attribute_filter: OBSERVED_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
    }
}

impl MutationEngine {
    pub fn new(debounce: Duration) -> Self {
        MutationEngine {
            debounce,
            pending: Vec::new(),
            queued: HashSet::new(),
            deadline: None,
            observers: HashMap::new(),
        }
    }

    /// Observes the top document, discovers its iframes and queues every
    /// observed body. Call [`MutationEngine::flush`] for the initial pass.
    pub fn start(&mut self, page: &mut Page, now: Instant) {
        let top = page.top();
        self.attach_document(page, top, now);
    }

    pub fn observed_documents(&self) -> usize {
        self.observers.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn attach_document(&mut self, page: &mut Page, doc_id: DocId, now: Instant) {
        if self.observers.contains_key(&doc_id) {
            return;
        }
        let observer = page.new_observer_id();
        let Some(doc) = page.doc_mut(doc_id) else {
            return;
        };
        let body = doc.body();
        doc.observe(observer, body, observe_options());
        self.observers.insert(doc_id, observer);
        debug!(doc = doc_id.0, "observing document");

        self.enqueue(NodeRef { doc: doc_id, node: body }, now);
        self.discover_frames(page, doc_id, body, now);
    }

    fn discover_frames(&mut self, page: &mut Page, doc_id: DocId, root: NodeId, now: Instant) {
        let frames = match page.doc(doc_id) {
            Some(doc) => doc.iframes_in(root),
            None => return,
        };
        for node in frames {
            let frame = NodeRef { doc: doc_id, node };
            self.attach_frame(page, frame, now);
        }
    }

    fn attach_frame(&mut self, page: &mut Page, frame: NodeRef, now: Instant) {
        match page.content_document(frame) {
            Some(content) => self.attach_document(page, content, now),
            None => debug!(doc = frame.doc.0, node = frame.node.0, "iframe not reachable, skipped"),
        }
    }

    fn enqueue(&mut self, node: NodeRef, now: Instant) {
        if self.queued.insert(node) {
            self.pending.push(node);
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.debounce);
        }
    }

    /// Moves the page's mutation records and frame load events into the
    /// pending set.
    pub fn collect(&mut self, page: &mut Page, now: Instant) {
        for record in page.take_records() {
            if self.observers.get(&record.doc) != Some(&record.observer) {
                continue;
            }
            match record.kind {
                MutationKind::ChildList { added, .. } => {
                    for node in added {
                        self.enqueue(NodeRef { doc: record.doc, node }, now);
                        self.discover_frames(page, record.doc, node, now);
                    }
                }
                MutationKind::CharacterData | MutationKind::Attributes { .. } => {
                    self.enqueue(
                        NodeRef {
                            doc: record.doc,
                            node: record.target,
                        },
                        now,
                    );
                }
            }
        }

        for event in page.take_events() {
            let PageEvent::FrameLoaded { frame } = event;
            if !self.observers.contains_key(&frame.doc) {
                continue;
            }
            // The previous content document is gone along with its observer.
            let live = page.live_documents();
            self.observers.retain(|doc, _| live.contains(doc));
            self.attach_frame(page, frame, now);
        }
    }

    /// Collects, then flushes once the debounce window has elapsed.
    pub fn poll(&mut self, page: &mut Page, matcher: &Matcher, now: Instant) -> Option<FlushReport> {
        self.collect(page, now);
        match self.deadline {
            Some(deadline) if now >= deadline => Some(self.flush(page, matcher, now)),
            _ => None,
        }
    }

    /// Translates every pending node in insertion order.
    pub fn flush(&mut self, page: &mut Page, matcher: &Matcher, now: Instant) -> FlushReport {
        self.collect(page, now);

        let pending = std::mem::take(&mut self.pending);
        self.queued.clear();
        self.deadline = None;

        let mut report = FlushReport {
            nodes: pending.len(),
            changed: 0,
        };
        for node in pending {
            if let Some(doc) = page.doc_mut(node.doc) {
                report.changed += translate_subtree(doc, node.node, matcher);
            }
        }

        // Everything recorded since the collect above is our own writing.
        page.take_records();

        if report.changed > 0 {
            debug!(nodes = report.nodes, changed = report.changed, "flush");
        }
        report
    }

    /// Queues every observed body for a full re-application.
    pub fn queue_all(&mut self, page: &Page, now: Instant) {
        let mut docs: Vec<DocId> = self.observers.keys().copied().collect();
        docs.sort();
        for doc_id in docs {
            if let Some(doc) = page.doc(doc_id) {
                let body = doc.body();
                self.enqueue(NodeRef { doc: doc_id, node: body }, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dom::Document;
    use crate::services::dictionary::Dictionary;
    use std::sync::Arc;

    const ORIGIN: &str = "https://www.owlbear.rodeo";

    fn matcher() -> Matcher {
        Matcher::new(Arc::new(Dictionary::from_pairs(&[
            ("Players", "玩家"),
            ("Search", "搜索"),
            ("Settings", "设置"),
        ])))
    }

    fn started(page: &mut Page, t0: Instant) -> MutationEngine {
        let mut engine = MutationEngine::new(Duration::from_millis(80));
        engine.start(page, t0);
        engine.flush(page, &matcher(), t0);
        engine
    }

    fn append_text(page: &mut Page, doc: DocId, value: &str) -> NodeId {
        let d = page.doc_mut(doc).unwrap();
        let body = d.body();
        let p = d.create_element("p");
        let t = d.create_text(value);
        d.append_child(p, t);
        d.append_child(body, p);
        t
    }

    #[test]
    fn mutations_within_window_collapse_into_one_flush() {
        let mut page = Page::new(Document::new(ORIGIN));
        let top = page.top();
        let t0 = Instant::now();
        let mut engine = started(&mut page, t0);
        let m = matcher();

        let a = append_text(&mut page, top, "Players");
        assert!(engine.poll(&mut page, &m, t0 + Duration::from_millis(10)).is_none());
        let b = append_text(&mut page, top, "Search");
        assert!(engine.poll(&mut page, &m, t0 + Duration::from_millis(50)).is_none());
        assert_eq!(engine.pending(), 2);

        let report = engine
            .poll(&mut page, &m, t0 + Duration::from_millis(95))
            .unwrap();
        assert_eq!(report, FlushReport { nodes: 2, changed: 2 });

        let doc = page.doc(top).unwrap();
        assert_eq!(doc.text(a), Some("玩家"));
        assert_eq!(doc.text(b), Some("搜索"));

        // Our own writes do not schedule another flush.
        assert!(engine.next_deadline().is_none());
        assert!(engine.poll(&mut page, &m, t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn character_data_and_attribute_changes_are_retranslated() {
        let mut doc = Document::new(ORIGIN);
        let body = doc.body();
        let text = doc.create_text("Players");
        let input = doc.create_element("input");
        doc.append_child(body, text);
        doc.append_child(body, input);
        let mut page = Page::new(doc);
        let top = page.top();
        let t0 = Instant::now();
        let mut engine = started(&mut page, t0);
        let m = matcher();

        let d = page.doc_mut(top).unwrap();
        d.set_text(text, "Settings");
        d.set_attribute(input, "placeholder", "Search");
        d.set_attribute(input, "data-x", "Players");

        let t1 = t0 + Duration::from_millis(200);
        engine.collect(&mut page, t1);
        assert_eq!(engine.pending(), 2);
        let report = engine.poll(&mut page, &m, t1 + Duration::from_millis(80)).unwrap();
        assert_eq!(report.changed, 2);

        let d = page.doc(top).unwrap();
        assert_eq!(d.text(text), Some("设置"));
        assert_eq!(d.attribute(input, "placeholder"), Some("搜索"));
        assert_eq!(d.attribute(input, "data-x"), Some("Players"));
    }

    #[test]
    fn same_origin_iframes_are_observed_and_cross_origin_skipped() {
        let mut page = Page::new(Document::new(ORIGIN));
        let top = page.top();
        let (same, other) = {
            let d = page.doc_mut(top).unwrap();
            let body = d.body();
            let same = d.create_element("iframe");
            let other = d.create_element("iframe");
            d.append_child(body, same);
            d.append_child(body, other);
            (NodeRef { doc: top, node: same }, NodeRef { doc: top, node: other })
        };

        let mut inner = Document::new(ORIGIN);
        let inner_body = inner.body();
        let inner_text = inner.create_text("Players");
        inner.append_child(inner_body, inner_text);
        let inner_id = page.load_frame(same, inner).unwrap();

        let mut foreign = Document::new("https://plugin.example.com");
        let foreign_body = foreign.body();
        let foreign_text = foreign.create_text("Players");
        foreign.append_child(foreign_body, foreign_text);
        let foreign_id = page.load_frame(other, foreign).unwrap();
        page.take_events();

        let t0 = Instant::now();
        let mut engine = started(&mut page, t0);
        assert_eq!(engine.observed_documents(), 2);
        assert_eq!(page.doc(inner_id).unwrap().text(inner_text), Some("玩家"));
        assert_eq!(page.doc(foreign_id).unwrap().text(foreign_text), Some("Players"));

        // Later changes inside the iframe go through its own observer.
        let added = append_text(&mut page, inner_id, "Search");
        let t1 = t0 + Duration::from_secs(1);
        assert!(engine.poll(&mut page, &matcher(), t1).is_none());
        let report = engine
            .poll(&mut page, &matcher(), t1 + Duration::from_millis(80))
            .unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(page.doc(inner_id).unwrap().text(added), Some("搜索"));
    }

    #[test]
    fn frame_navigation_reattaches_observer() {
        let mut page = Page::new(Document::new(ORIGIN));
        let top = page.top();
        let frame = {
            let d = page.doc_mut(top).unwrap();
            let body = d.body();
            let f = d.create_element("iframe");
            d.append_child(body, f);
            NodeRef { doc: top, node: f }
        };
        let first = page.load_frame(frame, Document::new(ORIGIN)).unwrap();
        page.take_events();

        let t0 = Instant::now();
        let mut engine = started(&mut page, t0);
        assert_eq!(engine.observed_documents(), 2);
        let _ = first;

        let mut next = Document::new(ORIGIN);
        let body = next.body();
        let text = next.create_text("Settings");
        next.append_child(body, text);
        let second = page.load_frame(frame, next).unwrap();

        let t1 = t0 + Duration::from_secs(1);
        engine.collect(&mut page, t1);
        assert_eq!(engine.observed_documents(), 2);
        engine.poll(&mut page, &matcher(), t1 + Duration::from_millis(80)).unwrap();
        assert_eq!(page.doc(second).unwrap().text(text), Some("设置"));

        let added = append_text(&mut page, second, "Players");
        let t2 = t1 + Duration::from_secs(1);
        engine.collect(&mut page, t2);
        engine.poll(&mut page, &matcher(), t2 + Duration::from_millis(80)).unwrap();
        assert_eq!(page.doc(second).unwrap().text(added), Some("玩家"));
    }

    #[test]
    fn iframe_added_by_mutation_is_discovered() {
        let mut page = Page::new(Document::new(ORIGIN));
        let top = page.top();
        let t0 = Instant::now();
        let mut engine = started(&mut page, t0);

        let frame = {
            let d = page.doc_mut(top).unwrap();
            let body = d.body();
            let f = d.create_element("iframe");
            d.append_child(body, f);
            NodeRef { doc: top, node: f }
        };
        let mut content = Document::new(ORIGIN);
        let body = content.body();
        let text = content.create_text("Players");
        content.append_child(body, text);
        let content_id = page.load_frame(frame, content).unwrap();

        let t1 = t0 + Duration::from_millis(100);
        engine.collect(&mut page, t1);
        assert_eq!(engine.observed_documents(), 2);
        engine.poll(&mut page, &matcher(), t1 + Duration::from_millis(80)).unwrap();
        assert_eq!(page.doc(content_id).unwrap().text(text), Some("玩家"));
    }
}
