//! Headless page model: arena-backed documents with DOM-like mutation
//! records, tree walking and iframe content documents.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A node together with the document that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub doc: DocId,
    pub node: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Content document of an `iframe`, once loaded.
    pub frame: Option<DocId>,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

#[derive(Debug, Clone)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub subtree: bool,
    pub character_data: bool,
    pub attribute_filter: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList { added: Vec<NodeId>, removed: Vec<NodeId> },
    CharacterData,
    Attributes { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub observer: ObserverId,
    pub doc: DocId,
    pub target: NodeId,
    pub kind: MutationKind,
}

#[derive(Debug, Clone)]
struct Registration {
    id: ObserverId,
    root: NodeId,
    options: ObserveOptions,
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocId,
    origin: String,
    nodes: Vec<Node>,
    body: NodeId,
    observers: Vec<Registration>,
    records: Vec<MutationRecord>,
}

const ROOT: NodeId = NodeId(0);

impl Document {
    /// A document with an empty `<body>`. The id is assigned when the
    /// document is added to a [`Page`].
    pub fn new(origin: impl Into<String>) -> Self {
        let mut doc = Document {
            id: DocId(usize::MAX),
            origin: origin.into(),
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
            body: ROOT,
            observers: Vec::new(),
            records: Vec::new(),
        };
        let body = doc.create_element("body");
        doc.nodes[ROOT.0].children.push(body);
        doc.nodes[body.0].parent = Some(ROOT);
        doc.body = body;
        doc
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn data(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0).map(|n| &n.data)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.data(node) {
            Some(NodeData::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Lowercase tag name for elements.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.data(node) {
            Some(NodeData::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|e| {
            e.attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        })
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element(Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            frame: None,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()))
    }

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }

    /// Appends `child` (detaching it from any previous parent). Returns false
    /// for invalid ids, non-container parents, or cycles.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.contains(parent) || !self.contains(child) || child == ROOT {
            return false;
        }
        if matches!(self.nodes[parent.0].data, NodeData::Text(_)) {
            return false;
        }
        if self.is_inclusive_ancestor(child, parent) {
            return false;
        }

        if let Some(old_parent) = self.nodes[child.0].parent {
            self.detach(old_parent, child);
        }

        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.queue_record(
            parent,
            MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
            },
        );
        true
    }

    pub fn remove(&mut self, node: NodeId) -> bool {
        match self.parent(node) {
            Some(parent) => {
                self.detach(parent, node);
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
        self.queue_record(
            parent,
            MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![child],
            },
        );
    }

    /// Replaces a text node's data. Returns false for non-text nodes.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> bool {
        match self.nodes.get_mut(node.0).map(|n| &mut n.data) {
            Some(NodeData::Text(t)) => {
                *t = text.to_string();
            }
            _ => return false,
        }
        self.queue_record(node, MutationKind::CharacterData);
        true
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self.nodes.get_mut(node.0).map(|n| &mut n.data) {
            Some(NodeData::Element(e)) => match e.attrs.iter_mut().find(|(k, _)| *k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => e.attrs.push((name.clone(), value.to_string())),
            },
            _ => return false,
        }
        self.queue_record(node, MutationKind::Attributes { name });
        true
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self.nodes.get_mut(node.0).map(|n| &mut n.data) {
            Some(NodeData::Element(e)) => {
                let before = e.attrs.len();
                e.attrs.retain(|(k, _)| *k != name);
                if e.attrs.len() == before {
                    return false;
                }
            }
            _ => return false,
        }
        self.queue_record(node, MutationKind::Attributes { name });
        true
    }

    pub(crate) fn set_frame(&mut self, node: NodeId, frame: Option<DocId>) -> bool {
        match self.nodes.get_mut(node.0).map(|n| &mut n.data) {
            Some(NodeData::Element(e)) if e.tag == "iframe" => {
                e.frame = frame;
                true
            }
            _ => false,
        }
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Preorder walker over `root`'s subtree, root included.
    pub fn create_tree_walker(&self, root: NodeId) -> TreeWalker {
        TreeWalker {
            current: self.contains(root).then_some(root),
            path: Vec::new(),
        }
    }

    /// `iframe` elements inside `root`'s subtree, in document order.
    pub fn iframes_in(&self, root: NodeId) -> Vec<NodeId> {
        let mut walker = self.create_tree_walker(root);
        let mut out = Vec::new();
        while let Some(node) = walker.next_node(self) {
            if self.tag(node) == Some("iframe") {
                out.push(node);
            }
        }
        out
    }

    pub fn observe(&mut self, id: ObserverId, root: NodeId, options: ObserveOptions) {
        self.observers.retain(|r| r.id != id);
        self.observers.push(Registration { id, root, options });
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    fn queue_record(&mut self, target: NodeId, kind: MutationKind) {
        if self.observers.is_empty() {
            return;
        }

        let mut interested = Vec::new();
        for reg in &self.observers {
            let in_scope = if reg.options.subtree {
                self.is_inclusive_ancestor(reg.root, target)
            } else {
                reg.root == target
            };
            if !in_scope {
                continue;
            }

            let wanted = match &kind {
                MutationKind::ChildList { .. } => reg.options.child_list,
                MutationKind::CharacterData => reg.options.character_data,
                MutationKind::Attributes { name } => {
                    reg.options.attribute_filter.iter().any(|f| f == name)
                }
            };
            if wanted {
                interested.push(reg.id);
            }
        }

        for observer in interested {
            self.records.push(MutationRecord {
                observer,
                doc: self.id,
                target,
                kind: kind.clone(),
            });
        }
    }
}

/// Cursor-style walker; it borrows the document only per step so callers
/// can write to nodes between steps.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    current: Option<NodeId>,
    /// `(parent, index of the step's node in parent)` from the root down.
    path: Vec<(NodeId, usize)>,
}

impl TreeWalker {
    pub fn next_node(&mut self, doc: &Document) -> Option<NodeId> {
        let current = self.current?;
        self.current = self.following(doc, current);
        Some(current)
    }

    fn following(&mut self, doc: &Document, node: NodeId) -> Option<NodeId> {
        if let Some(first) = doc.children(node).first() {
            self.path.push((node, 0));
            return Some(*first);
        }

        while let Some((parent, index)) = self.path.pop() {
            if let Some(next) = doc.children(parent).get(index + 1) {
                self.path.push((parent, index + 1));
                return Some(*next);
            }
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// An iframe's content document was (re)placed.
    FrameLoaded { frame: NodeRef },
}

/// The top document plus every iframe content document it embeds.
#[derive(Debug, Clone)]
pub struct Page {
    docs: Vec<Option<Document>>,
    top: DocId,
    events: Vec<PageEvent>,
    next_observer: u64,
}

impl Page {
    pub fn new(top: Document) -> Self {
        let mut page = Page {
            docs: Vec::new(),
            top: DocId(0),
            events: Vec::new(),
            next_observer: 1,
        };
        page.top = page.add_document(top);
        page
    }

    pub fn top(&self) -> DocId {
        self.top
    }

    pub fn add_document(&mut self, mut doc: Document) -> DocId {
        let id = DocId(self.docs.len());
        doc.id = id;
        self.docs.push(Some(doc));
        id
    }

    pub fn doc(&self, id: DocId) -> Option<&Document> {
        self.docs.get(id.0).and_then(|d| d.as_ref())
    }

    pub fn doc_mut(&mut self, id: DocId) -> Option<&mut Document> {
        self.docs.get_mut(id.0).and_then(|d| d.as_mut())
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.iter().flatten()
    }

    /// Loads `content` into the iframe `frame`, discarding the previous
    /// content document (and every observer registered on it), then queues
    /// a load event.
    pub fn load_frame(&mut self, frame: NodeRef, content: Document) -> Option<DocId> {
        let old = self.doc(frame.doc)?.element(frame.node)?.frame;
        if self.doc(frame.doc)?.tag(frame.node) != Some("iframe") {
            return None;
        }

        let new_id = self.add_document(content);
        self.doc_mut(frame.doc)?.set_frame(frame.node, Some(new_id));

        if let Some(old) = old {
            self.discard(old);
        }

        self.events.push(PageEvent::FrameLoaded { frame });
        Some(new_id)
    }

    fn discard(&mut self, id: DocId) {
        let Some(doc) = self.docs.get_mut(id.0).and_then(|d| d.take()) else {
            return;
        };
        let nested: Vec<DocId> = doc
            .nodes
            .iter()
            .filter_map(|n| match &n.data {
                NodeData::Element(e) => e.frame,
                _ => None,
            })
            .collect();
        for child in nested {
            self.discard(child);
        }
    }

    /// The iframe's content document, only when it shares the embedding
    /// document's origin. Cross-origin content is not reachable.
    pub fn content_document(&self, frame: NodeRef) -> Option<DocId> {
        let host = self.doc(frame.doc)?;
        let content_id = host.element(frame.node)?.frame?;
        let content = self.doc(content_id)?;
        (content.origin() == host.origin()).then_some(content_id)
    }

    pub fn new_observer_id(&mut self) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        id
    }

    /// Drains pending records from every live document, top document first.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        let mut out = Vec::new();
        for doc in self.docs.iter_mut().flatten() {
            out.extend(doc.take_records());
        }
        out
    }

    pub fn take_events(&mut self) -> Vec<PageEvent> {
        std::mem::take(&mut self.events)
    }

    /// Ids of live documents, used to drop stale bookkeeping.
    pub fn live_documents(&self) -> HashSet<DocId> {
        self.documents().map(|d| d.id()).collect()
    }
}
