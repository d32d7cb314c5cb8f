use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::model::dom::{DocId, Document, NodeData, NodeId, NodeRef, Page};

/// A document as sent by the host: its origin and the children of `<body>`.
#[derive(Debug, Deserialize, Clone)]
pub struct FrameSpec {
    pub origin: String,

    #[serde(default)]
    pub body: Vec<NodeSpec>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum NodeSpec {
    Text {
        text: String,
    },
    Element {
        tag: String,

        #[serde(default)]
        attrs: BTreeMap<String, String>,

        #[serde(default)]
        children: Vec<NodeSpec>,

        /// Content document of an `iframe`.
        #[serde(default)]
        frame: Option<FrameSpec>,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PageOp {
    SetText {
        doc: usize,
        node: usize,
        text: String,
    },
    SetAttr {
        doc: usize,
        node: usize,
        name: String,
        value: String,
    },
    RemoveAttr {
        doc: usize,
        node: usize,
        name: String,
    },
    Append {
        doc: usize,
        parent: usize,
        node: NodeSpec,
    },
    Remove {
        doc: usize,
        node: usize,
    },
    NavigateFrame {
        doc: usize,
        node: usize,
        frame: FrameSpec,
    },
}

pub fn parse_page(value: Value) -> Result<Page, EngineError> {
    let spec: FrameSpec = serde_json::from_value(value)?;

    let (doc, frames) = build_document(&spec);
    let mut page = Page::new(doc);
    let top = page.top();
    for (node, frame) in frames {
        load_frame(&mut page, NodeRef { doc: top, node }, &frame)?;
    }

    // Frames present at load time are found by scanning, not by events.
    page.take_events();
    page.take_records();
    Ok(page)
}

fn build_document(spec: &FrameSpec) -> (Document, Vec<(NodeId, FrameSpec)>) {
    let mut doc = Document::new(spec.origin.clone());
    let mut frames = Vec::new();
    let body = doc.body();
    for child in &spec.body {
        build_node(&mut doc, body, child, &mut frames);
    }
    (doc, frames)
}

fn build_node(
    doc: &mut Document,
    parent: NodeId,
    spec: &NodeSpec,
    frames: &mut Vec<(NodeId, FrameSpec)>,
) -> NodeId {
    match spec {
        NodeSpec::Text { text } => {
            let node = doc.create_text(text);
            doc.append_child(parent, node);
            node
        }
        NodeSpec::Element {
            tag,
            attrs,
            children,
            frame,
        } => {
            let node = doc.create_element(tag);
            for (name, value) in attrs {
                doc.set_attribute(node, name, value);
            }
            for child in children {
                build_node(doc, node, child, frames);
            }
            if let Some(frame) = frame {
                frames.push((node, frame.clone()));
            }
            doc.append_child(parent, node);
            node
        }
    }
}

fn load_frame(page: &mut Page, frame: NodeRef, spec: &FrameSpec) -> Result<DocId, EngineError> {
    let (doc, nested) = build_document(spec);
    let id = page
        .load_frame(frame, doc)
        .ok_or_else(|| EngineError::Page(format!("node {} is not an iframe", frame.node.0)))?;
    for (node, nested_spec) in nested {
        load_frame(page, NodeRef { doc: id, node }, &nested_spec)?;
    }
    Ok(id)
}

/// Applies one host-side change. Returns the ids the host needs to address
/// newly created content.
pub fn apply_op(page: &mut Page, op: PageOp) -> Result<Value, EngineError> {
    match op {
        PageOp::SetText { doc, node, text } => {
            let ok = doc_mut(page, doc)?.set_text(NodeId(node), &text);
            expect(ok, "set_text", node)?;
            Ok(json!({}))
        }
        PageOp::SetAttr {
            doc,
            node,
            name,
            value,
        } => {
            let ok = doc_mut(page, doc)?.set_attribute(NodeId(node), &name, &value);
            expect(ok, "set_attr", node)?;
            Ok(json!({}))
        }
        PageOp::RemoveAttr { doc, node, name } => {
            doc_mut(page, doc)?.remove_attribute(NodeId(node), &name);
            Ok(json!({}))
        }
        PageOp::Append { doc, parent, node } => {
            let d = doc_mut(page, doc)?;
            if !d.contains(NodeId(parent)) {
                return Err(EngineError::Page(format!("unknown node {parent}")));
            }

            // Build detached, then attach once so observers see a single
            // childList record for the whole subtree.
            let mut frames = Vec::new();
            let holder = d.create_element("template");
            let created = build_node(d, holder, &node, &mut frames);
            let ok = d.append_child(NodeId(parent), created);
            expect(ok, "append", parent)?;

            for (frame_node, spec) in frames {
                load_frame(page, NodeRef { doc: DocId(doc), node: frame_node }, &spec)?;
            }
            Ok(json!({ "node": created.0 }))
        }
        PageOp::Remove { doc, node } => {
            let ok = doc_mut(page, doc)?.remove(NodeId(node));
            expect(ok, "remove", node)?;
            Ok(json!({}))
        }
        PageOp::NavigateFrame { doc, node, frame } => {
            let id = load_frame(page, NodeRef { doc: DocId(doc), node: NodeId(node) }, &frame)?;
            Ok(json!({ "doc": id.0 }))
        }
    }
}

fn doc_mut(page: &mut Page, doc: usize) -> Result<&mut Document, EngineError> {
    page.doc_mut(DocId(doc))
        .ok_or_else(|| EngineError::Page(format!("unknown document {doc}")))
}

fn expect(ok: bool, op: &str, node: usize) -> Result<(), EngineError> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::Page(format!("{op} not applicable to node {node}")))
    }
}

pub fn snapshot(page: &Page) -> Value {
    let documents: Vec<Value> = page
        .documents()
        .map(|doc| {
            json!({
                "doc": doc.id().0,
                "origin": doc.origin(),
                "body": node_json(doc, doc.body()),
            })
        })
        .collect();

    json!({ "top": page.top().0, "documents": documents })
}

fn node_json(doc: &Document, node: NodeId) -> Value {
    match doc.data(node) {
        Some(NodeData::Text(text)) => json!({ "id": node.0, "text": text }),
        Some(NodeData::Element(el)) => {
            let mut obj = Map::new();
            obj.insert("id".into(), json!(node.0));
            obj.insert("tag".into(), json!(el.tag));
            if !el.attrs.is_empty() {
                let attrs: Map<String, Value> = el
                    .attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                obj.insert("attrs".into(), Value::Object(attrs));
            }
            let children: Vec<Value> = doc
                .children(node)
                .iter()
                .map(|c| node_json(doc, *c))
                .collect();
            if !children.is_empty() {
                obj.insert("children".into(), Value::Array(children));
            }
            if let Some(frame) = el.frame {
                obj.insert("frame".into(), json!(frame.0));
            }
            Value::Object(obj)
        }
        _ => Value::Null,
    }
}
