use crate::model::dom::{Document, NodeData, NodeId};

use super::matcher::Matcher;

const IGNORED_PARENT_TAGS: [&str; 4] = ["script", "style", "noscript", "textarea"];

const TEXT_ATTRIBUTES: [&str; 2] = ["placeholder", "title"];

/// `input` types whose `value` is a label rather than user data.
const BUTTON_INPUT_TYPES: [&str; 3] = ["button", "submit", "reset"];

/// Attributes whose changes the mutation engine must see.
pub const OBSERVED_ATTRIBUTES: [&str; 3] = ["placeholder", "title", "value"];

/// Translates text nodes and label attributes under `root` using `doc`'s own
/// walker. Returns the number of writes; a second run over the same subtree
/// writes nothing.
pub fn translate_subtree(doc: &mut Document, root: NodeId, matcher: &Matcher) -> usize {
    if matcher.is_empty() || !doc.contains(root) {
        return 0;
    }

    let mut changed = 0;
    let mut walker = doc.create_tree_walker(root);

    while let Some(node) = walker.next_node(doc) {
        let is_text = matches!(doc.data(node), Some(NodeData::Text(_)));
        let is_element = matches!(doc.data(node), Some(NodeData::Element(_)));

        if is_text {
            changed += translate_text_node(doc, node, matcher);
        } else if is_element {
            changed += translate_attributes(doc, node, matcher);
        }
    }

    changed
}

fn translate_text_node(doc: &mut Document, node: NodeId, matcher: &Matcher) -> usize {
    let Some(parent) = doc.parent(node) else {
        return 0;
    };
    match doc.tag(parent) {
        Some(tag) if !IGNORED_PARENT_TAGS.contains(&tag) => {}
        _ => return 0,
    }

    let Some(original) = doc.text(node) else {
        return 0;
    };
    if original.trim().is_empty() {
        return 0;
    }

    match matcher.translate(original) {
        Some(translated) => usize::from(doc.set_text(node, &translated)),
        None => 0,
    }
}

fn translate_attributes(doc: &mut Document, node: NodeId, matcher: &Matcher) -> usize {
    let mut changed = 0;

    for name in TEXT_ATTRIBUTES {
        changed += translate_attribute(doc, node, name, matcher);
    }

    if is_button_input(doc, node) {
        changed += translate_attribute(doc, node, "value", matcher);
    }

    changed
}

fn translate_attribute(doc: &mut Document, node: NodeId, name: &str, matcher: &Matcher) -> usize {
    let translated = match doc.attribute(node, name) {
        Some(original) if !original.is_empty() => matcher.translate(original),
        _ => None,
    };

    match translated {
        Some(t) => usize::from(doc.set_attribute(node, name, &t)),
        None => 0,
    }
}

fn is_button_input(doc: &Document, node: NodeId) -> bool {
    if doc.tag(node) != Some("input") {
        return false;
    }
    let input_type = doc
        .attribute(node, "type")
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    BUTTON_INPUT_TYPES.contains(&input_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dictionary::Dictionary;
    use std::sync::Arc;

    fn matcher(pairs: &[(&str, &str)]) -> Matcher {
        Matcher::new(Arc::new(Dictionary::from_pairs(pairs)))
    }

    fn element(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let el = doc.create_element(tag);
        for (k, v) in attrs {
            doc.set_attribute(el, k, v);
        }
        doc.append_child(parent, el);
        el
    }

    fn text(doc: &mut Document, parent: NodeId, value: &str) -> NodeId {
        let t = doc.create_text(value);
        doc.append_child(parent, t);
        t
    }

    #[test]
    fn players_page_end_to_end() {
        let m = matcher(&[("Players", "玩家")]);
        let mut doc = Document::new("https://www.owlbear.rodeo");
        let body = doc.body();
        let label = text(&mut doc, body, "Players");
        let button = element(&mut doc, body, "input", &[("type", "button"), ("value", "Players")]);
        let field = element(&mut doc, body, "input", &[("type", "text"), ("value", "Players")]);

        assert_eq!(translate_subtree(&mut doc, body, &m), 2);
        assert_eq!(doc.text(label), Some("玩家"));
        assert_eq!(doc.attribute(button, "value"), Some("玩家"));
        assert_eq!(doc.attribute(field, "value"), Some("Players"));
    }

    #[test]
    fn second_pass_writes_nothing() {
        let m = matcher(&[("Search", "搜索"), ("Map", "地图")]);
        let mut doc = Document::new("https://a.test");
        let body = doc.body();
        let div = element(&mut doc, body, "div", &[("title", "Map")]);
        text(&mut doc, div, " Search ");
        element(&mut doc, div, "input", &[("placeholder", "Search")]);

        assert_eq!(translate_subtree(&mut doc, body, &m), 3);
        assert_eq!(translate_subtree(&mut doc, body, &m), 0);
    }

    #[test]
    fn ignored_parents_and_blank_text_are_skipped() {
        let m = matcher(&[("Players", "玩家")]);
        let mut doc = Document::new("https://a.test");
        let body = doc.body();
        for tag in ["script", "style", "noscript", "textarea"] {
            let el = element(&mut doc, body, tag, &[]);
            text(&mut doc, el, "Players");
        }
        text(&mut doc, body, "  \n ");
        let detached = doc.create_text("Players");

        assert_eq!(translate_subtree(&mut doc, body, &m), 0);
        assert_eq!(translate_subtree(&mut doc, detached, &m), 0);
    }

    #[test]
    fn submit_and_reset_values_translate_but_not_other_attributes() {
        let m = matcher(&[("Send", "发送"), ("Clear", "清除")]);
        let mut doc = Document::new("https://a.test");
        let body = doc.body();
        let submit = element(&mut doc, body, "input", &[("type", "SUBMIT"), ("value", "Send")]);
        let reset = element(&mut doc, body, "input", &[("type", "reset"), ("value", "Clear")]);
        let untyped = element(&mut doc, body, "input", &[("value", "Send")]);
        let aria = element(&mut doc, body, "button", &[("aria-label", "Send"), ("value", "Send")]);

        assert_eq!(translate_subtree(&mut doc, body, &m), 2);
        assert_eq!(doc.attribute(submit, "value"), Some("发送"));
        assert_eq!(doc.attribute(reset, "value"), Some("清除"));
        assert_eq!(doc.attribute(untyped, "value"), Some("Send"));
        assert_eq!(doc.attribute(aria, "aria-label"), Some("Send"));
        assert_eq!(doc.attribute(aria, "value"), Some("Send"));
    }

    #[test]
    fn text_root_is_translated_alone() {
        let m = matcher(&[("Players", "玩家")]);
        let mut doc = Document::new("https://a.test");
        let body = doc.body();
        let p = element(&mut doc, body, "p", &[]);
        let t = text(&mut doc, p, "Players");
        let sibling = text(&mut doc, body, "Players");

        assert_eq!(translate_subtree(&mut doc, t, &m), 1);
        assert_eq!(doc.text(sibling), Some("Players"));
    }
}
