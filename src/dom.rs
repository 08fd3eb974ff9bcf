//! Tree helpers over `markup5ever_rcdom`.
//!
//! Component templates and mounted documents are parsed with html5ever into
//! an `RcDom`; every structural change the resolver makes (replacing an
//! element, relocating slot content, merging attributes) goes through the
//! functions in this module.

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::driver::parse_fragment as parse_html_fragment;
use html5ever::{parse_document, Attribute, LocalName, Namespace, QualName};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;
use tendril::StrTendril;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

lazy_static! {
    /// `<slot/>` and `<z-icon />` style tags. HTML parsing ignores the
    /// self-closing flag on non-void elements, which would swallow the
    /// following siblings as children.
    static ref SELF_CLOSING_RE: Regex =
        Regex::new(r"(?i)<(slot|[a-z][a-z0-9]*-[a-z0-9-]*)(\s[^<>]*?)?\s*/>").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING & SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert self-closing slot and custom-element tags to properly closed tags.
pub fn expand_self_closing(html: &str) -> String {
    SELF_CLOSING_RE.replace_all(html, "<$1$2></$1>").to_string()
}

/// Parse an HTML fragment into detached top-level nodes, in source order.
pub fn parse_fragment(html: &str) -> Vec<Handle> {
    let source = expand_self_closing(html);
    let dom = parse_document(RcDom::default(), Default::default()).one(source);

    // html5ever always builds html > head + body; content that belongs in
    // <head> (e.g. a leading <style>) lands there, so both are collected.
    let mut nodes = Vec::new();
    let document_children = dom.document.children.borrow().clone();
    for html in document_children.iter().filter(|n| is_element(n)) {
        for section in html.children.borrow().iter() {
            nodes.extend(section.children.borrow().iter().cloned());
        }
    }
    for node in &nodes {
        detach(node);
    }
    nodes
}

/// Parse a component template into detached top-level nodes.
///
/// The template is parsed the way `<template>` contents are, so table parts
/// (`<tr>`, `<td>`, `<col>`, ...) are kept as roots instead of being dropped
/// outside a table.
pub fn parse_template(html: &str) -> Vec<Handle> {
    let source = expand_self_closing(html);
    let context = QualName::new(
        None,
        Namespace::from(HTML_NAMESPACE),
        LocalName::from("template"),
    );
    let dom = parse_html_fragment(RcDom::default(), Default::default(), context, Vec::new())
        .one(source);

    // Fragment content is attached under a single synthetic <html> element.
    let mut nodes = Vec::new();
    let document_children = dom.document.children.borrow().clone();
    for html in document_children.iter().filter(|n| is_element(n)) {
        nodes.extend(html.children.borrow().iter().cloned());
    }
    for node in &nodes {
        detach(node);
    }
    nodes
}

/// Create a detached element with no attributes.
pub fn create_element(tag: &str) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag)),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

fn serialize_with(node: &Handle, traversal_scope: TraversalScope) -> String {
    let mut bytes = Vec::new();
    let serializable: SerializableHandle = node.clone().into();
    let opts = SerializeOpts {
        traversal_scope,
        ..Default::default()
    };
    if serialize(&mut bytes, &serializable, opts).is_err() {
        return String::new();
    }
    String::from_utf8(bytes).unwrap_or_default()
}

/// Outer HTML of an element or text node.
pub fn to_html(node: &Handle) -> String {
    serialize_with(node, TraversalScope::IncludeNode)
}

/// Inner HTML of a container.
pub fn inner_html(node: &Handle) -> String {
    serialize_with(node, TraversalScope::ChildrenOnly(None))
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE INSPECTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

/// Lower-case local name of an element.
pub fn tag_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.to_lowercase()),
        _ => None,
    }
}

/// Contents of a text node.
pub fn text(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

pub fn set_text(node: &Handle, value: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from(value);
    }
}

/// Whitespace-only text and comments are ignorable between elements.
pub fn is_insignificant(node: &Handle) -> bool {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().trim().is_empty(),
        NodeData::Comment { .. } | NodeData::ProcessingInstruction { .. } => true,
        _ => false,
    }
}

pub fn children(node: &Handle) -> Vec<Handle> {
    node.children.borrow().clone()
}

/// Descendant elements (excluding `root`) matching `predicate`, in document order.
pub fn find_all(root: &Handle, predicate: &dyn Fn(&Handle) -> bool) -> Vec<Handle> {
    let mut found = Vec::new();
    collect(root, predicate, &mut found);
    found
}

fn collect(node: &Handle, predicate: &dyn Fn(&Handle) -> bool, found: &mut Vec<Handle>) {
    for child in node.children.borrow().iter() {
        if is_element(child) && predicate(child) {
            found.push(child.clone());
        }
        collect(child, predicate, found);
    }
}

/// First descendant element with the given tag.
pub fn find_by_tag(root: &Handle, tag: &str) -> Option<Handle> {
    find_all(root, &|n: &Handle| tag_name(n).as_deref() == Some(tag))
        .into_iter()
        .next()
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// All attributes as (name, value) pairs, in source order.
pub fn attributes(node: &Handle) -> Vec<(String, String)> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn get_attribute(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

pub fn set_attribute(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        match attrs.iter_mut().find(|attr| &*attr.name.local == name) {
            Some(attr) => attr.value = StrTendril::from(value),
            None => attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                value: StrTendril::from(value),
            }),
        }
    }
}

pub fn remove_attribute(node: &Handle, name: &str) -> Option<String> {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        let index = attrs.iter().position(|attr| &*attr.name.local == name)?;
        return Some(attrs.remove(index).value.to_string());
    }
    None
}

/// Add class tokens, keeping existing classes and skipping duplicates.
pub fn add_classes(node: &Handle, tokens: &[String]) {
    let existing = get_attribute(node, "class").unwrap_or_default();
    let mut classes: Vec<&str> = existing.split_whitespace().collect();
    for token in tokens {
        if !classes.contains(&token.as_str()) {
            classes.push(token);
        }
    }
    if !classes.is_empty() {
        set_attribute(node, "class", &classes.join(" "));
    }
}

/// Append inline style text after any existing style.
pub fn append_style(node: &Handle, style: &str, separator: &str) {
    let addition = style.trim();
    if addition.is_empty() {
        return;
    }
    let existing = get_attribute(node, "style").unwrap_or_default();
    let existing = existing.trim().trim_end_matches(';').trim_end();
    let merged = if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{}{}{}", existing, separator, addition)
    };
    set_attribute(node, "style", &merged);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL CHANGES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    node.parent.set(weak);
    parent
}

/// Remove a node from its parent. No-op for detached nodes.
pub fn detach(node: &Handle) {
    if let Some(weak) = node.parent.take() {
        if let Some(parent) = weak.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(child, node));
        }
    }
}

pub fn append_child(parent: &Handle, child: Handle) {
    detach(&child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// Insert `node` right before `reference`. Returns false when `reference`
/// has no parent.
pub fn insert_before(reference: &Handle, node: Handle) -> bool {
    let Some(parent) = parent(reference) else {
        return false;
    };
    detach(&node);
    let mut children = parent.children.borrow_mut();
    let index = children
        .iter()
        .position(|child| Rc::ptr_eq(child, reference))
        .unwrap_or(children.len());
    node.parent.set(Some(Rc::downgrade(&parent)));
    children.insert(index, node);
    true
}

/// Put `replacement` where `old` is and detach `old`.
pub fn replace_with(old: &Handle, replacement: Handle) -> bool {
    let inserted = insert_before(old, replacement);
    detach(old);
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn single(html: &str) -> Handle {
        let nodes = parse_fragment(html);
        assert_eq!(nodes.len(), 1, "expected one node in {html}");
        nodes.into_iter().next().unwrap()
    }

    #[test]
    fn test_expand_self_closing() {
        assert_eq!(expand_self_closing("<slot/>"), "<slot></slot>");
        assert_eq!(
            expand_self_closing(r#"<z-icon name="x" />"#),
            r#"<z-icon name="x"></z-icon>"#
        );
        assert_eq!(expand_self_closing("<br/>"), "<br/>");
    }

    #[test]
    fn test_parse_fragment_keeps_order_and_custom_tags() {
        let nodes = parse_fragment(r#"<z-card class="big">hi</z-card><p>x</p>"#);
        let tags: Vec<_> = nodes.iter().filter_map(tag_name).collect();
        assert_eq!(tags, vec!["z-card", "p"]);
        assert!(nodes.iter().all(|n| parent(n).is_none()));
    }

    #[test]
    fn test_directive_attributes_survive_parsing() {
        let button = single(r#"<button @click="inc" :title="t">{{n}}</button>"#);
        assert_eq!(get_attribute(&button, "@click").as_deref(), Some("inc"));
        assert_eq!(get_attribute(&button, ":title").as_deref(), Some("t"));
        assert_eq!(text(&children(&button)[0]).as_deref(), Some("{{n}}"));
    }

    #[test]
    fn test_self_closing_slot_does_not_swallow_siblings() {
        let root = single("<div><slot/><p>footer</p></div>");
        let slot = find_by_tag(&root, "slot").unwrap();
        assert!(children(&slot).is_empty());
        assert_eq!(children(&root).len(), 2);
    }

    #[test]
    fn test_parse_template_keeps_table_parts() {
        let nodes = parse_template("<tr><td>{{name}}</td></tr>");
        assert_eq!(nodes.len(), 1);
        assert_eq!(tag_name(&nodes[0]).as_deref(), Some("tr"));
        assert_eq!(to_html(&nodes[0]), "<tr><td>{{name}}</td></tr>");

        let cells: Vec<_> = parse_template("<td>a</td><th>b</th>")
            .iter()
            .filter_map(tag_name)
            .collect();
        assert_eq!(cells, vec!["td", "th"]);
    }

    #[test]
    fn test_parse_template_keeps_custom_tags_and_slots() {
        let nodes = parse_template(r#"<div class="box"><slot/><z-icon /></div>"#);
        assert_eq!(nodes.len(), 1);
        assert!(find_by_tag(&nodes[0], "slot").is_some());
        assert!(find_by_tag(&nodes[0], "z-icon").is_some());
        assert!(parent(&nodes[0]).is_none());
    }

    #[test]
    fn test_class_merge_is_additive() {
        let div = single(r#"<div class="box big"></div>"#);
        add_classes(&div, &["big".to_string(), "wide".to_string()]);
        assert_eq!(get_attribute(&div, "class").as_deref(), Some("box big wide"));
    }

    #[test]
    fn test_style_merge_appends() {
        let div = single(r#"<div style="color: red;"></div>"#);
        append_style(&div, "margin: 0", "; ");
        assert_eq!(
            get_attribute(&div, "style").as_deref(),
            Some("color: red; margin: 0")
        );

        let bare = single("<div></div>");
        append_style(&bare, "margin: 0", "; ");
        assert_eq!(get_attribute(&bare, "style").as_deref(), Some("margin: 0"));
    }

    #[test]
    fn test_replace_and_serialize() {
        let container = create_element("div");
        for node in parse_fragment("<a>1</a><b>2</b>") {
            append_child(&container, node);
        }
        let a = find_by_tag(&container, "a").unwrap();
        let replacement = single("<i>x</i>");
        assert!(replace_with(&a, replacement));
        assert_eq!(inner_html(&container), "<i>x</i><b>2</b>");
        assert!(parent(&a).is_none());
    }

    #[test]
    fn test_attribute_round_trip() {
        let div = create_element("div");
        set_attribute(&div, "title", "a");
        set_attribute(&div, "title", "b");
        assert_eq!(attributes(&div), vec![("title".to_string(), "b".to_string())]);
        assert_eq!(remove_attribute(&div, "title").as_deref(), Some("b"));
        assert_eq!(to_html(&div), "<div></div>");
    }
}
