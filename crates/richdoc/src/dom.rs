//! The DOM-shaped structured tree the parser consumes and the serializer
//! produces.
//!
//! This is a server-side tree: an element carries a lowercase tag name, an
//! optional namespace, insertion-ordered string attributes, and children.
//! Attribute order is preserved end to end. A compact HTML rendering with
//! text and attribute escaping is included for display and tests.
//!
//! Selector matching covers the subset parse rules use: a tag name or `*`,
//! `.class`, `[attr]`, `[attr=value]`, and comma-separated alternatives.

use std::fmt;

// ── Tree ──────────────────────────────────────────────────────────────────

/// A node in the structured tree: a text leaf or an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomNode {
    Text(String),
    Element(DomElement),
}

impl DomNode {
    pub fn text(value: impl Into<String>) -> DomNode {
        DomNode::Text(value.into())
    }

    pub fn as_element(&self) -> Option<&DomElement> {
        match self {
            DomNode::Element(el) => Some(el),
            DomNode::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DomNode::Text(s) => Some(s),
            DomNode::Element(_) => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, DomNode::Element(_))
    }

    /// Render to a compact HTML string.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            DomNode::Text(s) => out.push_str(&escape_text(s)),
            DomNode::Element(el) => el.write_html(out),
        }
    }
}

impl From<DomElement> for DomNode {
    fn from(el: DomElement) -> DomNode {
        DomNode::Element(el)
    }
}

/// An element: tag, optional namespace, ordered attributes, children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomElement {
    name: String,
    namespace: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<DomNode>,
}

impl DomElement {
    pub fn new(name: impl Into<String>) -> DomElement {
        DomElement {
            name: name.into().to_ascii_lowercase(),
            namespace: None,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> DomElement {
        let mut el = DomElement::new(name);
        el.namespace = Some(namespace.into());
        el
    }

    /// Lowercase tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Set an attribute, replacing an existing one of the same name.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> DomElement {
        self.set_attr(name, value);
        self
    }

    /// The parsed `style` attribute as `(property, value)` pairs.
    pub fn styles(&self) -> Vec<(String, String)> {
        let style = match self.attr("style") {
            Some(s) => s,
            None => return Vec::new(),
        };
        style
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim();
                if prop.is_empty() {
                    return None;
                }
                Some((prop.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    /// Append a declaration to the `style` attribute.
    pub fn set_style(&mut self, prop: &str, value: &str) {
        let decl = format!("{prop}: {value}");
        match self.attr("style") {
            Some(existing) if !existing.is_empty() => {
                let joined = format!("{existing}; {decl}");
                self.set_attr("style", joined);
            }
            _ => self.set_attr("style", decl),
        }
    }

    pub fn children(&self) -> &[DomNode] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<DomNode> {
        &mut self.children
    }

    pub fn append(&mut self, child: impl Into<DomNode>) {
        self.children.push(child.into());
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: impl Into<DomNode>) -> DomElement {
        self.append(child);
        self
    }

    pub fn with_children(mut self, children: Vec<DomNode>) -> DomElement {
        self.children.extend(children);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> DomElement {
        self.with_child(DomNode::text(text))
    }

    /// Whether this element's subtree contains `node` (structurally).
    pub fn contains(&self, node: &DomNode) -> bool {
        self.children.iter().any(|child| {
            child == node
                || child
                    .as_element()
                    .map(|el| el.contains(node))
                    .unwrap_or(false)
        })
    }

    /// Whether the element matches a selector (comma-separated
    /// alternatives of `tag`/`*` with `.class`, `[attr]`, `[attr=value]`).
    pub fn matches(&self, selector: &str) -> bool {
        selector
            .split(',')
            .any(|alt| self.matches_simple(alt.trim()))
    }

    fn matches_simple(&self, selector: &str) -> bool {
        if selector.is_empty() {
            return false;
        }
        let mut rest = selector;
        // Leading tag name (or `*`).
        let tag_end = rest
            .find(|c| c == '.' || c == '[')
            .unwrap_or(rest.len());
        let tag = &rest[..tag_end];
        if !tag.is_empty() && tag != "*" && !tag.eq_ignore_ascii_case(&self.name) {
            return false;
        }
        rest = &rest[tag_end..];
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(after.len());
                let class = &after[..end];
                let has = self
                    .attr("class")
                    .map(|cs| cs.split_whitespace().any(|c| c == class))
                    .unwrap_or(false);
                if !has {
                    return false;
                }
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = match after.find(']') {
                    Some(e) => e,
                    None => return false,
                };
                let test = &after[..end];
                let ok = match test.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches('"');
                        self.attr(name.trim()) == Some(value)
                    }
                    None => self.attr(test.trim()).is_some(),
                };
                if !ok {
                    return false;
                }
                rest = &after[end + 1..];
            } else {
                return false;
            }
        }
        true
    }

    /// Depth-first search for the first descendant matching the selector.
    pub fn query_selector(&self, selector: &str) -> Option<&DomElement> {
        for child in &self.children {
            if let DomNode::Element(el) = child {
                if el.matches(selector) {
                    return Some(el);
                }
                if let Some(found) = el.query_selector(selector) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn write_html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        if self.children.is_empty() && is_void_tag(&self.name) {
            out.push('>');
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_html(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for DomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_html())
    }
}

impl fmt::Display for DomElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_html(&mut out);
        write!(f, "{out}")
    }
}

/// Render a list of sibling nodes.
pub fn fragment_to_html(nodes: &[DomNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        node.write_html(&mut out);
    }
    out
}

fn is_void_tag(name: &str) -> bool {
    matches!(
        name,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "source" | "track" | "wbr"
    )
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
