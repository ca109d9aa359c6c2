//! Serializing documents to the structured tree.
//!
//! Each node and mark type renders through an [`OutputSpec`] template. A
//! template may contain at most one content hole, the hole must be the sole
//! child of its parent element, and leaf and mark templates may not contain
//! one at all. A non-leaf node template without a hole is an error.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::dom::{DomElement, DomNode};
use crate::fragment::Fragment;
use crate::mark::Mark;
use crate::node::Node;
use crate::schema::{MarkToDom, NodeToDom, Schema};

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializeError {
    #[error("multiple content holes in output spec for {0}")]
    MultipleHoles(String),
    #[error("content hole in output spec for leaf or mark {0}")]
    HoleInLeaf(String),
    #[error("missing content hole in output spec for {0}")]
    MissingHole(String),
    #[error("content hole must be the sole child of its parent in spec for {0}")]
    HoleNotSoleChild(String),
    #[error("no serializer defined for {0}")]
    MissingSerializer(String),
}

// ── OutputSpec ────────────────────────────────────────────────────────────

/// A recursive output template: a text leaf, an element with children, the
/// single content hole, or an opaque pre-built tree inserted as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSpec {
    Text(String),
    Elem {
        name: String,
        namespace: Option<String>,
        attrs: Vec<(String, String)>,
        children: Vec<OutputSpec>,
    },
    Hole,
    Dom(DomNode),
}

impl OutputSpec {
    pub fn elem(name: &str, children: Vec<OutputSpec>) -> OutputSpec {
        OutputSpec::Elem {
            name: name.to_string(),
            namespace: None,
            attrs: Vec::new(),
            children,
        }
    }

    pub fn elem_with_attrs(
        name: &str,
        attrs: Vec<(String, String)>,
        children: Vec<OutputSpec>,
    ) -> OutputSpec {
        OutputSpec::Elem {
            name: name.to_string(),
            namespace: None,
            attrs,
            children,
        }
    }

    /// `<name>` with the content hole as its only child.
    pub fn container(name: &str) -> OutputSpec {
        OutputSpec::elem(name, vec![OutputSpec::Hole])
    }
}

/// Render a spec into a tree, returning the child-index path to the hole
/// element (when present). `owner` names the type for error messages.
fn render_spec(
    spec: &OutputSpec,
    owner: &str,
) -> Result<(DomNode, Option<Vec<usize>>), SerializeError> {
    match spec {
        OutputSpec::Text(text) => Ok((DomNode::text(text.clone()), None)),
        OutputSpec::Dom(node) => Ok((node.clone(), None)),
        OutputSpec::Hole => Err(SerializeError::HoleNotSoleChild(owner.to_string())),
        OutputSpec::Elem {
            name,
            namespace,
            attrs,
            children,
        } => {
            let mut el = match namespace {
                Some(ns) => DomElement::with_namespace(name.clone(), ns.clone()),
                None => DomElement::new(name.clone()),
            };
            for (n, v) in attrs {
                el.set_attr(n.clone(), v.clone());
            }
            let mut hole: Option<Vec<usize>> = None;
            for (i, child) in children.iter().enumerate() {
                if matches!(child, OutputSpec::Hole) {
                    if children.len() != 1 {
                        return Err(SerializeError::HoleNotSoleChild(owner.to_string()));
                    }
                    if hole.is_some() {
                        return Err(SerializeError::MultipleHoles(owner.to_string()));
                    }
                    hole = Some(Vec::new());
                    continue;
                }
                let (node, inner_hole) = render_spec(child, owner)?;
                if let Some(mut path) = inner_hole {
                    if hole.is_some() {
                        return Err(SerializeError::MultipleHoles(owner.to_string()));
                    }
                    path.insert(0, i);
                    hole = Some(path);
                }
                el.append(node);
            }
            Ok((DomNode::Element(el), hole))
        }
    }
}

/// Append a node into the element addressed by a child-index path.
fn push_into(el: &mut DomElement, path: &[usize], node: DomNode) {
    match path.split_first() {
        None => el.append(node),
        Some((&i, rest)) => {
            if let Some(DomNode::Element(inner)) = el.children_mut().get_mut(i) {
                push_into(inner, rest, node);
            }
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────

pub type OnContent = Arc<dyn Fn(&Node, &mut DomElement) + Send + Sync>;

/// Options threaded through a serialization pass.
#[derive(Clone, Default)]
pub struct SerializeOptions {
    /// Replaces the recursive content render: receives the node and the
    /// element its content hole resolved to.
    pub on_content: Option<OnContent>,
}

// ── DomSerializer ─────────────────────────────────────────────────────────

/// Walks nodes applying output templates, maintaining an active-mark stack
/// so adjacent nodes with shared marks render into one wrapper.
pub struct DomSerializer {
    nodes: HashMap<String, NodeToDom>,
    marks: HashMap<String, MarkToDom>,
}

impl DomSerializer {
    pub fn new(
        nodes: HashMap<String, NodeToDom>,
        marks: HashMap<String, MarkToDom>,
    ) -> DomSerializer {
        DomSerializer { nodes, marks }
    }

    /// Build (and cache on the schema) a serializer from the schema's
    /// `to_dom` specs. A text type without a template renders its string.
    pub fn from_schema(schema: &Schema) -> Arc<DomSerializer> {
        const CACHE_KEY: &str = "dom_serializer";
        if let Some(cached) = schema.cached_get(CACHE_KEY) {
            if let Ok(serializer) = cached.downcast::<DomSerializer>() {
                return serializer;
            }
        }
        let mut nodes: HashMap<String, NodeToDom> = HashMap::new();
        for nt in schema.node_types() {
            if let Some(to_dom) = nt.spec().to_dom.clone() {
                nodes.insert(nt.name().to_string(), to_dom);
            }
        }
        nodes
            .entry("text".to_string())
            .or_insert_with(|| {
                Arc::new(|node: &Node| {
                    OutputSpec::Text(node.text_str().unwrap_or("").to_string())
                })
            });
        let mut marks: HashMap<String, MarkToDom> = HashMap::new();
        for mt in schema.mark_types() {
            if let Some(to_dom) = mt.spec().to_dom.clone() {
                marks.insert(mt.name().to_string(), to_dom);
            }
        }
        let serializer = Arc::new(DomSerializer::new(nodes, marks));
        schema.cached_set(CACHE_KEY, serializer.clone());
        serializer
    }

    /// Serialize a fragment to a list of sibling tree nodes.
    pub fn serialize_fragment(
        &self,
        fragment: &Fragment,
        options: &SerializeOptions,
    ) -> Result<Vec<DomNode>, SerializeError> {
        let mut output: Vec<DomNode> = Vec::new();
        // Stack of open mark wrappers; children append into the innermost.
        let mut active: Vec<(Mark, DomElement)> = Vec::new();
        for node in fragment.iter() {
            let marks = node.marks();
            // Longest reusable prefix of the active stack, skipping marks
            // with no serializer (they are omitted without splitting the
            // rest).
            let mut keep = 0;
            let mut rendered = 0;
            while keep < active.len() && rendered < marks.len() {
                let next = &marks.as_slice()[rendered];
                if !self.marks.contains_key(next.mark_type().name()) {
                    rendered += 1;
                    continue;
                }
                if *next != active[keep].0 || !next.mark_type().spanning() {
                    break;
                }
                keep += 1;
                rendered += 1;
            }
            while active.len() > keep {
                if let Some((_, el)) = active.pop() {
                    emit(&mut active, &mut output, DomNode::Element(el));
                }
            }
            while rendered < marks.len() {
                let add = &marks.as_slice()[rendered];
                rendered += 1;
                if let Some(serializer) = self.marks.get(add.mark_type().name()) {
                    let spec = serializer(add, node.is_inline());
                    let (dom, hole) = render_spec(&spec, add.mark_type().name())?;
                    if hole.is_some() {
                        return Err(SerializeError::HoleInLeaf(
                            add.mark_type().name().to_string(),
                        ));
                    }
                    match dom {
                        DomNode::Element(el) => active.push((add.clone(), el)),
                        other => emit(&mut active, &mut output, other),
                    }
                }
            }
            let rendered_node = self.serialize_node_inner(node, options)?;
            emit(&mut active, &mut output, rendered_node);
        }
        while let Some((_, el)) = active.pop() {
            emit(&mut active, &mut output, DomNode::Element(el));
        }
        Ok(output)
    }

    /// Serialize a single node, including its marks.
    pub fn serialize_node(
        &self,
        node: &Node,
        options: &SerializeOptions,
    ) -> Result<DomNode, SerializeError> {
        let mut dom = self.serialize_node_inner(node, options)?;
        for mark in node.marks().iter().rev() {
            if let Some(serializer) = self.marks.get(mark.mark_type().name()) {
                let spec = serializer(mark, node.is_inline());
                let (wrapper, hole) = render_spec(&spec, mark.mark_type().name())?;
                if hole.is_some() {
                    return Err(SerializeError::HoleInLeaf(
                        mark.mark_type().name().to_string(),
                    ));
                }
                if let DomNode::Element(mut el) = wrapper {
                    el.append(dom);
                    dom = DomNode::Element(el);
                }
            }
        }
        Ok(dom)
    }

    fn serialize_node_inner(
        &self,
        node: &Node,
        options: &SerializeOptions,
    ) -> Result<DomNode, SerializeError> {
        let name = node.node_type().name();
        let to_dom = self
            .nodes
            .get(name)
            .ok_or_else(|| SerializeError::MissingSerializer(name.to_string()))?;
        let spec = to_dom(node);
        let (dom, hole) = render_spec(&spec, name)?;
        match hole {
            Some(path) => {
                if node.is_leaf() {
                    return Err(SerializeError::HoleInLeaf(name.to_string()));
                }
                let mut el = match dom {
                    DomNode::Element(el) => el,
                    other => return Ok(other),
                };
                if let Some(on_content) = &options.on_content {
                    let target = element_at_mut(&mut el, &path);
                    if let Some(target) = target {
                        on_content(node, target);
                    }
                } else {
                    for child in self.serialize_fragment(node.content(), options)? {
                        push_into(&mut el, &path, child);
                    }
                }
                Ok(DomNode::Element(el))
            }
            None => {
                if !node.is_leaf() && !node.is_text() {
                    return Err(SerializeError::MissingHole(name.to_string()));
                }
                Ok(dom)
            }
        }
    }
}

fn element_at_mut<'a>(el: &'a mut DomElement, path: &[usize]) -> Option<&'a mut DomElement> {
    match path.split_first() {
        None => Some(el),
        Some((&i, rest)) => match el.children_mut().get_mut(i) {
            Some(DomNode::Element(inner)) => element_at_mut(inner, rest),
            _ => None,
        },
    }
}

fn emit(active: &mut Vec<(Mark, DomElement)>, output: &mut Vec<DomNode>, node: DomNode) {
    if let Some((_, el)) = active.last_mut() {
        el.append(node);
    } else {
        output.push(node);
    }
}
