//! Schema compilation: node types, mark types, attributes, exclusion graph.
//!
//! A [`Schema`] is assembled once from a [`SchemaSpec`] and never changes.
//! Node and mark specs are kept in insertion order; mark rank is assignment
//! order. Content expressions compile into a DFA arena owned by the schema
//! (equal expressions share one compiled machine), and wrapping searches are
//! cached per `(state, type)` pair.
//!
//! The `NodeType ↔ Schema` cycle is broken with handles: [`NodeTypeId`] and
//! [`MarkTypeId`] index into vectors owned by the schema, and values that
//! need type information carry a cheap-clone `Schema` handle.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use thiserror::Error;

use crate::content::{self, ContentError, ContentMatch, MatchState};
use crate::fragment::Fragment;
use crate::from_dom::ParseRule;
use crate::mark::{Mark, MarkSet};
use crate::node::Node;
use crate::to_dom::OutputSpec;

pub type JsonMap = serde_json::Map<String, Value>;

pub type NodeToDom = Arc<dyn Fn(&Node) -> OutputSpec + Send + Sync>;
pub type MarkToDom = Arc<dyn Fn(&Mark, bool) -> OutputSpec + Send + Sync>;
pub type LeafText = Arc<dyn Fn(&Node) -> String + Send + Sync>;
pub type ComputeAttr = Arc<dyn Fn() -> Value + Send + Sync>;

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("unknown mark type: {0}")]
    UnknownMarkType(String),
    #[error("duplicate type name: {0}")]
    DuplicateName(String),
    #[error("{0} can not be both a node and a mark")]
    NodeMarkNameConflict(String),
    #[error("every schema needs a text type")]
    MissingTextType,
    #[error("the text node type should not have attributes")]
    TextTypeWithAttrs,
    #[error("schema is missing its top node type: {0}")]
    MissingTopNode(String),
    #[error("no value supplied for attribute {attr} of {owner}")]
    MissingAttr { owner: String, attr: String },
    #[error("unsupported attribute {attr} for {owner}")]
    UnknownAttr { owner: String, attr: String },
    #[error("invalid content for node type {0}")]
    InvalidContent(String),
    #[error("node type {0} does not allow mark {1}")]
    DisallowedMark(String, String),
    #[error("text nodes must be created through Schema::text")]
    TextViaCreate,
    #[error("empty text nodes are not allowed")]
    EmptyTextNode,
    #[error("invalid document JSON: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Content(#[from] ContentError),
}

// ── Handles ───────────────────────────────────────────────────────────────

/// Index of a node type in its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTypeId(pub(crate) u32);

/// Index of a mark type in its schema. Doubles as the mark's rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkTypeId(pub(crate) u32);

// ── Attrs ─────────────────────────────────────────────────────────────────

/// An immutable attribute mapping with structural equality.
///
/// Values are JSON primitives (or nested JSON); the map is shared by
/// reference between nodes that carry the same attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs(Arc<JsonMap>);

impl Attrs {
    pub fn new(map: JsonMap) -> Attrs {
        Attrs(Arc::new(map))
    }

    pub fn empty() -> Attrs {
        static EMPTY: OnceLock<Attrs> = OnceLock::new();
        EMPTY.get_or_init(Attrs::default).clone()
    }

    /// Build from `(name, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Attrs
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut map = JsonMap::new();
        for (k, v) in pairs {
            map.insert(k.into(), v);
        }
        Attrs::new(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The attribute map as a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object((*self.0).clone())
    }
}

// ── Specs ─────────────────────────────────────────────────────────────────

/// Whitespace handling for a node's parsed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whitespace {
    #[default]
    Normal,
    Pre,
}

/// Declares one attribute on a node or mark type.
///
/// Required iff neither `default` nor `compute` is present.
#[derive(Clone, Default)]
pub struct AttributeSpec {
    pub default: Option<Value>,
    pub compute: Option<ComputeAttr>,
}

impl AttributeSpec {
    pub fn with_default(value: Value) -> AttributeSpec {
        AttributeSpec {
            default: Some(value),
            compute: None,
        }
    }

    pub fn required() -> AttributeSpec {
        AttributeSpec::default()
    }
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("default", &self.default)
            .field("compute", &self.compute.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Declarative description of a node type, before compilation.
#[derive(Clone, Default)]
pub struct NodeSpec {
    /// Content expression over child node types.
    pub content: Option<String>,
    /// Allowed marks expression: `"_"` for all, `""` for none, or a
    /// space-separated list of mark names and groups. Absent means "all" for
    /// inline content and "none" otherwise.
    pub marks: Option<String>,
    /// Space-separated group names this type belongs to.
    pub group: Option<String>,
    pub inline: bool,
    pub atom: bool,
    pub attrs: Vec<(String, AttributeSpec)>,
    pub selectable: Option<bool>,
    pub draggable: bool,
    pub code: bool,
    pub whitespace: Option<Whitespace>,
    pub defining: bool,
    pub isolating: bool,
    pub to_dom: Option<NodeToDom>,
    pub parse_dom: Vec<ParseRule>,
    /// Custom text projection for leaf nodes in `text_between`.
    pub leaf_text: Option<LeafText>,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("content", &self.content)
            .field("group", &self.group)
            .field("inline", &self.inline)
            .field("atom", &self.atom)
            .finish_non_exhaustive()
    }
}

/// Declarative description of a mark type, before compilation.
#[derive(Clone, Default)]
pub struct MarkSpec {
    pub attrs: Vec<(String, AttributeSpec)>,
    /// Whether the mark extends to content inserted at its end boundary.
    /// Defaults to true.
    pub inclusive: Option<bool>,
    /// Excluded marks expression: `"_"` for all, `""` for nothing, or a
    /// space-separated list of mark names and groups. Absent means the mark
    /// excludes only its own type.
    pub excludes: Option<String>,
    pub group: Option<String>,
    /// Whether a single output element may span multiple adjacent nodes.
    /// Defaults to true.
    pub spanning: Option<bool>,
    pub to_dom: Option<MarkToDom>,
    pub parse_dom: Vec<ParseRule>,
}

impl fmt::Debug for MarkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkSpec")
            .field("inclusive", &self.inclusive)
            .field("excludes", &self.excludes)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// The input to schema compilation. Entry order is significant: node order
/// breaks parse-rule priority ties and mark order assigns ranks.
#[derive(Clone, Default)]
pub struct SchemaSpec {
    pub nodes: Vec<(String, NodeSpec)>,
    pub marks: Vec<(String, MarkSpec)>,
    /// Name of the document's top node type. Defaults to `"doc"`.
    pub top_node: Option<String>,
}

// ── Compiled attribute ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Attribute {
    default: Option<Value>,
    compute: Option<ComputeAttr>,
}

impl Attribute {
    fn compile(spec: &AttributeSpec) -> Attribute {
        Attribute {
            default: spec.default.clone(),
            compute: spec.compute.clone(),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.compute.is_some()
    }

    pub fn is_required(&self) -> bool {
        !self.has_default()
    }

    fn default_value(&self) -> Option<Value> {
        if let Some(v) = &self.default {
            Some(v.clone())
        } else {
            self.compute.as_ref().map(|f| f())
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("default", &self.default)
            .field("required", &self.is_required())
            .finish()
    }
}

fn compute_attrs(
    owner: &str,
    attrs: &[(String, Attribute)],
    given: Option<&Attrs>,
) -> Result<Attrs, SchemaError> {
    if let Some(given) = given {
        for (name, _) in given.iter() {
            if !attrs.iter().any(|(n, _)| n == name) {
                return Err(SchemaError::UnknownAttr {
                    owner: owner.to_string(),
                    attr: name.clone(),
                });
            }
        }
    }
    let mut built = JsonMap::new();
    for (name, attr) in attrs {
        let value = match given.and_then(|g| g.get(name)) {
            Some(v) => v.clone(),
            None => attr.default_value().ok_or_else(|| SchemaError::MissingAttr {
                owner: owner.to_string(),
                attr: name.clone(),
            })?,
        };
        built.insert(name.clone(), value);
    }
    Ok(Attrs::new(built))
}

// ── NodeType ──────────────────────────────────────────────────────────────

/// A compiled node type. Borrowed from its [`Schema`]; methods that build
/// nodes or consult the content DFA take the schema as a parameter.
pub struct NodeType {
    id: NodeTypeId,
    name: String,
    groups: Vec<String>,
    attrs: Vec<(String, Attribute)>,
    default_attrs: Option<Attrs>,
    spec: NodeSpec,
    is_block: bool,
    is_text: bool,
    // Filled in by the later compile phases.
    pub(crate) content_match: content::MatchId,
    pub(crate) inline_content: bool,
    /// `None` means all marks are allowed.
    pub(crate) mark_set: Option<Vec<MarkTypeId>>,
}

impl NodeType {
    pub fn id(&self) -> NodeTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn is_in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn is_text(&self) -> bool {
        self.is_text
    }

    pub fn is_block(&self) -> bool {
        self.is_block
    }

    pub fn is_inline(&self) -> bool {
        !self.is_block
    }

    /// True when this type's content expression admits no children at all.
    pub fn is_leaf(&self) -> bool {
        self.content_match == content::MatchId::EMPTY
    }

    pub fn is_atom(&self) -> bool {
        self.is_leaf() || self.spec.atom
    }

    /// A block type whose content is inline.
    pub fn is_textblock(&self) -> bool {
        self.is_block && self.inline_content
    }

    pub fn inline_content(&self) -> bool {
        self.inline_content
    }

    pub fn whitespace(&self) -> Whitespace {
        self.spec.whitespace.unwrap_or(if self.spec.code {
            Whitespace::Pre
        } else {
            Whitespace::Normal
        })
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attrs.iter().map(|(n, a)| (n.as_str(), a))
    }

    pub fn has_required_attrs(&self) -> bool {
        self.attrs.iter().any(|(_, a)| a.is_required())
    }

    /// The attribute object used when this type is created without attrs.
    /// `None` when an attribute is required.
    pub fn default_attrs(&self) -> Option<&Attrs> {
        self.default_attrs.as_ref()
    }

    /// Fill in defaults and validate a given attribute object.
    pub fn compute_attrs(&self, given: Option<&Attrs>) -> Result<Attrs, SchemaError> {
        if let (Some(defaults), None) = (&self.default_attrs, given) {
            return Ok(defaults.clone());
        }
        compute_attrs(&self.name, &self.attrs, given)
    }

    /// The start state of this type's content expression.
    pub fn content_match(&self, schema: &Schema) -> ContentMatch {
        ContentMatch::new(schema.clone(), self.content_match)
    }

    /// Whether this type's content expression shares at least one admissible
    /// child type with `other`'s.
    pub fn compatible_content(&self, schema: &Schema, other: &NodeType) -> bool {
        self.id == other.id
            || self
                .content_match(schema)
                .compatible(&other.content_match(schema))
    }

    /// Create a node of this type without validating content.
    pub fn create(
        &self,
        schema: &Schema,
        attrs: Option<&Attrs>,
        content: Fragment,
        marks: MarkSet,
    ) -> Result<Node, SchemaError> {
        if self.is_text {
            return Err(SchemaError::TextViaCreate);
        }
        let attrs = self.compute_attrs(attrs)?;
        Ok(Node::new(schema.clone(), self.id, attrs, content, marks))
    }

    /// Create a node, validating that the content matches this type's
    /// expression and that all marks are allowed.
    pub fn create_checked(
        &self,
        schema: &Schema,
        attrs: Option<&Attrs>,
        content: Fragment,
        marks: MarkSet,
    ) -> Result<Node, SchemaError> {
        self.check_content(schema, &content)?;
        for mark in marks.iter() {
            if !self.allows_mark_type(mark.type_id()) {
                return Err(SchemaError::DisallowedMark(
                    self.name.clone(),
                    schema.mark_type(mark.type_id()).name().to_string(),
                ));
            }
        }
        self.create(schema, attrs, content, marks)
    }

    /// Create a node of this type, synthesizing required filler around the
    /// given content to make it valid. Returns `None` when no filler exists.
    pub fn create_and_fill(
        &self,
        schema: &Schema,
        attrs: Option<&Attrs>,
        content: Option<Fragment>,
        marks: MarkSet,
    ) -> Option<Node> {
        if self.is_text {
            return None;
        }
        let attrs = self.compute_attrs(attrs).ok()?;
        let mut content = content.unwrap_or_else(Fragment::empty);
        let start = self.content_match(schema);
        if content.size() > 0 {
            let before = start.fill_before(&content, false, 0)?;
            content = before.append(&content);
        }
        let matched = start.match_fragment(&content)?;
        let after = matched.fill_before(&Fragment::empty(), true, 0)?;
        content = content.append(&after);
        Some(Node::new(schema.clone(), self.id, attrs, content, marks))
    }

    /// Whether `content` fully matches this type's content expression and
    /// carries only allowed marks.
    pub fn valid_content(&self, schema: &Schema, content: &Fragment) -> bool {
        let result = self
            .content_match(schema)
            .match_fragment(content)
            .map(|m| m.valid_end())
            .unwrap_or(false);
        if !result {
            return false;
        }
        for child in content.iter() {
            for mark in child.marks().iter() {
                if !self.allows_mark_type(mark.type_id()) {
                    return false;
                }
            }
        }
        true
    }

    pub fn check_content(&self, schema: &Schema, content: &Fragment) -> Result<(), SchemaError> {
        if self.valid_content(schema, content) {
            Ok(())
        } else {
            Err(SchemaError::InvalidContent(self.name.clone()))
        }
    }

    pub fn allows_mark_type(&self, mark: MarkTypeId) -> bool {
        match &self.mark_set {
            None => true,
            Some(set) => set.contains(&mark),
        }
    }

    pub fn allows_marks(&self, marks: &MarkSet) -> bool {
        marks.iter().all(|m| self.allows_mark_type(m.type_id()))
    }

    /// Remove disallowed marks from the given set.
    pub fn allowed_marks(&self, marks: &MarkSet) -> MarkSet {
        match &self.mark_set {
            None => marks.clone(),
            Some(_) => {
                let kept: Vec<Mark> = marks
                    .iter()
                    .filter(|m| self.allows_mark_type(Mark::type_id(m)))
                    .cloned()
                    .collect();
                if kept.len() == marks.len() {
                    marks.clone()
                } else {
                    MarkSet::from_vec(kept)
                }
            }
        }
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeType({})", self.name)
    }
}

// ── MarkType ──────────────────────────────────────────────────────────────

/// A compiled mark type. Rank is assignment order in the schema spec.
pub struct MarkType {
    id: MarkTypeId,
    name: String,
    groups: Vec<String>,
    attrs: Vec<(String, Attribute)>,
    default_attrs: Option<Attrs>,
    spec: MarkSpec,
    /// Resolved exclusion set; always includes the rules from `excludes`
    /// (default: the mark's own type).
    pub(crate) excluded: Vec<MarkTypeId>,
}

impl MarkType {
    pub fn id(&self) -> MarkTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> u32 {
        self.id.0
    }

    pub fn spec(&self) -> &MarkSpec {
        &self.spec
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn inclusive(&self) -> bool {
        self.spec.inclusive.unwrap_or(true)
    }

    pub fn spanning(&self) -> bool {
        self.spec.spanning.unwrap_or(true)
    }

    pub fn has_required_attrs(&self) -> bool {
        self.attrs.iter().any(|(_, a)| a.is_required())
    }

    pub fn compute_attrs(&self, given: Option<&Attrs>) -> Result<Attrs, SchemaError> {
        if let (Some(defaults), None) = (&self.default_attrs, given) {
            return Ok(defaults.clone());
        }
        compute_attrs(&self.name, &self.attrs, given)
    }

    pub fn create(&self, schema: &Schema, attrs: Option<&Attrs>) -> Result<Mark, SchemaError> {
        Ok(Mark::new(schema.clone(), self.id, self.compute_attrs(attrs)?))
    }

    /// Whether adding a mark of this type removes marks of `other`.
    pub fn excludes(&self, other: MarkTypeId) -> bool {
        self.excluded.contains(&other)
    }

    /// Whether the set contains a mark of this type.
    pub fn is_in_set<'a>(&self, set: &'a MarkSet) -> Option<&'a Mark> {
        set.iter().find(|m| Mark::type_id(m) == self.id)
    }

    /// Remove all marks of this type from the set.
    pub fn remove_from_set(&self, set: &MarkSet) -> MarkSet {
        let kept: Vec<Mark> = set
            .iter()
            .filter(|m| Mark::type_id(m) != self.id)
            .cloned()
            .collect();
        if kept.len() == set.len() {
            set.clone()
        } else {
            MarkSet::from_vec(kept)
        }
    }
}

impl fmt::Debug for MarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MarkType({})", self.name)
    }
}

// ── Schema ────────────────────────────────────────────────────────────────

struct SchemaInner {
    spec: SchemaSpec,
    node_types: Vec<NodeType>,
    mark_types: Vec<MarkType>,
    node_names: HashMap<String, NodeTypeId>,
    mark_names: HashMap<String, MarkTypeId>,
    top: NodeTypeId,
    text: NodeTypeId,
    states: Vec<MatchState>,
    wrap_cache: Mutex<HashMap<(content::MatchId, NodeTypeId), Option<Vec<NodeTypeId>>>>,
    cached: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

/// A compiled document schema. Cheap to clone; clones share one compiled
/// representation and its caches.
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

impl Schema {
    /// Compile a schema spec. Fails on unknown referenced types, node/mark
    /// name conflicts, a missing `text` or top node type, a text type with
    /// attributes, or an invalid content expression.
    pub fn new(spec: SchemaSpec) -> Result<Schema, SchemaError> {
        let mut node_types = Vec::with_capacity(spec.nodes.len());
        let mut node_names = HashMap::new();
        for (i, (name, ns)) in spec.nodes.iter().enumerate() {
            if node_names.contains_key(name) {
                return Err(SchemaError::DuplicateName(name.clone()));
            }
            let attrs: Vec<(String, Attribute)> = ns
                .attrs
                .iter()
                .map(|(n, a)| (n.clone(), Attribute::compile(a)))
                .collect();
            let default_attrs = if attrs.iter().all(|(_, a)| a.default.is_some()) {
                let mut map = JsonMap::new();
                for (n, a) in &attrs {
                    map.insert(n.clone(), a.default.clone().unwrap_or(Value::Null));
                }
                Some(Attrs::new(map))
            } else {
                None
            };
            let is_text = name == "text";
            if is_text && !attrs.is_empty() {
                return Err(SchemaError::TextTypeWithAttrs);
            }
            let id = NodeTypeId(i as u32);
            node_names.insert(name.clone(), id);
            node_types.push(NodeType {
                id,
                name: name.clone(),
                groups: ns
                    .group
                    .as_deref()
                    .unwrap_or("")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                attrs,
                default_attrs,
                spec: ns.clone(),
                is_block: !(ns.inline || is_text),
                is_text,
                content_match: content::MatchId::EMPTY,
                inline_content: false,
                mark_set: None,
            });
        }

        let mut mark_types = Vec::with_capacity(spec.marks.len());
        let mut mark_names = HashMap::new();
        for (i, (name, ms)) in spec.marks.iter().enumerate() {
            if node_names.contains_key(name) {
                return Err(SchemaError::NodeMarkNameConflict(name.clone()));
            }
            if mark_names.contains_key(name) {
                return Err(SchemaError::DuplicateName(name.clone()));
            }
            let attrs: Vec<(String, Attribute)> = ms
                .attrs
                .iter()
                .map(|(n, a)| (n.clone(), Attribute::compile(a)))
                .collect();
            let default_attrs = if attrs.iter().all(|(_, a)| a.default.is_some()) {
                let mut map = JsonMap::new();
                for (n, a) in &attrs {
                    map.insert(n.clone(), a.default.clone().unwrap_or(Value::Null));
                }
                Some(Attrs::new(map))
            } else {
                None
            };
            let id = MarkTypeId(i as u32);
            mark_names.insert(name.clone(), id);
            mark_types.push(MarkType {
                id,
                name: name.clone(),
                groups: ms
                    .group
                    .as_deref()
                    .unwrap_or("")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                attrs,
                default_attrs,
                spec: ms.clone(),
                excluded: Vec::new(),
            });
        }

        let text = *node_names
            .get("text")
            .ok_or(SchemaError::MissingTextType)?;
        let top_name = spec.top_node.clone().unwrap_or_else(|| "doc".to_string());
        let top = *node_names
            .get(&top_name)
            .ok_or(SchemaError::MissingTopNode(top_name))?;

        // Compile content expressions into a shared DFA arena. State 0 is
        // the empty expression.
        let mut states = vec![MatchState::accepting()];
        let mut expr_cache: HashMap<String, content::MatchId> = HashMap::new();
        let mut compiled = Vec::with_capacity(node_types.len());
        for nt in &node_types {
            let expr = nt.spec.content.clone().unwrap_or_default();
            let mid = if expr.trim().is_empty() {
                content::MatchId::EMPTY
            } else if let Some(&mid) = expr_cache.get(&expr) {
                mid
            } else {
                let mid = content::compile_expr(&expr, &node_types, &node_names, &mut states)?;
                expr_cache.insert(expr, mid);
                mid
            };
            compiled.push(mid);
        }
        let inline_content: Vec<bool> = compiled
            .iter()
            .map(|&mid| {
                states[mid.index()]
                    .next
                    .first()
                    .map(|&(t, _)| node_types[t.0 as usize].is_inline())
                    .unwrap_or(false)
            })
            .collect();
        for (i, nt) in node_types.iter_mut().enumerate() {
            nt.content_match = compiled[i];
            nt.inline_content = inline_content[i];
        }

        // Resolve allowed-marks expressions.
        let mark_sets: Vec<Option<Vec<MarkTypeId>>> = node_types
            .iter()
            .map(|nt| match nt.spec.marks.as_deref() {
                Some("_") => Ok(None),
                Some("") => Ok(Some(Vec::new())),
                Some(expr) => gather_marks(&mark_types, &mark_names, expr).map(Some),
                None => {
                    if nt.inline_content {
                        Ok(None)
                    } else {
                        Ok(Some(Vec::new()))
                    }
                }
            })
            .collect::<Result<_, _>>()?;
        for (i, nt) in node_types.iter_mut().enumerate() {
            nt.mark_set = mark_sets[i].clone();
        }

        // Resolve mark exclusion sets (`_` means all, absent means self).
        let all_marks: Vec<MarkTypeId> = mark_types.iter().map(|m| m.id).collect();
        let excluded: Vec<Vec<MarkTypeId>> = mark_types
            .iter()
            .map(|mt| match mt.spec.excludes.as_deref() {
                None => Ok(vec![mt.id]),
                Some("") => Ok(Vec::new()),
                Some("_") => Ok(all_marks.clone()),
                Some(expr) => gather_marks(&mark_types, &mark_names, expr),
            })
            .collect::<Result<_, _>>()?;
        for (i, mt) in mark_types.iter_mut().enumerate() {
            mt.excluded = excluded[i].clone();
        }

        Ok(Schema {
            inner: Arc::new(SchemaInner {
                spec,
                node_types,
                mark_types,
                node_names,
                mark_names,
                top,
                text,
                states,
                wrap_cache: Mutex::new(HashMap::new()),
                cached: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn spec(&self) -> &SchemaSpec {
        &self.inner.spec
    }

    /// Whether two handles refer to the same compiled schema.
    pub fn same_as(&self, other: &Schema) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn node_type(&self, id: NodeTypeId) -> &NodeType {
        &self.inner.node_types[id.0 as usize]
    }

    pub fn mark_type(&self, id: MarkTypeId) -> &MarkType {
        &self.inner.mark_types[id.0 as usize]
    }

    pub fn node_types(&self) -> impl Iterator<Item = &NodeType> {
        self.inner.node_types.iter()
    }

    pub fn mark_types(&self) -> impl Iterator<Item = &MarkType> {
        self.inner.mark_types.iter()
    }

    pub fn get_node_type(&self, name: &str) -> Option<&NodeType> {
        self.inner
            .node_names
            .get(name)
            .map(|&id| self.node_type(id))
    }

    pub fn get_mark_type(&self, name: &str) -> Option<&MarkType> {
        self.inner
            .mark_names
            .get(name)
            .map(|&id| self.mark_type(id))
    }

    pub fn top_node_type(&self) -> &NodeType {
        self.node_type(self.inner.top)
    }

    pub fn text_type(&self) -> &NodeType {
        self.node_type(self.inner.text)
    }

    pub(crate) fn state(&self, id: content::MatchId) -> &MatchState {
        &self.inner.states[id.index()]
    }

    /// Build a node of the named type, validating attributes and content.
    pub fn node(
        &self,
        name: &str,
        attrs: Option<&Attrs>,
        content: impl Into<Fragment>,
        marks: MarkSet,
    ) -> Result<Node, SchemaError> {
        let nt = self
            .get_node_type(name)
            .ok_or_else(|| SchemaError::UnknownNodeType(name.to_string()))?;
        nt.create_checked(self, attrs, content.into(), marks)
    }

    /// Build a text node. Empty text is rejected.
    pub fn text(&self, text: &str) -> Result<Node, SchemaError> {
        self.text_with_marks(text, MarkSet::empty())
    }

    pub fn text_with_marks(&self, text: &str, marks: MarkSet) -> Result<Node, SchemaError> {
        if text.is_empty() {
            return Err(SchemaError::EmptyTextNode);
        }
        Ok(Node::new_text(
            self.clone(),
            self.inner.text,
            Attrs::empty(),
            text.to_string(),
            marks,
        ))
    }

    /// Build a mark of the named type.
    pub fn mark(&self, name: &str, attrs: Option<&Attrs>) -> Result<Mark, SchemaError> {
        let mt = self
            .get_mark_type(name)
            .ok_or_else(|| SchemaError::UnknownMarkType(name.to_string()))?;
        mt.create(self, attrs)
    }

    pub fn node_from_json(&self, value: &Value) -> Result<Node, SchemaError> {
        Node::from_json(self, value)
    }

    pub fn mark_from_json(&self, value: &Value) -> Result<Mark, SchemaError> {
        Mark::from_json(self, value)
    }

    pub(crate) fn wrap_cache_get(
        &self,
        key: (content::MatchId, NodeTypeId),
    ) -> Option<Option<Vec<NodeTypeId>>> {
        self.inner
            .wrap_cache
            .lock()
            .ok()
            .and_then(|c| c.get(&key).cloned())
    }

    pub(crate) fn wrap_cache_set(
        &self,
        key: (content::MatchId, NodeTypeId),
        value: Option<Vec<NodeTypeId>>,
    ) {
        if let Ok(mut c) = self.inner.wrap_cache.lock() {
            c.insert(key, value);
        }
    }

    /// Untyped storage for downstream modules (parsers, serializers, and the
    /// like cache their schema-derived tables here).
    pub fn cached_get(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.cached.lock().ok().and_then(|c| c.get(key).cloned())
    }

    pub fn cached_set(&self, key: &str, value: Arc<dyn Any + Send + Sync>) {
        if let Ok(mut c) = self.inner.cached.lock() {
            c.insert(key.to_string(), value);
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.inner.node_types.iter().map(|t| t.name.as_str()).collect();
        write!(f, "Schema({})", names.join(", "))
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Schema) -> bool {
        self.same_as(other)
    }
}

/// Resolve a space-separated list of mark names and groups.
fn gather_marks(
    mark_types: &[MarkType],
    mark_names: &HashMap<String, MarkTypeId>,
    expr: &str,
) -> Result<Vec<MarkTypeId>, SchemaError> {
    let mut found = Vec::new();
    for name in expr.split_whitespace() {
        if let Some(&id) = mark_names.get(name) {
            if !found.contains(&id) {
                found.push(id);
            }
        } else {
            let members: Vec<MarkTypeId> = mark_types
                .iter()
                .filter(|mt| mt.groups.iter().any(|g| g == name))
                .map(|mt| mt.id)
                .collect();
            if members.is_empty() {
                return Err(SchemaError::UnknownMarkType(name.to_string()));
            }
            for id in members {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
    }
    Ok(found)
}
