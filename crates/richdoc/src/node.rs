//! Document nodes.
//!
//! A node is an immutable record of a type, an attribute map, a fragment of
//! children, and a mark set. Text nodes additionally carry a non-empty
//! string and always have an empty fragment. Sizes: a text node counts its
//! characters, another leaf counts 1, and any other node counts
//! `content.size + 2` (one token for each side boundary).

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::content::ContentMatch;
use crate::fragment::Fragment;
use crate::mark::{Mark, MarkSet};
use crate::replace::{self, ReplaceError, Slice};
use crate::resolve::{PositionOutOfRange, ResolvedPos};
use crate::schema::{Attrs, JsonMap, NodeType, NodeTypeId, Schema, SchemaError};

struct NodeText {
    value: String,
    char_len: usize,
}

struct NodeInner {
    schema: Schema,
    type_id: NodeTypeId,
    attrs: Attrs,
    content: Fragment,
    marks: MarkSet,
    text: Option<NodeText>,
}

/// An immutable element of the document tree.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn new(
        schema: Schema,
        type_id: NodeTypeId,
        attrs: Attrs,
        content: Fragment,
        marks: MarkSet,
    ) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                schema,
                type_id,
                attrs,
                content,
                marks,
                text: None,
            }),
        }
    }

    pub(crate) fn new_text(
        schema: Schema,
        type_id: NodeTypeId,
        attrs: Attrs,
        text: String,
        marks: MarkSet,
    ) -> Node {
        let char_len = text.chars().count();
        Node {
            inner: Arc::new(NodeInner {
                schema,
                type_id,
                attrs,
                content: Fragment::empty(),
                marks,
                text: Some(NodeText {
                    value: text,
                    char_len,
                }),
            }),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn type_id(&self) -> NodeTypeId {
        self.inner.type_id
    }

    pub fn node_type(&self) -> &NodeType {
        self.inner.schema.node_type(self.inner.type_id)
    }

    pub fn attrs(&self) -> &Attrs {
        &self.inner.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.inner.attrs.get(name)
    }

    pub fn content(&self) -> &Fragment {
        &self.inner.content
    }

    pub fn marks(&self) -> &MarkSet {
        &self.inner.marks
    }

    /// The string of a text node.
    pub fn text_str(&self) -> Option<&str> {
        self.inner.text.as_ref().map(|t| t.value.as_str())
    }

    /// Character count of a text node; 0 for any other node.
    pub fn text_len(&self) -> usize {
        self.inner.text.as_ref().map(|t| t.char_len).unwrap_or(0)
    }

    /// Size of this node in the integer position system.
    pub fn node_size(&self) -> usize {
        if let Some(text) = &self.inner.text {
            text.char_len
        } else if self.is_leaf() {
            1
        } else {
            self.inner.content.size() + 2
        }
    }

    pub fn child_count(&self) -> usize {
        self.inner.content.child_count()
    }

    pub fn child(&self, index: usize) -> &Node {
        self.inner.content.child(index)
    }

    pub fn maybe_child(&self, index: usize) -> Option<&Node> {
        self.inner.content.maybe_child(index)
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.inner.content.first_child()
    }

    pub fn last_child(&self) -> Option<&Node> {
        self.inner.content.last_child()
    }

    pub fn is_text(&self) -> bool {
        self.inner.text.is_some()
    }

    pub fn is_block(&self) -> bool {
        self.node_type().is_block()
    }

    pub fn is_inline(&self) -> bool {
        self.node_type().is_inline()
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type().is_leaf()
    }

    pub fn is_atom(&self) -> bool {
        self.node_type().is_atom()
    }

    pub fn is_textblock(&self) -> bool {
        self.node_type().is_textblock()
    }

    pub fn inline_content(&self) -> bool {
        self.node_type().inline_content()
    }

    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        if let Some(text) = &self.inner.text {
            return text.value.clone();
        }
        if self.is_leaf() {
            if let Some(leaf_text) = &self.node_type().spec().leaf_text {
                return leaf_text(self);
            }
            return String::new();
        }
        self.inner
            .content
            .text_between(0, self.inner.content.size(), None, None)
    }

    pub fn text_between(
        &self,
        from: usize,
        to: usize,
        block_separator: Option<&str>,
        leaf_text: Option<&str>,
    ) -> String {
        if let Some(text) = &self.inner.text {
            return text
                .value
                .chars()
                .skip(from)
                .take(to.saturating_sub(from))
                .collect();
        }
        self.inner
            .content
            .text_between(from, to, block_separator, leaf_text)
    }

    /// Identity comparison (same shared allocation).
    pub fn same_as(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the other node has the same type, attributes, and marks.
    pub fn same_markup(&self, other: &Node) -> bool {
        self.has_markup(other.type_id(), Some(other.attrs()), Some(other.marks()))
    }

    pub fn has_markup(
        &self,
        type_id: NodeTypeId,
        attrs: Option<&Attrs>,
        marks: Option<&MarkSet>,
    ) -> bool {
        self.inner.type_id == type_id
            && attrs.map(|a| *a == self.inner.attrs).unwrap_or(true)
            && marks.map(|m| *m == self.inner.marks).unwrap_or(true)
    }

    /// A copy with different content but the same markup. Text nodes ignore
    /// the content (theirs is always empty).
    pub fn copy(&self, content: Fragment) -> Node {
        if self.is_text() {
            return self.clone();
        }
        if self.inner.content == content {
            return self.clone();
        }
        Node::new(
            self.inner.schema.clone(),
            self.inner.type_id,
            self.inner.attrs.clone(),
            content,
            self.inner.marks.clone(),
        )
    }

    /// A copy carrying the given mark set.
    pub fn mark(&self, marks: MarkSet) -> Node {
        if marks == self.inner.marks {
            return self.clone();
        }
        if let Some(text) = &self.inner.text {
            Node::new_text(
                self.inner.schema.clone(),
                self.inner.type_id,
                self.inner.attrs.clone(),
                text.value.clone(),
                marks,
            )
        } else {
            Node::new(
                self.inner.schema.clone(),
                self.inner.type_id,
                self.inner.attrs.clone(),
                self.inner.content.clone(),
                marks,
            )
        }
    }

    /// A text node with the same markup and different text.
    pub(crate) fn with_text(&self, text: String) -> Node {
        match &self.inner.text {
            Some(t) if t.value == text => self.clone(),
            _ => Node::new_text(
                self.inner.schema.clone(),
                self.inner.type_id,
                self.inner.attrs.clone(),
                text,
                self.inner.marks.clone(),
            ),
        }
    }

    /// The sub-node between two offsets into this node's content. For text
    /// nodes the offsets index characters.
    pub fn cut(&self, from: usize, to: Option<usize>) -> Node {
        if let Some(text) = &self.inner.text {
            let to = to.unwrap_or(text.char_len);
            if from == 0 && to == text.char_len {
                return self.clone();
            }
            let sliced: String = text
                .value
                .chars()
                .skip(from)
                .take(to.saturating_sub(from))
                .collect();
            return self.with_text(sliced);
        }
        let to = to.unwrap_or(self.inner.content.size());
        if from == 0 && to == self.inner.content.size() {
            return self.clone();
        }
        self.copy(self.inner.content.cut(from, to))
    }

    /// Cut out the open-ended slice between two positions.
    pub fn slice(
        &self,
        from: usize,
        to: usize,
        include_parents: bool,
    ) -> Result<Slice, PositionOutOfRange> {
        if from == to {
            return Ok(Slice::empty());
        }
        let rfrom = self.resolve(from)?;
        let rto = self.resolve(to)?;
        let depth = if include_parents {
            0
        } else {
            rfrom.shared_depth(to)
        };
        let start = rfrom.start(depth);
        let node = rfrom.node(depth);
        let content = node.content().cut(rfrom.pos() - start, rto.pos() - start);
        Ok(Slice::new(
            content,
            rfrom.depth() - depth,
            rto.depth() - depth,
        ))
    }

    /// Replace `[from, to)` with a slice, preserving schema validity.
    pub fn replace(&self, from: usize, to: usize, slice: &Slice) -> Result<Node, ReplaceError> {
        let rfrom = self.resolve(from)?;
        let rto = self.resolve(to)?;
        replace::replace(&rfrom, &rto, slice)
    }

    /// The leaf or atom node directly at `pos`, if any.
    pub fn node_at(&self, pos: usize) -> Option<Node> {
        let mut node = self.clone();
        let mut pos = pos;
        loop {
            let (index, offset) = node.content().find_index(pos);
            let child = node.maybe_child(index)?.clone();
            if offset == pos || child.is_text() {
                return Some(child);
            }
            pos -= offset + 1;
            node = child;
        }
    }

    /// The child starting at or containing `pos`, with its index and start
    /// offset.
    pub fn child_after(&self, pos: usize) -> (Option<Node>, usize, usize) {
        let (index, offset) = self.inner.content.find_index(pos);
        (self.maybe_child(index).cloned(), index, offset)
    }

    /// The child ending at or containing `pos`, with its index and start
    /// offset.
    pub fn child_before(&self, pos: usize) -> (Option<Node>, usize, usize) {
        if pos == 0 {
            return (None, 0, 0);
        }
        let (index, offset) = self.inner.content.find_index(pos);
        if offset < pos {
            return (Some(self.child(index).clone()), index, offset);
        }
        let node = self.child(index - 1).clone();
        let offset = offset - node.node_size();
        (Some(node), index - 1, offset)
    }

    /// Decode an integer position in this node into a [`ResolvedPos`].
    pub fn resolve(&self, pos: usize) -> Result<ResolvedPos, PositionOutOfRange> {
        ResolvedPos::resolve(self, pos)
    }

    /// The content-match state after this node's first `index` children.
    /// `None` when the existing content does not match the type's
    /// expression.
    pub fn content_match_at(&self, index: usize) -> Option<ContentMatch> {
        self.node_type()
            .content_match(&self.inner.schema)
            .match_fragment_range(&self.inner.content, 0, index)
    }

    /// Whether replacing child range `from..to` with `replacement[start..end]`
    /// leaves this node's content valid.
    pub fn can_replace(
        &self,
        from: usize,
        to: usize,
        replacement: &Fragment,
        start: usize,
        end: usize,
    ) -> bool {
        let one = match self.content_match_at(from) {
            Some(m) => m,
            None => return false,
        };
        let two = one
            .match_fragment_range(replacement, start, end)
            .and_then(|m| m.match_fragment_range(&self.inner.content, to, self.child_count()));
        match two {
            Some(m) if m.valid_end() => {}
            _ => return false,
        }
        for i in start..end {
            if !self.node_type().allows_marks(replacement.child(i).marks()) {
                return false;
            }
        }
        true
    }

    /// Whether a node of the given type (with the given marks) may be placed
    /// in the child range `from..to`.
    pub fn can_replace_with(
        &self,
        from: usize,
        to: usize,
        type_id: NodeTypeId,
        marks: Option<&MarkSet>,
    ) -> bool {
        if let Some(marks) = marks {
            if !self.node_type().allows_marks(marks) {
                return false;
            }
        }
        self.content_match_at(from)
            .and_then(|m| m.match_type(type_id))
            .and_then(|m| m.match_fragment_range(&self.inner.content, to, self.child_count()))
            .map(|m| m.valid_end())
            .unwrap_or(false)
    }

    /// Whether `other`'s content could be appended to this node.
    pub fn can_append(&self, other: &Node) -> bool {
        if other.child_count() > 0 {
            self.can_replace(
                self.child_count(),
                self.child_count(),
                other.content(),
                0,
                other.child_count(),
            )
        } else {
            self.node_type()
                .compatible_content(&self.inner.schema, other.node_type())
        }
    }

    /// Recursively verify this node against its schema.
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.is_text() {
            if self.text_len() == 0 {
                return Err(SchemaError::EmptyTextNode);
            }
        } else {
            self.node_type()
                .check_content(&self.inner.schema, &self.inner.content)?;
        }
        let mut rebuilt = MarkSet::empty();
        for mark in self.inner.marks.iter() {
            rebuilt = mark.add_to_set(&rebuilt);
        }
        if rebuilt != self.inner.marks {
            return Err(SchemaError::InvalidJson(format!(
                "invalid collection of marks for node {}",
                self.node_type().name()
            )));
        }
        for child in self.inner.content.iter() {
            child.check()?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = JsonMap::new();
        obj.insert(
            "type".to_string(),
            Value::String(self.node_type().name().to_string()),
        );
        if !self.inner.attrs.is_empty() {
            obj.insert("attrs".to_string(), self.inner.attrs.to_value());
        }
        if self.inner.content.size() > 0 {
            obj.insert("content".to_string(), self.inner.content.to_json());
        }
        if !self.inner.marks.is_empty() {
            obj.insert("marks".to_string(), self.inner.marks.to_json());
        }
        if let Some(text) = &self.inner.text {
            obj.insert("text".to_string(), Value::String(text.value.clone()));
        }
        Value::Object(obj)
    }

    pub fn from_json(schema: &Schema, value: &Value) -> Result<Node, SchemaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::InvalidJson("node must be an object".to_string()))?;
        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidJson("node is missing a type".to_string()))?;
        let marks = match obj.get("marks") {
            Some(Value::Array(items)) => {
                let marks = items
                    .iter()
                    .map(|v| Mark::from_json(schema, v))
                    .collect::<Result<Vec<_>, _>>()?;
                MarkSet::from_vec(marks)
            }
            Some(Value::Null) | None => MarkSet::empty(),
            Some(_) => {
                return Err(SchemaError::InvalidJson(
                    "node marks must be an array".to_string(),
                ))
            }
        };
        if type_name == "text" {
            let text = obj
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::InvalidJson("text node without text".to_string()))?;
            return schema.text_with_marks(text, marks);
        }
        let content = Fragment::from_json(
            schema,
            obj.get("content").unwrap_or(&Value::Null),
        )?;
        let attrs = match obj.get("attrs") {
            Some(Value::Object(map)) => Some(Attrs::new(map.clone())),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(SchemaError::InvalidJson(
                    "node attrs must be an object".to_string(),
                ))
            }
        };
        let nt = schema
            .get_node_type(type_name)
            .ok_or_else(|| SchemaError::UnknownNodeType(type_name.to_string()))?;
        nt.create(schema, attrs.as_ref(), content, marks)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.same_as(other)
            || (self.same_markup(other)
                && self.text_str() == other.text_str()
                && self.inner.content == other.inner.content)
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = if let Some(text) = &self.inner.text {
            format!("{:?}", text.value)
        } else if self.inner.content.size() > 0 {
            format!("{}({})", self.node_type().name(), self.inner.content)
        } else {
            self.node_type().name().to_string()
        };
        let mut wrapped = base;
        for mark in self.inner.marks.iter().rev() {
            wrapped = format!("{}({})", mark.mark_type().name(), wrapped);
        }
        write!(f, "{wrapped}")
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
