//! Slices and the replace algorithm.
//!
//! A [`Slice`] is a fragment whose sides may be "open": `open_start` /
//! `open_end` count how many levels at each edge are not bounded by a
//! complete node boundary. Replacing a range splices a slice between two
//! resolved positions, joining compatible node types level by level and
//! validating every rebuilt child sequence against its parent's content
//! expression.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::fragment::Fragment;
use crate::node::Node;
use crate::resolve::{PositionOutOfRange, ResolvedPos};
use crate::schema::{JsonMap, Schema, SchemaError};

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplaceError {
    #[error("inserted content deeper than insertion position")]
    DeeperThanParent,
    #[error("inconsistent open depths")]
    InconsistentOpenDepths,
    #[error("cannot join {0} onto {1}")]
    CannotJoin(String, String),
    #[error("invalid content for node type {0}")]
    InvalidContent(String),
    #[error("removing non-flat range")]
    NonFlatRange,
    #[error(transparent)]
    OutOfRange(#[from] PositionOutOfRange),
}

// ── Slice ─────────────────────────────────────────────────────────────────

/// A fragment with open-depth markers on both sides.
#[derive(Clone, PartialEq, Eq)]
pub struct Slice {
    content: Fragment,
    open_start: usize,
    open_end: usize,
}

impl Slice {
    pub fn new(content: Fragment, open_start: usize, open_end: usize) -> Slice {
        Slice {
            content,
            open_start,
            open_end,
        }
    }

    pub fn empty() -> Slice {
        Slice::new(Fragment::empty(), 0, 0)
    }

    pub fn content(&self) -> &Fragment {
        &self.content
    }

    pub fn open_start(&self) -> usize {
        self.open_start
    }

    pub fn open_end(&self) -> usize {
        self.open_end
    }

    /// The size a replace with this slice adds to a document.
    pub fn size(&self) -> usize {
        self.content.size() - self.open_start - self.open_end
    }

    /// Insert a fragment at `pos` inside the slice content. `None` when the
    /// insertion point's parent rejects it.
    pub fn insert_at(&self, pos: usize, fragment: Fragment) -> Option<Slice> {
        let content = insert_into(&self.content, pos + self.open_start, &fragment, None)?;
        Some(Slice::new(content, self.open_start, self.open_end))
    }

    /// Remove `[from, to)` from the slice content. Both bounds must sit in
    /// the same flat level.
    pub fn remove_between(&self, from: usize, to: usize) -> Result<Slice, ReplaceError> {
        let content = remove_range(
            &self.content,
            from + self.open_start,
            to + self.open_start,
        )?;
        Ok(Slice::new(content, self.open_start, self.open_end))
    }

    /// Build a slice whose sides are opened as deep as single-child chains
    /// allow. When `open_isolating` is false, isolating node types stop the
    /// descent.
    pub fn max_open(fragment: Fragment, open_isolating: bool) -> Slice {
        let mut open_start = 0;
        let mut cursor = fragment.first_child().cloned();
        while let Some(node) = cursor {
            if node.is_leaf() || (!open_isolating && node.node_type().spec().isolating) {
                break;
            }
            open_start += 1;
            cursor = node.first_child().cloned();
        }
        let mut open_end = 0;
        let mut cursor = fragment.last_child().cloned();
        while let Some(node) = cursor {
            if node.is_leaf() || (!open_isolating && node.node_type().spec().isolating) {
                break;
            }
            open_end += 1;
            cursor = node.last_child().cloned();
        }
        Slice::new(fragment, open_start, open_end)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = JsonMap::new();
        if self.content.size() > 0 {
            obj.insert("content".to_string(), self.content.to_json());
        }
        if self.open_start > 0 {
            obj.insert("openStart".to_string(), Value::from(self.open_start));
        }
        if self.open_end > 0 {
            obj.insert("openEnd".to_string(), Value::from(self.open_end));
        }
        Value::Object(obj)
    }

    pub fn from_json(schema: &Schema, value: &Value) -> Result<Slice, SchemaError> {
        let obj = match value {
            Value::Null => return Ok(Slice::empty()),
            Value::Object(obj) => obj,
            _ => {
                return Err(SchemaError::InvalidJson(
                    "slice must be an object".to_string(),
                ))
            }
        };
        let content = Fragment::from_json(schema, obj.get("content").unwrap_or(&Value::Null))?;
        let open_start = obj
            .get("openStart")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let open_end = obj.get("openEnd").and_then(Value::as_u64).unwrap_or(0) as usize;
        Ok(Slice::new(content, open_start, open_end))
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slice<{}>({}, {})",
            self.content, self.open_start, self.open_end
        )
    }
}

fn insert_into(
    content: &Fragment,
    dist: usize,
    insert: &Fragment,
    parent: Option<&Node>,
) -> Option<Fragment> {
    let (index, offset) = content.find_index(dist);
    let child = content.maybe_child(index);
    if offset == dist || child.map(Node::is_text).unwrap_or(false) {
        if let Some(parent) = parent {
            if !parent.can_replace(index, index, insert, 0, insert.child_count()) {
                return None;
            }
        }
        return Some(
            content
                .cut(0, dist)
                .append(insert)
                .append(&content.cut(dist, content.size())),
        );
    }
    let child = child?;
    let inner = insert_into(child.content(), dist - offset - 1, insert, Some(child))?;
    Some(content.replace_child(index, child.copy(inner)))
}

fn remove_range(content: &Fragment, from: usize, to: usize) -> Result<Fragment, ReplaceError> {
    let (index, offset) = content.find_index(from);
    let child = content.maybe_child(index);
    let (index_to, offset_to) = content.find_index(to);
    if offset == from || child.map(Node::is_text).unwrap_or(false) {
        if offset_to != to && !content.child(index_to).is_text() {
            return Err(ReplaceError::NonFlatRange);
        }
        return Ok(content.cut(0, from).append(&content.cut(to, content.size())));
    }
    if index != index_to {
        return Err(ReplaceError::NonFlatRange);
    }
    let child = match child {
        Some(c) => c,
        None => return Err(ReplaceError::NonFlatRange),
    };
    let inner = remove_range(child.content(), from - offset - 1, to - offset - 1)?;
    Ok(content.replace_child(index, child.copy(inner)))
}

// ── Replace ───────────────────────────────────────────────────────────────

pub(crate) fn replace(
    from: &ResolvedPos,
    to: &ResolvedPos,
    slice: &Slice,
) -> Result<Node, ReplaceError> {
    if slice.open_start() > from.depth() {
        return Err(ReplaceError::DeeperThanParent);
    }
    if from.depth() - slice.open_start() != to.depth() - slice.open_end() {
        return Err(ReplaceError::InconsistentOpenDepths);
    }
    replace_outer(from, to, slice, 0)
}

fn replace_outer(
    from: &ResolvedPos,
    to: &ResolvedPos,
    slice: &Slice,
    depth: usize,
) -> Result<Node, ReplaceError> {
    let index = from.index(depth);
    let node = from.node(depth);
    if index == to.index(depth) && depth < from.depth() - slice.open_start() {
        // The splice happens entirely inside one child; recurse.
        let inner = replace_outer(from, to, slice, depth + 1)?;
        Ok(node.copy(node.content().replace_child(index, inner)))
    } else if slice.content().size() == 0 {
        close(node, replace_two_way(from, to, depth)?)
    } else if slice.open_start() == 0
        && slice.open_end() == 0
        && from.depth() == depth
        && to.depth() == depth
    {
        // Flat case: the slice fits this level without opening anything.
        let parent = from.parent();
        let content = parent.content();
        let new_content = content
            .cut(0, from.parent_offset())
            .append(slice.content())
            .append(&content.cut(to.parent_offset(), content.size()));
        close(parent, new_content)
    } else {
        let (start, end) = prepare_slice_for_replace(slice, from)?;
        close(node, replace_three_way(from, &start, &end, to, depth)?)
    }
}

fn check_join(main: &Node, sub: &Node) -> Result<(), ReplaceError> {
    let schema = main.schema();
    if !sub
        .node_type()
        .compatible_content(schema, main.node_type())
    {
        return Err(ReplaceError::CannotJoin(
            sub.node_type().name().to_string(),
            main.node_type().name().to_string(),
        ));
    }
    Ok(())
}

fn joinable<'a>(
    before: &'a ResolvedPos,
    after: &ResolvedPos,
    depth: usize,
) -> Result<&'a Node, ReplaceError> {
    let node = before.node(depth);
    check_join(node, after.node(depth))?;
    Ok(node)
}

fn add_node(child: Node, target: &mut Vec<Node>) {
    if let Some(last) = target.last() {
        if child.is_text() && last.is_text() && child.same_markup(last) {
            let mut text = last.text_str().unwrap_or("").to_string();
            text.push_str(child.text_str().unwrap_or(""));
            let merged = child.with_text(text);
            let idx = target.len() - 1;
            target[idx] = merged;
            return;
        }
    }
    target.push(child);
}

fn add_range(
    start: Option<&ResolvedPos>,
    end: Option<&ResolvedPos>,
    depth: usize,
    target: &mut Vec<Node>,
) {
    let node = match end.or(start) {
        Some(bound) => bound.node(depth),
        None => return,
    };
    let mut start_index = 0;
    let end_index = end.map(|e| e.index(depth)).unwrap_or(node.child_count());
    if let Some(start) = start {
        start_index = start.index(depth);
        if start.depth() > depth {
            start_index += 1;
        } else if start.text_offset() > 0 {
            if let Some(after) = start.node_after() {
                add_node(after, target);
            }
            start_index += 1;
        }
    }
    for i in start_index..end_index {
        add_node(node.child(i).clone(), target);
    }
    if let Some(end) = end {
        if end.depth() == depth && end.text_offset() > 0 {
            if let Some(before) = end.node_before() {
                add_node(before, target);
            }
        }
    }
}

fn close(node: &Node, content: Fragment) -> Result<Node, ReplaceError> {
    if !node
        .node_type()
        .valid_content(node.schema(), &content)
    {
        return Err(ReplaceError::InvalidContent(
            node.node_type().name().to_string(),
        ));
    }
    Ok(node.copy(content))
}

fn replace_three_way(
    from: &ResolvedPos,
    start: &ResolvedPos,
    end: &ResolvedPos,
    to: &ResolvedPos,
    depth: usize,
) -> Result<Fragment, ReplaceError> {
    let open_start = if from.depth() > depth {
        Some(joinable(from, start, depth + 1)?)
    } else {
        None
    };
    let open_end = if to.depth() > depth {
        Some(joinable(end, to, depth + 1)?)
    } else {
        None
    };
    let mut content = Vec::new();
    add_range(None, Some(from), depth, &mut content);
    match (open_start, open_end) {
        (Some(os), Some(oe)) if start.index(depth) == end.index(depth) => {
            check_join(os, oe)?;
            let inner = replace_three_way(from, start, end, to, depth + 1)?;
            add_node(close(os, inner)?, &mut content);
        }
        _ => {
            if let Some(os) = open_start {
                let inner = replace_two_way(from, start, depth + 1)?;
                add_node(close(os, inner)?, &mut content);
            }
            add_range(Some(start), Some(end), depth, &mut content);
            if let Some(oe) = open_end {
                let inner = replace_two_way(end, to, depth + 1)?;
                add_node(close(oe, inner)?, &mut content);
            }
        }
    }
    add_range(Some(to), None, depth, &mut content);
    Ok(Fragment::from_vec(content))
}

fn replace_two_way(
    from: &ResolvedPos,
    to: &ResolvedPos,
    depth: usize,
) -> Result<Fragment, ReplaceError> {
    let mut content = Vec::new();
    add_range(None, Some(from), depth, &mut content);
    if from.depth() > depth {
        let joined = joinable(from, to, depth + 1)?;
        let inner = replace_two_way(from, to, depth + 1)?;
        add_node(close(joined, inner)?, &mut content);
    }
    add_range(Some(to), None, depth, &mut content);
    Ok(Fragment::from_vec(content))
}

fn prepare_slice_for_replace(
    slice: &Slice,
    along: &ResolvedPos,
) -> Result<(ResolvedPos, ResolvedPos), ReplaceError> {
    let extra = along.depth() - slice.open_start();
    let parent = along.node(extra);
    let mut node = parent.copy(slice.content().clone());
    for i in (0..extra).rev() {
        node = along.node(i).copy(Fragment::from_node(node));
    }
    let start = node.resolve(slice.open_start() + extra)?;
    let end = node.resolve(node.content().size() - slice.open_end() - extra)?;
    Ok((start, end))
}
