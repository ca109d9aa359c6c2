//! Position resolution: decoding an integer position into an ancestor path.
//!
//! A document position is an integer in `[0, doc.content.size]`. Even
//! positions fall on node boundaries; positions inside text nodes index
//! characters. A [`ResolvedPos`] records, for every ancestor level, the
//! node, the index of the child containing the position, and the absolute
//! position before that child.

use std::fmt;

use thiserror::Error;

use crate::mark::MarkSet;
use crate::node::Node;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("position {0} out of range")]
pub struct PositionOutOfRange(pub usize);

#[derive(Clone)]
struct PathItem {
    node: Node,
    index: usize,
    /// Absolute position before the child at `index`.
    before: usize,
}

/// A decoded document position.
#[derive(Clone)]
pub struct ResolvedPos {
    pos: usize,
    path: Vec<PathItem>,
    parent_offset: usize,
}

impl ResolvedPos {
    pub(crate) fn resolve(doc: &Node, pos: usize) -> Result<ResolvedPos, PositionOutOfRange> {
        if pos > doc.content().size() {
            return Err(PositionOutOfRange(pos));
        }
        let mut path = Vec::new();
        let mut start = 0;
        let mut parent_offset = pos;
        let mut node = doc.clone();
        loop {
            let (index, offset) = node.content().find_index(parent_offset);
            let rem = parent_offset - offset;
            path.push(PathItem {
                node: node.clone(),
                index,
                before: start + offset,
            });
            if rem == 0 {
                break;
            }
            let child = node.child(index).clone();
            if child.is_text() {
                break;
            }
            parent_offset = rem - 1;
            start += offset + 1;
            node = child;
        }
        Ok(ResolvedPos {
            pos,
            path,
            parent_offset,
        })
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of ancestor levels above the parent; 0 means the position is
    /// directly in the document node.
    pub fn depth(&self) -> usize {
        self.path.len() - 1
    }

    /// Offset of the position within its deepest parent.
    pub fn parent_offset(&self) -> usize {
        self.parent_offset
    }

    /// The deepest node the position points into.
    pub fn parent(&self) -> &Node {
        self.node(self.depth())
    }

    pub fn doc(&self) -> &Node {
        self.node(0)
    }

    /// The ancestor node at the given depth (0 is the document itself).
    pub fn node(&self, depth: usize) -> &Node {
        &self.path[depth].node
    }

    /// The index of the child the position points at (or into) at a depth.
    pub fn index(&self, depth: usize) -> usize {
        self.path[depth].index
    }

    /// The index after the position at a depth.
    pub fn index_after(&self, depth: usize) -> usize {
        let index = self.index(depth);
        if depth == self.depth() && self.text_offset() == 0 {
            index
        } else {
            index + 1
        }
    }

    /// The position where the content of the node at `depth` starts.
    pub fn start(&self, depth: usize) -> usize {
        if depth == 0 {
            0
        } else {
            self.path[depth - 1].before + 1
        }
    }

    /// The position where the content of the node at `depth` ends.
    pub fn end(&self, depth: usize) -> usize {
        self.start(depth) + self.node(depth).content().size()
    }

    /// The position directly before the node at `depth`. `None` at depth 0.
    pub fn before(&self, depth: usize) -> Option<usize> {
        if depth == 0 {
            None
        } else {
            self.path.get(depth - 1).map(|p| p.before)
        }
    }

    /// The position directly after the node at `depth`. `None` at depth 0.
    pub fn after(&self, depth: usize) -> Option<usize> {
        if depth == 0 || depth > self.depth() {
            None
        } else {
            Some(self.path[depth - 1].before + self.node(depth).node_size())
        }
    }

    /// Distance into the text node the position points into; 0 when it sits
    /// on a node boundary.
    pub fn text_offset(&self) -> usize {
        let last = &self.path[self.path.len() - 1];
        self.pos - last.before
    }

    /// The child directly after the position. A position inside a text node
    /// returns the remaining piece of that node.
    pub fn node_after(&self) -> Option<Node> {
        let parent = self.parent();
        let index = self.index(self.depth());
        if index == parent.child_count() {
            return None;
        }
        let d_off = self.text_offset();
        let child = parent.child(index);
        if d_off > 0 {
            Some(child.cut(d_off, None))
        } else {
            Some(child.clone())
        }
    }

    /// The child directly before the position.
    pub fn node_before(&self) -> Option<Node> {
        let index = self.index(self.depth());
        let d_off = self.text_offset();
        if d_off > 0 {
            return Some(self.parent().child(index).cut(0, Some(d_off)));
        }
        if index == 0 {
            None
        } else {
            Some(self.parent().child(index - 1).clone())
        }
    }

    /// The position of child `index` of the node at `depth`.
    pub fn pos_at_index(&self, index: usize, depth: usize) -> usize {
        let node = self.node(depth);
        let mut pos = if depth == 0 {
            0
        } else {
            self.path[depth - 1].before + 1
        };
        for i in 0..index {
            pos += node.child(i).node_size();
        }
        pos
    }

    /// The marks effective at this position. A non-inclusive mark does not
    /// extend past the boundary of its last marked node.
    pub fn marks(&self) -> MarkSet {
        let parent = self.parent();
        let index = self.index(self.depth());
        if parent.content().size() == 0 {
            return MarkSet::empty();
        }
        if self.text_offset() > 0 {
            return parent.child(index).marks().clone();
        }
        let mut main = if index > 0 {
            parent.maybe_child(index - 1)
        } else {
            None
        };
        let mut other = parent.maybe_child(index);
        if main.is_none() {
            std::mem::swap(&mut main, &mut other);
        }
        let main = match main {
            Some(node) => node,
            None => return MarkSet::empty(),
        };
        let mut marks = main.marks().clone();
        for mark in main.marks().iter() {
            let inclusive = mark.mark_type().inclusive();
            if !inclusive && !other.map(|o| mark.is_in_set(o.marks())).unwrap_or(false) {
                marks = mark.remove_from_set(&marks);
            }
        }
        marks
    }

    /// The marks that survive from this position to `end` when the range
    /// between them is deleted. `None` when the node after this position is
    /// not inline.
    pub fn marks_across(&self, end: &ResolvedPos) -> Option<MarkSet> {
        let after = self.parent().maybe_child(self.index(self.depth()))?;
        if !after.is_inline() {
            return None;
        }
        let mut marks = after.marks().clone();
        let next = end.parent().maybe_child(end.index(end.depth()));
        for mark in after.marks().iter() {
            let inclusive = mark.mark_type().inclusive();
            if !inclusive && !next.map(|n| mark.is_in_set(n.marks())).unwrap_or(false) {
                marks = mark.remove_from_set(&marks);
            }
        }
        Some(marks)
    }

    /// The deepest depth at which this position and `pos` share an ancestor
    /// whose span contains both.
    pub fn shared_depth(&self, pos: usize) -> usize {
        let mut depth = self.depth();
        while depth > 0 {
            if self.start(depth) <= pos && self.end(depth) >= pos {
                return depth;
            }
            depth -= 1;
        }
        0
    }

    pub fn same_parent(&self, other: &ResolvedPos) -> bool {
        self.pos - self.parent_offset == other.pos - other.parent_offset
    }

    pub fn max<'a>(&'a self, other: &'a ResolvedPos) -> &'a ResolvedPos {
        if other.pos > self.pos {
            other
        } else {
            self
        }
    }

    pub fn min<'a>(&'a self, other: &'a ResolvedPos) -> &'a ResolvedPos {
        if other.pos < self.pos {
            other
        } else {
            self
        }
    }

    /// The closest node range around this position and `other` for which
    /// `pred` (when given) holds on the surrounding node.
    pub fn block_range(
        &self,
        other: &ResolvedPos,
        pred: Option<&dyn Fn(&Node) -> bool>,
    ) -> Option<NodeRange> {
        if other.pos < self.pos {
            return other.block_range(self, pred);
        }
        let skip = if self.parent().inline_content() || self.pos == other.pos {
            1
        } else {
            0
        };
        let mut d = self.depth() as isize - skip as isize;
        while d >= 0 {
            let depth = d as usize;
            if other.pos <= self.end(depth) && pred.map(|p| p(self.node(depth))).unwrap_or(true) {
                return Some(NodeRange {
                    from: self.clone(),
                    to: other.clone(),
                    depth,
                });
            }
            d -= 1;
        }
        None
    }
}

impl fmt::Debug for ResolvedPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResolvedPos({}, depth {})", self.pos, self.depth())
    }
}

// ── NodeRange ─────────────────────────────────────────────────────────────

/// A contiguous range of siblings: two resolved positions sharing the
/// ancestor at `depth`.
#[derive(Clone)]
pub struct NodeRange {
    from: ResolvedPos,
    to: ResolvedPos,
    depth: usize,
}

impl NodeRange {
    pub fn new(from: ResolvedPos, to: ResolvedPos, depth: usize) -> NodeRange {
        NodeRange { from, to, depth }
    }

    pub fn from_pos(&self) -> &ResolvedPos {
        &self.from
    }

    pub fn to_pos(&self) -> &ResolvedPos {
        &self.to
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The position before the first sibling in the range.
    pub fn start(&self) -> usize {
        self.from.before(self.depth + 1).unwrap_or(self.from.pos())
    }

    /// The position after the last sibling in the range.
    pub fn end(&self) -> usize {
        self.to.after(self.depth + 1).unwrap_or(self.to.pos())
    }

    pub fn parent(&self) -> &Node {
        self.from.node(self.depth)
    }

    pub fn start_index(&self) -> usize {
        self.from.index(self.depth)
    }

    pub fn end_index(&self) -> usize {
        self.to.index_after(self.depth)
    }
}

impl fmt::Debug for NodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRange({}-{}, depth {})", self.start(), self.end(), self.depth)
    }
}
