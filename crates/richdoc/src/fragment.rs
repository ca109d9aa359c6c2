//! Fragments — immutable ordered sequences of sibling nodes.
//!
//! A fragment caches the total size of its children (`Σ node_size`). Public
//! construction goes through [`Fragment::from_array`], which merges adjacent
//! text nodes carrying equal mark sets, so a fragment never holds two
//! mergeable text siblings.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::node::Node;
use crate::schema::{Schema, SchemaError};

struct FragmentInner {
    content: Vec<Node>,
    size: usize,
}

/// An immutable sequence of nodes with a precomputed total size.
#[derive(Clone)]
pub struct Fragment {
    inner: Arc<FragmentInner>,
}

impl Fragment {
    pub fn empty() -> Fragment {
        static EMPTY: OnceLock<Fragment> = OnceLock::new();
        EMPTY
            .get_or_init(|| Fragment {
                inner: Arc::new(FragmentInner {
                    content: Vec::new(),
                    size: 0,
                }),
            })
            .clone()
    }

    /// Raw construction; callers guarantee the text-merge invariant.
    pub(crate) fn from_vec(content: Vec<Node>) -> Fragment {
        let size = content.iter().map(Node::node_size).sum();
        Fragment {
            inner: Arc::new(FragmentInner { content, size }),
        }
    }

    /// Build a fragment, joining adjacent text nodes with equal marks.
    pub fn from_array(nodes: Vec<Node>) -> Fragment {
        let mut joined: Vec<Node> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match joined.last() {
                Some(last) if node.is_text() && last.is_text() && node.same_markup(last) => {
                    let merged = {
                        let mut text = last.text_str().unwrap_or("").to_string();
                        text.push_str(node.text_str().unwrap_or(""));
                        last.with_text(text)
                    };
                    let idx = joined.len() - 1;
                    joined[idx] = merged;
                }
                _ => joined.push(node),
            }
        }
        Fragment::from_vec(joined)
    }

    pub fn from_node(node: Node) -> Fragment {
        Fragment::from_vec(vec![node])
    }

    /// Total size of the fragment: the sum of its children's sizes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn child_count(&self) -> usize {
        self.inner.content.len()
    }

    /// The child at `index`. Panics when out of range.
    pub fn child(&self, index: usize) -> &Node {
        &self.inner.content[index]
    }

    pub fn maybe_child(&self, index: usize) -> Option<&Node> {
        self.inner.content.get(index)
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.inner.content.first()
    }

    pub fn last_child(&self) -> Option<&Node> {
        self.inner.content.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.inner.content.iter()
    }

    pub fn as_slice(&self) -> &[Node] {
        &self.inner.content
    }

    /// Invoke `f` with each child, its offset into the fragment, and its
    /// index.
    pub fn for_each(&self, mut f: impl FnMut(&Node, usize, usize)) {
        let mut pos = 0;
        for (i, child) in self.inner.content.iter().enumerate() {
            f(child, pos, i);
            pos += child.node_size();
        }
    }

    /// Call `f` for every descendant node overlapping `from..to`. Returning
    /// `false` from `f` prevents descent into that node's children.
    pub fn nodes_between(
        &self,
        from: usize,
        to: usize,
        f: &mut dyn FnMut(&Node, usize, Option<&Node>, usize) -> bool,
        node_start: usize,
        parent: Option<&Node>,
    ) {
        let mut pos = 0;
        for (i, child) in self.inner.content.iter().enumerate() {
            if pos >= to {
                break;
            }
            let end = pos + child.node_size();
            if end > from && f(child, node_start + pos, parent, i) && child.content().size() > 0 {
                let start = pos + 1;
                child.content().nodes_between(
                    from.saturating_sub(start),
                    (to - start).min(child.content().size()),
                    f,
                    node_start + start,
                    Some(child),
                );
            }
            pos = end;
        }
    }

    /// Call `f` for every descendant.
    pub fn descendants(&self, f: &mut dyn FnMut(&Node, usize, Option<&Node>, usize) -> bool) {
        self.nodes_between(0, self.size(), f, 0, None);
    }

    /// Extract the text between two positions, separating block boundaries
    /// with `block_separator` and projecting leaves through their
    /// `leaf_text` spec (or the given fallback).
    pub fn text_between(
        &self,
        from: usize,
        to: usize,
        block_separator: Option<&str>,
        leaf_text: Option<&str>,
    ) -> String {
        let mut text = String::new();
        let mut first = true;
        self.nodes_between(
            from,
            to,
            &mut |node, pos, _, _| {
                let node_text = if node.is_text() {
                    let s = node.text_str().unwrap_or("");
                    let start = from.saturating_sub(pos);
                    let end = (to - pos).min(node.text_len());
                    slice_chars(s, start, end)
                } else if !node.is_leaf() {
                    String::new()
                } else if let Some(given) = leaf_text {
                    given.to_string()
                } else if let Some(custom) = &node.node_type().spec().leaf_text {
                    custom(node)
                } else {
                    String::new()
                };
                if let Some(sep) = block_separator {
                    if node.is_block()
                        && ((node.is_leaf() && !node_text.is_empty()) || node.is_textblock())
                    {
                        if first {
                            first = false;
                        } else {
                            text.push_str(sep);
                        }
                    }
                }
                text.push_str(&node_text);
                true
            },
            0,
            None,
        );
        text
    }

    /// Concatenate, merging a text seam when both sides allow it.
    pub fn append(&self, other: &Fragment) -> Fragment {
        if other.size() == 0 {
            return self.clone();
        }
        if self.size() == 0 {
            return other.clone();
        }
        let mut content: Vec<Node> = self.inner.content.clone();
        let mut rest = other.inner.content.iter();
        if let (Some(last), Some(first)) = (content.last(), other.first_child()) {
            if last.is_text() && first.is_text() && last.same_markup(first) {
                let mut text = last.text_str().unwrap_or("").to_string();
                text.push_str(first.text_str().unwrap_or(""));
                let merged = last.with_text(text);
                let idx = content.len() - 1;
                content[idx] = merged;
                rest.next();
            }
        }
        content.extend(rest.cloned());
        Fragment::from_vec(content)
    }

    /// The sub-fragment between two offsets, splitting text nodes and
    /// cutting non-leaf children that straddle a boundary.
    pub fn cut(&self, from: usize, to: usize) -> Fragment {
        if from == 0 && to == self.size() {
            return self.clone();
        }
        let mut result = Vec::new();
        if to > from {
            let mut pos = 0;
            for child in self.inner.content.iter() {
                if pos >= to {
                    break;
                }
                let end = pos + child.node_size();
                if end > from {
                    let piece = if pos < from || end > to {
                        if child.is_text() {
                            child.cut(
                                from.saturating_sub(pos),
                                Some((to - pos).min(child.text_len())),
                            )
                        } else {
                            child.cut(
                                (from.saturating_sub(pos)).saturating_sub(1),
                                Some((to.saturating_sub(pos + 1)).min(child.content().size())),
                            )
                        }
                    } else {
                        child.clone()
                    };
                    result.push(piece);
                }
                pos = end;
            }
        }
        Fragment::from_vec(result)
    }

    /// The sub-fragment spanning child indexes `from..to`.
    pub fn cut_by_index(&self, from: usize, to: usize) -> Fragment {
        if from == to {
            return Fragment::empty();
        }
        if from == 0 && to == self.child_count() {
            return self.clone();
        }
        Fragment::from_vec(self.inner.content[from..to].to_vec())
    }

    /// Replace the child at `index`. Returns `self` when it is already that
    /// node.
    pub fn replace_child(&self, index: usize, node: Node) -> Fragment {
        if self.inner.content[index].same_as(&node) {
            return self.clone();
        }
        let mut content = self.inner.content.clone();
        content[index] = node;
        Fragment::from_vec(content)
    }

    pub fn add_to_start(&self, node: Node) -> Fragment {
        let mut content = Vec::with_capacity(self.child_count() + 1);
        content.push(node);
        content.extend(self.inner.content.iter().cloned());
        Fragment::from_vec(content)
    }

    pub fn add_to_end(&self, node: Node) -> Fragment {
        let mut content = self.inner.content.clone();
        content.push(node);
        Fragment::from_vec(content)
    }

    /// The first absolute offset at which the two fragments differ, or
    /// `None` when they are equal.
    pub fn find_diff_start(&self, other: &Fragment, pos: usize) -> Option<usize> {
        let mut i = 0;
        let mut pos = pos;
        loop {
            if i == self.child_count() || i == other.child_count() {
                return if self.child_count() == other.child_count() {
                    None
                } else {
                    Some(pos)
                };
            }
            let (a, b) = (self.child(i), other.child(i));
            if a.same_as(b) {
                pos += a.node_size();
                i += 1;
                continue;
            }
            if !a.same_markup(b) {
                return Some(pos);
            }
            if a.is_text() && a.text_str() != b.text_str() {
                let (ta, tb) = (a.text_str().unwrap_or(""), b.text_str().unwrap_or(""));
                let common = ta
                    .chars()
                    .zip(tb.chars())
                    .take_while(|(x, y)| x == y)
                    .count();
                return Some(pos + common);
            }
            if a.content().size() > 0 || b.content().size() > 0 {
                if let Some(inner) = a.content().find_diff_start(b.content(), pos + 1) {
                    return Some(inner);
                }
            }
            pos += a.node_size();
            i += 1;
        }
    }

    /// The symmetric operation from the end: positions `(in self, in other)`
    /// after which the fragments are equal, or `None` when they are equal.
    pub fn find_diff_end(
        &self,
        other: &Fragment,
        pos_a: usize,
        pos_b: usize,
    ) -> Option<(usize, usize)> {
        let mut ia = self.child_count();
        let mut ib = other.child_count();
        let mut pos_a = pos_a;
        let mut pos_b = pos_b;
        loop {
            if ia == 0 || ib == 0 {
                return if ia == ib { None } else { Some((pos_a, pos_b)) };
            }
            ia -= 1;
            ib -= 1;
            let (a, b) = (self.child(ia), other.child(ib));
            let size = a.node_size();
            if a.same_as(b) {
                pos_a -= size;
                pos_b -= size;
                continue;
            }
            if !a.same_markup(b) {
                return Some((pos_a, pos_b));
            }
            if a.is_text() && a.text_str() != b.text_str() {
                let ta: Vec<char> = a.text_str().unwrap_or("").chars().collect();
                let tb: Vec<char> = b.text_str().unwrap_or("").chars().collect();
                let mut same = 0;
                let min = ta.len().min(tb.len());
                while same < min && ta[ta.len() - same - 1] == tb[tb.len() - same - 1] {
                    same += 1;
                    pos_a -= 1;
                    pos_b -= 1;
                }
                return Some((pos_a, pos_b));
            }
            if a.content().size() > 0 || b.content().size() > 0 {
                if let Some(inner) = a.content().find_diff_end(b.content(), pos_a - 1, pos_b - 1) {
                    return Some(inner);
                }
            }
            pos_a -= size;
            pos_b -= size;
        }
    }

    /// Locate the child containing (or starting at) an offset. Returns the
    /// child index and the offset at which that child starts. An offset
    /// equal to the fragment size maps to `(child_count, size)`.
    pub fn find_index(&self, pos: usize) -> (usize, usize) {
        if pos == 0 {
            return (0, 0);
        }
        if pos == self.size() {
            return (self.child_count(), self.size());
        }
        debug_assert!(pos < self.size(), "offset {pos} outside fragment");
        let mut cur = 0;
        for (i, child) in self.inner.content.iter().enumerate() {
            let end = cur + child.node_size();
            if pos < end {
                return (i, cur);
            }
            if pos == end {
                return (i + 1, end);
            }
            cur = end;
        }
        (self.child_count(), self.size())
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.iter().map(Node::to_json).collect())
    }

    pub fn from_json(schema: &Schema, value: &Value) -> Result<Fragment, SchemaError> {
        match value {
            Value::Null => Ok(Fragment::empty()),
            Value::Array(items) => {
                let nodes = items
                    .iter()
                    .map(|v| Node::from_json(schema, v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Fragment::from_array(nodes))
            }
            _ => Err(SchemaError::InvalidJson(
                "fragment must be an array of nodes".to_string(),
            )),
        }
    }
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Fragment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.child_count() == other.child_count()
                && self.iter().zip(other.iter()).all(|(a, b)| a == b))
    }
}

impl Eq for Fragment {}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for child in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{child}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{self}>")
    }
}

impl From<Vec<Node>> for Fragment {
    fn from(nodes: Vec<Node>) -> Fragment {
        Fragment::from_array(nodes)
    }
}

impl From<Node> for Fragment {
    fn from(node: Node) -> Fragment {
        Fragment::from_node(node)
    }
}

impl From<Option<Fragment>> for Fragment {
    fn from(f: Option<Fragment>) -> Fragment {
        f.unwrap_or_else(Fragment::empty)
    }
}

fn slice_chars(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mark::MarkSet;
    use crate::test_util::{basic_schema, doc, p, text};

    #[test]
    fn size_is_sum_of_children() {
        let schema = basic_schema();
        let d = doc(&schema, vec![p(&schema, vec![text(&schema, "ab")])]);
        // paragraph: 2 (text) + 2 = 4
        assert_eq!(d.content().size(), 4);
    }

    #[test]
    fn adjacent_text_with_equal_marks_merges() {
        let schema = basic_schema();
        let frag = Fragment::from_array(vec![text(&schema, "foo"), text(&schema, "bar")]);
        assert_eq!(frag.child_count(), 1);
        assert_eq!(frag.child(0).text_str(), Some("foobar"));
    }

    #[test]
    fn text_with_different_marks_stays_split() {
        let schema = basic_schema();
        let em = schema.mark("em", None).unwrap();
        let marked = schema
            .text_with_marks("bar", MarkSet::single(em))
            .unwrap();
        let frag = Fragment::from_array(vec![text(&schema, "foo"), marked]);
        assert_eq!(frag.child_count(), 2);
    }

    #[test]
    fn cut_splits_text_nodes() {
        let schema = basic_schema();
        let frag = Fragment::from_array(vec![text(&schema, "hello")]);
        let cut = frag.cut(1, 4);
        assert_eq!(cut.child_count(), 1);
        assert_eq!(cut.child(0).text_str(), Some("ell"));
        assert_eq!(cut.size(), 3);
    }

    #[test]
    fn cut_descends_into_straddled_children() {
        let schema = basic_schema();
        let frag = Fragment::from_array(vec![
            p(&schema, vec![text(&schema, "ab")]),
            p(&schema, vec![text(&schema, "cd")]),
        ]);
        // Cut across the middle of both paragraphs.
        let cut = frag.cut(2, 6);
        assert_eq!(cut.child_count(), 2);
        assert_eq!(cut.child(0).text_content(), "b");
        assert_eq!(cut.child(1).text_content(), "c");
    }

    #[test]
    fn append_merges_text_seam() {
        let schema = basic_schema();
        let a = Fragment::from_array(vec![text(&schema, "foo")]);
        let b = Fragment::from_array(vec![text(&schema, "bar")]);
        let joined = a.append(&b);
        assert_eq!(joined.child_count(), 1);
        assert_eq!(joined.child(0).text_str(), Some("foobar"));
        assert_eq!(joined.size(), 6);
    }

    #[test]
    fn find_diff_start_spots_text_difference() {
        let schema = basic_schema();
        let a = doc(&schema, vec![p(&schema, vec![text(&schema, "hello")])]);
        let b = doc(&schema, vec![p(&schema, vec![text(&schema, "heLlo")])]);
        assert_eq!(a.content().find_diff_start(b.content(), 0), Some(3));
    }

    #[test]
    fn find_diff_start_none_for_equal() {
        let schema = basic_schema();
        let a = doc(&schema, vec![p(&schema, vec![text(&schema, "same")])]);
        let b = doc(&schema, vec![p(&schema, vec![text(&schema, "same")])]);
        assert_eq!(a.content().find_diff_start(b.content(), 0), None);
    }

    #[test]
    fn find_diff_end_symmetric() {
        let schema = basic_schema();
        let a = doc(&schema, vec![p(&schema, vec![text(&schema, "xyab")])]);
        let b = doc(&schema, vec![p(&schema, vec![text(&schema, "zab")])]);
        let (pa, pb) = a
            .content()
            .find_diff_end(b.content(), a.content().size(), b.content().size())
            .unwrap();
        // "ab" suffix is shared; difference ends before it.
        assert_eq!(pa, 3);
        assert_eq!(pb, 2);
    }

    #[test]
    fn find_index_boundaries() {
        let schema = basic_schema();
        let frag = Fragment::from_array(vec![
            p(&schema, vec![text(&schema, "ab")]), // size 4
            p(&schema, vec![text(&schema, "cd")]), // size 4
        ]);
        assert_eq!(frag.find_index(0), (0, 0));
        assert_eq!(frag.find_index(4), (1, 4));
        assert_eq!(frag.find_index(5), (1, 4));
        assert_eq!(frag.find_index(8), (2, 8));
    }

    #[test]
    fn nodes_between_visits_overlapping() {
        let schema = basic_schema();
        let d = doc(
            &schema,
            vec![
                p(&schema, vec![text(&schema, "ab")]),
                p(&schema, vec![text(&schema, "cd")]),
            ],
        );
        let mut visited = Vec::new();
        d.content().nodes_between(
            0,
            d.content().size(),
            &mut |node, pos, _, _| {
                visited.push((node.node_type().name().to_string(), pos));
                true
            },
            0,
            None,
        );
        assert_eq!(
            visited,
            vec![
                ("paragraph".to_string(), 0),
                ("text".to_string(), 1),
                ("paragraph".to_string(), 4),
                ("text".to_string(), 5),
            ]
        );
    }

    #[test]
    fn text_between_with_separator() {
        let schema = basic_schema();
        let d = doc(
            &schema,
            vec![
                p(&schema, vec![text(&schema, "ab")]),
                p(&schema, vec![text(&schema, "cd")]),
            ],
        );
        assert_eq!(
            d.content()
                .text_between(0, d.content().size(), Some("\n"), None),
            "ab\ncd"
        );
    }

    #[test]
    fn json_roundtrip() {
        let schema = basic_schema();
        let frag = Fragment::from_array(vec![
            p(&schema, vec![text(&schema, "hi")]),
            p(&schema, vec![]),
        ]);
        let back = Fragment::from_json(&schema, &frag.to_json()).unwrap();
        assert!(frag.eq(&back));
    }
}
