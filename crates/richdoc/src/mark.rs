//! Marks: typed annotations on inline content, and rank-ordered mark sets.
//!
//! A mark is a `(type, attrs)` pair with structural equality. A [`MarkSet`]
//! is ordered by type rank (ascending) and never holds two marks a
//! single-instance type would both admit; adding a mark applies the type's
//! exclusion rules.

use std::fmt;
use std::sync::OnceLock;

use serde_json::Value;

use crate::schema::{Attrs, JsonMap, MarkType, MarkTypeId, Schema, SchemaError};

// ── Mark ──────────────────────────────────────────────────────────────────

/// A typed annotation attached to inline content (emphasis, a link, …).
#[derive(Clone)]
pub struct Mark {
    schema: Schema,
    type_id: MarkTypeId,
    attrs: Attrs,
}

impl Mark {
    pub(crate) fn new(schema: Schema, type_id: MarkTypeId, attrs: Attrs) -> Mark {
        Mark {
            schema,
            type_id,
            attrs,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn type_id(&self) -> MarkTypeId {
        self.type_id
    }

    pub fn mark_type(&self) -> &MarkType {
        self.schema.mark_type(self.type_id)
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Add this mark to a set, applying exclusion and rank-insertion rules:
    /// if a present mark excludes this one (and is not itself excluded by
    /// it), the set is returned unchanged; marks this one excludes are
    /// removed; otherwise the mark is inserted at its rank-sorted position.
    pub fn add_to_set(&self, set: &MarkSet) -> MarkSet {
        let mut copy: Option<Vec<Mark>> = None;
        let mut placed = false;
        for (i, other) in set.iter().enumerate() {
            if self == other {
                return set.clone();
            }
            if self.mark_type().excludes(other.type_id) {
                if copy.is_none() {
                    copy = Some(set.as_slice()[..i].to_vec());
                }
            } else if other.mark_type().excludes(self.type_id) {
                return set.clone();
            } else {
                if !placed && other.mark_type().rank() > self.mark_type().rank() {
                    let partial = copy.get_or_insert_with(|| set.as_slice()[..i].to_vec());
                    partial.push(self.clone());
                    placed = true;
                }
                if let Some(partial) = copy.as_mut() {
                    partial.push(other.clone());
                }
            }
        }
        let mut result = copy.unwrap_or_else(|| set.as_slice().to_vec());
        if !placed {
            result.push(self.clone());
        }
        MarkSet::from_sorted(result)
    }

    /// Remove any mark equal to this one (type and attrs) from the set.
    pub fn remove_from_set(&self, set: &MarkSet) -> MarkSet {
        let kept: Vec<Mark> = set.iter().filter(|m| *m != self).cloned().collect();
        if kept.len() == set.len() {
            set.clone()
        } else {
            MarkSet::from_sorted(kept)
        }
    }

    /// Whether a mark equal to this one is in the set.
    pub fn is_in_set(&self, set: &MarkSet) -> bool {
        set.iter().any(|m| m == self)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = JsonMap::new();
        obj.insert(
            "type".to_string(),
            Value::String(self.mark_type().name().to_string()),
        );
        if !self.attrs.is_empty() {
            obj.insert("attrs".to_string(), self.attrs.to_value());
        }
        Value::Object(obj)
    }

    pub fn from_json(schema: &Schema, value: &Value) -> Result<Mark, SchemaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::InvalidJson("mark must be an object".to_string()))?;
        let name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidJson("mark is missing a type".to_string()))?;
        let attrs = match obj.get("attrs") {
            Some(Value::Object(map)) => Some(Attrs::new(map.clone())),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(SchemaError::InvalidJson(
                    "mark attrs must be an object".to_string(),
                ))
            }
        };
        schema.mark(name, attrs.as_ref())
    }
}

impl PartialEq for Mark {
    fn eq(&self, other: &Mark) -> bool {
        self.type_id == other.type_id && self.attrs == other.attrs
    }
}

impl Eq for Mark {}

impl fmt::Debug for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attrs.is_empty() {
            write!(f, "{}", self.mark_type().name())
        } else {
            write!(f, "{}({})", self.mark_type().name(), self.attrs.to_value())
        }
    }
}

// ── MarkSet ───────────────────────────────────────────────────────────────

/// An immutable set of marks, ordered by type rank.
#[derive(Clone)]
pub struct MarkSet {
    marks: std::sync::Arc<[Mark]>,
}

impl MarkSet {
    pub fn empty() -> MarkSet {
        static EMPTY: OnceLock<MarkSet> = OnceLock::new();
        EMPTY
            .get_or_init(|| MarkSet {
                marks: std::sync::Arc::from(Vec::new()),
            })
            .clone()
    }

    /// Build a set from marks in arbitrary order; sorts by rank (stable).
    pub fn from_vec(mut marks: Vec<Mark>) -> MarkSet {
        marks.sort_by_key(|m| m.mark_type().rank());
        MarkSet::from_sorted(marks)
    }

    fn from_sorted(marks: Vec<Mark>) -> MarkSet {
        MarkSet {
            marks: std::sync::Arc::from(marks),
        }
    }

    pub fn single(mark: Mark) -> MarkSet {
        MarkSet::from_sorted(vec![mark])
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Mark> {
        self.marks.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mark> {
        self.marks.iter()
    }

    pub fn as_slice(&self) -> &[Mark] {
        &self.marks
    }

    pub fn contains(&self, mark: &Mark) -> bool {
        mark.is_in_set(self)
    }

    pub fn contains_type(&self, t: MarkTypeId) -> bool {
        self.marks.iter().any(|m| m.type_id() == t)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.iter().map(Mark::to_json).collect())
    }
}

impl Default for MarkSet {
    fn default() -> MarkSet {
        MarkSet::empty()
    }
}

impl PartialEq for MarkSet {
    fn eq(&self, other: &MarkSet) -> bool {
        *self.marks == *other.marks
    }
}

impl Eq for MarkSet {}

impl fmt::Debug for MarkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.marks.iter()).finish()
    }
}

impl FromIterator<Mark> for MarkSet {
    fn from_iter<I: IntoIterator<Item = Mark>>(iter: I) -> MarkSet {
        MarkSet::from_vec(iter.into_iter().collect())
    }
}
