//! richdoc — schema-validated rich-text document model.
//!
//! The data foundation of a collaborative editor: a persistent tree of typed
//! nodes carrying typed marks, together with the algorithms that give the
//! tree editorial meaning.
//!
//! # Module map
//!
//! | Module      | Role                                                      |
//! |-------------|-----------------------------------------------------------|
//! | `mark`      | Ordered, deduplicated sets of typed annotations           |
//! | `fragment`  | Immutable child sequences with cached size                |
//! | `node`      | Immutable tree elements (including text nodes)            |
//! | `resolve`   | Integer position → ancestor-path decoding                 |
//! | `replace`   | Open-ended slices and the splicing algorithm              |
//! | `content`   | Compiled content expressions (NFA → DFA)                  |
//! | `schema`    | Node/mark type compilation, attributes, exclusion graph   |
//! | `dom`       | The DOM-shaped structured tree parser/serializer target   |
//! | `to_dom`    | Output templates with a single content hole               |
//! | `from_dom`  | Rule-driven structured-tree → document conversion         |
//!
//! Documents are immutable and structurally shared; every operation returns
//! fresh values. All public types are `Send + Sync` and can be published to
//! other threads after construction.

pub mod content;
pub mod dom;
pub mod fragment;
pub mod from_dom;
pub mod mark;
pub mod node;
pub mod replace;
pub mod resolve;
pub mod schema;
pub mod to_dom;

#[cfg(test)]
pub(crate) mod test_util;

pub use content::{ContentError, ContentMatch};
pub use dom::{DomElement, DomNode};
pub use fragment::Fragment;
pub use from_dom::{
    ContentElement, DomParser, FindPosition, ParseOptions, ParseRule, RuleAction,
    WhitespacePolicy,
};
pub use mark::{Mark, MarkSet};
pub use node::Node;
pub use replace::{ReplaceError, Slice};
pub use resolve::{NodeRange, PositionOutOfRange, ResolvedPos};
pub use schema::{
    Attribute, AttributeSpec, Attrs, MarkSpec, MarkType, MarkTypeId, NodeSpec, NodeType,
    NodeTypeId, Schema, SchemaError, SchemaSpec, Whitespace,
};
pub use to_dom::{DomSerializer, OutputSpec, SerializeError, SerializeOptions};
