//! Rule-driven conversion of a structured tree into a schema-valid
//! document.
//!
//! A [`DomParser`] holds tag rules and style rules, stably sorted by
//! descending priority with ties broken by schema order. Parsing never
//! fails: content that does not fit is wrapped (via the content-match
//! wrapping search), padded with synthesized filler, or dropped.
//!
//! Style rule keys use prefix-plus-`=` matching: a rule's `style` is either
//! a bare property name or `property=value`, the latter requiring value
//! equality.

mod context;

use std::fmt;
use std::sync::Arc;

use crate::dom::{DomElement, DomNode};
use crate::fragment::Fragment;
use crate::node::Node;
use crate::replace::Slice;
use crate::resolve::ResolvedPos;
use crate::schema::{Attrs, Schema};

use context::ParseContext;

// ── Rules ─────────────────────────────────────────────────────────────────

/// What applying a rule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Produce a node of the named type.
    Node(String),
    /// Wrap the element's content in a mark of the named type.
    Mark(String),
    /// Drop the element and its content.
    Ignore,
    /// Parse the element's content as if the element were not there.
    Skip,
    /// Close the current parent before parsing the element's content.
    CloseParent,
}

/// Whitespace handling requested by a rule (or parse options). Absent means
/// "inherit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitespacePolicy {
    /// Collapse runs of whitespace to single spaces.
    Collapse,
    /// Keep whitespace, but normalize newlines to spaces.
    Preserve,
    /// Keep whitespace exactly.
    Full,
}

pub type GetAttrs = Arc<dyn Fn(&DomElement) -> Option<Attrs> + Send + Sync>;
pub type GetStyleAttrs = Arc<dyn Fn(&str) -> Option<Attrs> + Send + Sync>;
pub type GetContent = Arc<dyn Fn(&DomElement, &Schema) -> Fragment + Send + Sync>;
pub type RuleFromNode = Arc<dyn Fn(&DomNode) -> Option<ParseRule> + Send + Sync>;

/// Locates the element whose children form a matched element's content.
#[derive(Clone)]
pub enum ContentElement {
    /// A selector resolved inside the matched element.
    Selector(String),
    /// A function picking the content element.
    ByFn(Arc<dyn Fn(&DomElement) -> Option<DomElement> + Send + Sync>),
}

/// One parse rule: a tag or style selector plus the action to take.
#[derive(Clone, Default)]
pub struct ParseRule {
    /// Tag selector (for element rules).
    pub tag: Option<String>,
    /// Namespace the element must carry (when set).
    pub namespace: Option<String>,
    /// Style key (for style rules): `property` or `property=value`.
    pub style: Option<String>,
    /// Order among rules; higher runs first. Defaults to 50.
    pub priority: Option<i32>,
    /// When false, further rules may match the same element after this one.
    pub consuming: Option<bool>,
    /// A context path expression (`"blockquote/list_item/"`,
    /// `|`-separated alternatives, `//` for any ancestor chain).
    pub context: Option<String>,
    /// The action; filled in from the owning node/mark spec when absent.
    pub action: Option<RuleAction>,
    pub attrs: Option<Attrs>,
    /// Computes attrs from the element; `None` result rejects the rule.
    pub get_attrs: Option<GetAttrs>,
    /// Computes attrs from a style value; `None` result rejects the rule.
    pub get_style_attrs: Option<GetStyleAttrs>,
    pub content_element: Option<ContentElement>,
    /// Replaces the recursive content parse.
    pub get_content: Option<GetContent>,
    pub preserve_whitespace: Option<WhitespacePolicy>,
}

impl ParseRule {
    /// A tag rule producing the named node type.
    pub fn tag_node(tag: &str, node: &str) -> ParseRule {
        ParseRule {
            tag: Some(tag.to_string()),
            action: Some(RuleAction::Node(node.to_string())),
            ..Default::default()
        }
    }

    /// A tag rule producing the named mark type.
    pub fn tag_mark(tag: &str, mark: &str) -> ParseRule {
        ParseRule {
            tag: Some(tag.to_string()),
            action: Some(RuleAction::Mark(mark.to_string())),
            ..Default::default()
        }
    }

    /// A style rule producing the named mark type.
    pub fn style_mark(style: &str, mark: &str) -> ParseRule {
        ParseRule {
            style: Some(style.to_string()),
            action: Some(RuleAction::Mark(mark.to_string())),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> ParseRule {
        self.priority = Some(priority);
        self
    }

    pub fn with_context(mut self, context: &str) -> ParseRule {
        self.context = Some(context.to_string());
        self
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> ParseRule {
        self.attrs = Some(attrs);
        self
    }

    pub fn with_get_attrs(mut self, f: GetAttrs) -> ParseRule {
        self.get_attrs = Some(f);
        self
    }

    fn priority_or_default(&self) -> i32 {
        self.priority.unwrap_or(50)
    }
}

impl fmt::Debug for ParseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseRule")
            .field("tag", &self.tag)
            .field("style", &self.style)
            .field("action", &self.action)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// ── Options ───────────────────────────────────────────────────────────────

/// A source position to resolve to a document position: a child-index path
/// into the parsed tree plus an offset (a character offset inside a text
/// node, or a child index on an element).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindPosition {
    pub path: Vec<usize>,
    pub offset: usize,
}

/// Options threaded through a parse.
#[derive(Clone, Default)]
pub struct ParseOptions {
    pub preserve_whitespace: Option<WhitespacePolicy>,
    /// Parse the content into this node's type (defaults to the schema's
    /// top node).
    pub top_node: Option<Node>,
    /// Resolved position describing the context the parse occurs in, used
    /// by rule `context` matching and textblock synthesis.
    pub context: Option<ResolvedPos>,
    /// Overrides rule lookup per source node.
    pub rule_from_node: Option<RuleFromNode>,
    /// Source positions to resolve into document positions.
    pub find_positions: Vec<FindPosition>,
}

// ── DomParser ─────────────────────────────────────────────────────────────

/// A schema-parameterized parser from the structured tree to documents.
pub struct DomParser {
    schema: Schema,
    tags: Vec<ParseRule>,
    styles: Vec<ParseRule>,
}

impl DomParser {
    /// Build a parser from a rule list. Rules are stably sorted by
    /// descending priority, so equal priorities keep their given order.
    pub fn new(schema: Schema, mut rules: Vec<ParseRule>) -> DomParser {
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority_or_default()));
        let mut tags = Vec::new();
        let mut styles = Vec::new();
        for rule in rules {
            if rule.style.is_some() {
                styles.push(rule);
            } else if rule.tag.is_some() {
                tags.push(rule);
            }
        }
        DomParser {
            schema,
            tags,
            styles,
        }
    }

    /// Build (and cache on the schema) a parser from the `parse_dom` rules
    /// in the schema's specs, stably sorted by descending priority.
    pub fn from_schema(schema: &Schema) -> Arc<DomParser> {
        const CACHE_KEY: &str = "dom_parser";
        if let Some(cached) = schema.cached_get(CACHE_KEY) {
            if let Ok(parser) = cached.downcast::<DomParser>() {
                return parser;
            }
        }
        let mut rules: Vec<ParseRule> = Vec::new();
        for mt in schema.mark_types() {
            for rule in &mt.spec().parse_dom {
                let mut rule = rule.clone();
                if rule.action.is_none() {
                    rule.action = Some(RuleAction::Mark(mt.name().to_string()));
                }
                rules.push(rule);
            }
        }
        for nt in schema.node_types() {
            for rule in &nt.spec().parse_dom {
                let mut rule = rule.clone();
                if rule.action.is_none() {
                    rule.action = Some(RuleAction::Node(nt.name().to_string()));
                }
                rules.push(rule);
            }
        }
        let parser = Arc::new(DomParser::new(schema.clone(), rules));
        schema.cached_set(CACHE_KEY, parser.clone());
        parser
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Parse the children of `root` into a document node.
    pub fn parse(&self, root: &DomElement, options: &ParseOptions) -> Node {
        let (node, _) = self.parse_with_positions(root, options);
        node
    }

    /// Parse, also resolving the options' find positions. The returned
    /// vector parallels `options.find_positions`.
    pub fn parse_with_positions(
        &self,
        root: &DomElement,
        options: &ParseOptions,
    ) -> (Node, Vec<Option<usize>>) {
        let mut context = ParseContext::new(self, options, false);
        context.add_all(root);
        let (result, finds) = context.finish();
        let node = match result {
            context::FinishResult::Node(node) => node,
            // A closed parse always has a typed top context.
            context::FinishResult::Fragment(fragment) => {
                let top = self.schema.top_node_type();
                top.create_and_fill(&self.schema, None, Some(fragment), Default::default())
                    .unwrap_or_else(|| {
                        // Last resort: an empty filled top node.
                        self.fallback_top()
                    })
            }
        };
        (node, finds)
    }

    /// Parse the children of `root` into an open slice.
    pub fn parse_slice(&self, root: &DomElement, options: &ParseOptions) -> Slice {
        let mut context = ParseContext::new(self, options, true);
        context.add_all(root);
        let (result, _) = context.finish();
        let fragment = match result {
            context::FinishResult::Fragment(fragment) => fragment,
            context::FinishResult::Node(node) => Fragment::from_node(node),
        };
        Slice::max_open(fragment, true)
    }

    fn fallback_top(&self) -> Node {
        let top = self.schema.top_node_type();
        top.create_and_fill(&self.schema, None, None, Default::default())
            .unwrap_or_else(|| {
                // A schema whose top node cannot self-construct would have
                // been rejected at compile time by the dead-end check.
                Node::new(
                    self.schema.clone(),
                    top.id(),
                    Attrs::empty(),
                    Fragment::empty(),
                    Default::default(),
                )
            })
    }

    /// Find the first tag rule matching an element, starting after
    /// `after` when given. Returns the rule index and its computed attrs.
    pub(crate) fn match_tag(
        &self,
        el: &DomElement,
        context: &ParseContext,
        after: Option<usize>,
    ) -> Option<(usize, Option<Attrs>)> {
        let start = after.map(|i| i + 1).unwrap_or(0);
        for (i, rule) in self.tags.iter().enumerate().skip(start) {
            let tag = match &rule.tag {
                Some(tag) => tag,
                None => continue,
            };
            if !el.matches(tag) {
                continue;
            }
            if let Some(ns) = &rule.namespace {
                if el.namespace() != Some(ns.as_str()) {
                    continue;
                }
            }
            if let Some(ctx) = &rule.context {
                if !context.matches_context(ctx) {
                    continue;
                }
            }
            let attrs = match &rule.get_attrs {
                Some(get) => match get(el) {
                    Some(attrs) => Some(attrs),
                    None => continue,
                },
                None => rule.attrs.clone(),
            };
            return Some((i, attrs));
        }
        None
    }

    /// Find the first style rule matching a declaration. The rule key is
    /// the property name, optionally followed by `=` and the exact value.
    pub(crate) fn match_style(
        &self,
        prop: &str,
        value: &str,
        context: &ParseContext,
        after: Option<usize>,
    ) -> Option<(usize, Option<Attrs>)> {
        let start = after.map(|i| i + 1).unwrap_or(0);
        for (i, rule) in self.styles.iter().enumerate().skip(start) {
            let style = match &rule.style {
                Some(style) => style,
                None => continue,
            };
            if !style.starts_with(prop) {
                continue;
            }
            if style.len() > prop.len() {
                let rest = &style[prop.len()..];
                if !rest.starts_with('=') || &rest[1..] != value {
                    continue;
                }
            }
            if let Some(ctx) = &rule.context {
                if !context.matches_context(ctx) {
                    continue;
                }
            }
            let attrs = match &rule.get_style_attrs {
                Some(get) => match get(value) {
                    Some(attrs) => Some(attrs),
                    None => continue,
                },
                None => rule.attrs.clone(),
            };
            return Some((i, attrs));
        }
        None
    }

    pub(crate) fn tag_rule(&self, index: usize) -> &ParseRule {
        &self.tags[index]
    }

    pub(crate) fn style_rule(&self, index: usize) -> &ParseRule {
        &self.styles[index]
    }
}

impl fmt::Debug for DomParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DomParser({} tag rules, {} style rules)",
            self.tags.len(),
            self.styles.len()
        )
    }
}
