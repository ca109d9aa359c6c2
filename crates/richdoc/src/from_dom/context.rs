//! Parse state: the context stack, whitespace flags, pending marks, and the
//! recovery machinery (wrapping, filling, dropping).

use crate::content::ContentMatch;
use crate::dom::{DomElement, DomNode};
use crate::fragment::Fragment;
use crate::mark::{Mark, MarkSet};
use crate::node::Node;
use crate::schema::{Attrs, NodeTypeId, Schema, Whitespace};

use super::{ContentElement, DomParser, ParseOptions, ParseRule, RuleAction, WhitespacePolicy};

pub(crate) const OPT_PRESERVE_WS: u8 = 1;
pub(crate) const OPT_PRESERVE_WS_FULL: u8 = 2;
pub(crate) const OPT_OPEN_LEFT: u8 = 4;

const IGNORE_TAGS: &[&str] = &["head", "noscript", "object", "script", "style", "title"];
const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "canvas",
    "dd",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hgroup",
    "hr",
    "li",
    "noscript",
    "ol",
    "output",
    "p",
    "pre",
    "section",
    "table",
    "tfoot",
    "ul",
];
const LIST_TAGS: &[&str] = &["ol", "ul"];

fn is_ws_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | '\u{000c}')
}

fn ws_options_for(
    node_type: Option<&crate::schema::NodeType>,
    preserve: Option<WhitespacePolicy>,
    base: u8,
) -> u8 {
    let mut bits = match preserve {
        Some(WhitespacePolicy::Preserve) => OPT_PRESERVE_WS,
        Some(WhitespacePolicy::Full) => OPT_PRESERVE_WS | OPT_PRESERVE_WS_FULL,
        Some(WhitespacePolicy::Collapse) => 0,
        None => base & (OPT_PRESERVE_WS | OPT_PRESERVE_WS_FULL),
    };
    if let Some(t) = node_type {
        if t.whitespace() == Whitespace::Pre {
            bits |= OPT_PRESERVE_WS | OPT_PRESERVE_WS_FULL;
        }
    }
    bits
}

/// Pull directly nested lists into the preceding list item, a kludge for
/// source documents whose schema allows that shape.
fn normalize_list(el: &DomElement) -> DomElement {
    let mut out = DomElement::new(el.name().to_string());
    if let Some(ns) = el.namespace() {
        out = DomElement::with_namespace(el.name().to_string(), ns.to_string());
    }
    for (name, value) in el.attrs() {
        out.set_attr(name.to_string(), value.to_string());
    }
    let mut children: Vec<DomNode> = Vec::new();
    for child in el.children() {
        let name = child.as_element().map(|e| e.name().to_string());
        match name.as_deref() {
            Some(tag) if LIST_TAGS.contains(&tag) => {
                let prev_is_item = matches!(
                    children.last(),
                    Some(DomNode::Element(prev)) if prev.name() == "li"
                );
                if prev_is_item {
                    if let Some(DomNode::Element(prev)) = children.last_mut() {
                        prev.append(child.clone());
                        continue;
                    }
                }
                children.push(child.clone());
            }
            _ => children.push(child.clone()),
        }
    }
    out.with_children(children)
}

// ── NodeContext ───────────────────────────────────────────────────────────

pub(crate) struct NodeContext {
    pub(crate) id: usize,
    pub(crate) type_id: Option<NodeTypeId>,
    attrs: Option<Attrs>,
    marks: MarkSet,
    active_marks: MarkSet,
    solid: bool,
    match_: Option<ContentMatch>,
    content: Vec<Node>,
    options: u8,
}

pub(crate) enum FinishResult {
    Node(Node),
    Fragment(Fragment),
}

impl NodeContext {
    /// Find a wrapper chain making `node` fit here. An open context without
    /// a match yet first tries to fill before the node; a `Some(vec![])`
    /// result means the node fits directly.
    fn find_wrapping(&mut self, schema: &Schema, node: &Node) -> Option<Vec<NodeTypeId>> {
        if self.match_.is_none() {
            let type_id = match self.type_id {
                Some(t) => t,
                None => return Some(Vec::new()),
            };
            let start = schema.node_type(type_id).content_match(schema);
            if let Some(fill) = start.fill_before(&Fragment::from_node(node.clone()), false, 0) {
                self.match_ = start.match_fragment(&fill);
            } else {
                let wrap = start.find_wrapping(node.type_id());
                if wrap.is_some() {
                    self.match_ = Some(start);
                }
                return wrap;
            }
        }
        self.match_
            .as_ref()
            .and_then(|m| m.find_wrapping(node.type_id()))
    }

    fn finish(self, schema: &Schema, open_end: bool) -> FinishResult {
        let mut content_vec = self.content;
        if self.options & OPT_PRESERVE_WS == 0 {
            // Strip trailing whitespace from the last text node.
            let replacement = content_vec.last().and_then(|last| {
                let text = last.text_str()?;
                let trimmed = text.trim_end_matches(is_ws_char);
                if trimmed.len() == text.len() {
                    None
                } else if trimmed.is_empty() {
                    Some(None)
                } else {
                    Some(Some(last.with_text(trimmed.to_string())))
                }
            });
            match replacement {
                Some(None) => {
                    content_vec.pop();
                }
                Some(Some(node)) => {
                    let idx = content_vec.len() - 1;
                    content_vec[idx] = node;
                }
                None => {}
            }
        }
        let mut content = Fragment::from_array(content_vec);
        if !open_end {
            if let Some(m) = &self.match_ {
                if let Some(fill) = m.fill_before(&Fragment::empty(), true, 0) {
                    content = content.append(&fill);
                }
            }
        }
        match self.type_id {
            Some(t) => match schema.node_type(t).create(
                schema,
                self.attrs.as_ref(),
                content.clone(),
                self.marks.clone(),
            ) {
                Ok(node) => FinishResult::Node(node),
                Err(_) => FinishResult::Fragment(content),
            },
            None => FinishResult::Fragment(content),
        }
    }

}

struct FindState {
    path: Vec<usize>,
    offset: usize,
    pos: Option<usize>,
}

// ── ParseContext ──────────────────────────────────────────────────────────

pub(crate) struct ParseContext<'a> {
    parser: &'a DomParser,
    options: &'a ParseOptions,
    schema: Schema,
    is_open: bool,
    nodes: Vec<NodeContext>,
    open: usize,
    pending_marks: Vec<Mark>,
    needs_block: bool,
    finds: Vec<FindState>,
    path: Vec<usize>,
    next_id: usize,
}

impl<'a> ParseContext<'a> {
    pub(crate) fn new(
        parser: &'a DomParser,
        options: &'a ParseOptions,
        is_open: bool,
    ) -> ParseContext<'a> {
        let schema = parser.schema().clone();
        let top_options = ws_options_for(None, options.preserve_whitespace, 0)
            | if is_open { OPT_OPEN_LEFT } else { 0 };
        let top = if let Some(top_node) = &options.top_node {
            let t = top_node.type_id();
            NodeContext {
                id: 0,
                type_id: Some(t),
                attrs: Some(top_node.attrs().clone()),
                marks: MarkSet::empty(),
                active_marks: MarkSet::empty(),
                solid: true,
                match_: Some(schema.node_type(t).content_match(&schema)),
                content: Vec::new(),
                options: top_options,
            }
        } else if is_open {
            NodeContext {
                id: 0,
                type_id: None,
                attrs: None,
                marks: MarkSet::empty(),
                active_marks: MarkSet::empty(),
                solid: true,
                match_: None,
                content: Vec::new(),
                options: top_options,
            }
        } else {
            let t = schema.top_node_type().id();
            NodeContext {
                id: 0,
                type_id: Some(t),
                attrs: None,
                marks: MarkSet::empty(),
                active_marks: MarkSet::empty(),
                solid: true,
                match_: Some(schema.node_type(t).content_match(&schema)),
                content: Vec::new(),
                options: top_options,
            }
        };
        let finds = options
            .find_positions
            .iter()
            .map(|f| FindState {
                path: f.path.clone(),
                offset: f.offset,
                pos: None,
            })
            .collect();
        ParseContext {
            parser,
            options,
            schema,
            is_open,
            nodes: vec![top],
            open: 0,
            pending_marks: Vec::new(),
            needs_block: false,
            finds,
            path: Vec::new(),
            next_id: 1,
        }
    }

    fn top(&self) -> &NodeContext {
        &self.nodes[self.open]
    }

    fn top_mut(&mut self) -> &mut NodeContext {
        &mut self.nodes[self.open]
    }

    fn fresh_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn depth_of(&self, id: usize) -> Option<usize> {
        self.nodes[..=self.open].iter().position(|cx| cx.id == id)
    }

    // ── Walking the source tree ───────────────────────────────────────────

    /// Add all children of an element to the parse.
    pub(crate) fn add_all(&mut self, el: &DomElement) {
        let parent_is_block = BLOCK_TAGS.contains(&el.name());
        let mut prev: Option<&DomNode> = None;
        for (i, child) in el.children().iter().enumerate() {
            self.find_at_point(i);
            self.path.push(i);
            self.add_dom(child, prev, parent_is_block);
            self.path.pop();
            prev = Some(child);
        }
        self.find_at_point(el.children().len());
    }

    fn add_dom(&mut self, node: &DomNode, prev: Option<&DomNode>, parent_is_block: bool) {
        match node {
            DomNode::Text(value) => self.add_text_node(value, prev, parent_is_block),
            DomNode::Element(el) => {
                let styles = el.styles();
                if styles.is_empty() {
                    self.add_element(el, None);
                    return;
                }
                let marks = match self.read_styles(&styles) {
                    Some(marks) => marks,
                    // A style rule said ignore: drop the element entirely.
                    None => return,
                };
                let top_id = self.top().id;
                for mark in &marks {
                    self.add_pending_mark(mark.clone());
                }
                self.add_element(el, None);
                for mark in &marks {
                    self.remove_pending_mark(mark, top_id);
                }
            }
        }
    }

    fn add_text_node(&mut self, value: &str, prev: Option<&DomNode>, parent_is_block: bool) {
        let top = self.top();
        let options = top.options;
        let inline_ctx = match top.type_id {
            Some(t) => self.schema.node_type(t).inline_content(),
            None => {
                if let Some(first) = top.content.first() {
                    first.is_inline()
                } else {
                    !parent_is_block
                }
            }
        };
        if options & OPT_PRESERVE_WS_FULL == 0
            && !inline_ctx
            && !value.chars().any(|c| !is_ws_char(c))
        {
            self.find_inside_current();
            return;
        }
        let mut value = value.to_string();
        if options & OPT_PRESERVE_WS == 0 {
            value = collapse_ws(&value);
            if value.starts_with(' ') && self.open == self.nodes.len() - 1 {
                let node_before = self.top().content.last();
                let prev_is_br = matches!(
                    prev,
                    Some(DomNode::Element(el)) if el.name() == "br"
                );
                let strip = match node_before {
                    None => true,
                    Some(before) => {
                        prev_is_br
                            || before
                                .text_str()
                                .map(|t| t.ends_with(is_ws_char))
                                .unwrap_or(false)
                    }
                };
                if strip {
                    value.remove(0);
                }
            }
        } else if options & OPT_PRESERVE_WS_FULL == 0 {
            value = value
                .replace("\r\n", " ")
                .replace(['\r', '\n'], " ");
        } else {
            value = value.replace("\r\n", "\n").replace('\r', "\n");
        }
        let raw_len = value.chars().count();
        if !value.is_empty() {
            if let Ok(text) = self.schema.clone().text(&value) {
                self.insert_node(text);
            }
        }
        self.find_in_text(raw_len);
    }

    fn add_element(&mut self, el: &DomElement, match_after: Option<usize>) {
        let name = el.name().to_string();
        let normalized;
        let el = if LIST_TAGS.contains(&name.as_str()) {
            normalized = normalize_list(el);
            &normalized
        } else {
            el
        };

        let custom = self
            .options
            .rule_from_node
            .as_ref()
            .and_then(|f| f(&DomNode::Element(el.clone())));
        let (rule, attrs, rule_index) = match custom {
            Some(rule) => {
                let attrs = rule.attrs.clone();
                (Some(rule), attrs, None)
            }
            None => match self.parser.match_tag(el, self, match_after) {
                Some((i, attrs)) => (Some(self.parser.tag_rule(i).clone()), attrs, Some(i)),
                None => (None, None, None),
            },
        };

        let action = rule.as_ref().and_then(|r| r.action.clone());
        let is_ignore = match (&rule, &action) {
            (Some(_), Some(RuleAction::Ignore)) => true,
            (None, _) => IGNORE_TAGS.contains(&name.as_str()),
            _ => false,
        };
        if is_ignore {
            self.find_inside_current();
            return;
        }

        let is_passthrough = rule.is_none()
            || matches!(action, Some(RuleAction::Skip) | Some(RuleAction::CloseParent) | None);
        if is_passthrough {
            if matches!(action, Some(RuleAction::CloseParent)) {
                self.open = self.open.saturating_sub(1);
            }
            let old_needs_block = self.needs_block;
            let mut sync_target = None;
            if BLOCK_TAGS.contains(&name.as_str()) {
                let first_inline = self
                    .top()
                    .content
                    .first()
                    .map(Node::is_inline)
                    .unwrap_or(false);
                if first_inline && self.open > 0 {
                    self.open -= 1;
                }
                sync_target = Some(self.top().id);
                if self.top().type_id.is_none() {
                    self.needs_block = true;
                }
            } else if el.children().is_empty() {
                self.leaf_fallback(el);
                return;
            }
            self.add_all(el);
            if let Some(target) = sync_target {
                self.sync_to(target);
            }
            self.needs_block = old_needs_block;
            return;
        }

        let rule = match rule {
            Some(r) => r,
            None => return,
        };
        let continue_after = if rule.consuming == Some(false) {
            rule_index
        } else {
            None
        };
        self.add_element_by_rule(el, &rule, attrs, continue_after);
    }

    fn add_element_by_rule(
        &mut self,
        el: &DomElement,
        rule: &ParseRule,
        attrs: Option<Attrs>,
        continue_after: Option<usize>,
    ) {
        let schema = self.schema.clone();
        let mut entered = false;
        let mut mark: Option<Mark> = None;
        let mut leaf = false;
        match &rule.action {
            Some(RuleAction::Node(type_name)) => {
                let nt = match schema.get_node_type(type_name) {
                    Some(t) => t,
                    None => return,
                };
                if nt.is_leaf() {
                    leaf = true;
                    let node = nt.create(
                        &schema,
                        attrs.as_ref(),
                        Fragment::empty(),
                        MarkSet::empty(),
                    );
                    match node {
                        Ok(node) => {
                            if !self.insert_node(node) {
                                self.leaf_fallback(el);
                            }
                        }
                        Err(_) => self.leaf_fallback(el),
                    }
                } else {
                    entered = self.enter(nt.id(), attrs, rule.preserve_whitespace);
                    if !entered {
                        self.leaf_fallback(el);
                        return;
                    }
                }
            }
            Some(RuleAction::Mark(mark_name)) => {
                if let Some(mt) = schema.get_mark_type(mark_name) {
                    if let Ok(m) = mt.create(&schema, attrs.as_ref()) {
                        self.add_pending_mark(m.clone());
                        mark = Some(m);
                    }
                }
            }
            _ => return,
        }

        let start_id = self.top().id;
        if leaf {
            self.find_inside_current();
        } else if let Some(after) = continue_after {
            self.add_element(el, Some(after));
        } else if let Some(get_content) = &rule.get_content {
            self.find_inside_current();
            let content = get_content(el, &schema);
            for node in content.iter() {
                self.insert_node(node.clone());
            }
        } else {
            let content_owner;
            let content_el: &DomElement = match &rule.content_element {
                Some(ContentElement::Selector(sel)) => match el.query_selector(sel) {
                    Some(found) => {
                        content_owner = found.clone();
                        &content_owner
                    }
                    None => el,
                },
                Some(ContentElement::ByFn(f)) => match f(el) {
                    Some(found) => {
                        content_owner = found;
                        &content_owner
                    }
                    None => el,
                },
                None => el,
            };
            self.add_all(content_el);
        }
        if entered && self.sync_to(start_id) {
            self.open -= 1;
        }
        if let Some(mark) = mark {
            self.remove_pending_mark(&mark, start_id);
        }
    }

    /// Read the element's style declarations into marks. `None` means a
    /// style rule said to ignore the whole element.
    fn read_styles(&mut self, styles: &[(String, String)]) -> Option<Vec<Mark>> {
        let mut marks = Vec::new();
        'style: for (prop, value) in styles {
            let mut after: Option<usize> = None;
            loop {
                let (index, attrs) = match self.parser.match_style(prop, value, self, after) {
                    Some(found) => found,
                    None => continue 'style,
                };
                let rule = self.parser.style_rule(index);
                match &rule.action {
                    Some(RuleAction::Ignore) => return None,
                    Some(RuleAction::Mark(name)) => {
                        if let Some(mt) = self.schema.get_mark_type(name) {
                            if let Ok(mark) = mt.create(&self.schema, attrs.as_ref()) {
                                marks.push(mark);
                            }
                        }
                    }
                    _ => {}
                }
                if rule.consuming == Some(false) {
                    after = Some(index);
                } else {
                    break;
                }
            }
        }
        Some(marks)
    }

    fn leaf_fallback(&mut self, el: &DomElement) {
        if el.name() == "br" {
            let top_inline = self
                .top()
                .type_id
                .map(|t| self.schema.node_type(t).inline_content())
                .unwrap_or(false);
            if top_inline {
                self.add_text_node("\n", None, false);
            }
        }
    }

    // ── Context stack ─────────────────────────────────────────────────────

    /// Try to make room for `node`: directly, by filling, or by wrapping at
    /// some ancestor. Enters the wrappers on success.
    fn find_place(&mut self, node: &Node) -> bool {
        let schema = self.schema.clone();
        let mut route: Option<Vec<NodeTypeId>> = None;
        let mut sync_id = None;
        for depth in (0..=self.open).rev() {
            let cx = &mut self.nodes[depth];
            let found = cx.find_wrapping(&schema, node);
            if let Some(found) = found {
                let better = route
                    .as_ref()
                    .map(|r: &Vec<NodeTypeId>| r.len() > found.len())
                    .unwrap_or(true);
                if better {
                    let direct = found.is_empty();
                    route = Some(found);
                    sync_id = Some(self.nodes[depth].id);
                    if direct {
                        break;
                    }
                }
            }
            if self.nodes[depth].solid {
                break;
            }
        }
        let route = match route {
            Some(r) => r,
            None => return false,
        };
        if let Some(id) = sync_id {
            self.sync_to(id);
        }
        for t in route {
            self.enter_inner(t, None, false, None);
        }
        true
    }

    /// Insert a node at the current place, applying pending marks, updating
    /// the content match, and masking disallowed marks off the node.
    fn insert_node(&mut self, node: Node) -> bool {
        if node.is_inline() && self.needs_block && self.top().type_id.is_none() {
            if let Some(block) = self.textblock_from_context() {
                self.enter_inner(block, None, false, None);
            }
        }
        if !self.find_place(&node) {
            return false;
        }
        self.close_extra(false);
        let schema = self.schema.clone();
        self.apply_pending(node.type_id());
        let top = self.top_mut();
        if let Some(m) = top.match_.take() {
            top.match_ = m.match_type(node.type_id());
        }
        let top_type = top.type_id;
        let mut marks = top.active_marks.clone();
        for mark in node.marks().iter() {
            let allowed = match top_type {
                Some(t) => schema.node_type(t).allows_mark_type(mark.type_id()),
                None => true,
            };
            if allowed {
                marks = mark.add_to_set(&marks);
            }
        }
        let placed = node.mark(marks);
        self.top_mut().content.push(placed);
        true
    }

    /// Place a node of the given type and make it the top context.
    fn enter(
        &mut self,
        t: NodeTypeId,
        attrs: Option<Attrs>,
        preserve: Option<WhitespacePolicy>,
    ) -> bool {
        let schema = self.schema.clone();
        let probe = match schema
            .node_type(t)
            .create(&schema, attrs.as_ref(), Fragment::empty(), MarkSet::empty())
        {
            Ok(node) => node,
            Err(_) => return false,
        };
        if !self.find_place(&probe) {
            return false;
        }
        self.enter_inner(t, attrs, true, preserve);
        true
    }

    fn enter_inner(
        &mut self,
        t: NodeTypeId,
        attrs: Option<Attrs>,
        solid: bool,
        preserve: Option<WhitespacePolicy>,
    ) {
        self.close_extra(false);
        let schema = self.schema.clone();
        self.apply_pending(t);
        let id = self.fresh_id();
        let top = self.top_mut();
        if let Some(m) = top.match_.take() {
            top.match_ = m.match_type(t);
        }
        let mut options = ws_options_for(Some(schema.node_type(t)), preserve, top.options);
        if top.options & OPT_OPEN_LEFT != 0 && top.content.is_empty() {
            options |= OPT_OPEN_LEFT;
        }
        let marks = top.active_marks.clone();
        let match_ = if options & OPT_OPEN_LEFT != 0 {
            None
        } else {
            Some(schema.node_type(t).content_match(&schema))
        };
        self.nodes.push(NodeContext {
            id,
            type_id: Some(t),
            attrs,
            marks,
            active_marks: MarkSet::empty(),
            solid,
            match_,
            content: Vec::new(),
            options,
        });
        self.open += 1;
    }

    /// Fold contexts above `open` into their parents.
    fn close_extra(&mut self, open_end: bool) {
        let schema = self.schema.clone();
        while self.nodes.len() - 1 > self.open {
            let cx = match self.nodes.pop() {
                Some(cx) => cx,
                None => break,
            };
            match cx.finish(&schema, open_end) {
                FinishResult::Node(node) => {
                    if let Some(parent) = self.nodes.last_mut() {
                        parent.content.push(node);
                    }
                }
                FinishResult::Fragment(fragment) => {
                    if let Some(parent) = self.nodes.last_mut() {
                        parent.content.extend(fragment.iter().cloned());
                    }
                }
            }
        }
    }

    /// Pop the open pointer back to the context with the given id.
    fn sync_to(&mut self, id: usize) -> bool {
        match self.depth_of(id) {
            Some(depth) => {
                self.open = depth;
                true
            }
            None => false,
        }
    }

    pub(crate) fn finish(mut self) -> (FinishResult, Vec<Option<usize>>) {
        self.open = 0;
        self.close_extra(self.is_open);
        let schema = self.schema.clone();
        let top = match self.nodes.pop() {
            Some(top) => top,
            None => return (FinishResult::Fragment(Fragment::empty()), Vec::new()),
        };
        let result = top.finish(&schema, self.is_open);
        let finds = self.finds.iter().map(|f| f.pos).collect();
        (result, finds)
    }

    // ── Pending marks ─────────────────────────────────────────────────────

    fn add_pending_mark(&mut self, mark: Mark) {
        self.pending_marks.push(mark);
    }

    /// Move pending marks that the top context can hold into its active
    /// set.
    fn apply_pending(&mut self, _next_type: NodeTypeId) {
        let schema = self.schema.clone();
        let top_type = self.top().type_id;
        let pending = std::mem::take(&mut self.pending_marks);
        let mut remaining = Vec::with_capacity(pending.len());
        for mark in pending {
            let allowed = match top_type {
                Some(t) => schema.node_type(t).allows_mark_type(mark.type_id()),
                None => true,
            };
            let top = self.top_mut();
            if allowed && !mark.is_in_set(&top.active_marks) {
                top.active_marks = mark.add_to_set(&top.active_marks);
            } else {
                remaining.push(mark);
            }
        }
        self.pending_marks = remaining;
    }

    /// Undo a mark when its rule closes: drop it from the pending list if
    /// it never applied, otherwise deactivate it down to the context the
    /// rule started in.
    fn remove_pending_mark(&mut self, mark: &Mark, upto_id: usize) {
        if let Some(idx) = self.pending_marks.iter().rposition(|m| m == mark) {
            self.pending_marks.remove(idx);
            return;
        }
        let upto = self.depth_of(upto_id).unwrap_or(0);
        for depth in (upto..=self.open).rev() {
            let level = &mut self.nodes[depth];
            level.active_marks = mark.remove_from_set(&level.active_marks);
        }
    }

    // ── Context queries ───────────────────────────────────────────────────

    /// Whether the current parse point matches a context path expression.
    pub(crate) fn matches_context(&self, context: &str) -> bool {
        if context.contains('|') {
            return context
                .split('|')
                .any(|alt| self.matches_context(alt.trim()));
        }
        let parts: Vec<&str> = context.split('/').collect();
        let option = self.options.context.as_ref();
        let use_root = !self.is_open
            && match option {
                None => true,
                Some(opt) => Some(opt.parent().type_id()) == self.nodes[0].type_id,
            };
        let min_depth: isize =
            -(option.map(|o| o.depth() as isize + 1).unwrap_or(0)) + if use_root { 0 } else { 1 };
        self.match_context_parts(
            &parts,
            option,
            use_root,
            min_depth,
            parts.len() as isize - 1,
            self.open as isize,
        )
    }

    fn match_context_parts(
        &self,
        parts: &[&str],
        option: Option<&crate::resolve::ResolvedPos>,
        use_root: bool,
        min_depth: isize,
        mut i: isize,
        mut depth: isize,
    ) -> bool {
        while i >= 0 {
            let part = parts[i as usize];
            if part.is_empty() {
                if i as usize == parts.len() - 1 || i == 0 {
                    i -= 1;
                    continue;
                }
                let mut d = depth;
                while d >= min_depth {
                    if self.match_context_parts(parts, option, use_root, min_depth, i - 1, d) {
                        return true;
                    }
                    d -= 1;
                }
                return false;
            }
            let next: Option<NodeTypeId> = if depth > 0 || (depth == 0 && use_root) {
                self.nodes[depth as usize].type_id
            } else if let Some(opt) = option {
                if depth >= min_depth {
                    Some(opt.node((depth - min_depth) as usize).type_id())
                } else {
                    None
                }
            } else {
                None
            };
            match next {
                Some(t) => {
                    let ty = self.schema.node_type(t);
                    if ty.name() != part && !ty.is_in_group(part) {
                        return false;
                    }
                }
                None => return false,
            }
            depth -= 1;
            i -= 1;
        }
        true
    }

    /// A default textblock type fitting the surrounding context, used when
    /// inline content appears where no textblock is open.
    fn textblock_from_context(&self) -> Option<NodeTypeId> {
        if let Some(cx) = &self.options.context {
            let mut d = cx.depth() as isize;
            while d >= 0 {
                let depth = d as usize;
                if let Some(m) = cx.node(depth).content_match_at(cx.index_after(depth)) {
                    if let Some(deflt) = m.default_type() {
                        if deflt.is_textblock() && deflt.default_attrs().is_some() {
                            return Some(deflt.id());
                        }
                    }
                }
                d -= 1;
            }
        }
        self.schema
            .node_types()
            .find(|nt| nt.is_textblock() && nt.default_attrs().is_some())
            .map(|nt| nt.id())
    }

    // ── Source position tracking ──────────────────────────────────────────

    fn current_pos(&mut self) -> usize {
        self.close_extra(false);
        let mut pos = 0;
        for depth in (0..=self.open).rev() {
            for node in &self.nodes[depth].content {
                pos += node.node_size();
            }
            if depth > 0 {
                pos += 1;
            }
        }
        pos
    }

    /// Record finds pointing at child index `index` of the current parent.
    fn find_at_point(&mut self, index: usize) {
        if self.finds.is_empty() {
            return;
        }
        let path = self.path.clone();
        let pos = self.current_pos();
        for find in &mut self.finds {
            if find.pos.is_none() && find.path == path && find.offset == index {
                find.pos = Some(pos);
            }
        }
    }

    /// Record finds inside the current node (the element being skipped or
    /// parsed opaquely) at the current position.
    fn find_inside_current(&mut self) {
        if self.finds.is_empty() {
            return;
        }
        let path = self.path.clone();
        let pos = self.current_pos();
        for find in &mut self.finds {
            if find.pos.is_none() && find.path.len() >= path.len() && find.path.starts_with(&path) {
                find.pos = Some(pos);
            }
        }
    }

    /// Record finds inside the current text node, mapping text offsets.
    fn find_in_text(&mut self, inserted_len: usize) {
        if self.finds.is_empty() {
            return;
        }
        let path = self.path.clone();
        let pos = self.current_pos();
        for find in &mut self.finds {
            if find.pos.is_none() && find.path == path {
                let back = inserted_len.saturating_sub(find.offset);
                find.pos = Some(pos.saturating_sub(back));
            }
        }
    }
}

fn collapse_ws(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_ws = false;
    for c in value.chars() {
        if is_ws_char(c) {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}
