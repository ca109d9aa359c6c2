//! Compiled content expressions.
//!
//! Each node type's `content` expression (a small regex-like language over
//! child node types) compiles in three phases:
//!
//! 1. parse to an AST (group names resolve to the union of their members),
//! 2. lower to an NFA with ε-edges,
//! 3. subset-construct a DFA.
//!
//! A [`ContentMatch`] is one DFA state: an ordered list of
//! `(type, next-state)` transitions plus an accepting flag. Transition order
//! follows expression order, which keeps [`ContentMatch::fill_before`] and
//! [`ContentMatch::default_type`] deterministic.
//!
//! Ambiguous expressions are rejected at compile time: a nullable sequence
//! element whose first-set overlaps a following element (`paragraph?
//! paragraph`), and choice atoms resolving to overlapping type sets.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use thiserror::Error;

use crate::fragment::Fragment;
use crate::mark::MarkSet;
use crate::node::Node;
use crate::schema::{NodeType, NodeTypeId, Schema};

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("unexpected {found:?} in content expression {expr:?}")]
    Unexpected { found: String, expr: String },
    #[error("unknown node type or group {name:?} in content expression {expr:?}")]
    UnknownName { name: String, expr: String },
    #[error("zero-count quantifier in content expression {expr:?}")]
    ZeroQuantifier { expr: String },
    #[error("count range {min}..{max} is empty in content expression {expr:?}")]
    EmptyRange { min: u32, max: u32, expr: String },
    #[error("ambiguous content expression {expr:?}: {detail}")]
    Ambiguous { expr: String, detail: String },
    #[error("only non-generatable nodes ({nodes}) in a required position in {expr:?}")]
    DeadEnd { nodes: String, expr: String },
}

// ── DFA states ────────────────────────────────────────────────────────────

/// Handle of a DFA state in the schema's state arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchId(pub(crate) u32);

impl MatchId {
    /// The shared state of the empty expression: accepting, no transitions.
    pub(crate) const EMPTY: MatchId = MatchId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct MatchState {
    pub(crate) valid_end: bool,
    pub(crate) next: Vec<(NodeTypeId, MatchId)>,
}

impl MatchState {
    pub(crate) fn accepting() -> MatchState {
        MatchState {
            valid_end: true,
            next: Vec::new(),
        }
    }
}

// ── ContentMatch ──────────────────────────────────────────────────────────

/// A DFA state of a content expression: "how much of the parent's content
/// expression has been consumed".
#[derive(Clone)]
pub struct ContentMatch {
    schema: Schema,
    state: MatchId,
}

impl ContentMatch {
    pub(crate) fn new(schema: Schema, state: MatchId) -> ContentMatch {
        ContentMatch { schema, state }
    }

    /// Whether the content consumed so far satisfies the expression.
    pub fn valid_end(&self) -> bool {
        self.schema.state(self.state).valid_end
    }

    /// Advance by one child of the given type.
    pub fn match_type(&self, t: NodeTypeId) -> Option<ContentMatch> {
        self.schema
            .state(self.state)
            .next
            .iter()
            .find(|&&(term, _)| term == t)
            .map(|&(_, next)| ContentMatch::new(self.schema.clone(), next))
    }

    /// Fold [`ContentMatch::match_type`] over a whole fragment.
    pub fn match_fragment(&self, frag: &Fragment) -> Option<ContentMatch> {
        self.match_fragment_range(frag, 0, frag.child_count())
    }

    /// Fold over `frag[from..to]`.
    pub fn match_fragment_range(
        &self,
        frag: &Fragment,
        from: usize,
        to: usize,
    ) -> Option<ContentMatch> {
        let mut cur = self.clone();
        for i in from..to {
            cur = cur.match_type(frag.child(i).type_id())?;
        }
        Some(cur)
    }

    pub fn edge_count(&self) -> usize {
        self.schema.state(self.state).next.len()
    }

    /// The `i`-th outgoing transition.
    pub fn edge(&self, i: usize) -> (NodeTypeId, ContentMatch) {
        let (t, next) = self.schema.state(self.state).next[i];
        (t, ContentMatch::new(self.schema.clone(), next))
    }

    /// Whether the expression admits inline content in this state.
    pub fn inline_content(&self) -> bool {
        self.schema
            .state(self.state)
            .next
            .first()
            .map(|&(t, _)| self.schema.node_type(t).is_inline())
            .unwrap_or(false)
    }

    /// The first admissible type that can be created without explicit
    /// attributes, used to synthesize a default block when context demands.
    pub fn default_type(&self) -> Option<&NodeType> {
        self.schema
            .state(self.state)
            .next
            .iter()
            .map(|&(t, _)| self.schema.node_type(t))
            .find(|ty| !ty.is_text() && !ty.has_required_attrs())
    }

    /// Whether the two expressions share at least one admissible type.
    pub fn compatible(&self, other: &ContentMatch) -> bool {
        let this = &self.schema.state(self.state).next;
        let that = &other.schema.state(other.state).next;
        this.iter().any(|&(t, _)| that.iter().any(|&(u, _)| t == u))
    }

    /// Compute the shortest fragment of synthesized filler nodes that, when
    /// inserted between this state and `after[start_index..]`, produces a
    /// match, reaching an accepting state when `to_end`.
    ///
    /// Breadth-first over states with a seen-set on state identity; filler
    /// types must self-construct via `create_and_fill`.
    pub fn fill_before(
        &self,
        after: &Fragment,
        to_end: bool,
        start_index: usize,
    ) -> Option<Fragment> {
        let mut seen: HashSet<MatchId> = HashSet::from([self.state]);
        let mut queue: VecDeque<(MatchId, Vec<NodeTypeId>)> =
            VecDeque::from([(self.state, Vec::new())]);
        while let Some((state, types)) = queue.pop_front() {
            let here = ContentMatch::new(self.schema.clone(), state);
            if let Some(finished) =
                here.match_fragment_range(after, start_index, after.child_count())
            {
                if !to_end || finished.valid_end() {
                    if let Some(nodes) = self.construct_fillers(&types) {
                        return Some(Fragment::from_vec(nodes));
                    }
                    // A filler type failed to self-construct: keep searching
                    // for a longer route that avoids it.
                }
            }
            for &(t, next) in &self.schema.state(state).next {
                let ty = self.schema.node_type(t);
                if !ty.is_text() && !ty.has_required_attrs() && !seen.contains(&next) {
                    seen.insert(next);
                    let mut path = types.clone();
                    path.push(t);
                    queue.push_back((next, path));
                }
            }
        }
        None
    }

    fn construct_fillers(&self, types: &[NodeTypeId]) -> Option<Vec<Node>> {
        types
            .iter()
            .map(|&t| {
                self.schema
                    .node_type(t)
                    .create_and_fill(&self.schema, None, None, MarkSet::empty())
            })
            .collect()
    }

    /// Find the shortest chain of wrapper types such that each wrapper is
    /// admissible where it is inserted and the innermost admits `target`.
    /// Results are cached on the schema keyed by `(state, target)`.
    pub fn find_wrapping(&self, target: NodeTypeId) -> Option<Vec<NodeTypeId>> {
        let key = (self.state, target);
        if let Some(cached) = self.schema.wrap_cache_get(key) {
            return cached;
        }
        let computed = self.compute_wrapping(target);
        self.schema.wrap_cache_set(key, computed.clone());
        computed
    }

    fn compute_wrapping(&self, target: NodeTypeId) -> Option<Vec<NodeTypeId>> {
        struct Entry {
            state: MatchId,
            type_: Option<NodeTypeId>,
            via: Option<usize>,
        }
        let mut seen: HashSet<NodeTypeId> = HashSet::new();
        let mut entries = vec![Entry {
            state: self.state,
            type_: None,
            via: None,
        }];
        let mut active: VecDeque<usize> = VecDeque::from([0]);
        while let Some(idx) = active.pop_front() {
            let state = entries[idx].state;
            if self
                .schema
                .state(state)
                .next
                .iter()
                .any(|&(t, _)| t == target)
            {
                let mut result = Vec::new();
                let mut at = idx;
                while let (Some(t), Some(via)) = (entries[at].type_, entries[at].via) {
                    result.push(t);
                    at = via;
                }
                result.reverse();
                return Some(result);
            }
            let transitions = self.schema.state(state).next.clone();
            for (t, next) in transitions {
                let ty = self.schema.node_type(t);
                if !ty.is_leaf()
                    && !ty.has_required_attrs()
                    && !seen.contains(&t)
                    && (entries[idx].type_.is_none() || self.schema.state(next).valid_end)
                {
                    seen.insert(t);
                    entries.push(Entry {
                        state: ty.content_match(&self.schema).state,
                        type_: Some(t),
                        via: Some(idx),
                    });
                    active.push_back(entries.len() - 1);
                }
            }
        }
        None
    }
}

impl PartialEq for ContentMatch {
    fn eq(&self, other: &ContentMatch) -> bool {
        self.state == other.state && self.schema.same_as(&other.schema)
    }
}

impl fmt::Debug for ContentMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.schema.state(self.state);
        let names: Vec<&str> = state
            .next
            .iter()
            .map(|&(t, _)| self.schema.node_type(t).name())
            .collect();
        write!(
            f,
            "ContentMatch({}{})",
            names.join(", "),
            if state.valid_end { " ·" } else { "" }
        )
    }
}

// ── Expression AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    /// A resolved atom: a node name, or a group expanded to its members.
    Name(Vec<NodeTypeId>),
    Choice(Vec<Expr>),
    Seq(Vec<Expr>),
    Star(Box<Expr>),
    Plus(Box<Expr>),
    Opt(Box<Expr>),
    Range {
        min: u32,
        max: Option<u32>,
        expr: Box<Expr>,
    },
}

fn nullable(expr: &Expr) -> bool {
    match expr {
        Expr::Name(_) => false,
        Expr::Choice(exprs) => exprs.iter().any(nullable),
        Expr::Seq(exprs) => exprs.iter().all(nullable),
        Expr::Star(_) | Expr::Opt(_) => true,
        Expr::Plus(inner) => nullable(inner),
        Expr::Range { min, expr, .. } => *min == 0 || nullable(expr),
    }
}

fn first_set(expr: &Expr, out: &mut HashSet<NodeTypeId>) {
    match expr {
        Expr::Name(types) => out.extend(types.iter().copied()),
        Expr::Choice(exprs) => exprs.iter().for_each(|e| first_set(e, out)),
        Expr::Seq(exprs) => {
            for e in exprs {
                first_set(e, out);
                if !nullable(e) {
                    break;
                }
            }
        }
        Expr::Star(inner) | Expr::Plus(inner) | Expr::Opt(inner) => first_set(inner, out),
        Expr::Range { expr, .. } => first_set(expr, out),
    }
}

// ── Parser ────────────────────────────────────────────────────────────────

struct TokenStream<'a> {
    expr: &'a str,
    tokens: Vec<String>,
    pos: usize,
    types: &'a [NodeType],
    by_name: &'a HashMap<String, NodeTypeId>,
}

impl<'a> TokenStream<'a> {
    fn new(
        expr: &'a str,
        types: &'a [NodeType],
        by_name: &'a HashMap<String, NodeTypeId>,
    ) -> TokenStream<'a> {
        let mut tokens = Vec::new();
        let mut chars = expr.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if "()|?*+{},".contains(c) {
                tokens.push(c.to_string());
                chars.next();
            } else {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '-' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word.is_empty() {
                    // An unrecognized character; surface it as a token so the
                    // parser reports it.
                    word.push(c);
                    chars.next();
                }
                tokens.push(word);
            }
        }
        TokenStream {
            expr,
            tokens,
            pos: 0,
            types,
            by_name,
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn eat(&mut self, tok: &str) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err_unexpected(&self) -> ContentError {
        ContentError::Unexpected {
            found: self.peek().unwrap_or("end of expression").to_string(),
            expr: self.expr.to_string(),
        }
    }
}

fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ContentError> {
    let mut exprs = vec![parse_expr_seq(stream)?];
    while stream.eat("|") {
        exprs.push(parse_expr_seq(stream)?);
    }
    if exprs.len() == 1 {
        Ok(exprs.remove(0))
    } else {
        check_choice_overlap(stream, &exprs)?;
        Ok(Expr::Choice(exprs))
    }
}

fn parse_expr_seq(stream: &mut TokenStream) -> Result<Expr, ContentError> {
    let mut exprs = Vec::new();
    loop {
        exprs.push(parse_expr_subscript(stream)?);
        match stream.peek() {
            Some(")") | Some("|") | None => break,
            _ => {}
        }
    }
    if exprs.len() == 1 {
        Ok(exprs.remove(0))
    } else {
        check_seq_ambiguity(stream, &exprs)?;
        Ok(Expr::Seq(exprs))
    }
}

fn parse_expr_subscript(stream: &mut TokenStream) -> Result<Expr, ContentError> {
    let mut expr = parse_expr_atom(stream)?;
    loop {
        if stream.eat("+") {
            expr = Expr::Plus(Box::new(expr));
        } else if stream.eat("*") {
            expr = Expr::Star(Box::new(expr));
        } else if stream.eat("?") {
            expr = Expr::Opt(Box::new(expr));
        } else if stream.eat("{") {
            expr = parse_expr_range(stream, expr)?;
        } else {
            break;
        }
    }
    Ok(expr)
}

fn parse_num(stream: &mut TokenStream) -> Result<u32, ContentError> {
    let tok = stream.peek().ok_or_else(|| stream.err_unexpected())?;
    let n: u32 = tok.parse().map_err(|_| stream.err_unexpected())?;
    stream.pos += 1;
    Ok(n)
}

fn parse_expr_range(stream: &mut TokenStream, expr: Expr) -> Result<Expr, ContentError> {
    let min = parse_num(stream)?;
    let max = if stream.eat(",") {
        if stream.peek() == Some("}") {
            None
        } else {
            Some(parse_num(stream)?)
        }
    } else {
        Some(min)
    };
    if !stream.eat("}") {
        return Err(stream.err_unexpected());
    }
    if max == Some(0) {
        return Err(ContentError::ZeroQuantifier {
            expr: stream.expr.to_string(),
        });
    }
    if let Some(max) = max {
        if max < min {
            return Err(ContentError::EmptyRange {
                min,
                max,
                expr: stream.expr.to_string(),
            });
        }
    }
    Ok(Expr::Range {
        min,
        max,
        expr: Box::new(expr),
    })
}

fn parse_expr_atom(stream: &mut TokenStream) -> Result<Expr, ContentError> {
    if stream.eat("(") {
        let expr = parse_expr(stream)?;
        if !stream.eat(")") {
            return Err(stream.err_unexpected());
        }
        return Ok(expr);
    }
    let tok = match stream.peek() {
        Some(t) if t.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') => t.to_string(),
        _ => return Err(stream.err_unexpected()),
    };
    stream.pos += 1;
    if let Some(&id) = stream.by_name.get(&tok) {
        return Ok(Expr::Name(vec![id]));
    }
    let members: Vec<NodeTypeId> = stream
        .types
        .iter()
        .filter(|t| t.is_in_group(&tok))
        .map(|t| t.id())
        .collect();
    if members.is_empty() {
        return Err(ContentError::UnknownName {
            name: tok,
            expr: stream.expr.to_string(),
        });
    }
    Ok(Expr::Name(members))
}

/// Reject a nullable sequence element whose first-set overlaps an element
/// that may directly follow it (`paragraph? paragraph` and friends).
fn check_seq_ambiguity(stream: &TokenStream, exprs: &[Expr]) -> Result<(), ContentError> {
    for i in 0..exprs.len() {
        if !nullable(&exprs[i]) {
            continue;
        }
        let mut first_i = HashSet::new();
        first_set(&exprs[i], &mut first_i);
        for follower in &exprs[i + 1..] {
            let mut first_j = HashSet::new();
            first_set(follower, &mut first_j);
            if first_i.iter().any(|t| first_j.contains(t)) {
                return Err(ContentError::Ambiguous {
                    expr: stream.expr.to_string(),
                    detail: "an optional element may also match its successor".to_string(),
                });
            }
            if !nullable(follower) {
                break;
            }
        }
    }
    Ok(())
}

/// Reject choice atoms that resolve to overlapping type sets (identical or
/// overlapping groups).
fn check_choice_overlap(stream: &TokenStream, exprs: &[Expr]) -> Result<(), ContentError> {
    let atom_sets: Vec<&Vec<NodeTypeId>> = exprs
        .iter()
        .filter_map(|e| match e {
            Expr::Name(types) => Some(types),
            _ => None,
        })
        .collect();
    for (i, a) in atom_sets.iter().enumerate() {
        for b in &atom_sets[i + 1..] {
            if a.iter().any(|t| b.contains(t)) {
                return Err(ContentError::Ambiguous {
                    expr: stream.expr.to_string(),
                    detail: "choice branches resolve to overlapping types".to_string(),
                });
            }
        }
    }
    Ok(())
}

// ── NFA construction ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct NfaEdge {
    term: Option<NodeTypeId>,
    to: Option<usize>,
}

struct Nfa {
    nodes: Vec<Vec<NfaEdge>>,
}

/// A set of dangling edges, addressed as (node, edge index).
type Dangling = Vec<(usize, usize)>;

impl Nfa {
    fn new() -> Nfa {
        Nfa { nodes: vec![vec![]] }
    }

    fn node(&mut self) -> usize {
        self.nodes.push(Vec::new());
        self.nodes.len() - 1
    }

    fn edge(&mut self, from: usize, to: Option<usize>, term: Option<NodeTypeId>) -> (usize, usize) {
        self.nodes[from].push(NfaEdge { term, to });
        (from, self.nodes[from].len() - 1)
    }

    fn connect(&mut self, edges: &Dangling, to: usize) {
        for &(node, idx) in edges {
            self.nodes[node][idx].to = Some(to);
        }
    }

    fn compile(&mut self, expr: &Expr, from: usize) -> Dangling {
        match expr {
            Expr::Choice(exprs) => exprs
                .iter()
                .flat_map(|e| self.compile(e, from))
                .collect(),
            Expr::Seq(exprs) => {
                let mut cur = from;
                for (i, e) in exprs.iter().enumerate() {
                    let next = self.compile(e, cur);
                    if i == exprs.len() - 1 {
                        return next;
                    }
                    cur = self.node();
                    self.connect(&next, cur);
                }
                unreachable!("sequences are non-empty")
            }
            Expr::Star(inner) => {
                let loop_node = self.node();
                self.edge(from, Some(loop_node), None);
                let body = self.compile(inner, loop_node);
                self.connect(&body, loop_node);
                vec![self.edge(loop_node, None, None)]
            }
            Expr::Plus(inner) => {
                let loop_node = self.node();
                let body = self.compile(inner, from);
                self.connect(&body, loop_node);
                let again = self.compile(inner, loop_node);
                self.connect(&again, loop_node);
                vec![self.edge(loop_node, None, None)]
            }
            Expr::Opt(inner) => {
                let mut out = vec![self.edge(from, None, None)];
                out.extend(self.compile(inner, from));
                out
            }
            Expr::Range { min, max, expr } => {
                let mut cur = from;
                for _ in 0..*min {
                    let next = self.node();
                    let body = self.compile(expr, cur);
                    self.connect(&body, next);
                    cur = next;
                }
                match max {
                    None => {
                        let body = self.compile(expr, cur);
                        self.connect(&body, cur);
                    }
                    Some(max) => {
                        for _ in *min..*max {
                            let next = self.node();
                            self.edge(cur, Some(next), None);
                            let body = self.compile(expr, cur);
                            self.connect(&body, next);
                            cur = next;
                        }
                    }
                }
                vec![self.edge(cur, None, None)]
            }
            Expr::Name(types) => types
                .iter()
                .map(|&t| self.edge(from, None, Some(t)))
                .collect(),
        }
    }
}

// ── Subset construction ───────────────────────────────────────────────────

/// The ε-closure of a node, with pass-through single-ε nodes skipped.
fn null_from(nfa: &Nfa, node: usize) -> Vec<usize> {
    fn scan(nfa: &Nfa, node: usize, result: &mut Vec<usize>) {
        let edges = &nfa.nodes[node];
        if edges.len() == 1 && edges[0].term.is_none() {
            if let Some(to) = edges[0].to {
                return scan(nfa, to, result);
            }
        }
        result.push(node);
        for edge in edges {
            if edge.term.is_none() {
                if let Some(to) = edge.to {
                    if !result.contains(&to) {
                        scan(nfa, to, result);
                    }
                }
            }
        }
    }
    let mut result = Vec::new();
    scan(nfa, node, &mut result);
    result.sort_unstable_by(|a, b| b.cmp(a));
    result
}

struct DfaBuilder<'a> {
    nfa: &'a Nfa,
    arena: &'a mut Vec<MatchState>,
    labeled: HashMap<Vec<usize>, MatchId>,
}

impl<'a> DfaBuilder<'a> {
    fn explore(&mut self, states: Vec<usize>) -> MatchId {
        // Collect, per terminal (in first-seen order), the union of
        // ε-closures reachable through it.
        let mut out: Vec<(NodeTypeId, Vec<usize>)> = Vec::new();
        for &node in &states {
            for edge in &self.nfa.nodes[node] {
                let term = match edge.term {
                    Some(t) => t,
                    None => continue,
                };
                let to = match edge.to {
                    Some(to) => to,
                    None => continue,
                };
                let closure = null_from(self.nfa, to);
                let pos = match out.iter().position(|(t, _)| *t == term) {
                    Some(p) => p,
                    None => {
                        out.push((term, Vec::new()));
                        out.len() - 1
                    }
                };
                let set = &mut out[pos].1;
                for n in closure {
                    if !set.contains(&n) {
                        set.push(n);
                    }
                }
            }
        }
        let final_node = self.nfa.nodes.len() - 1;
        let id = MatchId(self.arena.len() as u32);
        self.arena.push(MatchState {
            valid_end: states.contains(&final_node),
            next: Vec::new(),
        });
        self.labeled.insert(states, id);
        let mut next = Vec::with_capacity(out.len());
        for (term, mut set) in out {
            set.sort_unstable_by(|a, b| b.cmp(a));
            let target = if let Some(&existing) = self.labeled.get(&set) {
                existing
            } else {
                self.explore(set)
            };
            next.push((term, target));
        }
        self.arena[id.index()].next = next;
        id
    }
}

/// Parse and compile one content expression into the schema's state arena.
pub(crate) fn compile_expr(
    expr: &str,
    types: &[NodeType],
    by_name: &HashMap<String, NodeTypeId>,
    arena: &mut Vec<MatchState>,
) -> Result<MatchId, ContentError> {
    let mut stream = TokenStream::new(expr, types, by_name);
    let ast = parse_expr(&mut stream)?;
    if stream.peek().is_some() {
        return Err(stream.err_unexpected());
    }

    let mut nfa = Nfa::new();
    let dangling = nfa.compile(&ast, 0);
    let accept = nfa.node();
    nfa.connect(&dangling, accept);

    let first_state = arena.len();
    let start = {
        let mut builder = DfaBuilder {
            nfa: &nfa,
            arena: &mut *arena,
            labeled: HashMap::new(),
        };
        builder.explore(null_from(&nfa, 0))
    };
    check_for_dead_ends(expr, types, arena, first_state)?;
    Ok(start)
}

/// A state that is not accepting and can only progress through text or
/// required-attr types can never be completed by synthesis.
fn check_for_dead_ends(
    expr: &str,
    types: &[NodeType],
    arena: &[MatchState],
    from: usize,
) -> Result<(), ContentError> {
    for state in &arena[from..] {
        if state.valid_end {
            continue;
        }
        let mut names = Vec::new();
        let mut dead = true;
        for &(t, _) in &state.next {
            let ty = &types[t.0 as usize];
            names.push(ty.name().to_string());
            if !(ty.is_text() || ty.has_required_attrs()) {
                dead = false;
            }
        }
        if dead {
            return Err(ContentError::DeadEnd {
                nodes: names.join(", "),
                expr: expr.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NodeSpec, Schema, SchemaSpec};
    use crate::test_util::basic_schema;

    fn match_for(schema: &Schema, name: &str) -> ContentMatch {
        schema
            .get_node_type(name)
            .expect("known type")
            .content_match(schema)
    }

    fn id_of(schema: &Schema, name: &str) -> crate::schema::NodeTypeId {
        schema.get_node_type(name).expect("known type").id()
    }

    fn schema_with_doc_content(content: &str) -> Result<Schema, crate::schema::SchemaError> {
        Schema::new(SchemaSpec {
            nodes: vec![
                (
                    "doc".into(),
                    NodeSpec {
                        content: Some(content.into()),
                        ..Default::default()
                    },
                ),
                (
                    "paragraph".into(),
                    NodeSpec {
                        content: Some("text*".into()),
                        group: Some("block".into()),
                        ..Default::default()
                    },
                ),
                (
                    "heading".into(),
                    NodeSpec {
                        content: Some("text*".into()),
                        group: Some("block".into()),
                        ..Default::default()
                    },
                ),
                (
                    "horizontal_rule".into(),
                    NodeSpec {
                        group: Some("block".into()),
                        ..Default::default()
                    },
                ),
                (
                    "text".into(),
                    NodeSpec {
                        inline: true,
                        ..Default::default()
                    },
                ),
            ],
            marks: vec![],
            top_node: None,
        })
    }

    #[test]
    fn matches_simple_sequence() {
        let schema = schema_with_doc_content("paragraph horizontal_rule paragraph").unwrap();
        let m = match_for(&schema, "doc");
        let p = id_of(&schema, "paragraph");
        let hr = id_of(&schema, "horizontal_rule");
        let m = m.match_type(p).unwrap();
        assert!(!m.valid_end());
        let m = m.match_type(hr).unwrap();
        let m = m.match_type(p).unwrap();
        assert!(m.valid_end());
    }

    #[test]
    fn rejects_wrong_type() {
        let schema = schema_with_doc_content("paragraph+").unwrap();
        let m = match_for(&schema, "doc");
        let hr = id_of(&schema, "horizontal_rule");
        assert!(m.match_type(hr).is_none());
    }

    #[test]
    fn group_names_resolve_to_members() {
        let schema = schema_with_doc_content("block+").unwrap();
        let m = match_for(&schema, "doc");
        assert!(m.match_type(id_of(&schema, "paragraph")).is_some());
        assert!(m.match_type(id_of(&schema, "horizontal_rule")).is_some());
        assert!(m.match_type(id_of(&schema, "text")).is_none());
    }

    #[test]
    fn quantifier_counts() {
        let schema = schema_with_doc_content("paragraph{2,3}").unwrap();
        let m = match_for(&schema, "doc");
        let p = id_of(&schema, "paragraph");
        let m1 = m.match_type(p).unwrap();
        assert!(!m1.valid_end());
        let m2 = m1.match_type(p).unwrap();
        assert!(m2.valid_end());
        let m3 = m2.match_type(p).unwrap();
        assert!(m3.valid_end());
        assert!(m3.match_type(p).is_none());
    }

    #[test]
    fn open_ended_range() {
        let schema = schema_with_doc_content("paragraph{2,}").unwrap();
        let p = id_of(&schema, "paragraph");
        let mut m = match_for(&schema, "doc");
        m = m.match_type(p).unwrap();
        assert!(!m.valid_end());
        m = m.match_type(p).unwrap();
        assert!(m.valid_end());
        m = m.match_type(p).unwrap();
        assert!(m.valid_end());
    }

    #[test]
    fn zero_quantifier_is_rejected() {
        let err = schema_with_doc_content("paragraph{0}").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::ZeroQuantifier { .. })
        ));
    }

    #[test]
    fn empty_range_is_rejected() {
        let err = schema_with_doc_content("paragraph{3,1}").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::EmptyRange { .. })
        ));
    }

    #[test]
    fn ambiguous_adjacency_is_rejected() {
        let err = schema_with_doc_content("paragraph? paragraph").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::Ambiguous { .. })
        ));
    }

    #[test]
    fn overlapping_choice_is_rejected() {
        let err = schema_with_doc_content("(block | paragraph)+").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::Ambiguous { .. })
        ));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = schema_with_doc_content("mystery+").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::UnknownName { .. })
        ));
    }

    #[test]
    fn dead_end_is_rejected() {
        // text has no default construction, so a required text position can
        // never be synthesized.
        let err = schema_with_doc_content("text").unwrap_err();
        assert!(matches!(
            err,
            crate::schema::SchemaError::Content(ContentError::DeadEnd { .. })
        ));
    }

    #[test]
    fn fill_before_synthesizes_missing_middle() {
        // Scenario: "paragraph horizontal_rule paragraph" filled between one
        // leading paragraph and one trailing paragraph needs a single hr.
        let schema = schema_with_doc_content("paragraph horizontal_rule paragraph").unwrap();
        let p = id_of(&schema, "paragraph");
        let m = match_for(&schema, "doc").match_type(p).unwrap();
        let after = {
            let node = schema
                .get_node_type("paragraph")
                .unwrap()
                .create_and_fill(&schema, None, None, crate::mark::MarkSet::empty())
                .unwrap();
            crate::fragment::Fragment::from_node(node)
        };
        let fill = m.fill_before(&after, true, 0).unwrap();
        assert_eq!(fill.child_count(), 1);
        assert_eq!(fill.child(0).node_type().name(), "horizontal_rule");
    }

    #[test]
    fn fill_before_empty_completion() {
        let schema = schema_with_doc_content("paragraph+").unwrap();
        let m = match_for(&schema, "doc");
        let fill = m
            .fill_before(&crate::fragment::Fragment::empty(), true, 0)
            .unwrap();
        assert_eq!(fill.child_count(), 1);
        assert_eq!(fill.child(0).node_type().name(), "paragraph");
    }

    #[test]
    fn find_wrapping_basic() {
        let schema = basic_schema();
        let doc_match = match_for(&schema, "doc");
        let li = id_of(&schema, "list_item");
        let wrap = doc_match.find_wrapping(li).unwrap();
        let names: Vec<&str> = wrap
            .iter()
            .map(|&t| schema.node_type(t).name())
            .collect();
        assert_eq!(names, ["bullet_list"]);
    }

    #[test]
    fn find_wrapping_is_cached() {
        let schema = basic_schema();
        let doc_match = match_for(&schema, "doc");
        let li = id_of(&schema, "list_item");
        let a = doc_match.find_wrapping(li);
        let b = doc_match.find_wrapping(li);
        assert_eq!(a, b);
    }

    #[test]
    fn no_wrapping_for_unreachable_type() {
        let schema = basic_schema();
        let p_match = match_for(&schema, "paragraph");
        let doc_id = id_of(&schema, "doc");
        assert!(p_match.find_wrapping(doc_id).is_none());
    }

    #[test]
    fn default_type_skips_text() {
        let schema = basic_schema();
        let p_match = match_for(&schema, "paragraph");
        // paragraph content is inline*; first non-text constructible type is
        // hard_break (text itself is skipped).
        let dt = p_match.default_type().unwrap();
        assert_ne!(dt.name(), "text");
    }

    #[test]
    fn compatible_shares_a_type() {
        let schema = basic_schema();
        let p = match_for(&schema, "paragraph");
        let h = match_for(&schema, "heading");
        let doc = match_for(&schema, "doc");
        assert!(p.compatible(&h));
        assert!(!p.compatible(&doc));
    }

    #[test]
    fn match_fragment_folds() {
        let schema = basic_schema();
        let doc_t = schema.get_node_type("doc").unwrap();
        let p = schema
            .get_node_type("paragraph")
            .unwrap()
            .create_and_fill(&schema, None, None, MarkSet::empty())
            .unwrap();
        let frag = Fragment::from_vec(vec![p.clone(), p]);
        let m = doc_t
            .content_match(&schema)
            .match_fragment(&frag)
            .unwrap();
        assert!(m.valid_end());
    }
}
