#![allow(dead_code)]
//! Shared fixtures for the integration suites: the basic document schema,
//! tree builders, and a seeded generator for random documents.

use std::sync::Arc;

use serde_json::Value;

use richdoc::{
    Attrs, AttributeSpec, DomElement, MarkSet, MarkSpec, Node, NodeSpec, OutputSpec, ParseRule,
    Schema, SchemaSpec, WhitespacePolicy,
};

fn with_default(value: Value) -> AttributeSpec {
    AttributeSpec {
        default: Some(value),
        compute: None,
    }
}

fn container(tag: &'static str) -> Arc<dyn Fn(&Node) -> OutputSpec + Send + Sync> {
    Arc::new(move |_| OutputSpec::container(tag))
}

fn tag_rule(tag: &str) -> ParseRule {
    ParseRule {
        tag: Some(tag.to_string()),
        ..Default::default()
    }
}

pub fn basic_schema() -> Schema {
    let nodes = vec![
        (
            "doc".to_string(),
            NodeSpec {
                content: Some("block+".into()),
                ..Default::default()
            },
        ),
        (
            "paragraph".to_string(),
            NodeSpec {
                content: Some("inline*".into()),
                group: Some("block".into()),
                to_dom: Some(container("p")),
                parse_dom: vec![tag_rule("p")],
                ..Default::default()
            },
        ),
        (
            "blockquote".to_string(),
            NodeSpec {
                content: Some("block+".into()),
                group: Some("block".into()),
                defining: true,
                to_dom: Some(container("blockquote")),
                parse_dom: vec![tag_rule("blockquote")],
                ..Default::default()
            },
        ),
        (
            "horizontal_rule".to_string(),
            NodeSpec {
                group: Some("block".into()),
                to_dom: Some(Arc::new(|_: &Node| OutputSpec::elem("hr", vec![]))),
                parse_dom: vec![tag_rule("hr")],
                ..Default::default()
            },
        ),
        (
            "heading".to_string(),
            NodeSpec {
                content: Some("inline*".into()),
                group: Some("block".into()),
                defining: true,
                attrs: vec![("level".to_string(), with_default(Value::from(1)))],
                to_dom: Some(Arc::new(|node: &Node| {
                    let level = node.attr("level").and_then(Value::as_u64).unwrap_or(1);
                    OutputSpec::container(&format!("h{level}"))
                })),
                parse_dom: (1..=6)
                    .map(|level| ParseRule {
                        tag: Some(format!("h{level}")),
                        attrs: Some(Attrs::from_pairs([(
                            "level".to_string(),
                            Value::from(level),
                        )])),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
        ),
        (
            "code_block".to_string(),
            NodeSpec {
                content: Some("text*".into()),
                marks: Some("".into()),
                group: Some("block".into()),
                code: true,
                defining: true,
                to_dom: Some(Arc::new(|_: &Node| {
                    OutputSpec::elem(
                        "pre",
                        vec![OutputSpec::elem("code", vec![OutputSpec::Hole])],
                    )
                })),
                parse_dom: vec![ParseRule {
                    tag: Some("pre".into()),
                    preserve_whitespace: Some(WhitespacePolicy::Full),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "bullet_list".to_string(),
            NodeSpec {
                content: Some("list_item+".into()),
                group: Some("block".into()),
                to_dom: Some(container("ul")),
                parse_dom: vec![tag_rule("ul")],
                ..Default::default()
            },
        ),
        (
            "ordered_list".to_string(),
            NodeSpec {
                content: Some("list_item+".into()),
                group: Some("block".into()),
                attrs: vec![("order".to_string(), with_default(Value::from(1)))],
                to_dom: Some(container("ol")),
                parse_dom: vec![tag_rule("ol")],
                ..Default::default()
            },
        ),
        (
            "list_item".to_string(),
            NodeSpec {
                content: Some("paragraph block*".into()),
                defining: true,
                to_dom: Some(container("li")),
                parse_dom: vec![tag_rule("li")],
                ..Default::default()
            },
        ),
        (
            "text".to_string(),
            NodeSpec {
                inline: true,
                group: Some("inline".into()),
                ..Default::default()
            },
        ),
        (
            "hard_break".to_string(),
            NodeSpec {
                inline: true,
                group: Some("inline".into()),
                selectable: Some(false),
                to_dom: Some(Arc::new(|_: &Node| OutputSpec::elem("br", vec![]))),
                parse_dom: vec![tag_rule("br")],
                ..Default::default()
            },
        ),
    ];

    let marks = vec![
        (
            "em".to_string(),
            MarkSpec {
                to_dom: Some(Arc::new(|_, _| OutputSpec::elem("em", vec![]))),
                parse_dom: vec![tag_rule("i"), tag_rule("em")],
                ..Default::default()
            },
        ),
        (
            "strong".to_string(),
            MarkSpec {
                to_dom: Some(Arc::new(|_, _| OutputSpec::elem("strong", vec![]))),
                parse_dom: vec![tag_rule("strong"), tag_rule("b")],
                ..Default::default()
            },
        ),
        (
            "link".to_string(),
            MarkSpec {
                attrs: vec![
                    ("href".to_string(), AttributeSpec::default()),
                    ("title".to_string(), with_default(Value::Null)),
                ],
                inclusive: Some(false),
                to_dom: Some(Arc::new(|mark: &richdoc::Mark, _| {
                    let href = mark
                        .attrs()
                        .get("href")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    OutputSpec::elem_with_attrs("a", vec![("href".to_string(), href)], vec![])
                })),
                parse_dom: vec![ParseRule {
                    tag: Some("a[href]".into()),
                    get_attrs: Some(Arc::new(|el: &DomElement| {
                        let href = el.attr("href")?;
                        Some(Attrs::from_pairs([(
                            "href".to_string(),
                            Value::from(href),
                        )]))
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "code".to_string(),
            MarkSpec {
                to_dom: Some(Arc::new(|_, _| OutputSpec::elem("code", vec![]))),
                parse_dom: vec![tag_rule("code")],
                ..Default::default()
            },
        ),
    ];

    Schema::new(SchemaSpec {
        nodes,
        marks,
        top_node: None,
    })
    .expect("basic schema compiles")
}

// ── Builders ──────────────────────────────────────────────────────────────

pub fn node(schema: &Schema, name: &str, content: Vec<Node>) -> Node {
    schema
        .node(name, None, content, MarkSet::empty())
        .unwrap_or_else(|err| panic!("building {name}: {err}"))
}

pub fn doc(schema: &Schema, content: Vec<Node>) -> Node {
    node(schema, "doc", content)
}

pub fn p(schema: &Schema, content: Vec<Node>) -> Node {
    node(schema, "paragraph", content)
}

pub fn blockquote(schema: &Schema, content: Vec<Node>) -> Node {
    node(schema, "blockquote", content)
}

pub fn li(schema: &Schema, content: Vec<Node>) -> Node {
    node(schema, "list_item", content)
}

pub fn ul(schema: &Schema, content: Vec<Node>) -> Node {
    node(schema, "bullet_list", content)
}

pub fn hr(schema: &Schema) -> Node {
    node(schema, "horizontal_rule", Vec::new())
}

pub fn text(schema: &Schema, value: &str) -> Node {
    schema.text(value).expect("non-empty text")
}

pub fn marked(schema: &Schema, value: &str, marks: &[&str]) -> Node {
    let set = MarkSet::from_vec(
        marks
            .iter()
            .map(|name| schema.mark(name, None).expect("known mark"))
            .collect(),
    );
    schema.text_with_marks(value, set).expect("non-empty text")
}

// ── Seeded generation (LCG, no external dependencies) ─────────────────────

pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub fn range(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
    }
}

pub fn seeds() -> [u64; 12] {
    [
        0x5eed_c0de_u64,
        0x0000_0000_0000_0001_u64,
        0x0000_0000_0000_00ff_u64,
        0x0000_0000_00c0_ffee_u64,
        0x0123_4567_89ab_cdef_u64,
        0x1111_2222_3333_4444_u64,
        0x89ab_cdef_0123_4567_u64,
        0xfedc_ba98_7654_3210_u64,
        0x1357_9bdf_2468_ace0_u64,
        0x0f0f_f0f0_55aa_aa55_u64,
        0xa5a5_5a5a_dead_beef_u64,
        0x0000_0000_0000_4004_u64,
    ]
}

const WORDS: &[&str] = &[
    "alpha", "beta", "gamma", "delta", "omega", "quick", "brown", "fox", "lazy", "dog", "stone",
    "river", "cloud", "ember", "quill",
];

fn rand_word(rng: &mut Lcg) -> &'static str {
    WORDS[rng.range(WORDS.len() as u64) as usize]
}

/// A run of inline text with a random (possibly empty) mark set. Words are
/// joined with single spaces and never start or end with whitespace, so the
/// result survives whitespace normalization.
fn rand_inline(schema: &Schema, rng: &mut Lcg) -> Node {
    let words = 1 + rng.range(3) as usize;
    let value = (0..words)
        .map(|_| rand_word(rng))
        .collect::<Vec<_>>()
        .join(" ");
    match rng.range(5) {
        0 => marked(schema, &value, &["em"]),
        1 => marked(schema, &value, &["strong"]),
        2 => marked(schema, &value, &["em", "strong"]),
        _ => text(schema, &value),
    }
}

fn rand_paragraph(schema: &Schema, rng: &mut Lcg) -> Node {
    let runs = rng.range(4) as usize;
    let content: Vec<Node> = (0..runs).map(|_| rand_inline(schema, rng)).collect();
    p(schema, content)
}

fn rand_textblock(schema: &Schema, rng: &mut Lcg) -> Node {
    let runs = rng.range(4) as usize;
    let content: Vec<Node> = (0..runs).map(|_| rand_inline(schema, rng)).collect();
    if rng.range(5) == 0 {
        schema
            .node(
                "heading",
                Some(&Attrs::from_pairs([(
                    "level".to_string(),
                    Value::from(1 + rng.range(3)),
                )])),
                content,
                MarkSet::empty(),
            )
            .expect("valid heading")
    } else {
        p(schema, content)
    }
}

fn rand_block(schema: &Schema, rng: &mut Lcg, depth: usize) -> Node {
    match rng.range(if depth == 0 { 6 } else { 4 }) {
        0 if depth == 0 => blockquote(
            schema,
            (0..1 + rng.range(2))
                .map(|_| rand_block(schema, rng, depth + 1))
                .collect(),
        ),
        1 if depth == 0 => ul(
            schema,
            (0..1 + rng.range(2))
                .map(|_| li(schema, vec![rand_paragraph(schema, rng)]))
                .collect(),
        ),
        2 => hr(schema),
        _ => rand_textblock(schema, rng),
    }
}

/// Generate a schema-valid document from a seed.
pub fn random_doc(schema: &Schema, seed: u64) -> Node {
    let mut rng = Lcg::new(seed);
    let blocks = 1 + rng.range(4) as usize;
    let content: Vec<Node> = (0..blocks)
        .map(|_| rand_block(schema, &mut rng, 0))
        .collect();
    doc(schema, content)
}
