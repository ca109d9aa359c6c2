//! Shared fixtures for unit tests: a basic document schema (with parse and
//! serialize specs wired in) and small tree builders.

use std::sync::Arc;

use serde_json::Value;

use crate::from_dom::ParseRule;
use crate::mark::MarkSet;
use crate::node::Node;
use crate::schema::{
    Attrs, AttributeSpec, MarkSpec, NodeSpec, NodeToDom, Schema, SchemaSpec,
};
use crate::to_dom::OutputSpec;

fn attrs_of(pairs: &[(&str, Value)]) -> Vec<(String, AttributeSpec)> {
    pairs
        .iter()
        .map(|(name, default)| {
            (
                name.to_string(),
                AttributeSpec {
                    default: Some(default.clone()),
                    compute: None,
                },
            )
        })
        .collect()
}

fn simple_to_dom(tag: &'static str) -> NodeToDom {
    Arc::new(move |_: &Node| OutputSpec::container(tag))
}

pub(crate) fn basic_schema() -> Schema {
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
                to_dom: Some(simple_to_dom("p")),
                parse_dom: vec![ParseRule {
                    tag: Some("p".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "blockquote".to_string(),
            NodeSpec {
                content: Some("block+".into()),
                group: Some("block".into()),
                defining: true,
                to_dom: Some(simple_to_dom("blockquote")),
                parse_dom: vec![ParseRule {
                    tag: Some("blockquote".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "horizontal_rule".to_string(),
            NodeSpec {
                group: Some("block".into()),
                to_dom: Some(Arc::new(|_: &Node| OutputSpec::elem("hr", vec![]))),
                parse_dom: vec![ParseRule {
                    tag: Some("hr".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "heading".to_string(),
            NodeSpec {
                content: Some("inline*".into()),
                group: Some("block".into()),
                defining: true,
                attrs: attrs_of(&[("level", Value::from(1))]),
                to_dom: Some(Arc::new(|node: &Node| {
                    let level = node
                        .attr("level")
                        .and_then(Value::as_u64)
                        .unwrap_or(1);
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
                    OutputSpec::elem("pre", vec![OutputSpec::elem("code", vec![OutputSpec::Hole])])
                })),
                parse_dom: vec![ParseRule {
                    tag: Some("pre".into()),
                    preserve_whitespace: Some(crate::from_dom::WhitespacePolicy::Full),
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
                to_dom: Some(simple_to_dom("ul")),
                parse_dom: vec![ParseRule {
                    tag: Some("ul".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "ordered_list".to_string(),
            NodeSpec {
                content: Some("list_item+".into()),
                group: Some("block".into()),
                attrs: attrs_of(&[("order", Value::from(1))]),
                to_dom: Some(simple_to_dom("ol")),
                parse_dom: vec![ParseRule {
                    tag: Some("ol".into()),
                    get_attrs: Some(Arc::new(|el: &crate::dom::DomElement| {
                        let order = el
                            .attr("start")
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(1);
                        Some(Attrs::from_pairs([(
                            "order".to_string(),
                            Value::from(order),
                        )]))
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
        (
            "list_item".to_string(),
            NodeSpec {
                content: Some("paragraph block*".into()),
                defining: true,
                to_dom: Some(simple_to_dom("li")),
                parse_dom: vec![ParseRule {
                    tag: Some("li".into()),
                    ..Default::default()
                }],
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
            "image".to_string(),
            NodeSpec {
                inline: true,
                group: Some("inline".into()),
                draggable: true,
                attrs: vec![
                    ("src".to_string(), AttributeSpec::required()),
                    (
                        "alt".to_string(),
                        AttributeSpec::with_default(Value::Null),
                    ),
                    (
                        "title".to_string(),
                        AttributeSpec::with_default(Value::Null),
                    ),
                ],
                to_dom: Some(Arc::new(|node: &Node| {
                    let mut attrs = Vec::new();
                    if let Some(src) = node.attr("src").and_then(Value::as_str) {
                        attrs.push(("src".to_string(), src.to_string()));
                    }
                    if let Some(alt) = node.attr("alt").and_then(Value::as_str) {
                        attrs.push(("alt".to_string(), alt.to_string()));
                    }
                    OutputSpec::elem_with_attrs("img", attrs, vec![])
                })),
                parse_dom: vec![ParseRule {
                    tag: Some("img[src]".into()),
                    get_attrs: Some(Arc::new(|el: &crate::dom::DomElement| {
                        let src = el.attr("src")?;
                        let mut pairs = vec![("src".to_string(), Value::from(src))];
                        if let Some(alt) = el.attr("alt") {
                            pairs.push(("alt".to_string(), Value::from(alt)));
                        }
                        Some(Attrs::from_pairs(pairs))
                    })),
                    ..Default::default()
                }],
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
                parse_dom: vec![ParseRule {
                    tag: Some("br".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        ),
    ];

    let marks = vec![
        (
            "em".to_string(),
            MarkSpec {
                to_dom: Some(Arc::new(|_, _| OutputSpec::elem("em", vec![]))),
                parse_dom: vec![
                    ParseRule {
                        tag: Some("i".into()),
                        ..Default::default()
                    },
                    ParseRule {
                        tag: Some("em".into()),
                        ..Default::default()
                    },
                    ParseRule {
                        style: Some("font-style=italic".into()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        ),
        (
            "strong".to_string(),
            MarkSpec {
                to_dom: Some(Arc::new(|_, _| OutputSpec::elem("strong", vec![]))),
                parse_dom: vec![
                    ParseRule {
                        tag: Some("strong".into()),
                        ..Default::default()
                    },
                    ParseRule {
                        tag: Some("b".into()),
                        ..Default::default()
                    },
                    ParseRule {
                        style: Some("font-weight".into()),
                        get_style_attrs: Some(Arc::new(|value: &str| {
                            let bold = value == "bold"
                                || value == "bolder"
                                || value.parse::<u32>().map(|w| w >= 500).unwrap_or(false);
                            if bold {
                                Some(Attrs::empty())
                            } else {
                                None
                            }
                        })),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        ),
        (
            "link".to_string(),
            MarkSpec {
                attrs: vec![
                    ("href".to_string(), AttributeSpec::required()),
                    (
                        "title".to_string(),
                        AttributeSpec::with_default(Value::Null),
                    ),
                ],
                inclusive: Some(false),
                to_dom: Some(Arc::new(|mark: &crate::mark::Mark, _| {
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
                    get_attrs: Some(Arc::new(|el: &crate::dom::DomElement| {
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
                parse_dom: vec![ParseRule {
                    tag: Some("code".into()),
                    ..Default::default()
                }],
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

pub(crate) fn doc(schema: &Schema, content: Vec<Node>) -> Node {
    schema
        .node("doc", None, content, MarkSet::empty())
        .expect("valid doc")
}

pub(crate) fn p(schema: &Schema, content: Vec<Node>) -> Node {
    schema
        .node("paragraph", None, content, MarkSet::empty())
        .expect("valid paragraph")
}

pub(crate) fn blockquote(schema: &Schema, content: Vec<Node>) -> Node {
    schema
        .node("blockquote", None, content, MarkSet::empty())
        .expect("valid blockquote")
}

pub(crate) fn li(schema: &Schema, content: Vec<Node>) -> Node {
    schema
        .node("list_item", None, content, MarkSet::empty())
        .expect("valid list item")
}

pub(crate) fn ul(schema: &Schema, content: Vec<Node>) -> Node {
    schema
        .node("bullet_list", None, content, MarkSet::empty())
        .expect("valid bullet list")
}

pub(crate) fn text(schema: &Schema, value: &str) -> Node {
    schema.text(value).expect("non-empty text")
}

pub(crate) fn em_text(schema: &Schema, value: &str) -> Node {
    let em = schema.mark("em", None).expect("em mark");
    schema
        .text_with_marks(value, MarkSet::single(em))
        .expect("non-empty text")
}

pub(crate) fn strong_text(schema: &Schema, value: &str) -> Node {
    let strong = schema.mark("strong", None).expect("strong mark");
    schema
        .text_with_marks(value, MarkSet::single(strong))
        .expect("non-empty text")
}
