//! End-to-end structured-tree conversions: serializing documents, parsing
//! them back, and the parse/serialize round-trip on generated documents.

mod common;

use common::{basic_schema, blockquote, doc, hr, li, marked, p, random_doc, seeds, text, ul};
use richdoc::{
    dom, DomElement, DomNode, DomParser, DomSerializer, Node, ParseOptions,
};

fn serialize_to_html(node: &Node) -> String {
    let serializer = DomSerializer::from_schema(node.schema());
    let out = serializer
        .serialize_fragment(node.content(), &Default::default())
        .expect("serializable");
    dom::fragment_to_html(&out)
}

fn serialize_to_tree(node: &Node) -> DomElement {
    let serializer = DomSerializer::from_schema(node.schema());
    let out = serializer
        .serialize_fragment(node.content(), &Default::default())
        .expect("serializable");
    DomElement::new("body").with_children(out)
}

fn parse_tree(schema: &richdoc::Schema, root: &DomElement) -> Node {
    DomParser::from_schema(schema).parse(root, &ParseOptions::default())
}

#[test]
fn serializes_structured_document() {
    let schema = basic_schema();
    let d = doc(
        &schema,
        vec![
            p(&schema, vec![text(&schema, "intro")]),
            blockquote(
                &schema,
                vec![p(&schema, vec![marked(&schema, "quoted", &["em"])])],
            ),
            hr(&schema),
            ul(
                &schema,
                vec![li(&schema, vec![p(&schema, vec![text(&schema, "item")])])],
            ),
        ],
    );
    assert_eq!(
        serialize_to_html(&d),
        "<p>intro</p><blockquote><p><em>quoted</em></p></blockquote><hr><ul><li><p>item</p></li></ul>"
    );
}

#[test]
fn mark_runs_share_wrappers() {
    let schema = basic_schema();
    let d = doc(
        &schema,
        vec![p(
            &schema,
            vec![
                marked(&schema, "one", &["em"]),
                marked(&schema, "two", &["em", "strong"]),
                text(&schema, "tail"),
            ],
        )],
    );
    assert_eq!(
        serialize_to_html(&d),
        "<p><em>one<strong>two</strong></em>tail</p>"
    );
}

#[test]
fn parse_of_serialized_document_is_identity() {
    let schema = basic_schema();
    let d = doc(
        &schema,
        vec![
            p(
                &schema,
                vec![
                    text(&schema, "plain "),
                    marked(&schema, "emphasis", &["em"]),
                    text(&schema, " after"),
                ],
            ),
            blockquote(
                &schema,
                vec![
                    p(&schema, vec![text(&schema, "deep")]),
                    hr(&schema),
                ],
            ),
        ],
    );
    let tree = serialize_to_tree(&d);
    let back = parse_tree(&schema, &tree);
    assert_eq!(back, d);
}

#[test]
fn roundtrip_generated_documents() {
    let schema = basic_schema();
    for seed in seeds() {
        let d = random_doc(&schema, seed);
        let tree = serialize_to_tree(&d);
        let back = parse_tree(&schema, &tree);
        assert_eq!(back, d, "seed {seed:#x}: parse(serialize(doc)) != doc");
    }
}

#[test]
fn parses_recovery_scenarios() {
    let schema = basic_schema();
    // Block content loose in a list gets wrapped in a list item.
    let root = DomElement::new("body").with_child(
        DomElement::new("ul").with_child(DomElement::new("p").with_text("stray")),
    );
    let parsed = parse_tree(&schema, &root);
    assert_eq!(
        format!("{parsed}"),
        r#"doc(bullet_list(list_item(paragraph("stray"))))"#
    );
}

#[test]
fn parses_whitespace_scenario() {
    let schema = basic_schema();
    let root = DomElement::new("body")
        .with_text(" ")
        .with_child(
            DomElement::new("blockquote")
                .with_text(" ")
                .with_child(
                    DomElement::new("p")
                        .with_text("woo  \n  ")
                        .with_child(DomElement::new("em").with_text(" hooo")),
                )
                .with_text(" "),
        )
        .with_text(" ");
    let parsed = parse_tree(&schema, &root);
    let expected = doc(
        &schema,
        vec![blockquote(
            &schema,
            vec![p(
                &schema,
                vec![text(&schema, "woo "), marked(&schema, "hooo", &["em"])],
            )],
        )],
    );
    assert_eq!(parsed, expected);
}

#[test]
fn link_attrs_roundtrip() {
    let schema = basic_schema();
    let link = schema
        .mark(
            "link",
            Some(&richdoc::Attrs::from_pairs([(
                "href".to_string(),
                serde_json::Value::from("https://example.com/"),
            )])),
        )
        .unwrap();
    let d = doc(
        &schema,
        vec![p(
            &schema,
            vec![schema
                .text_with_marks("click", richdoc::MarkSet::single(link))
                .unwrap()],
        )],
    );
    assert_eq!(
        serialize_to_html(&d),
        r#"<p><a href="https://example.com/">click</a></p>"#
    );
    let back = parse_tree(&schema, &serialize_to_tree(&d));
    assert_eq!(back, d);
}

#[test]
fn code_block_preserves_text_exactly() {
    let schema = basic_schema();
    let d = doc(
        &schema,
        vec![common::node(
            &schema,
            "code_block",
            vec![text(&schema, "let x = 1;\n  x + 1")],
        )],
    );
    assert_eq!(
        serialize_to_html(&d),
        "<pre><code>let x = 1;\n  x + 1</code></pre>"
    );
    let back = parse_tree(&schema, &serialize_to_tree(&d));
    assert_eq!(back, d);
}

#[test]
fn heading_levels_roundtrip() {
    let schema = basic_schema();
    let h2 = schema
        .node(
            "heading",
            Some(&richdoc::Attrs::from_pairs([(
                "level".to_string(),
                serde_json::Value::from(2),
            )])),
            vec![text(&schema, "title")],
            richdoc::MarkSet::empty(),
        )
        .unwrap();
    let d = doc(&schema, vec![h2]);
    assert_eq!(serialize_to_html(&d), "<h2>title</h2>");
    let back = parse_tree(&schema, &serialize_to_tree(&d));
    assert_eq!(back, d);
}

#[test]
fn single_node_serialization_includes_structure() {
    let schema = basic_schema();
    let serializer = DomSerializer::from_schema(&schema);
    let d = doc(&schema, vec![p(&schema, vec![text(&schema, "x")])]);
    let out = serializer
        .serialize_node(d.child(0), &Default::default())
        .unwrap();
    assert_eq!(out, DomNode::Element(DomElement::new("p").with_text("x")));
}
