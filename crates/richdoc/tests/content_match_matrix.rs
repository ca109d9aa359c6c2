//! Content-expression matching, filling, and wrapping through the public
//! surface.

mod common;

use common::{basic_schema, li, p, text};
use richdoc::{Fragment, MarkSet, NodeSpec, Schema, SchemaSpec};

/// A small schema whose doc content is the given expression.
fn schema_with(content: &str) -> Schema {
    Schema::new(SchemaSpec {
        nodes: vec![
            (
                "doc".to_string(),
                NodeSpec {
                    content: Some(content.to_string()),
                    ..Default::default()
                },
            ),
            (
                "paragraph".to_string(),
                NodeSpec {
                    content: Some("text*".into()),
                    group: Some("block".into()),
                    ..Default::default()
                },
            ),
            (
                "horizontal_rule".to_string(),
                NodeSpec {
                    group: Some("block".into()),
                    ..Default::default()
                },
            ),
            (
                "text".to_string(),
                NodeSpec {
                    inline: true,
                    ..Default::default()
                },
            ),
        ],
        marks: vec![],
        top_node: None,
    })
    .expect("schema compiles")
}

#[test]
fn fill_before_synthesizes_a_missing_rule() {
    // After matching one paragraph against "paragraph horizontal_rule
    // paragraph", filling up to a final paragraph requires a single hr.
    let schema = schema_with("paragraph horizontal_rule paragraph");
    let doc_type = schema.get_node_type("doc").unwrap();
    let para = schema
        .node("paragraph", None, Vec::new(), MarkSet::empty())
        .unwrap();
    let consumed = doc_type
        .content_match(&schema)
        .match_fragment(&Fragment::from(para.clone()))
        .unwrap();
    let fill = consumed
        .fill_before(&Fragment::from(para), true, 0)
        .unwrap();
    assert_eq!(fill.child_count(), 1);
    assert_eq!(fill.child(0).node_type().name(), "horizontal_rule");
}

#[test]
fn fill_before_completes_an_empty_document() {
    let schema = schema_with("paragraph+");
    let doc_type = schema.get_node_type("doc").unwrap();
    let fill = doc_type
        .content_match(&schema)
        .fill_before(&Fragment::empty(), true, 0)
        .unwrap();
    assert_eq!(fill.child_count(), 1);
    assert_eq!(fill.child(0).node_type().name(), "paragraph");
}

#[test]
fn create_and_fill_builds_required_structure() {
    let schema = basic_schema();
    let list = schema.get_node_type("bullet_list").unwrap();
    let filled = list
        .create_and_fill(&schema, None, None, MarkSet::empty())
        .unwrap();
    assert_eq!(
        format!("{filled}"),
        "bullet_list(list_item(paragraph))"
    );
    assert!(filled.check().is_ok());
}

#[test]
fn find_wrapping_produces_an_admissible_route() {
    let schema = basic_schema();
    let d = common::doc(&schema, vec![p(&schema, vec![text(&schema, "x")])]);
    let li_node = li(&schema, vec![p(&schema, vec![])]);
    let match_at_start = d.content_match_at(0).unwrap();
    let wrap = match_at_start.find_wrapping(li_node.type_id()).unwrap();
    assert!(!wrap.is_empty());
    // Walking the route must be admissible step by step.
    let mut m = match_at_start;
    for &t in &wrap {
        m = m.match_type(t).expect("wrapper admissible");
        m = schema.node_type(t).content_match(&schema);
    }
    assert!(m.match_type(li_node.type_id()).is_some());
}

#[test]
fn fill_before_result_completes_the_expression() {
    let schema = schema_with("paragraph horizontal_rule paragraph");
    let doc_type = schema.get_node_type("doc").unwrap();
    let para = schema
        .node("paragraph", None, Vec::new(), MarkSet::empty())
        .unwrap();
    let content = Fragment::from(para.clone());
    let after = Fragment::from(para);
    let consumed = doc_type
        .content_match(&schema)
        .match_fragment(&content)
        .unwrap();
    let fill = consumed.fill_before(&after, true, 0).unwrap();
    // content + fill + after must be accepted in full.
    let whole = content.append(&fill).append(&after);
    assert!(doc_type.valid_content(&schema, &whole));
}

#[test]
fn valid_content_respects_expression_bounds() {
    let schema = schema_with("paragraph{2,3}");
    let doc_type = schema.get_node_type("doc").unwrap();
    let para = schema
        .node("paragraph", None, Vec::new(), MarkSet::empty())
        .unwrap();
    let of = |n: usize| Fragment::from_array(vec![para.clone(); n]);
    assert!(!doc_type.valid_content(&schema, &of(1)));
    assert!(doc_type.valid_content(&schema, &of(2)));
    assert!(doc_type.valid_content(&schema, &of(3)));
    assert!(!doc_type.valid_content(&schema, &of(4)));
}

#[test]
fn can_replace_with_consults_the_expression() {
    let schema = basic_schema();
    let d = common::doc(
        &schema,
        vec![ul_of(&schema, 1)],
    );
    let list = d.child(0);
    let li_type = schema.get_node_type("list_item").unwrap().id();
    let p_type = schema.get_node_type("paragraph").unwrap().id();
    assert!(list.can_replace_with(0, 1, li_type, None));
    assert!(!list.can_replace_with(0, 1, p_type, None));
    // Removing the only item would leave list_item+ unsatisfied.
    assert!(!list.can_replace(0, 1, &Fragment::empty(), 0, 0));
}

fn ul_of(schema: &Schema, items: usize) -> richdoc::Node {
    common::ul(
        schema,
        (0..items)
            .map(|_| li(schema, vec![p(schema, vec![])]))
            .collect(),
    )
}
