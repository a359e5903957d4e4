//! End-to-end behavior of the dialects and the graph wire format.

use indexmap::IndexMap;
use proptest::prelude::*;
use quadplay_format::{deserialize, serialize, Dialect, GraphValue, HandleRegistry, Value};

#[test]
fn comments_and_trailing_commas() {
    for dialect in [Dialect::Better, Dialect::Work] {
        let value = dialect.parse("{\"a\":1,//c\n\"b\":2,}").unwrap();
        let expected: Value = [("a", Value::from(1)), ("b", Value::from(2))].into_iter().collect();
        assert_eq!(value, expected);
    }
}

#[test]
fn backtick_document_and_value() {
    let bare = Dialect::Better.parse("`line1\nline2`").unwrap();
    assert_eq!(bare, Value::from("line1\nline2"));

    let nested = Dialect::Work.parse("{ text: `line1\nline2` }").unwrap();
    assert_eq!(nested["text"], Value::from("line1\nline2"));
}

#[test]
fn numeric_quirks() {
    let value = Dialect::Better
        .parse("[.5, 5., +3, 0x1F, NaN, Infinity, -Infinity]")
        .unwrap();
    let items = value.as_array().unwrap();
    assert_eq!(items[..4], [Value::from(0.5), Value::from(5), Value::from(3), Value::from(31)]);
    assert!(items[4].as_f64().unwrap().is_nan());
    assert_eq!(items[5], Value::Number(f64::INFINITY));
    assert_eq!(items[6], Value::Number(f64::NEG_INFINITY));
}

#[test]
fn syntax_errors_carry_position() {
    let err = Dialect::Work.parse("{\n  a: 1\n  b: 2\n}").unwrap_err();
    assert_eq!(err.line(), Some(3));
    assert!(err.column().is_some());
}

#[test]
fn negative_zero_through_the_wire() {
    let text = serialize(&GraphValue::from(-0.0), None).unwrap();
    assert_eq!(text, r#"{"type":"number","value":"-0"}"#);

    let decoded = deserialize(&text, None).unwrap();
    assert_eq!(1.0 / decoded.as_f64().unwrap(), f64::NEG_INFINITY);
}

#[test]
fn cycle_through_the_wire() {
    let a = GraphValue::object(IndexMap::new());
    a.as_object().unwrap().borrow_mut().insert("self".into(), a.clone());

    let text = serialize(&a, None).unwrap();
    assert_eq!(
        text,
        r#"{"type":"object","value":{"self":{"type":"reference","index":0}}}"#
    );

    let decoded = deserialize(&text, None).unwrap();
    assert!(decoded.member("self").unwrap().same(&decoded));
}

#[test]
fn shared_reference_through_the_wire() {
    let shared = GraphValue::object(IndexMap::new());
    let root: GraphValue = [("x", shared.clone()), ("y", shared)].into_iter().collect();

    let decoded = deserialize(&serialize(&root, None).unwrap(), None).unwrap();
    let (x, y) = (decoded.member("x").unwrap(), decoded.member("y").unwrap());
    assert!(x.same(&y));
}

#[test]
fn structurally_equal_objects_stay_distinct() {
    let root = GraphValue::array(vec![GraphValue::object(IndexMap::new()), GraphValue::object(IndexMap::new())]);
    let decoded = deserialize(&serialize(&root, None).unwrap(), None).unwrap();
    let items = decoded.as_array().unwrap().borrow().clone();
    assert!(!items[0].same(&items[1]));
}

#[test]
fn document_to_graph_and_back() {
    let doc = Dialect::Work
        .parse("{ name: `hero`, stats: { hp: 10, speed: .5 }, tags: [`a`, `b`] }")
        .unwrap();
    let text = serialize(&GraphValue::from(doc.clone()), None).unwrap();
    let back = deserialize(&text, None).unwrap().to_value().unwrap();
    assert_eq!(back, doc);
}

#[test]
fn handles_survive_a_nested_graph() {
    let font = GraphValue::array(vec![GraphValue::from("bitmap")]);
    let mut registry = HandleRegistry::new();
    registry.register("font", "scoreboard", font.clone());

    let ui: GraphValue = [
        ("title", [("font", font.clone())].into_iter().collect::<GraphValue>()),
        ("footer", [("font", font.clone())].into_iter().collect::<GraphValue>()),
    ]
    .into_iter()
    .collect();

    let text = serialize(&ui, Some(&mut registry)).unwrap();
    let decoded = deserialize(&text, Some(&mut registry)).unwrap();
    let title_font = decoded.member("title").unwrap().member("font").unwrap();
    let footer_font = decoded.member("footer").unwrap().member("font").unwrap();
    assert!(title_font.same(&font));
    assert!(footer_font.same(&font));
}

fn no_reserved() -> &'static str {
    "[^\u{E000}-\u{F8FF}\u{F0000}-\u{FFFFD}]{0,12}"
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<f64>()
            .prop_filter("strict JSON number", |n| n.is_finite() && !(*n == 0.0 && n.is_sign_negative()))
            .prop_map(Value::Number),
        any::<i32>().prop_map(Value::from),
        no_reserved().prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec((no_reserved(), inner), 0..6)
                .prop_map(|members| members.into_iter().collect::<Value>()),
        ]
    })
}

proptest! {
    #[test]
    fn stringify_then_parse_is_identity(value in json_value(), indent in prop::option::of(0usize..4)) {
        for dialect in [Dialect::Better, Dialect::Work] {
            let text = dialect.stringify(&value, indent).unwrap();
            prop_assert_eq!(dialect.parse(&text).unwrap(), value.clone());
        }
    }

    #[test]
    fn metacharacter_strings_survive(s in "[\"\\\\{},`/*a-z \n]{0,24}") {
        let value: Value = [("s", Value::from(s.clone()))].into_iter().collect();
        for dialect in [Dialect::Better, Dialect::Work] {
            let text = dialect.stringify(&value, None).unwrap();
            prop_assert_eq!(dialect.parse(&text).unwrap()["s"].clone(), Value::from(s.clone()));
        }
    }

    #[test]
    fn documents_survive_the_graph_wire(value in json_value()) {
        let text = serialize(&GraphValue::from(value.clone()), None).unwrap();
        prop_assert_eq!(deserialize(&text, None).unwrap().to_value().unwrap(), value);
    }
}
