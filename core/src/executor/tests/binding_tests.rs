//! Tests for field binding of bean tags and result publishing

use super::helpers::{build_engine, run_kept};
use crate::values::Val;
use maplit::hashmap;
use std::collections::HashMap;

#[test]
fn test_fields_bind_from_parameters() {
    let (engine, probes) = build_engine(&[(
        "main",
        r#"<scenario><record name="a" count="3" loud="true"/></scenario>"#,
    )]);
    engine.run("main", HashMap::<String, Val>::new()).unwrap();

    let calls = probes.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].str("name"), Some("a"));
    assert_eq!(calls[0].number("count"), Some(3.0));
    assert_eq!(calls[0].bool("loud"), Some(true));
}

#[test]
fn test_each_call_starts_from_baseline() {
    let (engine, probes) = build_engine(&[("main", r#"<scenario><record name="a" count="${c}"/></scenario>"#)]);

    engine.run("main", hashmap! { "c".to_string() => Val::from(7) }).unwrap();
    engine.run("main", HashMap::<String, Val>::new()).unwrap();

    let counts: Vec<_> = probes.calls().iter().map(|f| f.number("count")).collect();
    assert_eq!(counts, vec![Some(7.0), Some(1.0)]);
}

#[test]
fn test_failed_call_does_not_leak_fields() {
    let (engine, probes) = build_engine(&[("main", r#"<scenario><record name="a" count="${c}"/></scenario>"#)]);

    let err = engine
        .run("main", hashmap! { "c".to_string() => Val::from("bad") })
        .unwrap_err();
    assert!(err.as_runtime().is_some(), "{}", err);
    engine.run("main", HashMap::<String, Val>::new()).unwrap();

    let calls = probes.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].number("count"), Some(1.0));
}

#[test]
fn test_parameters_read_entity_values_not_siblings() {
    let (engine, probes) = build_engine(&[(
        "main",
        r#"<scenario><record name="9"><count>${name}</count></record></scenario>"#,
    )]);
    engine.run("main", hashmap! { "name".to_string() => Val::from("2") }).unwrap();

    let calls = probes.calls();
    assert_eq!(calls[0].str("name"), Some("9"));
    assert_eq!(calls[0].number("count"), Some(2.0));
}

#[test]
fn test_fields_fall_back_to_enclosing_scopes() {
    let (engine, probes) = build_engine(&[("main", "<scenario><record/></scenario>")]);
    engine.run("main", hashmap! { "name".to_string() => Val::from("outer") }).unwrap();
    assert_eq!(probes.names(), vec!["outer"]);
}

#[test]
fn test_missing_required_field() {
    let (engine, _) = build_engine(&[("main", "<scenario><record count=\"2\"/></scenario>")]);
    let err = engine.run("main", HashMap::<String, Val>::new()).unwrap_err();
    let runtime = err.as_runtime().unwrap();
    assert_eq!(runtime.tag, "record");
    assert_eq!(runtime.message, "Missing required parameter 'name'");
}

#[test]
fn test_field_type_mismatch() {
    let (engine, _) = build_engine(&[("main", r#"<scenario><record name="a" count="many"/></scenario>"#)]);
    let err = engine.run("main", HashMap::<String, Val>::new()).unwrap_err();
    assert!(err.as_runtime().unwrap().message.contains("Parameter 'count' expects"), "{}", err);
}

#[test]
fn test_parameter_children_bind_like_attributes() {
    let (engine, probes) = build_engine(&[(
        "main",
        r#"<scenario><record><name>child</name><count>${4}</count></record></scenario>"#,
    )]);
    engine.run("main", HashMap::<String, Val>::new()).unwrap();
    let calls = probes.calls();
    assert_eq!(calls[0].str("name"), Some("child"));
    assert_eq!(calls[0].number("count"), Some(4.0));
}

#[test]
fn test_result_published_under_evaluated_id() {
    let (engine, _) = build_engine(&[(
        "main",
        r#"<scenario><record id="${key}" name="z"/></scenario>"#,
    )]);
    let entity = engine.parser().load("main").unwrap();
    let mut inv = engine.invocation();
    let root = inv.scopes().root();
    let scope = inv.scopes_mut().enter(root);
    inv.scopes_mut().add(scope, "key", None, Val::from("k"), false).unwrap();

    engine.run_entity(&mut inv, &entity, scope).unwrap();
    assert_eq!(inv.scopes().get(scope, "k", false), Some(&Val::from("z")));
    assert_eq!(inv.scopes().origin(scope, "k"), Some("record"));
}

#[test]
fn test_blank_result_id_is_an_error() {
    let (engine, _) = build_engine(&[("main", r#"<scenario><record id="${missing}" name="z"/></scenario>"#)]);
    let err = engine.run("main", HashMap::<String, Val>::new()).unwrap_err();
    assert!(err.to_string().contains("evaluated to an empty name"), "{}", err);
}

#[test]
fn test_qualified_id_is_not_a_parameter() {
    let (engine, probes) = build_engine(&[(
        "main",
        r#"<scenario xmlns:t="urn:tagflow:root"><record t:id="r" name="z"/></scenario>"#,
    )]);
    let (inv, scope, result) = run_kept(&engine, "main", false);
    result.unwrap();
    assert_eq!(inv.scopes().get(scope, "r", false), Some(&Val::from("z")));
    assert_eq!(probes.calls().len(), 1);
}

#[test]
fn test_parameters_do_not_leak_into_entity_scope() {
    let (engine, _) = build_engine(&[("main", r#"<scenario><record name="z" count="2"/></scenario>"#)]);
    let (inv, scope, result) = run_kept(&engine, "main", false);
    result.unwrap();
    assert!(inv.scopes().get(scope, "name", true).is_none());
    assert!(inv.scopes().get(scope, "count", true).is_none());
}
