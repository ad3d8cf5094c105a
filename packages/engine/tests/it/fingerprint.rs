use fsexec::fingerprint::Fingerprint;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn identical_requests_fingerprint_identically_across_instances() {
    let a = Fingerprint::of_value("build", &json!({"target": "wasm32", "flags": ["-O2", "-g"]}));
    let b = Fingerprint::of_value("build", &json!({"flags": ["-g", "-O2"], "target": "wasm32"}));
    assert_eq!(a, b, "key order and array order must not affect the digest");
}

#[test]
fn different_kind_same_input_fingerprints_differently() {
    let a = Fingerprint::of_value("build", &json!({"x": 1}));
    let b = Fingerprint::of_value("test", &json!({"x": 1}));
    assert_ne!(a, b);
}

#[test]
fn nested_object_key_order_is_insensitive() {
    let a = Fingerprint::of_value(
        "k",
        &json!({"outer": {"z": 1, "a": {"y": 2, "x": 3}}}),
    );
    let b = Fingerprint::of_value(
        "k",
        &json!({"outer": {"a": {"x": 3, "y": 2}, "z": 1}}),
    );
    assert_eq!(a, b);
}

#[test]
fn display_and_parse_round_trip() {
    let fp = Fingerprint::of_value("k", &json!([1, 2, 3]));
    let text = fp.to_string();
    assert_eq!(text.len(), 32);
    let parsed: Fingerprint = text.parse().unwrap();
    assert_eq!(fp, parsed);
}
