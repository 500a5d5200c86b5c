use super::*;

#[test]
fn a_well_formed_envelope_parses() {
    let raw = r#"{"type":"presence","action":"update","ref":"r1","payload":{"state":"busy"}}"#;
    let env = parse_frame(raw, 1024).unwrap();
    assert_eq!(env.kind, "presence");
    assert_eq!(env.action.as_deref(), Some("update"));
    assert_eq!(env.r#ref.as_deref(), Some("r1"));
}

#[test]
fn action_and_ref_and_payload_are_optional() {
    let env = parse_frame(r#"{"type":"system"}"#, 1024).unwrap();
    assert_eq!(env.kind, "system");
    assert!(env.action.is_none());
    assert!(env.r#ref.is_none());
}

#[test]
fn a_frame_over_the_byte_limit_is_rejected_before_parsing() {
    let raw = format!(r#"{{"type":"memory","payload":"{}"}}"#, "x".repeat(100));
    let err = parse_frame(&raw, 32).unwrap_err();
    assert_eq!(err.code(), "payload_too_large");
}

#[test]
fn malformed_json_is_rejected_as_invalid_message() {
    let err = parse_frame("not json", 1024).unwrap_err();
    assert_eq!(err.code(), "invalid_message");
}

#[test]
fn missing_type_field_is_rejected_as_invalid_message() {
    let err = parse_frame(r#"{"action":"update"}"#, 1024).unwrap_err();
    assert_eq!(err.code(), "invalid_message");
}

#[test]
fn known_handler_families_are_recognized() {
    assert!(is_known_family("presence"));
    assert!(is_known_family("memory"));
    assert!(!is_known_family("not_a_family"));
}
