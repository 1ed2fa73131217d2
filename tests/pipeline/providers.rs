use bulk_annotator::{
    config::CredentialRef,
    error::ProviderErrorKind,
    invoker::{FailureClass, classify},
    providers::openai_compatible::{OpenAiCompatibleProvider, map_http_error, parse_annotations},
};

use crate::support::profile;

#[test]
fn given_throttling_status_when_mapped_then_error_is_a_rate_limit() {
    let err = map_http_error(429, "primary", "slow down");
    assert_eq!(err.kind, ProviderErrorKind::RateLimited);
    assert_eq!(classify(&err), FailureClass::RateLimit);
    assert_eq!(err.http_status, Some(429));
    assert!(err.message.contains("slow down"));
}

#[test]
fn given_request_timeout_status_when_mapped_then_error_is_transient() {
    let err = map_http_error(408, "primary", "took too long");
    assert_eq!(err.kind, ProviderErrorKind::Timeout);
    assert!(err.retryable);
    assert_eq!(classify(&err), FailureClass::Transient);
    assert_eq!(err.http_status, Some(408));
}

#[test]
fn given_client_errors_when_mapped_then_errors_are_fatal() {
    let auth = map_http_error(401, "primary", "");
    assert_eq!(auth.kind, ProviderErrorKind::Authentication);
    assert_eq!(classify(&auth), FailureClass::Fatal);

    let invalid = map_http_error(422, "primary", "bad schema");
    assert_eq!(invalid.kind, ProviderErrorKind::InvalidRequest);
    assert_eq!(classify(&invalid), FailureClass::Fatal);
}

#[test]
fn given_server_errors_when_mapped_then_errors_are_transient() {
    let err = map_http_error(503, "primary", "");
    assert_eq!(err.kind, ProviderErrorKind::Transient);
    assert_eq!(classify(&err), FailureClass::Transient);
    assert_eq!(err.provider_id.as_deref(), Some("primary"));
}

#[test]
fn given_annotation_payload_when_parsed_then_labels_are_normalized_per_unit() {
    let content = r#"{"annotations":[
        {"unit_id":10,"labels":["Planning"," planning ","",  "Q3"]},
        {"unit_id":11}
    ]}"#;

    let parsed = parse_annotations(content, "primary").expect("payload should parse");

    assert_eq!(parsed.get(&10), Some(&vec!["planning".to_string(), "q3".to_string()]));
    assert_eq!(parsed.get(&11), Some(&Vec::new()));
    assert!(!parsed.contains_key(&12));
}

#[test]
fn given_non_json_content_when_parsed_then_protocol_violation_is_not_retryable() {
    let err = parse_annotations("Sure! Here are your labels", "primary")
        .expect_err("prose is not a payload");

    assert_eq!(err.kind, ProviderErrorKind::ProtocolViolation);
    assert!(!err.retryable);
}

#[test]
fn given_env_credential_without_variable_when_provider_built_then_authentication_error() {
    let mut profile = profile("primary");
    profile.credential = CredentialRef::Env {
        var: "BULK_ANNOTATOR_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
    };

    let err = OpenAiCompatibleProvider::new(profile)
        .err()
        .expect("missing variable must fail");

    assert_eq!(err.kind, ProviderErrorKind::Authentication);
}

#[test]
fn given_blank_inline_token_when_provider_built_then_error_is_fatal() {
    let mut profile = profile("primary");
    profile.credential = CredentialRef::InlineToken {
        token: "   ".to_string(),
    };

    let err = OpenAiCompatibleProvider::new(profile)
        .err()
        .expect("blank token must fail");

    assert_eq!(classify(&err), FailureClass::Fatal);
}
