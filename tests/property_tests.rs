//! Property-based tests for the recording proxy.
//!
//! These tests use proptest to verify properties that should hold for all
//! inputs: provider detection is total and deterministic, and recordings
//! survive the JSON Lines encoding unchanged.

use chrono::{Duration, TimeZone, Utc};
use llm_mirror::{
    core::recording::{collect_headers, encode_body, encode_response_body, Provider, Recording},
    services::ProviderDetector,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Arbitrary URL-ish paths, biased towards known API prefixes
fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "/[a-zA-Z0-9_:./-]{0,60}",
        "/v1/[a-z/:_-]{0,40}",
        "/v1beta/[a-z/:_.-]{0,40}",
        "/upload/v1beta/[a-z/]{0,20}",
        any::<String>(),
    ]
}

/// JSON documents without floats (their text form is not guaranteed to round-trip)
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Raw body bytes as a client or upstream would send them
fn body_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        json_strategy().prop_map(|v| v.to_string().into_bytes()),
        Just(b"null".to_vec()),
        Just(Vec::new()),
        "[a-zA-Z ,!?]{0,40}".prop_map(String::into_bytes),
    ]
}

fn provider_strategy() -> impl Strategy<Value = Provider> {
    prop_oneof![
        Just(Provider::Claude),
        Just(Provider::OpenAI),
        Just(Provider::Gemini),
        Just(Provider::Unknown),
    ]
}

proptest! {
    /// Property: detection gives the same answer every time
    #[test]
    fn prop_detection_is_deterministic(path in path_strategy()) {
        let first = ProviderDetector::detect(&path);
        for _ in 0..3 {
            prop_assert_eq!(ProviderDetector::detect(&path), first);
        }
    }

    /// Property: anything under the Claude prefixes is Claude, whatever follows
    #[test]
    fn prop_claude_prefix_wins(suffix in "[a-z0-9/_-]{0,30}") {
        let path = format!("/v1/messages{}", suffix);
        prop_assert_eq!(ProviderDetector::detect(&path), Provider::Claude);
    }

    /// Property: Gemini model actions never classify as OpenAI
    #[test]
    fn prop_gemini_model_actions(
        version in prop_oneof![Just("v1"), Just("v1beta"), Just("v1alpha")],
        model in "[a-z0-9.-]{1,20}",
        action in prop_oneof![Just("generateContent"), Just("streamGenerateContent"), Just("countTokens")],
    ) {
        let path = format!("/{}/models/{}:{}", version, model, action);
        prop_assert_eq!(ProviderDetector::detect(&path), Provider::Gemini);
    }

    /// Property: paths outside every known namespace are unknown
    #[test]
    fn prop_foreign_namespace_is_unknown(rest in "[a-z0-9/_-]{0,30}") {
        let path = format!("/v9/{}", rest);
        prop_assert_eq!(ProviderDetector::detect(&path), Provider::Unknown);
    }

    /// Property: a recording decodes back to an equal value
    #[test]
    fn prop_recording_line_round_trip(
        provider in provider_strategy(),
        method in prop_oneof![Just("GET"), Just("POST"), Just("DELETE")],
        path in "/[a-z0-9/]{0,30}",
        query in "([a-z]{1,5}=[a-z0-9]{0,5})?",
        status in 0u16..600,
        duration in 0i64..600_000,
        request_body in body_bytes_strategy(),
        response_body in body_bytes_strategy(),
        gzipped in any::<bool>(),
        header_value in "[ -~]{0,20}",
        streaming in any::<bool>(),
        error in proptest::option::of(".{1,30}"),
    ) {
        let started = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();
        let mut rec = Recording::new(provider, method, path, query, started);
        rec.timestamp = started;
        rec.request.headers = collect_headers([("x-custom", header_value.as_bytes())]);
        rec.request.body = encode_body(&request_body);
        rec.response.status = status;
        rec.response.streaming = streaming;
        rec.response.body = encode_response_body(&response_body, gzipped);
        rec.error = error;
        rec.finish(started + Duration::milliseconds(duration));

        let line = rec.to_line().unwrap();
        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);

        let decoded: Recording = serde_json::from_str(&line).unwrap();
        prop_assert_eq!(decoded, rec);
    }
}
