use std::time::Duration;

use chrono::Utc;

use crate::{consult, rank, AdviceRequest, AdvisorError, AdvisorOptions, Suggestion};

fn request() -> AdviceRequest {
    AdviceRequest {
        signal: "p99_latency".into(),
        value: 2400.0,
        unit: "ms".into(),
        severity: "high".into(),
        observed_at: Utc::now(),
        history: vec![],
        known_kinds: vec!["restart_service".into(), "throttle_intake".into()],
    }
}

/// An advisor implemented as a shell snippet. The request on stdin is
/// drained first so the writer never sees a broken pipe.
fn shell_advisor(script: &str) -> AdvisorOptions {
    let mut opts = AdvisorOptions::new("sh");
    opts.args = vec!["-c".into(), format!("cat > /dev/null; {script}")];
    opts.timeout = Duration::from_secs(5);
    opts
}

fn suggestion(kind: &str, confidence: f64) -> Suggestion {
    Suggestion {
        kind: kind.into(),
        params: serde_json::Map::new(),
        confidence,
        rationale: None,
    }
}

#[tokio::test]
async fn jsonl_suggestions_are_ranked_by_confidence() {
    let opts = shell_advisor(
        r#"echo '{"kind":"restart_service","confidence":0.55}'
echo '{"kind":"throttle_intake","params":{"rate":100},"confidence":0.9}'"#,
    );
    let out = consult(&opts, &request()).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].kind, "throttle_intake");
    assert_eq!(out[0].params["rate"], serde_json::json!(100));
    assert_eq!(out[1].kind, "restart_service");
}

#[tokio::test]
async fn array_line_and_progress_events_are_accepted() {
    let opts = shell_advisor(
        r#"echo '{"type":"progress","note":"thinking"}'
echo '[{"kind":"restart_service","confidence":0.7,"rationale":"leak"}]'"#,
    );
    let out = consult(&opts, &request()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].rationale.as_deref(), Some("leak"));
}

#[tokio::test]
async fn request_is_delivered_on_stdin() {
    // Echo the signal name back as the suggested kind.
    let mut opts = AdvisorOptions::new("sh");
    opts.args = vec![
        "-c".into(),
        r#"read line; case "$line" in *p99_latency*) echo '{"kind":"saw_request","confidence":1}';; esac"#
            .into(),
    ];
    let out = consult(&opts, &request()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, "saw_request");
}

#[tokio::test]
async fn garbage_output_is_a_parse_error() {
    let opts = shell_advisor("echo 'restart everything please'");
    let err = consult(&opts, &request()).await.unwrap_err();
    assert!(matches!(err, AdvisorError::Parse { .. }), "got {err:?}");
}

#[tokio::test]
async fn non_zero_exit_surfaces_stderr() {
    let opts = shell_advisor("echo 'model offline' >&2; exit 3");
    let err = consult(&opts, &request()).await.unwrap_err();
    match err {
        AdvisorError::Process(msg) => {
            assert!(msg.contains("code 3"), "msg: {msg}");
        }
        other => panic!("expected Process error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_advisor_times_out() {
    let mut opts = shell_advisor("sleep 5");
    opts.timeout = Duration::from_millis(200);
    let err = consult(&opts, &request()).await.unwrap_err();
    assert!(matches!(err, AdvisorError::Timeout(200)), "got {err:?}");
}

#[tokio::test]
async fn missing_executable_is_io_error() {
    let opts = AdvisorOptions::new("__medic_no_such_advisor__");
    let err = consult(&opts, &request()).await.unwrap_err();
    assert!(matches!(err, AdvisorError::Io(_)), "got {err:?}");
}

#[test]
fn rank_drops_nan_and_clamps() {
    let ranked = rank(vec![
        suggestion("a", f64::NAN),
        suggestion("b", 1.7),
        suggestion("c", -0.2),
        suggestion("d", 0.4),
    ]);
    let kinds: Vec<_> = ranked.iter().map(|s| s.kind.as_str()).collect();
    assert_eq!(kinds, vec!["b", "d", "c"]);
    assert_eq!(ranked[0].confidence, 1.0);
    assert_eq!(ranked[2].confidence, 0.0);
}

#[test]
fn rank_is_stable_for_ties() {
    let ranked = rank(vec![suggestion("first", 0.8), suggestion("second", 0.8)]);
    assert_eq!(ranked[0].kind, "first");
    assert_eq!(ranked[1].kind, "second");
}
