/**
 * Decision Loop Integration Tests
 *
 * DESIGN DECISION: End-to-end scenarios driving the full session stack
 * WHY: Unit tests validate each component; these validate the composed
 * behavior the adapter shells depend on (admission, recording, persistence,
 * terminal outcomes, pacing)
 *
 * REASONING CHAIN:
 * 1. Fast-success path: peaked syntax logits -> promote with celebration
 * 2. Convergence path: falling logic error counts -> promote
 * 3. Cascade paths: severity escalation stops the session
 * 4. Shared store: one session's outcomes enrich the next session's scoring
 * 5. Pacing: pause windows gate admission, resume cancels in-flight sleeps
 * 6. Persistence: stored envelopes reparse into equal envelopes
 */

use selfheal_core::{
    Admission, ConsultOutcome, DebugSession, Decision, ErrorKind, ExecutionReport, GuidanceInput,
    MemoryStore, PatchEnvelope, PolicyConfig, SessionEnd,
};
use serde_json::json;
use std::sync::Arc;

/// Helper: session over a fresh shared store
fn fresh_session() -> (DebugSession, Arc<MemoryStore>) {
    let config = PolicyConfig::default();
    let store = Arc::new(MemoryStore::new(config.store.clone()));
    (DebugSession::new(config, Arc::clone(&store)), store)
}

/// Helper: candidate patch submission
fn submission(kind: ErrorKind, logits: &[f64], code: &str) -> selfheal_core::PatchSubmission {
    selfheal_core::PatchSubmission {
        patch_data: json!({ "patched_code": code, "language": "javascript" }),
        error_kind: kind,
        error_message: "reported failure".to_string(),
        logits: logits.to_vec(),
        test_coverage: None,
        difficulty: None,
    }
}

fn report(
    success: bool,
    kind: ErrorKind,
    detected: u32,
    resolved: u32,
    message: &str,
) -> ExecutionReport {
    ExecutionReport {
        success,
        errors_detected: detected,
        errors_resolved: resolved,
        lines_of_code: 250,
        error_kind: kind,
        error_type: "Error".to_string(),
        error_message: message.to_string(),
        resource_usage: Some(json!({ "cpu_ms": 40 })),
    }
}

#[test]
fn test_syntax_fast_success_end_to_end() {
    let (mut session, store) = fresh_session();
    let sub = submission(
        ErrorKind::Syntax,
        &[2.0, 0.1, 0.1],
        "function add(a, b) { return a + b; }",
    );

    let admission = session.begin_attempt(&sub).unwrap();
    let Admission::Proceed { confidence, .. } = admission else {
        panic!("expected admission, got {:?}", admission);
    };
    assert!(confidence.syntax_confidence >= 0.95);

    let decision = session
        .complete_attempt(&report(true, ErrorKind::Syntax, 0, 3, ""))
        .unwrap();
    let Decision::Promote { celebration: Some(event), .. } = decision else {
        panic!("expected promote with celebration, got {:?}", decision);
    };
    assert_eq!(event.event_type, "success_celebration");
    assert!((200..=700).contains(&event.celebration.jitter_delay_ms));

    let outcome = session.outcome().unwrap();
    assert_eq!(outcome.end, SessionEnd::Success);
    assert!(outcome.envelope.success);
    assert_eq!(
        outcome.envelope.trend.trend,
        selfheal_core::TrendDirection::Improving
    );
    assert!(!store.is_empty());
}

#[test]
fn test_logic_convergence_promotes() {
    let (mut session, _store) = fresh_session();
    // High-confidence logic candidates; errors fall 9 -> 4 -> 0
    let sub = submission(
        ErrorKind::Logic,
        &[3.5, 0.1],
        "function reconcile(ledger) { return ledger.balance(); }",
    );

    let steps = [(9u32, 3u32, false), (4, 5, false), (0, 4, true)];
    let mut last = None;
    for (detected, resolved, success) in steps {
        let admission = session.begin_attempt(&sub).unwrap();
        assert!(
            matches!(admission, Admission::Proceed { .. }),
            "refused: {:?}",
            admission
        );
        last = Some(
            session
                .complete_attempt(&report(
                    success,
                    ErrorKind::Logic,
                    detected,
                    resolved,
                    if success { "" } else { "balance mismatch" },
                ))
                .unwrap(),
        );
    }

    // Logic confidence is damped 0.9x, so the near-certain polish path is
    // out of reach; the breaker still recommends promotion.
    match last.unwrap() {
        Decision::Promote { celebration, .. } => assert!(celebration.is_none()),
        other => panic!("expected Promote, got {:?}", other),
    }
    // Promotion is a recommendation, not a terminal state; the caller
    // decides whether to land the patch.
    assert!(session.outcome().is_none());
    // The clean final run latched envelope success regardless.
    assert!(session.envelope().unwrap().success);
}

#[test]
fn test_severity_escalation_stops_session() {
    let (mut session, _store) = fresh_session();
    let sub = submission(ErrorKind::Syntax, &[2.5, 0.1], "let x = parse(input);");

    let Admission::Proceed { .. } = session.begin_attempt(&sub).unwrap() else {
        panic!("first attempt refused");
    };
    let first = session
        .complete_attempt(&report(
            false,
            ErrorKind::Syntax,
            3,
            0,
            "unexpected token",
        ))
        .unwrap();
    assert!(!matches!(first, Decision::StopCascade { .. }));

    let Admission::Proceed { .. } = session.begin_attempt(&sub).unwrap() else {
        panic!("second attempt refused");
    };
    let second = session
        .complete_attempt(&report(
            false,
            ErrorKind::Logic,
            3,
            0,
            "wrong branch taken",
        ))
        .unwrap();

    match second {
        Decision::StopCascade { reason } => {
            assert_eq!(reason, "Error severity escalating with each fix attempt");
        }
        other => panic!("expected StopCascade, got {:?}", other),
    }
    let outcome = session.outcome().unwrap();
    assert_eq!(outcome.end, SessionEnd::StopCascade);
    assert_eq!(outcome.envelope.cascade_depth, 2);
}

#[test]
fn test_shared_store_enriches_next_session() {
    let config = PolicyConfig::default();
    let store = Arc::new(MemoryStore::new(config.store.clone()));

    // Session A succeeds and persists its envelope.
    let mut first = DebugSession::new(config.clone(), Arc::clone(&store));
    let sub = submission(
        ErrorKind::Syntax,
        &[2.0, 0.1, 0.1],
        "function normalizeHeaders(h) { return h.map(toLower); }",
    );
    let Admission::Proceed { .. } = first.begin_attempt(&sub).unwrap() else {
        panic!("session A refused");
    };
    first
        .complete_attempt(&report(true, ErrorKind::Syntax, 0, 2, ""))
        .unwrap();
    assert_eq!(first.outcome().unwrap().end, SessionEnd::Success);

    // Session B sees A's successful outcome as historical signal.
    let mut second = DebugSession::new(config, store);
    let similar_sub = submission(
        ErrorKind::Syntax,
        &[2.0, 0.1, 0.1],
        "function normalizeHeaders(h) { return h.map(toLowerCase); }",
    );
    let admission = second.begin_attempt(&similar_sub).unwrap();
    let Admission::Proceed { confidence, .. } = admission else {
        panic!("session B refused: {:?}", admission);
    };
    // Historical success keeps the multiplicative factors high
    assert!(confidence.components.historical_success_rate > 0.0);
    assert!(confidence.components.pattern_similarity > 0.0);
}

#[test]
fn test_stored_envelopes_reparse_equal() {
    let (mut session, store) = fresh_session();
    let sub = submission(ErrorKind::Logic, &[3.0, 0.1], "const f = () => g();");

    let Admission::Proceed { .. } = session.begin_attempt(&sub).unwrap() else {
        panic!("refused");
    };
    session
        .complete_attempt(&report(false, ErrorKind::Logic, 4, 1, "g is not defined"))
        .unwrap();

    // The persisted wire form reparses into an equal envelope
    let stored = store.get_similar(&sub.patch_data);
    assert!(!stored.is_empty());
    let wire = serde_json::to_string(stored.last().unwrap()).unwrap();
    let reparsed = PatchEnvelope::from_json(&wire).unwrap();
    assert_eq!(&reparsed, session.envelope().unwrap());
    assert_eq!(reparsed.compute_hash(), reparsed.envelope_hash);
}

#[test]
fn test_pause_gates_admission_until_resume() {
    let (mut session, _store) = fresh_session();
    session.pause(120_000, "operator hold");

    let sub = submission(ErrorKind::Logic, &[3.0, 0.1], "let y = 1;");
    let admission = session.begin_attempt(&sub).unwrap();
    match admission {
        Admission::Refused(Decision::PauseAndBackoff { wait_ms, .. }) => {
            assert!(wait_ms > 0);
            assert!(wait_ms <= 120_000);
        }
        other => panic!("expected PauseAndBackoff, got {:?}", other),
    }

    session.resume();
    let admission = session.begin_attempt(&sub).unwrap();
    assert!(matches!(admission, Admission::Proceed { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sleeps_out_and_guidance_is_versioned() {
    let (mut session, _store) = fresh_session();
    let sub = submission(ErrorKind::Logic, &[3.0, 0.1], "function h() { return 1; }");
    let Admission::Proceed { .. } = session.begin_attempt(&sub).unwrap() else {
        panic!("refused");
    };
    session
        .complete_attempt(&report(false, ErrorKind::Logic, 6, 0, "h returned wrong value"))
        .unwrap();

    let guidance = session.guidance(&GuidanceInput {
        error_message: "h returned wrong value".to_string(),
        original_code: "function h() { return 1; }".to_string(),
        last_patch_code: "function h() { return 2; }".to_string(),
        language: "javascript".to_string(),
        metadata: json!({}),
    });
    assert_eq!(guidance["type"], "jitter.request.v1");
    assert_eq!(guidance["constraints"]["max_lines_changed"], 25);

    let outcome = session.backoff(800, &guidance).await.unwrap();
    assert_eq!(outcome, ConsultOutcome::SleptOut);
}

#[tokio::test(start_paused = true)]
async fn test_store_persistence_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selfheal").join("memory.json");

    let config = PolicyConfig::default();
    let store = Arc::new(MemoryStore::new(config.store.clone()));
    let mut session = DebugSession::new(config.clone(), Arc::clone(&store));
    let sub = submission(ErrorKind::Syntax, &[2.0, 0.1, 0.1], "fn main() {}");
    let Admission::Proceed { .. } = session.begin_attempt(&sub).unwrap() else {
        panic!("refused");
    };
    session
        .complete_attempt(&report(true, ErrorKind::Syntax, 0, 1, ""))
        .unwrap();
    store.save(&path).await;

    // A restarted process reloads the log and finds the prior outcome
    let restarted = Arc::new(MemoryStore::new(PolicyConfig::default().store));
    restarted.load(&path).await;
    assert_eq!(restarted.len(), store.len());
    let hits = restarted.get_similar(&sub.patch_data);
    assert!(!hits.is_empty());
    assert_eq!(hits.last().unwrap()["success"], json!(true));
}
