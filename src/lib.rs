/**
 * SelfHeal Core Library
 *
 * DESIGN DECISION: Modular architecture with separate concerns for attempt
 * recording, admission control, cascade analysis, and retry pacing
 * WHY: Separation of concerns enables independent testing, optimization, and
 * evolution of each subsystem while maintaining clear contracts between
 * components
 *
 * REASONING CHAIN:
 * 1. A self-healing patch loop requires five distinct capabilities:
 *    - Canonical attempt records with stable content hashes (envelope.rs)
 *    - Bounded shared memory over prior outcomes (memory.rs)
 *    - Calibrated per-attempt confidence (confidence.rs)
 *    - Trend-aware dual-budget admission control (breaker.rs)
 *    - Error-chain health rules (cascade.rs)
 * 2. Retry pacing and generator guidance (backoff.rs) sit on top of the
 *    breaker's summary; the orchestrator (orchestrator.rs) is the only
 *    composition point
 * 3. Error handling centralized in error.rs provides consistent semantics;
 *    expected control-flow outcomes travel in the Decision type
 * 4. The core executes nothing and calls no network of its own: execution,
 *    analysis, and transport are injected at the edges
 *
 * # Architecture Overview
 *
 * ```text
 * ┌───────────────────────────────────────────────────────────────┐
 * │                      Orchestrator (session)                   │
 * ├───────────────┬───────────────┬───────────────┬───────────────┤
 * │ Confidence    │ DualBudget    │ Cascade       │ Backoff       │
 * │ Scorer        │ Breaker       │ Detector      │ Coordinator   │
 * ├───────────────┴───────────────┴───────────────┴───────────────┤
 * │            Envelope (content-addressed attempt log)           │
 * ├───────────────────────────────────────────────────────────────┤
 * │            MemoryStore (bounded, TTL, shared)                 │
 * ├───────────────────────────────────────────────────────────────┤
 * │            Error Handling (error.rs)                          │
 * └───────────────────────────────────────────────────────────────┘
 * ```
 *
 * # Safety Guarantees
 *
 * - No panics in library code (all errors returned as Result)
 * - No unsafe code
 * - A session is single-threaded cooperative; only MemoryStore is shared,
 *   behind its own lock
 * - Exactly three suspension points: the coordinator sleep, store file I/O,
 *   and the optional adapter consult
 *
 * # Examples
 *
 * ```rust
 * use selfheal_core::config::PolicyConfig;
 * use selfheal_core::memory::MemoryStore;
 * use selfheal_core::orchestrator::{Admission, DebugSession, PatchSubmission};
 * use selfheal_core::signature::ErrorKind;
 * use serde_json::json;
 * use std::sync::Arc;
 *
 * let store = Arc::new(MemoryStore::new(PolicyConfig::default().store));
 * let mut session = DebugSession::new(PolicyConfig::default(), store);
 *
 * let submission = PatchSubmission {
 *     patch_data: json!({ "patched_code": "fn main() {}", "language": "rust" }),
 *     error_kind: ErrorKind::Syntax,
 *     error_message: "expected `}`".to_string(),
 *     logits: vec![2.0, 0.1, 0.1],
 *     test_coverage: None,
 *     difficulty: None,
 * };
 *
 * match session.begin_attempt(&submission).unwrap() {
 *     Admission::Proceed { .. } => { /* execute externally, then complete_attempt */ }
 *     Admission::Refused(_decision) => { /* act on the decision */ }
 * }
 * ```
 */

pub mod backoff;
pub mod breaker;
pub mod cascade;
pub mod confidence;
pub mod config;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod signature;
pub mod strategy;

// Re-exports at crate root provide ergonomic imports for the adapter shells
pub use backoff::{BackoffCoordinator, ConsultOutcome, GuidanceInput, LlmAdapter};
pub use breaker::{
    AttemptGate, BreakerSnapshot, BreakerSummary, CircuitState, DualBudgetBreaker,
    InternalState, RecommendedAction,
};
pub use cascade::{CascadeDetector, CascadeEntry, CascadeStop};
pub use confidence::{ConfidenceComponents, ConfidenceScore, ConfidenceScorer, HistoricalSignals};
pub use config::PolicyConfig;
pub use envelope::{Attempt, PatchEnvelope, TrendDirection, TrendSnapshot};
pub use error::{Error, Result};
pub use memory::{MemoryStore, StoreMetrics};
pub use orchestrator::{
    Admission, DebugSession, Decision, ExecutionReport, PatchSubmission, SessionEnd,
    SessionOutcome, SuccessCelebration,
};
pub use signature::{ErrorKind, ErrorSignature, ErrorTracker};
pub use strategy::Strategy;
