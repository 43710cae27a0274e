/**
 * Orchestrator Module - Per-Session Decision Driver
 *
 * DESIGN DECISION: Two-phase per-attempt API (begin_attempt / complete_attempt)
 * around externally executed patches
 * WHY: The core never runs code; the caller executes the admitted patch in
 * its own sandbox and reports what happened, so admission and recording are
 * necessarily separate steps
 *
 * REASONING CHAIN:
 * 1. begin_attempt wraps the candidate into the session envelope, screens
 *    risk markers and oversize payloads (flag_developer without consulting
 *    the breaker), enriches scoring with similar prior envelopes, and runs
 *    the scorer and breaker admission gates
 * 2. complete_attempt records the observed outcome into breaker, cascade,
 *    tracker, and envelope, persists via the store's safe path, and distills
 *    everything into one Decision
 * 3. Cascade stops, rollbacks, developer flags, and a permanently open
 *    breaker latch a terminal session outcome; the final-polish path latches
 *    success and emits the success_celebration event
 * 4. The decision is expected control flow: refusals travel inside the
 *    Decision type, never as Err (errors are reserved for bugs and I/O)
 *
 * PATTERN: Pattern-SESSION-001 (Admit -> Execute Externally -> Record)
 * RELATED: every other module; this is the only composition point
 */

use crate::backoff::{BackoffCoordinator, ConsultOutcome, GuidanceInput, LlmAdapter};
use crate::breaker::{DualBudgetBreaker, InternalState, RecommendedAction};
use crate::cascade::CascadeDetector;
use crate::confidence::{ConfidenceScore, ConfidenceScorer, HistoricalSignals};
use crate::config::PolicyConfig;
use crate::envelope::PatchEnvelope;
use crate::memory::MemoryStore;
use crate::signature::{ErrorKind, ErrorTracker};
use crate::strategy::Strategy;
use crate::{Error, Result};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Boolean markers that route a patch straight to a human
const RISK_MARKERS: [&str; 4] = [
    "database_schema_change",
    "authentication_bypass",
    "critical_security_vulnerability",
    "production_data_modification",
];

/// One candidate patch plus the analyzer's view of the failure it targets
#[derive(Debug, Clone)]
pub struct PatchSubmission {
    /// Opaque payload; the core reads patched_code, language, risk markers
    pub patch_data: Value,
    pub error_kind: ErrorKind,
    pub error_message: String,
    /// Per-class logits from the generator
    pub logits: Vec<f64>,
    /// Optional context signals the analyzer already knows
    pub test_coverage: Option<f64>,
    pub difficulty: Option<f64>,
}

/// What the external executor observed
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub success: bool,
    pub errors_detected: u32,
    pub errors_resolved: u32,
    pub lines_of_code: u32,
    pub error_kind: ErrorKind,
    /// Exception class name as reported (may be empty)
    pub error_type: String,
    pub error_message: String,
    pub resource_usage: Option<Value>,
}

/// The per-attempt verdict handed back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Continue {
        reason: String,
    },
    PauseAndBackoff {
        wait_ms: u64,
        reason: String,
    },
    Rollback {
        reason: String,
    },
    Promote {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        celebration: Option<SuccessCelebration>,
    },
    StopCascade {
        reason: String,
    },
    FlagDeveloper {
        code: String,
        message: String,
    },
    TryDifferentStrategy {
        reason: String,
    },
    Exhausted {
        reason: String,
    },
}

/// Admission verdict from begin_attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Execute the patch externally, then call complete_attempt
    Proceed {
        patch_id: Uuid,
        confidence: ConfidenceScore,
        gate_reason: String,
    },
    Refused(Decision),
}

/// How a session can end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Success,
    Rollback,
    StopCascade,
    FlagDeveloper,
    Exhausted,
}

/// Terminal state: the reason and the final envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub reason: String,
    pub envelope: PatchEnvelope,
}

/// The success_celebration event (wire contract)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCelebration {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    pub patch_id: Uuid,
    pub success_metrics: SuccessMetrics,
    pub message: String,
    pub celebration: CelebrationDetail,
    pub final_state: FinalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<CelebrationHints>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylelint_summary: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessMetrics {
    pub final_confidence: f64,
    pub error_count: u32,
    pub attempts_required: u32,
    pub quality_threshold_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelebrationDetail {
    pub achievement: String,
    pub threshold_exceeded: bool,
    pub jitter_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    pub code_polished: bool,
    pub linting_applied: bool,
    pub ready_for_deployment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelebrationHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_flags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<String>,
}

/**
 * One debugging session: own breaker, scorer, cascade, tracker, coordinator;
 * the MemoryStore is the only shared piece.
 */
pub struct DebugSession {
    config: PolicyConfig,
    scorer: ConfidenceScorer,
    breaker: DualBudgetBreaker,
    cascade: CascadeDetector,
    coordinator: BackoffCoordinator,
    tracker: ErrorTracker,
    store: Arc<MemoryStore>,
    adapter: Option<Arc<dyn LlmAdapter>>,
    envelope: Option<PatchEnvelope>,
    last_score: Option<ConfidenceScore>,
    last_kind: Option<ErrorKind>,
    attempt_number: u32,
    terminal: Option<(SessionEnd, String)>,
}

impl DebugSession {
    pub fn new(config: PolicyConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            scorer: ConfidenceScorer::new(config.scorer.clone()),
            breaker: DualBudgetBreaker::new(config.breaker.clone()),
            cascade: CascadeDetector::new(config.cascade.clone()),
            coordinator: BackoffCoordinator::new(config.backoff.clone()),
            tracker: ErrorTracker::new(),
            store,
            adapter: None,
            envelope: None,
            last_score: None,
            last_kind: None,
            attempt_number: 0,
            terminal: None,
            config,
        }
    }

    /// Inject the optional LLM capability used during pause windows
    pub fn with_adapter(mut self, adapter: Arc<dyn LlmAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /**
     * Phase one: screen, score, and gate a candidate patch.
     *
     * Risk markers and oversize payloads flag for a developer before the
     * breaker is ever consulted; a flagged envelope is persisted immediately.
     */
    pub fn begin_attempt(&mut self, submission: &PatchSubmission) -> Result<Admission> {
        if let Some((end, reason)) = &self.terminal {
            return Ok(Admission::Refused(self.terminal_decision(*end, reason.clone())));
        }

        self.ensure_envelope(&submission.patch_data);

        // Risk screen first: flagged patches never reach the breaker.
        if let Some((code, message)) = self.risk_screen(&submission.patch_data) {
            if let Some(envelope) = self.envelope.as_mut() {
                let mut draft = envelope.draft();
                draft.flag_for_developer(&code, &message)?;
                draft.record_timeline("flag_developer");
            }
            self.persist();
            self.terminal = Some((SessionEnd::FlagDeveloper, message.clone()));
            tracing::warn!(code = %code, "patch flagged for developer");
            return Ok(Admission::Refused(Decision::FlagDeveloper { code, message }));
        }

        // Enrich scoring with the nearest prior outcomes.
        let signals = self.gather_signals(submission);
        let score = self.scorer.score(
            &submission.logits,
            submission.error_kind,
            signals.as_ref(),
        );

        if let Some(envelope) = self.envelope.as_mut() {
            let mut draft = envelope.draft();
            draft.merge_confidence(
                Some(score.syntax_confidence),
                Some(score.logic_confidence),
                None,
            );
            draft.set_components(score.components.clone());
        }

        if !self.scorer.should_attempt(&score, submission.error_kind) {
            let wait_ms = self.coordinator.suggest_ms(&self.breaker.state_summary());
            self.last_score = Some(score);
            self.last_kind = Some(submission.error_kind);
            return Ok(Admission::Refused(Decision::PauseAndBackoff {
                wait_ms,
                reason: format!(
                    "confidence below {} admission threshold",
                    submission.error_kind
                ),
            }));
        }

        let gate = self.breaker.can_attempt(submission.error_kind);
        if !gate.allowed {
            if self.breaker.internal_state() == InternalState::PermanentlyOpen {
                self.terminal = Some((SessionEnd::Exhausted, gate.reason.clone()));
                return Ok(Admission::Refused(Decision::Exhausted {
                    reason: gate.reason,
                }));
            }
            let wait_ms = self.coordinator.suggest_ms(&self.breaker.state_summary());
            return Ok(Admission::Refused(Decision::PauseAndBackoff {
                wait_ms,
                reason: gate.reason,
            }));
        }

        let patch_id = self
            .envelope
            .as_ref()
            .map(|e| e.patch_id)
            .ok_or_else(|| Error::InvariantViolation("session envelope missing".to_string()))?;
        self.last_score = Some(score.clone());
        self.last_kind = Some(submission.error_kind);
        Ok(Admission::Proceed {
            patch_id,
            confidence: score,
            gate_reason: gate.reason,
        })
    }

    /**
     * Phase two: record what the external executor observed and decide.
     */
    pub fn complete_attempt(&mut self, report: &ExecutionReport) -> Result<Decision> {
        let score = self.last_score.clone().ok_or_else(|| {
            Error::InvariantViolation(
                "complete_attempt called without a matching begin_attempt".to_string(),
            )
        })?;
        let kind = self.last_kind.unwrap_or(report.error_kind);
        self.last_score = None;
        self.last_kind = None;
        self.attempt_number += 1;

        let confidence = score.overall_confidence;
        self.breaker.record_attempt(
            kind,
            report.success,
            report.errors_detected,
            report.errors_resolved,
            confidence,
            report.lines_of_code,
        );
        self.scorer.record_outcome(confidence, report.success);

        if !report.success {
            self.cascade.record_error(
                report.error_kind,
                &report.error_message,
                confidence,
                self.attempt_number,
            );
            self.tracker
                .record(&report.error_type, &report.error_message);
        }

        let summary = self.breaker.state_summary();
        let stagnation_risk = (f64::from(summary.consecutive_failures) / 5.0).min(1.0);

        // Everything that follows is decided before the draft opens so the
        // envelope is mutated once and persisted once per attempt.
        let cascade_stop = if report.success {
            None
        } else {
            self.cascade.should_stop_attempting()
        };
        let permanently_open = self.breaker.internal_state() == InternalState::PermanentlyOpen;
        let action = summary.recommended_action;
        let strategy = {
            let base = Strategy::dispatch(action, report.error_kind);
            if self.adapter.is_some() {
                base.with_adapter()
            } else {
                base
            }
        };
        // Final-polish path: promoted, everything resolved, near-certain.
        let polish = cascade_stop.is_none()
            && !permanently_open
            && action == RecommendedAction::Promote
            && report.errors_resolved > 0
            && report.errors_detected == 0
            && confidence >= self.config.session.polish_confidence_floor;
        let celebration = if polish {
            self.envelope
                .as_ref()
                .map(|envelope| self.build_celebration(envelope, confidence, report))
        } else {
            None
        };

        {
            let envelope = self.envelope.as_mut().ok_or_else(|| {
                Error::InvariantViolation("attempt completed without an envelope".to_string())
            })?;
            let mut draft = envelope.draft();
            draft.append_attempt(
                report.success,
                if report.error_message.is_empty() {
                    None
                } else {
                    Some(&report.error_message)
                },
                Some(summary.state),
                Some(summary.failure_count),
            );
            draft.bump_kind_attempt(kind == ErrorKind::Syntax);
            draft.add_errors_resolved(report.errors_resolved);
            draft.set_breaker(self.breaker.snapshot());
            draft.set_cascade_depth(self.cascade.depth() as u32);
            if let Some(usage) = &report.resource_usage {
                draft.merge_resource_usage(usage);
            }
            draft.update_trend(
                report.errors_detected,
                report.errors_resolved,
                None,
                summary.improvement_velocity,
                Some(stagnation_risk),
            );
            draft.mark_success(report.success && report.errors_detected == 0);

            if let Some(stop) = &cascade_stop {
                draft.record_timeline(&format!("stop_cascade: {}", stop.reason));
            } else if permanently_open {
                draft.record_timeline("exhausted");
            } else {
                draft.record_timeline(&format!("strategy:{}", strategy.label()));
                if polish {
                    draft.mark_success(true);
                    draft.record_timeline("success_celebration");
                }
            }
        }
        self.persist();

        if let Some(stop) = cascade_stop {
            self.terminal = Some((SessionEnd::StopCascade, stop.reason.clone()));
            return Ok(Decision::StopCascade { reason: stop.reason });
        }

        if permanently_open {
            let reason = "attempt budgets exhausted with no improvement".to_string();
            self.terminal = Some((SessionEnd::Exhausted, reason.clone()));
            return Ok(Decision::Exhausted { reason });
        }

        if let Some(celebration) = celebration {
            let reason = "patch promoted with zero remaining errors".to_string();
            self.terminal = Some((SessionEnd::Success, reason.clone()));
            tracing::info!(patch_id = %celebration.patch_id, "patch promoted");
            return Ok(Decision::Promote {
                reason,
                celebration: Some(celebration),
            });
        }

        let decision = match action {
            RecommendedAction::Continue => Decision::Continue {
                reason: "trend supports another attempt".to_string(),
            },
            RecommendedAction::PauseAndBackoff => Decision::PauseAndBackoff {
                wait_ms: self.coordinator.suggest_ms(&summary),
                reason: "oscillating or noisy trend; backing off".to_string(),
            },
            RecommendedAction::Rollback => {
                let reason = format!(
                    "regressing against best error count ({:?})",
                    summary.best_error_count_seen
                );
                self.terminal = Some((SessionEnd::Rollback, reason.clone()));
                Decision::Rollback { reason }
            }
            RecommendedAction::Promote => Decision::Promote {
                reason: "confidence above promotion floor while improving".to_string(),
                celebration: None,
            },
            RecommendedAction::TryDifferentStrategy => Decision::TryDifferentStrategy {
                reason: "no trend supports the current approach".to_string(),
            },
        };
        Ok(decision)
    }

    /**
     * Build the guidance envelope for the next generator round from the
     * current breaker summary and session envelope.
     */
    pub fn guidance(&self, input: &GuidanceInput) -> Value {
        self.coordinator.build_guidance(
            input,
            &self.breaker.state_summary(),
            self.envelope.as_ref(),
        )
    }

    /// Sleep out a wait, racing the injected adapter and breaker resume
    pub async fn backoff(&self, wait_ms: u64, guidance: &Value) -> Result<ConsultOutcome> {
        self.coordinator
            .pause_and_consult(
                wait_ms,
                guidance,
                self.adapter.as_deref(),
                Some(self.breaker.resume_handle()),
            )
            .await
    }

    pub fn pause(&mut self, duration_ms: u64, reason: &str) {
        self.breaker.pause(duration_ms, reason);
    }

    pub fn resume(&mut self) {
        self.breaker.resume();
    }

    /// Terminal outcome, once one of the ending decisions has been reached
    pub fn outcome(&self) -> Option<SessionOutcome> {
        let (end, reason) = self.terminal.as_ref()?;
        Some(SessionOutcome {
            end: *end,
            reason: reason.clone(),
            envelope: self.envelope.clone()?,
        })
    }

    pub fn envelope(&self) -> Option<&PatchEnvelope> {
        self.envelope.as_ref()
    }

    pub fn breaker(&self) -> &DualBudgetBreaker {
        &self.breaker
    }

    pub fn cascade(&self) -> &CascadeDetector {
        &self.cascade
    }

    pub fn error_counts(&self) -> std::collections::HashMap<String, usize> {
        self.tracker.get_error_counts()
    }

    // ---- internals ----

    fn ensure_envelope(&mut self, patch_data: &Value) {
        match &mut self.envelope {
            Some(envelope) => {
                let mut draft = envelope.draft();
                draft.set_patch_data(patch_data.clone());
            }
            None => {
                let mut envelope = PatchEnvelope::new(patch_data.clone());
                {
                    let mut draft = envelope.draft();
                    draft.set_policy_snapshot(
                        serde_json::to_value(&self.config).unwrap_or(Value::Null),
                    );
                    draft.record_timeline("session_started");
                }
                self.envelope = Some(envelope);
            }
        }
    }

    /// Risk markers and oversize payloads route to a human unseen
    fn risk_screen(&self, patch_data: &Value) -> Option<(String, String)> {
        for marker in RISK_MARKERS {
            if patch_data.get(marker).and_then(Value::as_bool) == Some(true) {
                return Some((
                    marker.to_string(),
                    format!("patch carries risk marker '{}'; human review required", marker),
                ));
            }
        }
        let size = patch_data.to_string().len();
        if size > self.config.session.max_patch_bytes {
            return Some((
                "oversized_patch".to_string(),
                format!(
                    "patch payload is {} bytes (limit {}); human review required",
                    size, self.config.session.max_patch_bytes
                ),
            ));
        }
        None
    }

    /// Derive scoring signals from similar prior envelopes plus the
    /// analyzer-provided extras. The session's own persisted snapshots are
    /// excluded: history means other series, not this one's earlier drafts.
    fn gather_signals(&self, submission: &PatchSubmission) -> Option<HistoricalSignals> {
        let own_id = self
            .envelope
            .as_ref()
            .map(|e| e.patch_id.to_string())
            .unwrap_or_default();
        let similar: Vec<Value> = self
            .store
            .get_similar(&submission.patch_data)
            .into_iter()
            .filter(|e| e.get("patch_id").and_then(Value::as_str) != Some(own_id.as_str()))
            .collect();
        if similar.is_empty()
            && submission.test_coverage.is_none()
            && submission.difficulty.is_none()
        {
            return None;
        }

        let mut signals = HistoricalSignals {
            test_coverage: submission.test_coverage,
            difficulty: submission.difficulty,
            ..HistoricalSignals::default()
        };
        if !similar.is_empty() {
            let successes = similar
                .iter()
                .filter(|e| e.get("success").and_then(Value::as_bool) == Some(true))
                .count();
            signals.success_rate = Some(successes as f64 / similar.len() as f64);
            signals.pattern_similarity = Some((similar.len() as f64 / 5.0).min(1.0));
        }
        Some(signals)
    }

    fn build_celebration(
        &self,
        envelope: &PatchEnvelope,
        confidence: f64,
        report: &ExecutionReport,
    ) -> SuccessCelebration {
        let jitter_delay_ms = rand::thread_rng().gen_range(200..=700);
        SuccessCelebration {
            event_type: "success_celebration".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            patch_id: envelope.patch_id,
            success_metrics: SuccessMetrics {
                final_confidence: confidence,
                error_count: report.errors_detected,
                attempts_required: self.attempt_number,
                quality_threshold_met: confidence >= self.config.session.polish_confidence_floor,
            },
            message: "All errors resolved; patch ready for final review".to_string(),
            celebration: CelebrationDetail {
                achievement: "zero_errors".to_string(),
                threshold_exceeded: true,
                jitter_delay_ms,
            },
            final_state: FinalState {
                code_polished: true,
                linting_applied: false,
                ready_for_deployment: true,
            },
            hints: self.build_hints(&envelope.patch_data),
            stylelint_summary: None,
        }
    }

    /// Critical hints ride along only when the payload carries the signals
    fn build_hints(&self, patch_data: &Value) -> Option<CelebrationHints> {
        let missing_paths = patch_data.get("missing_paths").and_then(|v| {
            let paths: Vec<String> = v
                .as_array()?
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect();
            if paths.is_empty() {
                None
            } else {
                Some(paths)
            }
        });
        let risk_flags = patch_data.get("risk_flags").and_then(|v| {
            let flags: Vec<String> = v
                .as_array()?
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .filter(|f| f.starts_with("high:") || f.starts_with("medium:"))
                .collect();
            if flags.is_empty() {
                None
            } else {
                Some(flags)
            }
        });
        let watchdog = patch_data
            .get("watchdog")
            .and_then(Value::as_str)
            .map(str::to_string);

        if missing_paths.is_none() && risk_flags.is_none() && watchdog.is_none() {
            None
        } else {
            Some(CelebrationHints {
                missing_paths,
                risk_flags,
                watchdog,
            })
        }
    }

    fn terminal_decision(&self, end: SessionEnd, reason: String) -> Decision {
        match end {
            SessionEnd::Success => Decision::Promote {
                reason,
                celebration: None,
            },
            SessionEnd::Rollback => Decision::Rollback { reason },
            SessionEnd::StopCascade => Decision::StopCascade { reason },
            SessionEnd::FlagDeveloper => Decision::FlagDeveloper {
                code: self
                    .envelope
                    .as_ref()
                    .and_then(|e| e.developer_flag_reason.clone())
                    .unwrap_or_else(|| "flagged".to_string()),
                message: reason,
            },
            SessionEnd::Exhausted => Decision::Exhausted { reason },
        }
    }

    fn persist(&self) {
        if let Some(envelope) = &self.envelope {
            match envelope.to_json() {
                Ok(json) => self.store.safe_add_outcome(&json),
                Err(err) => tracing::error!(error = %err, "envelope serialization failed"),
            }
        }
    }
}
