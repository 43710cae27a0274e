/**
 * Dual-Budget Circuit Breaker - Trend-Aware Attempt Admission (25% of core)
 *
 * DESIGN DECISION: Separate syntax and logic/runtime budgets with trend-aware
 * overrides instead of a single failure counter
 * WHY: Syntax fixes converge (or never will) within a few attempts; logic and
 * runtime fixes legitimately need many more. A single budget either starves
 * logic repair or lets syntax repair thrash
 *
 * REASONING CHAIN:
 * 1. Every attempt is classified syntax or logic/runtime by the analyzer
 * 2. Each class carries its own attempt ceiling and error-density budget
 * 3. Recent windows (last improvement_window attempts) feed an is_improving
 *    predicate; improvement buys +2 attempts and a 1.5x density budget
 * 4. First and second attempts of a class are always admitted (grace) so the
 *    trend windows can form deltas at all
 * 5. A class that exhausts its budget while stagnant opens its half of the
 *    breaker; syntax-open plus exhausted logic plus stagnation promotes to
 *    PERMANENTLY_OPEN
 * 6. recommended_action distills the same windows into one of five actions
 *    for the orchestrator
 *
 * PATTERN: Pattern-BREAKER-001 (Dual-Budget Trend-Aware Admission)
 * RELATED: cascade.rs (chain-level stop rules), backoff.rs (consumes the
 * summary), orchestrator.rs (drives record_attempt)
 */

use crate::config::BreakerConfig;
use crate::signature::ErrorKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

/**
 * Schema-facing circuit state (the three classic breaker states)
 *
 * DESIGN DECISION: Keep the classic OPEN/CLOSED/HALF_OPEN vocabulary on the
 * wire while the internal machine tracks which budget opened
 * WHY: Downstream consumers speak the standard circuit-breaker schema
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CircuitState {
    #[serde(rename = "OPEN")]
    Open,
    #[default]
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Open => "OPEN",
            CircuitState::Closed => "CLOSED",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Internal state machine: which budget (if any) tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InternalState {
    #[default]
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "SYNTAX_OPEN")]
    SyntaxOpen,
    #[serde(rename = "LOGIC_OPEN")]
    LogicOpen,
    #[serde(rename = "PERMANENTLY_OPEN")]
    PermanentlyOpen,
}

/// Action the breaker recommends to the orchestrator after each record step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Continue,
    PauseAndBackoff,
    Rollback,
    Promote,
    TryDifferentStrategy,
}

/**
 * Admission verdict for can_attempt
 *
 * DESIGN DECISION: Verdict struct instead of Result<(), Error>
 * WHY: Refusals are expected control flow, not failures; the
 * reason and optional pause remainder travel with the verdict
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptGate {
    pub allowed: bool,
    pub reason: String,
    /// Set when refusal is due to an active pause window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_pause_ms: Option<u64>,
    /// Set when admission happened despite a tripped budget (improving)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl AttemptGate {
    fn admit(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
            remaining_pause_ms: None,
            warning: None,
        }
    }

    fn admit_with_warning(reason: &str, warning: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
            remaining_pause_ms: None,
            warning: Some(warning.to_string()),
        }
    }

    fn refuse(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
            remaining_pause_ms: None,
            warning: None,
        }
    }
}

/**
 * Wire snapshot of the breaker, embedded in every envelope
 *
 * Field set fixed by the envelope wire format; failure_count is the sum of
 * both error counters.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BreakerSnapshot {
    pub schema_state: CircuitState,
    pub internal_state: InternalState,
    pub syntax_attempts: u32,
    pub logic_attempts: u32,
    pub syntax_errors: u32,
    pub logic_errors: u32,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_error_count_seen: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
}

/**
 * Rich summary emitted to the backoff coordinator and the jitter envelope
 *
 * Emits both `circuit_state` (internal vocabulary) and `state` (schema
 * mapping) plus every trend window the predicates consulted.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSummary {
    pub circuit_state: InternalState,
    pub state: CircuitState,
    pub syntax_attempts: u32,
    pub logic_attempts: u32,
    pub syntax_errors: u32,
    pub logic_errors: u32,
    /// syntax_errors + logic_errors
    pub failure_count: u32,
    pub consecutive_failures: u32,
    pub total_attempts: u32,
    pub cumulative_errors_resolved: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_error_count_seen: Option<u32>,
    pub recent_error_counts: Vec<u32>,
    pub recent_errors_resolved: Vec<u32>,
    pub recent_confidences: Vec<f64>,
    pub recent_error_densities: Vec<f64>,
    pub is_improving: bool,
    pub should_continue: bool,
    pub is_regressing_against_best: bool,
    pub recommended_action: RecommendedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_pause_ms: Option<u64>,
    /// Signed mean per-attempt change in error count across the window
    /// (negative = errors falling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_velocity: Option<f64>,
}

/**
 * The dual-budget breaker itself
 *
 * DESIGN DECISION: Plain mutable struct, one per session, no internal locking
 * WHY: A session is single-threaded cooperative; cross-session state lives in
 * MemoryStore only. The lone shared primitive is the resume Notify so an
 * in-flight coordinator sleep can be woken
 */
#[derive(Debug)]
pub struct DualBudgetBreaker {
    config: BreakerConfig,
    state: InternalState,

    syntax_attempts: u32,
    logic_attempts: u32,
    syntax_errors: u32,
    logic_errors: u32,
    consecutive_failures: u32,
    cumulative_errors_resolved: u32,
    best_error_count_seen: Option<u32>,

    recent_error_counts: VecDeque<u32>,
    recent_errors_resolved: VecDeque<u32>,
    recent_confidences: VecDeque<f64>,
    recent_error_densities: VecDeque<f64>,

    paused_until: Option<i64>,
    pause_reason: Option<String>,
    resume_notify: Arc<Notify>,
}

impl DualBudgetBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: InternalState::Closed,
            syntax_attempts: 0,
            logic_attempts: 0,
            syntax_errors: 0,
            logic_errors: 0,
            consecutive_failures: 0,
            cumulative_errors_resolved: 0,
            best_error_count_seen: None,
            recent_error_counts: VecDeque::new(),
            recent_errors_resolved: VecDeque::new(),
            recent_confidences: VecDeque::new(),
            recent_error_densities: VecDeque::new(),
            paused_until: None,
            pause_reason: None,
            resume_notify: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a kind is governed by the syntax budget (everything that is
    /// not syntax shares the logic/runtime budget)
    fn is_syntax_kind(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::Syntax)
    }

    fn attempts_for(&self, kind: ErrorKind) -> u32 {
        if Self::is_syntax_kind(kind) {
            self.syntax_attempts
        } else {
            self.logic_attempts
        }
    }

    fn max_attempts_for(&self, kind: ErrorKind) -> u32 {
        if Self::is_syntax_kind(kind) {
            self.config.syntax_max_attempts
        } else {
            self.config.logic_max_attempts
        }
    }

    fn budget_for(&self, kind: ErrorKind) -> f64 {
        if Self::is_syntax_kind(kind) {
            self.config.syntax_error_budget
        } else {
            self.config.logic_error_budget
        }
    }

    fn kind_open_state(kind: ErrorKind) -> InternalState {
        if Self::is_syntax_kind(kind) {
            InternalState::SyntaxOpen
        } else {
            InternalState::LogicOpen
        }
    }

    /**
     * Admission check (pure: observes state, mutates nothing)
     *
     * Order fixed by the control contract: permanent-open, pause window,
     * grace admissions, kind-open override, attempt ceiling, density budget.
     * An expired pause is observed as inactive here; the stale field is
     * cleared by the next record_attempt or resume call.
     */
    pub fn can_attempt(&self, kind: ErrorKind) -> AttemptGate {
        if self.state == InternalState::PermanentlyOpen {
            return AttemptGate::refuse("circuit permanently open; human intervention required");
        }

        if let Some(remaining) = self.remaining_pause_ms() {
            let mut gate =
                AttemptGate::refuse(&format!("paused for {}ms more", remaining));
            gate.remaining_pause_ms = Some(remaining);
            tracing::debug!(remaining_ms = remaining, "breaker refused: pause active");
            return gate;
        }

        let improving = self.is_improving();
        let attempts = self.attempts_for(kind);
        let effective_max = self.max_attempts_for(kind) + if improving { 2 } else { 0 };

        if attempts == 0 {
            return AttemptGate::admit("first attempt grace");
        }
        if attempts == 1 {
            return AttemptGate::admit("first-failure grace (forming trend deltas)");
        }

        let kind_open = self.state == Self::kind_open_state(kind);
        if kind_open {
            if improving {
                return AttemptGate::admit_with_warning(
                    "circuit open but trend improving",
                    "admitted on improvement override; budget already tripped",
                );
            }
            tracing::debug!(kind = %kind, "breaker refused: circuit open, no improvement");
            return AttemptGate::refuse(&format!("{} circuit open and not improving", kind));
        }

        if attempts >= effective_max {
            if improving {
                return AttemptGate::admit_with_warning(
                    "attempt ceiling reached but trend improving",
                    "improvement bonus attempts in use",
                );
            }
            tracing::debug!(kind = %kind, attempts, effective_max, "breaker refused: ceiling");
            return AttemptGate::refuse(&format!(
                "{} attempts exhausted ({}/{}) with no improvement",
                kind, attempts, effective_max
            ));
        }

        let budget = self.budget_for(kind) * if improving { 1.5 } else { 1.0 };
        if let Some(density) = self.recent_error_densities.back() {
            if *density > budget {
                if improving {
                    return AttemptGate::admit_with_warning(
                        "error density over budget but trend improving",
                        "density budget stretched 1.5x by improvement",
                    );
                }
                tracing::debug!(kind = %kind, density = *density, budget, "breaker refused: density");
                return AttemptGate::refuse(&format!(
                    "error density {:.4} exceeds {} budget {:.4} with no improvement",
                    density, kind, budget
                ));
            }
        }

        AttemptGate::admit("within budget")
    }

    /**
     * Record the observed outcome of an externally executed attempt
     *
     * Pushes the trend windows, updates counters and the monotone-minimum
     * best error count, then evaluates the opening conditions for the
     * attempt's kind.
     */
    pub fn record_attempt(
        &mut self,
        kind: ErrorKind,
        success: bool,
        errors_detected: u32,
        errors_resolved: u32,
        confidence: f64,
        lines_of_code: u32,
    ) {
        // Expired pause windows are cleared on the write path, keeping
        // can_attempt pure.
        self.clear_expired_pause();

        let window = self.config.improvement_window as usize;
        push_bounded(&mut self.recent_error_counts, errors_detected, window);
        push_bounded(&mut self.recent_errors_resolved, errors_resolved, window);
        push_bounded(&mut self.recent_confidences, confidence, window);
        let density = if lines_of_code > 0 {
            f64::from(errors_detected) / f64::from(lines_of_code)
        } else {
            f64::from(errors_detected)
        };
        push_bounded(&mut self.recent_error_densities, density, window);

        if Self::is_syntax_kind(kind) {
            self.syntax_attempts += 1;
        } else {
            self.logic_attempts += 1;
        }

        self.cumulative_errors_resolved += errors_resolved;
        self.best_error_count_seen = Some(match self.best_error_count_seen {
            Some(best) => best.min(errors_detected),
            None => errors_detected,
        });

        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            if Self::is_syntax_kind(kind) {
                self.syntax_errors += 1;
            } else {
                self.logic_errors += 1;
            }
            self.evaluate_opening(kind, density);
        }
    }

    /// Opening conditions, evaluated only on failure
    fn evaluate_opening(&mut self, kind: ErrorKind, density: f64) {
        if self.state == InternalState::PermanentlyOpen {
            return;
        }

        let improving = self.is_improving();
        let attempts = self.attempts_for(kind);
        let over_budget = density > self.budget_for(kind);
        let at_max = attempts >= self.max_attempts_for(kind);

        if !improving && (over_budget || at_max) {
            let open = Self::kind_open_state(kind);
            if self.state == InternalState::Closed || self.state == open {
                tracing::info!(kind = %kind, over_budget, at_max, "circuit opening");
                self.state = open;
            }
        }

        // Terminal promotion: syntax side already open, logic budget spent,
        // stagnant, and the continue predicate gives no reason to keep going.
        if self.state == InternalState::SyntaxOpen
            && self.logic_attempts >= self.config.logic_max_attempts
            && !improving
            && !self.should_continue()
        {
            tracing::warn!("circuit permanently open");
            self.state = InternalState::PermanentlyOpen;
        }
    }

    /**
     * Trend predicate: is the error count heading downward?
     *
     * True if (a) the last two counts strictly decreased, (b) the last
     * attempt resolved something AND the count decreased (no fake wins), or
     * (c) across the window last < first. A single data point improves only
     * on an explicit errors_resolved > 0.
     */
    pub fn is_improving(&self) -> bool {
        let counts = &self.recent_error_counts;
        match counts.len() {
            0 => false,
            1 => self
                .recent_errors_resolved
                .back()
                .is_some_and(|resolved| *resolved > 0),
            n => {
                let last = counts[n - 1];
                let prev = counts[n - 2];
                let strictly_decreasing = last < prev;
                let resolved_with_decrease = self
                    .recent_errors_resolved
                    .back()
                    .is_some_and(|resolved| *resolved > 0)
                    && last < prev;
                let window_decline = last < counts[0];
                strictly_decreasing || resolved_with_decrease || window_decline
            }
        }
    }

    /// Confidence trend across the recent window (upward = last > previous)
    fn confidence_improving(&self) -> bool {
        let conf = &self.recent_confidences;
        let n = conf.len();
        n >= 2 && conf[n - 1] > conf[n - 2]
    }

    /// Regressing = latest error count above the best ever seen
    pub fn is_regressing_against_best(&self) -> bool {
        match (self.recent_error_counts.back(), self.best_error_count_seen) {
            (Some(last), Some(best)) => *last > best,
            _ => false,
        }
    }

    /**
     * Continue predicate: density improved, or confidence is
     * trending up, or net-positive progress. Guards: hard stop after 5
     * stagnant consecutive failures past 5 attempts; regression against best
     * with flat confidence stops too.
     */
    pub fn should_continue(&self) -> bool {
        let improving = self.is_improving();

        if self.total_attempts() >= 5 && self.consecutive_failures >= 5 && !improving {
            return false;
        }
        if self.is_regressing_against_best() && !self.confidence_improving() {
            return false;
        }

        let densities = &self.recent_error_densities;
        let n = densities.len();
        let density_improved = n >= 2 && densities[n - 1] < densities[n - 2];

        let counts = &self.recent_error_counts;
        let m = counts.len();
        let net_positive = m >= 2 && {
            let last = counts[m - 1];
            let prev = counts[m - 2];
            let resolved_sum: u32 = self.recent_errors_resolved.iter().sum();
            last <= prev && resolved_sum > last
        };

        density_improved || self.confidence_improving() || net_positive
    }

    /**
     * Distill the windows into one recommendation
     *
     * Clause order is the contract: promote, exploration grace, rollback,
     * oscillation/noise pause, continue, try-different-strategy. The
     * rollback clause reads the confidence trend (a regressing error count
     * with flat confidence is a rollback even when the window's first-vs-last
     * comparison still reads "improving").
     */
    pub fn recommended_action(&self) -> RecommendedAction {
        let improving = self.is_improving();

        if let Some(latest) = self.recent_confidences.back() {
            if *latest >= self.config.promotion_confidence_floor && improving {
                return RecommendedAction::Promote;
            }
        }

        let regressing = self.is_regressing_against_best();
        if self.total_attempts() <= 2 && !regressing {
            return RecommendedAction::Continue;
        }

        if regressing && !self.confidence_improving() {
            return RecommendedAction::Rollback;
        }

        if self.error_counts_oscillating() || self.confidence_noisy() {
            return RecommendedAction::PauseAndBackoff;
        }

        if self.should_continue() {
            RecommendedAction::Continue
        } else {
            RecommendedAction::TryDifferentStrategy
        }
    }

    /// Mixed up-and-down deltas across the error-count window
    fn error_counts_oscillating(&self) -> bool {
        let counts = &self.recent_error_counts;
        if counts.len() < 3 {
            return false;
        }
        let mut rose = false;
        let mut fell = false;
        for pair in counts.iter().collect::<Vec<_>>().windows(2) {
            if pair[1] > pair[0] {
                rose = true;
            }
            if pair[1] < pair[0] {
                fell = true;
            }
        }
        rose && fell
    }

    /// Mixed up-and-down deltas across the confidence window
    fn confidence_noisy(&self) -> bool {
        let conf = &self.recent_confidences;
        if conf.len() < 3 {
            return false;
        }
        let mut rose = false;
        let mut fell = false;
        for pair in conf.iter().collect::<Vec<_>>().windows(2) {
            if pair[1] > pair[0] {
                rose = true;
            }
            if pair[1] < pair[0] {
                fell = true;
            }
        }
        rose && fell
    }

    // ---- Pause API ----

    pub fn pause(&mut self, duration_ms: u64, reason: &str) {
        let until = Utc::now().timestamp_millis() + duration_ms as i64;
        self.paused_until = Some(until);
        self.pause_reason = Some(reason.to_string());
        tracing::info!(duration_ms, reason, "breaker paused");
    }

    /// Clears the pause window and wakes any in-flight coordinator sleep
    pub fn resume(&mut self) {
        self.paused_until = None;
        self.pause_reason = None;
        self.resume_notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.remaining_pause_ms().is_some()
    }

    pub fn remaining_pause_ms(&self) -> Option<u64> {
        let until = self.paused_until?;
        let now = Utc::now().timestamp_millis();
        if now < until {
            Some((until - now) as u64)
        } else {
            None
        }
    }

    /// Handle the coordinator uses to observe cancellation
    pub fn resume_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.resume_notify)
    }

    fn clear_expired_pause(&mut self) {
        if let Some(until) = self.paused_until {
            if Utc::now().timestamp_millis() >= until {
                self.paused_until = None;
                self.pause_reason = None;
            }
        }
    }

    // ---- Introspection ----

    pub fn total_attempts(&self) -> u32 {
        self.syntax_attempts + self.logic_attempts
    }

    pub fn internal_state(&self) -> InternalState {
        self.state
    }

    /// Internal → schema mapping: a kind-open circuit that is still
    /// improving is probing (HALF_OPEN); stagnant or permanent opens are OPEN
    pub fn schema_state(&self) -> CircuitState {
        match self.state {
            InternalState::Closed => CircuitState::Closed,
            InternalState::PermanentlyOpen => CircuitState::Open,
            InternalState::SyntaxOpen | InternalState::LogicOpen => {
                if self.is_improving() {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
        }
    }

    /// Signed mean per-attempt delta across the error-count window
    fn improvement_velocity(&self) -> Option<f64> {
        let counts = &self.recent_error_counts;
        let n = counts.len();
        if n < 2 {
            return None;
        }
        let first = f64::from(counts[0]);
        let last = f64::from(counts[n - 1]);
        Some((last - first) / (n as f64 - 1.0))
    }

    /// Wire snapshot for the envelope
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            schema_state: self.schema_state(),
            internal_state: self.state,
            syntax_attempts: self.syntax_attempts,
            logic_attempts: self.logic_attempts,
            syntax_errors: self.syntax_errors,
            logic_errors: self.logic_errors,
            consecutive_failures: self.consecutive_failures,
            best_error_count_seen: self.best_error_count_seen,
            paused_until: self.paused_until,
            pause_reason: self.pause_reason.clone(),
        }
    }

    /// Full summary for the coordinator and the jitter envelope's trend block
    pub fn state_summary(&self) -> BreakerSummary {
        BreakerSummary {
            circuit_state: self.state,
            state: self.schema_state(),
            syntax_attempts: self.syntax_attempts,
            logic_attempts: self.logic_attempts,
            syntax_errors: self.syntax_errors,
            logic_errors: self.logic_errors,
            failure_count: self.syntax_errors + self.logic_errors,
            consecutive_failures: self.consecutive_failures,
            total_attempts: self.total_attempts(),
            cumulative_errors_resolved: self.cumulative_errors_resolved,
            best_error_count_seen: self.best_error_count_seen,
            recent_error_counts: self.recent_error_counts.iter().copied().collect(),
            recent_errors_resolved: self.recent_errors_resolved.iter().copied().collect(),
            recent_confidences: self.recent_confidences.iter().copied().collect(),
            recent_error_densities: self.recent_error_densities.iter().copied().collect(),
            is_improving: self.is_improving(),
            should_continue: self.should_continue(),
            is_regressing_against_best: self.is_regressing_against_best(),
            recommended_action: self.recommended_action(),
            paused_until: self.paused_until,
            pause_reason: self.pause_reason.clone(),
            remaining_pause_ms: self.remaining_pause_ms(),
            improvement_velocity: self.improvement_velocity(),
        }
    }
}

impl Default for DualBudgetBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, cap: usize) {
    window.push_back(value);
    while window.len() > cap.max(1) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> DualBudgetBreaker {
        DualBudgetBreaker::default()
    }

    /**
     * Test: first and second attempts of each kind are always admitted
     *
     * Grace admissions are policy-level: they hold even when the 1/1 error
     * rate would blow any budget, so trend deltas can form at all.
     */
    #[test]
    fn test_grace_admissions() {
        let mut b = breaker();
        let gate = b.can_attempt(ErrorKind::Syntax);
        assert!(gate.allowed);
        assert!(gate.reason.contains("first attempt"));

        // Catastrophic first failure: 50 errors in 100 lines (density 0.5,
        // budget 0.03). Second attempt still admitted.
        b.record_attempt(ErrorKind::Syntax, false, 50, 0, 0.3, 100);
        let gate = b.can_attempt(ErrorKind::Syntax);
        assert!(gate.allowed, "second attempt must be grace-admitted: {:?}", gate);
        assert!(gate.reason.contains("first-failure grace"));

        // Logic budget is independent: its first attempt is still grace.
        let gate = b.can_attempt(ErrorKind::Logic);
        assert!(gate.allowed);
        assert!(gate.reason.contains("first attempt"));
    }

    #[test]
    fn test_single_resolved_attempt_is_improving() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, true, 3, 2, 0.8, 200);
        assert!(b.is_improving());

        let mut b2 = breaker();
        b2.record_attempt(ErrorKind::Logic, false, 3, 0, 0.8, 200);
        assert!(!b2.is_improving());
    }

    #[test]
    fn test_is_improving_window_rules() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        b.record_attempt(ErrorKind::Logic, false, 8, 0, 0.5, 200);
        // 10 -> 8 strictly decreased
        assert!(b.is_improving());

        let mut b2 = breaker();
        b2.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        b2.record_attempt(ErrorKind::Logic, false, 12, 0, 0.5, 200);
        assert!(!b2.is_improving());

        // Window decline: last < first even with a bump in the middle
        let mut b3 = breaker();
        b3.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        b3.record_attempt(ErrorKind::Logic, false, 12, 0, 0.5, 200);
        b3.record_attempt(ErrorKind::Logic, false, 9, 0, 0.5, 200);
        assert!(b3.is_improving());
    }

    /**
     * Test: syntax circuit opens after exhausting attempts with no progress
     */
    #[test]
    fn test_syntax_open_after_stagnant_exhaustion() {
        let mut b = breaker();
        for _ in 0..3 {
            b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        }
        assert_eq!(b.internal_state(), InternalState::SyntaxOpen);
        let gate = b.can_attempt(ErrorKind::Syntax);
        assert!(!gate.allowed);
        assert!(gate.reason.contains("circuit open"));
        // Stagnant open maps to schema OPEN
        assert_eq!(b.schema_state(), CircuitState::Open);
    }

    #[test]
    fn test_open_circuit_admits_while_improving() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        assert_eq!(b.internal_state(), InternalState::SyntaxOpen);

        // Now errors start falling: improvement override admits with warning
        b.record_attempt(ErrorKind::Syntax, false, 6, 4, 0.6, 100);
        assert!(b.is_improving());
        let gate = b.can_attempt(ErrorKind::Syntax);
        assert!(gate.allowed);
        assert!(gate.warning.is_some());
        // Improving open maps to HALF_OPEN on the schema side
        assert_eq!(b.schema_state(), CircuitState::HalfOpen);
    }

    /**
     * Test: regression against best with flat confidence recommends rollback
     * (errors [20, 12, 18], confidence flat 0.7)
     */
    #[test]
    fn test_regression_rollback() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, false, 20, 0, 0.7, 500);
        b.record_attempt(ErrorKind::Logic, false, 12, 0, 0.7, 500);
        b.record_attempt(ErrorKind::Logic, false, 18, 0, 0.7, 500);

        assert!(b.is_regressing_against_best());
        assert_eq!(b.recommended_action(), RecommendedAction::Rollback);
    }

    /**
     * Test: high confidence while improving recommends promote
     * (errors [10, 8, 5], resolved [2, 2, 3],
     * confidence [0.70, 0.82, 0.90])
     */
    #[test]
    fn test_plateau_then_promote() {
        let mut b = breaker();

        let gate = b.can_attempt(ErrorKind::Logic);
        assert!(gate.allowed);
        b.record_attempt(ErrorKind::Logic, false, 10, 2, 0.70, 400);

        let gate = b.can_attempt(ErrorKind::Logic);
        assert!(gate.allowed);
        b.record_attempt(ErrorKind::Logic, false, 8, 2, 0.82, 400);

        let gate = b.can_attempt(ErrorKind::Logic);
        assert!(gate.allowed);
        b.record_attempt(ErrorKind::Logic, true, 5, 3, 0.90, 400);

        assert!(b.is_improving());
        assert_eq!(b.recommended_action(), RecommendedAction::Promote);
    }

    #[test]
    fn test_exploration_grace_continue() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        assert_eq!(b.recommended_action(), RecommendedAction::Continue);
    }

    #[test]
    fn test_oscillation_recommends_pause() {
        let mut b = breaker();
        // Mixed deltas with the latest equal to best (12 -> 15 -> 12): not a
        // regression, not improving enough to promote.
        b.record_attempt(ErrorKind::Logic, false, 12, 0, 0.6, 300);
        b.record_attempt(ErrorKind::Logic, false, 15, 0, 0.6, 300);
        b.record_attempt(ErrorKind::Logic, false, 12, 1, 0.6, 300);
        assert!(!b.is_regressing_against_best());
        assert!(b.error_counts_oscillating());
        assert_eq!(b.recommended_action(), RecommendedAction::PauseAndBackoff);
    }

    #[test]
    fn test_hard_stop_guard() {
        let mut b = breaker();
        for _ in 0..5 {
            b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        }
        assert_eq!(b.total_attempts(), 5);
        assert_eq!(b.consecutive_failures, 5);
        assert!(!b.should_continue());
    }

    #[test]
    fn test_permanent_open_promotion() {
        let mut b = DualBudgetBreaker::new(BreakerConfig {
            syntax_max_attempts: 2,
            logic_max_attempts: 3,
            ..BreakerConfig::default()
        });

        // Trip the syntax side first.
        b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        b.record_attempt(ErrorKind::Syntax, false, 10, 0, 0.4, 100);
        assert_eq!(b.internal_state(), InternalState::SyntaxOpen);

        // Exhaust the logic budget with zero progress.
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.4, 100);
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.4, 100);
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.4, 100);

        assert_eq!(b.internal_state(), InternalState::PermanentlyOpen);
        assert!(!b.can_attempt(ErrorKind::Logic).allowed);
        assert!(!b.can_attempt(ErrorKind::Syntax).allowed);
        assert_eq!(b.schema_state(), CircuitState::Open);
    }

    #[test]
    fn test_best_error_count_monotone_minimum() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, false, 20, 0, 0.5, 200);
        assert_eq!(b.state_summary().best_error_count_seen, Some(20));
        b.record_attempt(ErrorKind::Logic, false, 12, 0, 0.5, 200);
        assert_eq!(b.state_summary().best_error_count_seen, Some(12));
        b.record_attempt(ErrorKind::Logic, false, 18, 0, 0.5, 200);
        assert_eq!(b.state_summary().best_error_count_seen, Some(12));
    }

    #[test]
    fn test_pause_gate_and_resume() {
        let mut b = breaker();
        b.pause(60_000, "cooling off");
        assert!(b.is_paused());

        let gate = b.can_attempt(ErrorKind::Logic);
        assert!(!gate.allowed);
        assert!(gate.remaining_pause_ms.is_some());
        assert!(gate.remaining_pause_ms.unwrap() <= 60_000);

        b.resume();
        assert!(!b.is_paused());
        assert!(b.can_attempt(ErrorKind::Logic).allowed);
    }

    /**
     * Test: can_attempt does not mutate breaker state (purity law)
     */
    #[test]
    fn test_can_attempt_is_pure() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Logic, false, 10, 0, 0.5, 200);
        let before = b.state_summary();
        let _ = b.can_attempt(ErrorKind::Logic);
        let _ = b.can_attempt(ErrorKind::Syntax);
        let after = b.state_summary();
        assert_eq!(before, after);
    }

    #[test]
    fn test_summary_failure_count_is_error_sum() {
        let mut b = breaker();
        b.record_attempt(ErrorKind::Syntax, false, 5, 0, 0.5, 100);
        b.record_attempt(ErrorKind::Logic, false, 5, 0, 0.5, 100);
        b.record_attempt(ErrorKind::Logic, true, 2, 3, 0.9, 100);
        let summary = b.state_summary();
        assert_eq!(summary.syntax_errors, 1);
        assert_eq!(summary.logic_errors, 1);
        assert_eq!(summary.failure_count, 2);
        assert_eq!(summary.total_attempts, 3);
        assert_eq!(summary.cumulative_errors_resolved, 3);
    }

    #[test]
    fn test_windows_bounded_by_improvement_window() {
        let mut b = breaker();
        for i in 0..6 {
            b.record_attempt(ErrorKind::Logic, false, 10 + i, 0, 0.5, 200);
        }
        let summary = b.state_summary();
        assert_eq!(summary.recent_error_counts.len(), 3);
        assert_eq!(summary.recent_error_counts, vec![13, 14, 15]);
    }
}
