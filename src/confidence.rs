/**
 * Confidence Scoring Module - Calibrated Per-Attempt Confidence
 *
 * DESIGN DECISION: Temperature-scaled softmax plus multiplicative context
 * factors plus a rolling empirical calibration blend
 * WHY: Raw model probabilities are systematically overconfident; combining
 * them with historical success, pattern similarity, complexity, and coverage
 * signals yields scores the breaker can actually budget against
 *
 * REASONING CHAIN:
 * 1. Scale incoming per-class logits by temperature, softmax to probabilities
 * 2. Syntax errors are the easy class: boost max probability 1.2x (capped)
 * 3. Logic/runtime errors are the hard class: damp max probability 0.9x
 * 4. Derive ConfidenceComponents from whatever historical signals exist
 * 5. base (picked by error kind) x historical x similarity x complexity
 *    penalty x (0.5 + coverage/2), clamped to [0, 1]
 * 6. Once >=10 outcomes are recorded, blend 70/30 with the empirical success
 *    rate of the rolling window (beta calibration)
 *
 * PATTERN: Pattern-UNCERTAINTY-002 (Confidence Calibration System)
 * PERFORMANCE: <1ms per score (no allocation beyond the probability vector)
 * RELATED: breaker.rs (consumes scores), orchestrator.rs (admission gate)
 *
 * # Examples
 *
 * ```rust
 * use selfheal_core::confidence::ConfidenceScorer;
 * use selfheal_core::signature::ErrorKind;
 *
 * let scorer = ConfidenceScorer::default();
 * let score = scorer.score(&[2.0, 0.1, 0.1], ErrorKind::Syntax, None);
 * assert!(score.syntax_confidence >= 0.95);
 * assert!(scorer.should_attempt(&score, ErrorKind::Syntax));
 * ```
 */

use crate::config::ScorerConfig;
use crate::signature::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/**
 * Context factors multiplied into the overall confidence
 *
 * Every scalar lives in [0, 1]; code_complexity_penalty is a <=1 multiplier
 * (floored at 0.1 so a hard problem dampens but never zeroes a score).
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceComponents {
    pub historical_success_rate: f64,
    pub pattern_similarity: f64,
    pub code_complexity_penalty: f64,
    pub test_coverage: f64,
}

impl Default for ConfidenceComponents {
    fn default() -> Self {
        // Neutral factors: absent signals must not dampen the base score
        Self {
            historical_success_rate: 1.0,
            pattern_similarity: 1.0,
            code_complexity_penalty: 1.0,
            test_coverage: 1.0,
        }
    }
}

/// Optional historical/context signals supplied by the orchestrator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoricalSignals {
    pub success_rate: Option<f64>,
    pub pattern_similarity: Option<f64>,
    pub test_coverage: Option<f64>,
    /// Taxonomy-derived difficulty in [0, 1] (preferred complexity signal)
    pub difficulty: Option<f64>,
    /// Scalar complexity fallback (cyclomatic-style, >=1)
    pub complexity_score: Option<f64>,
}

/// Which calibration path produced the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    TemperatureSoftmax,
    BetaCalibration,
}

/// The three calibrated scalars plus their provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub syntax_confidence: f64,
    pub logic_confidence: f64,
    pub overall_confidence: f64,
    pub components: ConfidenceComponents,
    pub method: CalibrationMethod,
}

/**
 * The scorer: stateless math plus a bounded rolling calibration window
 *
 * DESIGN DECISION: Calibration history is a bounded FIFO local to the scorer
 * WHY: Session-scoped learning; a process-wide global would leak one
 * session's label noise into every other session
 */
#[derive(Debug)]
pub struct ConfidenceScorer {
    config: ScorerConfig,
    outcomes: VecDeque<(f64, bool)>,
}

/// Outcomes required before the empirical blend switches on
const BETA_CALIBRATION_FLOOR: usize = 10;

impl ConfidenceScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            outcomes: VecDeque::new(),
        }
    }

    /**
     * Score one attempt from raw logits and optional context signals
     *
     * Empty logits yield zero confidence across the board (the analyzer gave
     * us nothing to calibrate).
     */
    pub fn score(
        &self,
        logits: &[f64],
        kind: ErrorKind,
        signals: Option<&HistoricalSignals>,
    ) -> ConfidenceScore {
        let components = Self::components_from(signals);

        if logits.is_empty() {
            return ConfidenceScore {
                syntax_confidence: 0.0,
                logic_confidence: 0.0,
                overall_confidence: 0.0,
                components,
                method: self.method_tag(),
            };
        }

        let probabilities = softmax_with_temperature(logits, self.config.temperature);
        let max_prob = probabilities.iter().copied().fold(0.0_f64, f64::max);

        let syntax_confidence = if kind == ErrorKind::Syntax {
            (max_prob * 1.2).min(1.0)
        } else {
            max_prob
        };
        let logic_confidence = if matches!(kind, ErrorKind::Logic | ErrorKind::Runtime) {
            max_prob * 0.9
        } else {
            max_prob
        };

        let base_confidence = match kind {
            ErrorKind::Syntax => syntax_confidence,
            ErrorKind::Logic | ErrorKind::Runtime => logic_confidence,
            _ => (syntax_confidence + logic_confidence) / 2.0,
        };

        let raw = (base_confidence
            * components.historical_success_rate
            * components.pattern_similarity
            * components.code_complexity_penalty
            * (0.5 + components.test_coverage * 0.5))
            .clamp(0.0, 1.0);

        let (overall_confidence, method) = if self.outcomes.len() >= BETA_CALIBRATION_FLOOR {
            let blended = 0.7 * raw + 0.3 * self.empirical_success_rate();
            (blended.clamp(0.0, 1.0), CalibrationMethod::BetaCalibration)
        } else {
            (raw, CalibrationMethod::TemperatureSoftmax)
        };

        ConfidenceScore {
            syntax_confidence,
            logic_confidence,
            overall_confidence,
            components,
            method,
        }
    }

    fn components_from(signals: Option<&HistoricalSignals>) -> ConfidenceComponents {
        let mut components = ConfidenceComponents::default();
        let Some(signals) = signals else {
            return components;
        };

        if let Some(rate) = signals.success_rate {
            components.historical_success_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(similarity) = signals.pattern_similarity {
            components.pattern_similarity = similarity.clamp(0.0, 1.0);
        }
        if let Some(coverage) = signals.test_coverage {
            components.test_coverage = coverage.clamp(0.0, 1.0);
        }
        components.code_complexity_penalty = if let Some(difficulty) = signals.difficulty {
            (1.0 - difficulty.clamp(0.0, 1.0) * 0.5).max(0.1)
        } else if let Some(complexity) = signals.complexity_score {
            (1.0 - (complexity - 1.0) * 0.1).max(0.1)
        } else {
            1.0
        };
        components
    }

    /**
     * Admission predicate: can this attempt clear its class threshold?
     *
     * Syntax fixes must be near-certain (0.95); logic/runtime get a wider
     * berth (0.80); anything else is judged on the overall scalar (0.85).
     */
    pub fn should_attempt(&self, score: &ConfidenceScore, kind: ErrorKind) -> bool {
        match kind {
            ErrorKind::Syntax => score.syntax_confidence >= 0.95,
            ErrorKind::Logic | ErrorKind::Runtime => score.logic_confidence >= 0.80,
            _ => score.overall_confidence >= 0.85,
        }
    }

    /// Record a labeled outcome into the rolling calibration window
    pub fn record_outcome(&mut self, confidence: f64, was_correct: bool) {
        self.outcomes
            .push_back((confidence.clamp(0.0, 1.0), was_correct));
        while self.outcomes.len() > self.config.calibration_samples {
            self.outcomes.pop_front();
        }
    }

    pub fn empirical_success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let correct = self.outcomes.iter().filter(|(_, ok)| *ok).count();
        correct as f64 / self.outcomes.len() as f64
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    fn method_tag(&self) -> CalibrationMethod {
        if self.outcomes.len() >= BETA_CALIBRATION_FLOOR {
            CalibrationMethod::BetaCalibration
        } else {
            CalibrationMethod::TemperatureSoftmax
        }
    }
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

/// Numerically stable softmax over temperature-scaled logits
fn softmax_with_temperature(logits: &[f64], temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = logits.iter().map(|l| l / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
