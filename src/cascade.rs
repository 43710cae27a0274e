/**
 * Cascade Detector - Unhealthy Error-Chain Recognition
 *
 * DESIGN DECISION: Ordered, first-match-wins stop rules over an append-only
 * chain of per-attempt error entries
 * WHY: A fix loop that spawns new errors must be distinguished from one that
 * is converging; four cheap structural checks catch the pathological shapes
 * (depth blowout, repetition, degrading confidence, escalating severity)
 * before they burn the whole attempt budget
 *
 * REASONING CHAIN:
 * 1. Every failed attempt appends a CascadeEntry (type, message, confidence)
 * 2. is_cascading marks entries appended onto a non-empty chain
 * 3. Stop rules run in fixed order; the first match names the reason
 * 4. Severity uses the total order syntax < logic < runtime < performance <
 *    security, so a "fix" that turns a parse error into a crash is caught
 * 5. analysis() summarizes the chain for operators and the jitter envelope
 *
 * PATTERN: Pattern-CASCADE-001 (Error-Chain Health Rules)
 * RELATED: signature.rs (ErrorKind ordering), orchestrator.rs (stop mapping)
 */

use crate::config::CascadeConfig;
use crate::signature::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One link in the error chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub error_type: ErrorKind,
    pub error_message: String,
    pub confidence_score: f64,
    pub attempt_number: u32,
    /// True iff the chain was non-empty when this entry was inserted
    pub is_cascading: bool,
}

/// Why the detector ordered a stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeStop {
    pub reason: String,
}

/// Direction of the confidence trend across the whole chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTrend {
    Improving,
    Degrading,
    Stable,
}

/// Chain summary for operators and the guidance envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeAnalysis {
    pub depth: usize,
    pub error_distribution: HashMap<ErrorKind, usize>,
    pub confidence_trend: ConfidenceTrend,
    pub average_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_common_error: Option<ErrorKind>,
    pub recommendation: String,
}

/**
 * The detector: an append-only chain plus the ordered stop rules
 */
#[derive(Debug)]
pub struct CascadeDetector {
    config: CascadeConfig,
    entries: Vec<CascadeEntry>,
}

impl CascadeDetector {
    pub fn new(config: CascadeConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    /// Append one error to the chain
    pub fn record_error(
        &mut self,
        error_type: ErrorKind,
        error_message: &str,
        confidence_score: f64,
        attempt_number: u32,
    ) {
        let is_cascading = !self.entries.is_empty();
        self.entries.push(CascadeEntry {
            error_type,
            error_message: error_message.to_string(),
            confidence_score,
            attempt_number,
            is_cascading,
        });
    }

    /**
     * Ordered stop rules, first match wins:
     * 1. depth >= max_cascade_depth
     * 2. last three entries share identical (type, message)
     * 3. last three confidences strictly decreasing
     * 4. severity of the last entry exceeds the previous
     */
    pub fn should_stop_attempting(&self) -> Option<CascadeStop> {
        let n = self.entries.len();

        if n >= self.config.max_cascade_depth {
            tracing::warn!(depth = n, "cascade stop: depth exceeded");
            return Some(CascadeStop {
                reason: format!("Cascade depth exceeded ({} errors in chain)", n),
            });
        }

        if n >= 3 {
            let tail = &self.entries[n - 3..];
            let same = tail.windows(2).all(|pair| {
                pair[0].error_type == pair[1].error_type
                    && pair[0].error_message == pair[1].error_message
            });
            if same {
                tracing::warn!("cascade stop: repeating pattern");
                return Some(CascadeStop {
                    reason: "Repeating error pattern detected".to_string(),
                });
            }

            let strictly_decreasing = tail
                .windows(2)
                .all(|pair| pair[1].confidence_score < pair[0].confidence_score);
            if strictly_decreasing {
                tracing::warn!("cascade stop: confidence degrading");
                return Some(CascadeStop {
                    reason: "Confidence degrading with each attempt".to_string(),
                });
            }
        }

        if n >= 2 {
            let last = &self.entries[n - 1];
            let prev = &self.entries[n - 2];
            if last.error_type.severity() > prev.error_type.severity() {
                tracing::warn!(
                    from = %prev.error_type,
                    to = %last.error_type,
                    "cascade stop: severity escalating"
                );
                return Some(CascadeStop {
                    reason: "Error severity escalating with each fix attempt".to_string(),
                });
            }
        }

        None
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[CascadeEntry] {
        &self.entries
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Summarize the chain; meaningful once at least one entry exists
    pub fn analysis(&self) -> CascadeAnalysis {
        let mut distribution: HashMap<ErrorKind, usize> = HashMap::new();
        for entry in &self.entries {
            *distribution.entry(entry.error_type).or_insert(0) += 1;
        }

        let most_common_error = distribution
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| *kind);

        let average_confidence = if self.entries.is_empty() {
            0.0
        } else {
            self.entries
                .iter()
                .map(|e| e.confidence_score)
                .sum::<f64>()
                / self.entries.len() as f64
        };

        let confidence_trend = match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) if last.confidence_score > first.confidence_score => {
                ConfidenceTrend::Improving
            }
            (Some(first), Some(last)) if last.confidence_score < first.confidence_score => {
                ConfidenceTrend::Degrading
            }
            _ => ConfidenceTrend::Stable,
        };

        CascadeAnalysis {
            depth: self.entries.len(),
            error_distribution: distribution,
            confidence_trend,
            average_confidence,
            recommendation: Self::recommendation_for(most_common_error),
            most_common_error,
        }
    }

    fn recommendation_for(dominant: Option<ErrorKind>) -> String {
        match dominant {
            Some(ErrorKind::Syntax) => {
                "Validate syntax in isolation before attempting further logic changes".to_string()
            }
            Some(ErrorKind::Logic) => {
                "Step back and reconsider the algorithmic approach".to_string()
            }
            Some(ErrorKind::Runtime) => {
                "Add guards around the failing call sites before retrying".to_string()
            }
            Some(ErrorKind::Performance) => {
                "Profile the affected path before patching further".to_string()
            }
            Some(ErrorKind::Security) => {
                "Halt automated patching and request a security review".to_string()
            }
            None => "No errors recorded in this chain".to_string(),
        }
    }
}

impl Default for CascadeDetector {
    fn default() -> Self {
        Self::new(CascadeConfig::default())
    }
}
