/**
 * Patch Envelope Module - Canonical Attempt-Series Record (20% of core)
 *
 * DESIGN DECISION: One append-mostly struct per patch series, mutated only
 * through a scoped draft guard that re-normalizes and re-hashes on release
 * WHY: The envelope is the audit artifact every other component trusts; free
 * mutation would let counters, flags, and the content hash drift apart
 *
 * REASONING CHAIN:
 * 1. patch_id is fixed at construction and never changes
 * 2. attempts is append-only; success latches true; best counters are
 *    maintained by the draft mutators, not by callers
 * 3. draft() hands out an RAII guard; Drop refreshes the timestamp and
 *    recomputes envelope_hash on every exit path
 * 4. The hash covers only the stable field subset (no attempts, timestamps,
 *    developer text, or timeline), serialized as canonical sorted-key JSON,
 *    so pretty/compact printing and field order cannot change it
 * 5. The wire format keeps the legacy mixed casing (confidenceComponents,
 *    breakerState, ...) and accepts the flaggedForDeveloper alias on parse;
 *    in memory there is exactly one canonical snake_case field
 *
 * PATTERN: Pattern-ENVELOPE-001 (Content-Addressed Attempt Log)
 * RELATED: breaker.rs (snapshots), confidence.rs (components),
 * memory.rs (stores serialized envelopes)
 *
 * # Examples
 *
 * ```rust
 * use selfheal_core::envelope::PatchEnvelope;
 * use serde_json::json;
 *
 * let mut envelope = PatchEnvelope::new(json!({"patched_code": "fn main() {}"}));
 * {
 *     let mut draft = envelope.draft();
 *     draft.append_attempt(true, Some("clean run"), None, None);
 *     draft.update_trend(0, 3, None, None, None);
 *     draft.mark_success(true);
 * } // draft drop: aliases normalized, timestamp refreshed, hash recomputed
 * assert!(envelope.success);
 * assert_eq!(envelope.attempts.len(), envelope.counters.total_attempts as usize);
 * ```
 */

use crate::breaker::{BreakerSnapshot, CircuitState};
use crate::confidence::ConfidenceComponents;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Direction of the error trend recorded on the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Plateauing,
    Worsening,
    #[default]
    Unknown,
}

/// Latest trend observation (the `trendMetadata` wire block)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrendSnapshot {
    pub errors_detected: u32,
    pub errors_resolved: u32,
    pub trend: TrendDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagnation_risk: Option<f64>,
}

/// Breaker state captured on each attempt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AttemptBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
}

/// One externally executed trial of the patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Epoch seconds
    pub timestamp: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub breaker_snapshot: AttemptBreakerSnapshot,
}

/// Envelope-level confidence block (`confidenceComponents` on the wire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfidenceSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntax: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<f64>,
    #[serde(flatten)]
    pub components: ConfidenceComponents,
}

/// Monotone per-envelope counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EnvelopeCounters {
    pub total_attempts: u32,
    pub syntax_attempts: u32,
    pub logic_attempts: u32,
    pub errors_resolved_total: u32,
}

/// One timeline event (decision points, flags, strategy picks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event: String,
    pub at: DateTime<Utc>,
}

/// Creation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_source: Option<String>,
}

impl Default for EnvelopeMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            language: None,
            patch_source: None,
        }
    }
}

fn empty_object() -> Value {
    json!({})
}

/**
 * The canonical record of one patch attempt series
 *
 * Field order below is the wire order; serde emits fields in declaration
 * order and the optional trailing block comes last, matching the format the
 * adapter shells already speak.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEnvelope {
    pub patch_id: Uuid,
    pub patch_data: Value,
    #[serde(default)]
    pub metadata: EnvelopeMetadata,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
    #[serde(rename = "confidenceComponents", default)]
    pub confidence: ConfidenceSnapshot,
    #[serde(rename = "breakerState", default)]
    pub breaker: BreakerSnapshot,
    #[serde(rename = "cascadeDepth", default)]
    pub cascade_depth: u32,
    #[serde(rename = "resourceUsage", default = "empty_object")]
    pub resource_usage: Value,
    #[serde(rename = "trendMetadata", default)]
    pub trend: TrendSnapshot,
    #[serde(default)]
    pub success: bool,
    /// Canonical flag; the legacy camelCase spelling is accepted on parse
    #[serde(default, alias = "flaggedForDeveloper")]
    pub flagged_for_developer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "envelopeHash", default)]
    pub envelope_hash: String,
    #[serde(default)]
    pub counters: EnvelopeCounters,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(
        rename = "policySnapshot",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub policy_snapshot: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_flag_reason: Option<String>,
}

impl PatchEnvelope {
    /// Fresh envelope around one candidate patch
    pub fn new(patch_data: Value) -> Self {
        let language = patch_data
            .get("language")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut envelope = Self {
            patch_id: Uuid::new_v4(),
            patch_data,
            metadata: EnvelopeMetadata {
                created_at: Utc::now(),
                language,
                patch_source: None,
            },
            attempts: Vec::new(),
            confidence: ConfidenceSnapshot::default(),
            breaker: BreakerSnapshot::default(),
            cascade_depth: 0,
            resource_usage: empty_object(),
            trend: TrendSnapshot::default(),
            success: false,
            flagged_for_developer: false,
            developer_message: None,
            timestamp: Utc::now(),
            envelope_hash: String::new(),
            counters: EnvelopeCounters::default(),
            timeline: Vec::new(),
            policy_snapshot: None,
            developer_flag_reason: None,
        };
        envelope.envelope_hash = envelope.compute_hash();
        envelope
    }

    /**
     * Open a draft scope; all mutation goes through the returned guard.
     * On every exit path the guard refreshes the timestamp and recomputes
     * the content hash.
     */
    pub fn draft(&mut self) -> EnvelopeDraft<'_> {
        EnvelopeDraft { envelope: self }
    }

    /**
     * Content hash over the stable field subset
     *
     * Excluded per the wire contract: attempts, timestamp, developer_message,
     * developer_flag_reason, timeline, and the hash itself. Keys are sorted
     * lexicographically (serde_json's map is ordered), so the digest is
     * independent of formatting and field declaration order.
     */
    pub fn compute_hash(&self) -> String {
        let stable = json!({
            "breakerState": self.breaker,
            "cascadeDepth": self.cascade_depth,
            "confidenceComponents": self.confidence,
            "counters": self.counters,
            "flagged_for_developer": self.flagged_for_developer,
            "metadata": self.metadata,
            "patch_data": self.patch_data,
            "patch_id": self.patch_id,
            "policySnapshot": self.policy_snapshot,
            "resourceUsage": self.resource_usage,
            "success": self.success,
            "trendMetadata": self.trend,
        });
        let canonical =
            serde_json::to_string(&stable).unwrap_or_else(|_| String::from("{}"));
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Stable JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire form; legacy aliases are normalized by serde
    pub fn from_json(input: &str) -> Result<Self> {
        let envelope: PatchEnvelope =
            serde_json::from_str(input).map_err(|e| Error::EnvelopeParse(e.to_string()))?;
        envelope.check_invariants()?;
        Ok(envelope)
    }

    /// Invariants that must hold on any complete envelope
    fn check_invariants(&self) -> Result<()> {
        if self.flagged_for_developer
            && self
                .developer_message
                .as_deref()
                .map_or(true, |m| m.is_empty())
        {
            return Err(Error::InvariantViolation(
                "flagged_for_developer requires a non-empty developer_message".to_string(),
            ));
        }
        Ok(())
    }
}

/**
 * Scoped mutable view over an envelope
 *
 * DESIGN DECISION: RAII guard instead of free &mut access
 * WHY: Guaranteed re-hash and timestamp refresh on all exit paths; mutators
 * that could break invariants return Result instead of deferring the error
 * to Drop (Drop cannot fail)
 */
pub struct EnvelopeDraft<'a> {
    envelope: &'a mut PatchEnvelope,
}

impl EnvelopeDraft<'_> {
    /// Append a new attempt with the current epoch time; keeps
    /// counters.total_attempts in lockstep with attempts.len()
    pub fn append_attempt(
        &mut self,
        success: bool,
        note: Option<&str>,
        breaker_state: Option<CircuitState>,
        failure_count: Option<u32>,
    ) {
        self.envelope.attempts.push(Attempt {
            timestamp: Utc::now().timestamp(),
            success,
            note: note.map(str::to_string),
            breaker_snapshot: AttemptBreakerSnapshot {
                state: breaker_state.unwrap_or_default(),
                failure_count: failure_count.unwrap_or(0),
            },
        });
        self.envelope.counters.total_attempts = self.envelope.attempts.len() as u32;
    }

    /// Clamp each provided scalar to [0, 1] and overwrite only those keys
    pub fn merge_confidence(
        &mut self,
        syntax: Option<f64>,
        logic: Option<f64>,
        risk: Option<f64>,
    ) {
        if let Some(value) = syntax {
            self.envelope.confidence.syntax = Some(value.clamp(0.0, 1.0));
        }
        if let Some(value) = logic {
            self.envelope.confidence.logic = Some(value.clamp(0.0, 1.0));
        }
        if let Some(value) = risk {
            self.envelope.confidence.risk = Some(value.clamp(0.0, 1.0));
        }
    }

    /// Overwrite the context-factor components
    pub fn set_components(&mut self, components: ConfidenceComponents) {
        self.envelope.confidence.components = components;
    }

    /**
     * Record the latest trend observation.
     * Improving iff something was resolved; otherwise the velocity sign
     * decides between worsening and plateauing; with no velocity the
     * direction is unknown.
     */
    pub fn update_trend(
        &mut self,
        errors_detected: u32,
        errors_resolved: u32,
        quality_score: Option<f64>,
        improvement_velocity: Option<f64>,
        stagnation_risk: Option<f64>,
    ) {
        let trend = if errors_resolved > 0 {
            TrendDirection::Improving
        } else if let Some(velocity) = improvement_velocity {
            if velocity < 0.0 {
                TrendDirection::Worsening
            } else {
                TrendDirection::Plateauing
            }
        } else {
            TrendDirection::Unknown
        };
        self.envelope.trend = TrendSnapshot {
            errors_detected,
            errors_resolved,
            trend,
            quality_score,
            improvement_velocity,
            stagnation_risk,
        };
    }

    /// Latching: once true, later false writes are ignored
    pub fn mark_success(&mut self, success: bool) {
        if success {
            self.envelope.success = true;
        }
    }

    pub fn set_breaker(&mut self, snapshot: BreakerSnapshot) {
        self.envelope.breaker = snapshot;
    }

    pub fn set_cascade_depth(&mut self, depth: u32) {
        self.envelope.cascade_depth = depth;
    }

    /// Shallow-merge observed resource usage into the snapshot object
    pub fn merge_resource_usage(&mut self, usage: &Value) {
        if let (Value::Object(current), Value::Object(incoming)) =
            (&mut self.envelope.resource_usage, usage)
        {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        } else if usage.is_object() {
            self.envelope.resource_usage = usage.clone();
        }
    }

    /// Flag for human review; the message is mandatory by invariant
    pub fn flag_for_developer(&mut self, code: &str, message: &str) -> Result<()> {
        if message.is_empty() {
            return Err(Error::InvariantViolation(
                "flagged_for_developer requires a non-empty developer_message".to_string(),
            ));
        }
        self.envelope.flagged_for_developer = true;
        self.envelope.developer_flag_reason = Some(code.to_string());
        self.envelope.developer_message = Some(message.to_string());
        Ok(())
    }

    pub fn bump_kind_attempt(&mut self, syntax: bool) {
        if syntax {
            self.envelope.counters.syntax_attempts += 1;
        } else {
            self.envelope.counters.logic_attempts += 1;
        }
    }

    pub fn add_errors_resolved(&mut self, resolved: u32) {
        self.envelope.counters.errors_resolved_total += resolved;
    }

    pub fn record_timeline(&mut self, event: &str) {
        self.envelope.timeline.push(TimelineEvent {
            event: event.to_string(),
            at: Utc::now(),
        });
    }

    pub fn set_policy_snapshot(&mut self, snapshot: Value) {
        self.envelope.policy_snapshot = Some(snapshot);
    }

    /// Replace the candidate payload (each retry submits a new candidate
    /// into the same series; patch_id never changes)
    pub fn set_patch_data(&mut self, patch_data: Value) {
        if let Some(language) = patch_data.get("language").and_then(Value::as_str) {
            self.envelope.metadata.language = Some(language.to_string());
        }
        self.envelope.patch_data = patch_data;
    }

    /// Read access while drafting
    pub fn envelope(&self) -> &PatchEnvelope {
        self.envelope
    }
}

impl Drop for EnvelopeDraft<'_> {
    fn drop(&mut self) {
        // Release duties on every exit path: refresh the volatile timestamp
        // and recompute the content hash over the stable subset.
        self.envelope.timestamp = Utc::now();
        self.envelope.envelope_hash = self.envelope.compute_hash();
    }
}
