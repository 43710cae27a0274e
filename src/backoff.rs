/**
 * Backoff Coordinator Module - Retry Pacing and Guidance Envelopes
 *
 * DESIGN DECISION: Two wait policies (default ladder, adaptive decorrelated
 * jitter) plus a versioned guidance payload built from the breaker summary
 * WHY: Pacing and prompting are the same decision seen from two sides: how
 * long to wait, and what to tell the generator so the wait buys a better
 * next attempt
 *
 * REASONING CHAIN:
 * 1. An active pause window always wins: the wait is its remainder
 * 2. Default policy: short (~min_ms) on oscillation/noise, medium (~2x
 *    max_ms) when stagnant and the continue predicate says stop, else short;
 *    +/-25% symmetric jitter breaks retry convoys
 * 3. Adaptive policy: improving shrinks below min (0.6x), stagnation grows
 *    exponentially in consecutive failures (capped at 2^6), velocity scales
 *    the base, and the final draw is decorrelated (uniform in
 *    [min, 1.5*target], clamped to [min, max])
 * 4. The guidance envelope (jitter.request.v1) carries the error, both code
 *    versions, a wider context slice around the patched function, a balance
 *    scan, the full breaker summary as trend, and hard constraints
 * 5. pause_and_consult races the sleep against an optional injected LLM
 *    adapter and against breaker resume; adapter failure is non-fatal,
 *    resume surfaces Cancelled
 *
 * PATTERN: Pattern-BACKOFF-001 (Decorrelated Jitter Pacing)
 * RELATED: breaker.rs (summary input, resume handle), orchestrator.rs
 * (drives the pacing loop)
 */

use crate::breaker::{BreakerSummary, RecommendedAction};
use crate::config::BackoffConfig;
use crate::envelope::PatchEnvelope;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::Notify;

/**
 * Injected LLM capability: prompt + system in, text out
 *
 * DESIGN DECISION: Trait object capability, not a client
 * WHY: The core makes no network calls of its own; transports live in the
 * adapter shells
 */
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn consult(&self, prompt: &str, system: &str) -> Result<String>;
}

/// What came out of a pause window
#[derive(Debug, Clone, PartialEq)]
pub enum ConsultOutcome {
    /// The wait elapsed with no adapter contribution
    SleptOut,
    /// The adapter produced a candidate patch before the wait elapsed
    Guidance(String),
}

/// Result of the bracket/semicolon scan over the last patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BalanceScan {
    pub paren_missing_close: u32,
    pub brace_missing_close: u32,
    pub bracket_missing_close: u32,
    /// Heuristic: statement-looking lines with no terminator
    pub suspect_semicolon_lines: u32,
}

impl BalanceScan {
    pub fn is_balanced(&self) -> bool {
        self.paren_missing_close == 0
            && self.brace_missing_close == 0
            && self.bracket_missing_close == 0
    }
}

/// Inputs the orchestrator hands over when building guidance
#[derive(Debug, Clone, Default)]
pub struct GuidanceInput {
    pub error_message: String,
    pub original_code: String,
    pub last_patch_code: String,
    pub language: String,
    pub metadata: Value,
}

/**
 * The coordinator: stateless policy over the breaker summary
 */
#[derive(Debug)]
pub struct BackoffCoordinator {
    config: BackoffConfig,
}

impl BackoffCoordinator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /**
     * Default wait policy with +/-25% symmetric jitter
     */
    pub fn suggest_ms(&self, summary: &BreakerSummary) -> u64 {
        if let Some(remaining) = summary.remaining_pause_ms {
            return remaining;
        }

        let base = if summary.recommended_action == RecommendedAction::PauseAndBackoff {
            // Oscillating or noisy: a short breather is enough
            self.config.min_ms
        } else if !summary.should_continue && !summary.is_improving {
            // Stagnant with no reason to continue: long cool-down
            self.config.max_ms * 2
        } else {
            self.config.min_ms
        };

        symmetric_jitter(base)
    }

    /**
     * Adaptive wait policy with decorrelated jitter
     *
     * Base shrinks to 0.6x min while improving, otherwise grows
     * exponentially in consecutive failures (capped at 2^6) and clamps to
     * max. Velocity nudges the base (errors falling shrinks the wait,
     * errors rising grows it); the final draw is uniform in
     * [min, 1.5*target] clamped to [min, max].
     */
    pub fn adaptive_ms(&self, summary: &BreakerSummary) -> u64 {
        if let Some(remaining) = summary.remaining_pause_ms {
            return remaining;
        }

        let min = self.config.min_ms as f64;
        let max = self.config.max_ms as f64;

        let mut target = if summary.is_improving {
            min * 0.6
        } else {
            let exponent = summary.consecutive_failures.min(6);
            (min * f64::from(1u32 << exponent)).min(max)
        };

        if let Some(velocity) = summary.improvement_velocity {
            // velocity is the mean per-attempt error delta; +/-10 errors per
            // attempt maps to a 2x/0.5x scale
            let factor = (1.0 + velocity * 0.1).clamp(0.5, 2.0);
            target *= factor;
        }

        let upper = (target * 1.5).max(min + 1.0);
        let draw = rand::thread_rng().gen_range(min..upper);
        draw.clamp(min, max) as u64
    }

    /**
     * Build the jitter.request.v1 guidance envelope
     *
     * Deterministic fields per the wire contract; `trend` is the full
     * breaker summary and `error_delta` is the positive error drop of the
     * last attempt (0 when errors rose).
     */
    pub fn build_guidance(
        &self,
        input: &GuidanceInput,
        summary: &BreakerSummary,
        last_envelope: Option<&PatchEnvelope>,
    ) -> Value {
        let counts = &summary.recent_error_counts;
        let error_delta = if counts.len() >= 2 {
            counts[counts.len() - 2].saturating_sub(counts[counts.len() - 1])
        } else {
            0
        };
        let errors_resolved = summary.recent_errors_resolved.last().copied().unwrap_or(0);

        let wider_context = extract_wider_context(&input.original_code, &input.last_patch_code)
            .unwrap_or_default();
        let balance = basic_balance_scan(&input.last_patch_code);

        json!({
            "type": "jitter.request.v1",
            "timestamp": Utc::now().to_rfc3339(),
            "instructions": [
                "Identify the root cause of the reported error before changing any code.",
                "Study the wider context slice, not just the failing line.",
                "Check the syntax balance report and repair any unclosed delimiters first.",
                "Produce the smallest patch that fixes the root cause.",
                "Return only the patched code, either fenced or as {\"patched_code\": \"...\"}.",
            ],
            "context": {
                "error_message": &input.error_message,
                "original_code": &input.original_code,
                "last_patch_code": &input.last_patch_code,
                "language": &input.language,
                "wider_context": wider_context,
                "syntax_balance": balance,
            },
            "trend": summary,
            "last_attempt_status": {
                "errors_resolved": errors_resolved,
                "error_delta": error_delta,
            },
            "last_envelope": last_envelope.map(|e| serde_json::to_value(e).unwrap_or(Value::Null)),
            "constraints": {
                "max_lines_changed": self.config.max_lines_changed,
                "disallow_keywords": &self.config.disallow_keywords,
            },
            "metadata": &input.metadata,
        })
    }

    /**
     * Sleep out the computed wait, optionally racing an adapter consult.
     *
     * The adapter call carries an implicit deadline equal to the wait (the
     * sleep winning the race ends it); adapter failure is non-fatal and the
     * sleep still completes. A breaker resume() wakes the sleep and
     * surfaces Cancelled to the awaiter.
     */
    pub async fn pause_and_consult(
        &self,
        wait_ms: u64,
        guidance: &Value,
        adapter: Option<&dyn LlmAdapter>,
        resume: Option<Arc<Notify>>,
    ) -> Result<ConsultOutcome> {
        let sleep = tokio::time::sleep(std::time::Duration::from_millis(wait_ms));
        tokio::pin!(sleep);

        let cancelled = async {
            match resume {
                Some(notify) => notify.notified().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        let consulted = async {
            match adapter {
                Some(adapter) => {
                    let prompt =
                        serde_json::to_string(guidance).unwrap_or_else(|_| String::from("{}"));
                    let system = "You are a debugging assistant. Follow the instructions in \
                                  the request envelope and return only the patched code.";
                    match adapter.consult(&prompt, system).await {
                        Ok(text) => match extract_patched_code(&text) {
                            Some(code) => code,
                            // Unusable reply: fall back to sleeping out
                            None => std::future::pending().await,
                        },
                        Err(err) => {
                            tracing::warn!(error = %err, "adapter consult failed; sleeping out");
                            std::future::pending().await
                        }
                    }
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(consulted);

        tokio::select! {
            _ = &mut sleep => Ok(ConsultOutcome::SleptOut),
            _ = &mut cancelled => Err(Error::Cancelled),
            code = &mut consulted => Ok(ConsultOutcome::Guidance(code)),
        }
    }
}

impl Default for BackoffCoordinator {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Uniform draw in [0.75 * base, 1.25 * base]
fn symmetric_jitter(base: u64) -> u64 {
    if base == 0 {
        return 0;
    }
    let base = base as f64;
    rand::thread_rng().gen_range(base * 0.75..=base * 1.25) as u64
}

/**
 * Infer the patched function's name, locate its brace-balanced block in the
 * original source, and return the block with 8 lines of context either side.
 *
 * Name inference is language-agnostic: `function name(`, `fn name(`,
 * `def name(`, assignment to a function/arrow literal, and `name(...) {`
 * method declarations, in that order.
 */
pub fn extract_wider_context(original_code: &str, last_patch_code: &str) -> Option<String> {
    let name = infer_function_name(last_patch_code)?;

    let lines: Vec<&str> = original_code.lines().collect();
    let start = lines.iter().position(|line| line.contains(&name))?;

    // Walk the brace balance from the declaration line to the block end.
    let mut depth: i64 = 0;
    let mut seen_open = false;
    let mut end = start;
    for (offset, line) in lines[start..].iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        end = start + offset;
        if seen_open && depth <= 0 {
            break;
        }
    }

    let from = start.saturating_sub(8);
    let to = (end + 8 + 1).min(lines.len());
    Some(lines[from..to].join("\n"))
}

fn infer_function_name(code: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            regex::Regex::new(r"function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
                .expect("valid function pattern"),
            regex::Regex::new(r"\bfn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
                .expect("valid fn pattern"),
            regex::Regex::new(r"\bdef\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
                .expect("valid def pattern"),
            regex::Regex::new(
                r"(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:async\s+)?(?:function\b|\()",
            )
            .expect("valid assignment pattern"),
            regex::Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\([^)]*\)\s*\{")
                .expect("valid method pattern"),
        ]
    });

    for pattern in patterns {
        if let Some(captures) = pattern.captures(code) {
            return Some(captures[1].to_string());
        }
    }
    None
}

/**
 * Count unclosed delimiters per pair and statement-looking lines without a
 * terminator. missing_close is max(0, opens - closes); an excess of closers
 * reports zero (the scan flags what the generator must add, not remove).
 */
pub fn basic_balance_scan(code: &str) -> BalanceScan {
    let mut paren: i64 = 0;
    let mut brace: i64 = 0;
    let mut bracket: i64 = 0;
    for c in code.chars() {
        match c {
            '(' => paren += 1,
            ')' => paren -= 1,
            '{' => brace += 1,
            '}' => brace -= 1,
            '[' => bracket += 1,
            ']' => bracket -= 1,
            _ => {}
        }
    }

    let mut suspects = 0u32;
    for line in code.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
        {
            continue;
        }
        let ends_clean = trimmed.ends_with(';')
            || trimmed.ends_with('{')
            || trimmed.ends_with('}')
            || trimmed.ends_with(',')
            || trimmed.ends_with(':')
            || trimmed.ends_with('(')
            || trimmed.ends_with("=>")
            || trimmed.ends_with("&&")
            || trimmed.ends_with("||")
            || trimmed.ends_with('+')
            || trimmed.ends_with('.');
        let looks_like_header = trimmed.starts_with("if")
            || trimmed.starts_with("else")
            || trimmed.starts_with("for")
            || trimmed.starts_with("while")
            || trimmed.starts_with("function")
            || trimmed.starts_with("fn ")
            || trimmed.starts_with("def ")
            || trimmed.starts_with("class ");
        if !ends_clean && !looks_like_header {
            suspects += 1;
        }
    }

    BalanceScan {
        paren_missing_close: paren.max(0) as u32,
        brace_missing_close: brace.max(0) as u32,
        bracket_missing_close: bracket.max(0) as u32,
        suspect_semicolon_lines: suspects,
    }
}

/**
 * Pull a candidate patch out of an adapter reply: fenced code block first,
 * then a {"patched_code": ...} JSON payload, then the raw trimmed text.
 */
pub fn extract_patched_code(text: &str) -> Option<String> {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```").expect("valid fence pattern")
    });

    if let Some(captures) = fence.captures(text) {
        let code = captures[1].trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if let Some(code) = value.get("patched_code").and_then(Value::as_str) {
            if !code.is_empty() {
                return Some(code.to_string());
            }
        }
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
