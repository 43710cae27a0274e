/**
 * Strategy Dispatch Module
 *
 * DESIGN DECISION: One tagged variant plus a single dispatch function in
 * place of a polymorphic strategy-object hierarchy
 * WHY: The handling strategies differ only in what gets logged and which
 * follow-up the orchestrator schedules; a closed enum makes the dispatch
 * exhaustive and the envelope timeline stampable
 *
 * REASONING CHAIN:
 * 1. dispatch() maps (recommended action, error kind) to the strategy that
 *    handles the next step
 * 2. Security-class errors always route to the audit strategy regardless of
 *    the breaker's recommendation
 * 3. AiEnhanced wraps any inner strategy when an LLM adapter is injected,
 *    marking that the pause window may consult the generator
 *
 * RELATED: orchestrator.rs (stamps the choice into the envelope timeline)
 */

use crate::breaker::RecommendedAction;
use crate::signature::ErrorKind;
use serde::{Deserialize, Serialize};

/// The handling strategies, as a closed tagged variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Record the failure and hand the guidance envelope back for a retry
    LogAndFix,
    /// Revert to the best known state before trying anything else
    Rollback,
    /// Route to a human security review before any further patching
    SecurityAudit,
    /// Re-derive the approach (pause, different angle) before retrying
    AiSimulation,
    /// Any strategy, with an LLM adapter available during the pause window
    AiEnhanced(Box<Strategy>),
}

impl Strategy {
    /**
     * Single dispatch point: action + kind -> strategy
     *
     * Security errors preempt the recommendation; everything else follows
     * the breaker's verdict.
     */
    pub fn dispatch(action: RecommendedAction, kind: ErrorKind) -> Self {
        if kind == ErrorKind::Security {
            return Strategy::SecurityAudit;
        }
        match action {
            RecommendedAction::Rollback => Strategy::Rollback,
            RecommendedAction::PauseAndBackoff | RecommendedAction::TryDifferentStrategy => {
                Strategy::AiSimulation
            }
            RecommendedAction::Continue | RecommendedAction::Promote => Strategy::LogAndFix,
        }
    }

    /// Wrap with the adapter-available marker
    pub fn with_adapter(self) -> Self {
        match self {
            Strategy::AiEnhanced(_) => self,
            other => Strategy::AiEnhanced(Box::new(other)),
        }
    }

    /// Timeline label, stable across the wire
    pub fn label(&self) -> String {
        match self {
            Strategy::LogAndFix => "log_and_fix".to_string(),
            Strategy::Rollback => "rollback".to_string(),
            Strategy::SecurityAudit => "security_audit".to_string(),
            Strategy::AiSimulation => "ai_simulation".to_string(),
            Strategy::AiEnhanced(inner) => format!("ai_enhanced({})", inner.label()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_follows_recommendation() {
        assert_eq!(
            Strategy::dispatch(RecommendedAction::Continue, ErrorKind::Logic),
            Strategy::LogAndFix
        );
        assert_eq!(
            Strategy::dispatch(RecommendedAction::Rollback, ErrorKind::Runtime),
            Strategy::Rollback
        );
        assert_eq!(
            Strategy::dispatch(RecommendedAction::TryDifferentStrategy, ErrorKind::Logic),
            Strategy::AiSimulation
        );
        assert_eq!(
            Strategy::dispatch(RecommendedAction::PauseAndBackoff, ErrorKind::Syntax),
            Strategy::AiSimulation
        );
    }

    #[test]
    fn test_security_kind_preempts() {
        assert_eq!(
            Strategy::dispatch(RecommendedAction::Continue, ErrorKind::Security),
            Strategy::SecurityAudit
        );
        assert_eq!(
            Strategy::dispatch(RecommendedAction::Rollback, ErrorKind::Security),
            Strategy::SecurityAudit
        );
    }

    #[test]
    fn test_adapter_wrapping_is_idempotent() {
        let wrapped = Strategy::LogAndFix.with_adapter();
        assert_eq!(wrapped, Strategy::AiEnhanced(Box::new(Strategy::LogAndFix)));
        assert_eq!(wrapped.clone().with_adapter(), wrapped);
        assert_eq!(wrapped.label(), "ai_enhanced(log_and_fix)");
    }
}
