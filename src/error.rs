/**
 * Error Handling Module
 *
 * DESIGN DECISION: Centralized error types using thiserror for consistent error semantics
 * WHY: Library code must never panic; all failures surface as Result values
 *
 * REASONING CHAIN:
 * 1. The orchestration core sits behind adapter shells that cannot recover a panic
 * 2. thiserror provides ergonomic error derive macros without boilerplate
 * 3. Centralized error types enable consistent error handling across modules
 * 4. Error conversion (From trait) enables ? operator for error propagation
 * 5. Expected control-flow outcomes (breaker refusals, cascade stops, pauses,
 *    developer flags) travel through the Decision type, not through Err; the
 *    variants exist here so stores and adapters can report them uniformly
 *
 * # Propagation policy
 *
 * ```text
 * BreakerRefusal / CascadeStop / PauseActive / DeveloperFlag
 *     → returned inside Decision (expected outcomes)
 * MemoryWrite / MemoryLoad
 *     → on_error callback on the safe path, raised on the strict path
 * InvariantViolation
 *     → always raised (indicates a bug in the caller or the core)
 * Cancelled
 *     → propagates to the nearest awaiter
 * ```
 *
 * # Examples
 *
 * ```rust
 * use selfheal_core::{Error, Result};
 *
 * fn require_message(flagged: bool, message: Option<&str>) -> Result<()> {
 *     if flagged && message.map_or(true, str::is_empty) {
 *         return Err(Error::InvariantViolation(
 *             "flagged_for_developer requires a developer_message".to_string(),
 *         ));
 *     }
 *     Ok(())
 * }
 * ```
 */

use thiserror::Error;

/**
 * Primary error type for the selfheal core library
 *
 * DESIGN DECISION: Enum-based error type with structured variants
 * WHY: Type-safe error handling with exhaustive pattern matching
 *
 * REASONING CHAIN:
 * 1. Each variant represents a distinct failure mode of the decision engine
 * 2. Structured errors carry contextual data (reason, remaining ms, flag code)
 * 3. thiserror generates Display impl for human-readable messages
 * 4. Enum exhaustiveness ensures all errors handled at call sites
 */
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Envelope JSON could not be parsed into a PatchEnvelope
    #[error("Envelope parse error: {0}")]
    EnvelopeParse(String),

    /// A draft mutation would violate an envelope invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The breaker refused admission for the next attempt
    #[error("Breaker refused attempt: {reason}")]
    BreakerRefusal { reason: String },

    /// The cascade detector ordered the session to stop
    #[error("Cascade stop: {reason}")]
    CascadeStop { reason: String },

    /// A pause window is active; no attempts admitted until it expires
    #[error("Pause active: {remaining_ms}ms remaining")]
    PauseActive { remaining_ms: u64 },

    /// MemoryStore write failed (strict path only; safe path reports via on_error)
    #[error("Memory write error: {0}")]
    MemoryWrite(String),

    /// MemoryStore load failed (ENOENT is silent; everything else lands here)
    #[error("Memory load error: {0}")]
    MemoryLoad(String),

    /// Patch was flagged for human review before execution
    #[error("Developer flag [{code}]: {message}")]
    DeveloperFlag { code: String, message: String },

    /// An in-flight pause or consult was cancelled by resume()
    #[error("Cancelled")]
    Cancelled,

    /// Generic I/O error (file read/write)
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Policy configuration error (TOML parse, invalid budget, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/**
 * Result type alias for selfheal operations
 *
 * DESIGN DECISION: Type alias for consistent Result usage across library
 * WHY: Reduces boilerplate and ensures consistent error type
 */
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}
