/**
 * Error Signature Module - Classification and Fingerprinting
 *
 * DESIGN DECISION: Deterministic fingerprints over normalized error text
 * WHY: Cascade analysis and dedup must recognize "the same error" across
 * attempts even when paths, line numbers, and stack noise differ
 *
 * REASONING CHAIN:
 * 1. Each failed attempt reports an exception type and message
 * 2. Type is reduced to its short name (basename after namespace separators)
 * 3. Message is reduced to its first non-empty line with location noise stripped
 * 4. "<Type>:<cleaned_message>" is the canonical normal form
 * 5. A 32-bit FNV-1a digest of the normal form is the stable fingerprint
 * 6. ErrorTracker accumulates signatures for occurrence counting
 *
 * PATTERN: Pattern-SIGNATURE-001 (Stable Failure Fingerprints)
 * PERFORMANCE: <1ms per normalization (regexes compiled once)
 * RELATED: cascade.rs (repeating-pattern rule), breaker.rs (error windows)
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/**
 * Error classification reported by the external analyzer
 *
 * DESIGN DECISION: Closed enum with a total severity ordering
 * WHY: The cascade detector's escalation rule needs syntax < logic <
 * runtime < performance < security; an open string set cannot order
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Logic,
    Runtime,
    Performance,
    Security,
}

impl ErrorKind {
    /// Severity rank used by the cascade escalation rule
    pub fn severity(&self) -> u8 {
        match self {
            ErrorKind::Syntax => 0,
            ErrorKind::Logic => 1,
            ErrorKind::Runtime => 2,
            ErrorKind::Performance => 3,
            ErrorKind::Security => 4,
        }
    }

    /// Lowercase label matching the wire format
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Logic => "logic",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Performance => "performance",
            ErrorKind::Security => "security",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/**
 * Deterministic fingerprint of one failure
 *
 * REASONING CHAIN:
 * 1. error_type: exception class short name (or "UnknownError")
 * 2. cleaned_message: first non-empty message line, location noise stripped
 * 3. hash: FNV-1a 32-bit digest of "type:cleaned_message"
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSignature {
    pub error_type: String,
    pub cleaned_message: String,
    pub hash: u32,
}

impl ErrorSignature {
    /**
     * Normalize an error into its canonical "<Type>:<cleaned_message>" form
     *
     * DESIGN DECISION: Case-sensitive noise stripping, applied in fixed order
     * WHY: Two reports of the same failure from different files/lines must
     * normalize identically; order matters because the patterns overlap
     */
    pub fn normalize(error_type: &str, message: &str) -> String {
        let type_name = short_type_name(error_type);
        let cleaned = clean_message(message);
        format!("{}:{}", type_name, cleaned)
    }

    /// Build the full signature (normal form + 32-bit digest)
    pub fn create(error_type: &str, message: &str) -> Self {
        let type_name = short_type_name(error_type);
        let cleaned = clean_message(message);
        let hash = fnv1a_32(&format!("{}:{}", type_name, cleaned));
        Self {
            error_type: type_name,
            cleaned_message: cleaned,
            hash,
        }
    }

    /// Two errors are the same iff their normal forms are identical
    pub fn are_same(a: (&str, &str), b: (&str, &str)) -> bool {
        Self::normalize(a.0, a.1) == Self::normalize(b.0, b.1)
    }

    /// Canonical normal form of this signature
    pub fn key(&self) -> String {
        format!("{}:{}", self.error_type, self.cleaned_message)
    }

    /// Hex rendering of the 32-bit digest
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash.to_be_bytes())
    }
}

/// Basename after `::`, `.`, or `\` namespace separators; empty input maps
/// to "UnknownError"
fn short_type_name(error_type: &str) -> String {
    let trimmed = error_type.trim();
    if trimmed.is_empty() {
        return "UnknownError".to_string();
    }
    let after = trimmed
        .rsplit(&[':', '.', '\\'][..])
        .next()
        .unwrap_or(trimmed);
    if after.is_empty() {
        "UnknownError".to_string()
    } else {
        after.to_string()
    }
}

/// First non-empty line with location noise stripped, in fixed order:
/// ` at file:line:col`, ` (file:line:col)`, ` in /path...`, ` on line N`
fn clean_message(message: &str) -> String {
    static STRIPPERS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    let strippers = STRIPPERS.get_or_init(|| {
        vec![
            regex::Regex::new(r"\s+at\s+.*:\d+:\d+").expect("valid stripper regex"),
            regex::Regex::new(r"\s+\(.*:\d+:\d+\)").expect("valid stripper regex"),
            regex::Regex::new(r"\s+in\s+/.*$").expect("valid stripper regex"),
            regex::Regex::new(r"\s+on\s+line\s+\d+").expect("valid stripper regex"),
        ]
    });

    let first_line = message
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim();

    let mut cleaned = first_line.to_string();
    for stripper in strippers {
        cleaned = stripper.replace_all(&cleaned, "").into_owned();
    }
    cleaned.trim().to_string()
}

/// FNV-1a 32-bit rolling hash (non-cryptographic, matches the wire contract)
fn fnv1a_32(input: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/**
 * Accumulates signatures across a session for dedup and counting
 *
 * DESIGN DECISION: Seen-set plus ordered history
 * WHY: Dedup needs O(1) membership, cascade analysis needs insertion order
 */
#[derive(Debug, Default)]
pub struct ErrorTracker {
    seen: HashMap<String, usize>,
    history: Vec<ErrorSignature>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure; returns true if this signature was seen before
    pub fn record(&mut self, error_type: &str, message: &str) -> bool {
        let signature = ErrorSignature::create(error_type, message);
        let key = signature.key();
        let previously_seen = self.seen.contains_key(&key);
        *self.seen.entry(key).or_insert(0) += 1;
        self.history.push(signature);
        previously_seen
    }

    pub fn has_seen(&self, error_type: &str, message: &str) -> bool {
        self.seen
            .contains_key(&ErrorSignature::normalize(error_type, message))
    }

    /// Per-signature occurrence counts
    pub fn get_error_counts(&self) -> HashMap<String, usize> {
        self.seen.clone()
    }

    /// Ordered history of every recorded signature
    pub fn history(&self) -> &[ErrorSignature] {
        &self.history
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_type_name_strips_namespaces() {
        assert_eq!(short_type_name("std::io::Error"), "Error");
        assert_eq!(short_type_name("builtins.TypeError"), "TypeError");
        assert_eq!(short_type_name("App\\Db\\QueryException"), "QueryException");
        assert_eq!(short_type_name("SyntaxError"), "SyntaxError");
        assert_eq!(short_type_name(""), "UnknownError");
        assert_eq!(short_type_name("  "), "UnknownError");
    }

    /**
     * Test: identical errors from different locations normalize identically
     *
     * The stripped substrings are exactly the four location-noise shapes:
     * stack frames, parenthesized frames, unix paths, and "on line N".
     */
    #[test]
    fn test_normalize_strips_location_noise() {
        let a = ErrorSignature::normalize(
            "TypeError",
            "x is undefined at app.js:10:5",
        );
        let b = ErrorSignature::normalize(
            "TypeError",
            "x is undefined at server/handlers.js:224:17",
        );
        assert_eq!(a, b);
        assert_eq!(a, "TypeError:x is undefined");

        let c = ErrorSignature::normalize("TypeError", "x is undefined (bundle.js:1:44381)");
        assert_eq!(c, "TypeError:x is undefined");

        let d = ErrorSignature::normalize("ParseError", "unexpected token on line 42");
        assert_eq!(d, "ParseError:unexpected token");

        let e = ErrorSignature::normalize("RuntimeError", "undefined index in /var/www/html/index.php");
        assert_eq!(e, "RuntimeError:undefined index");
    }

    #[test]
    fn test_normalize_uses_first_nonempty_line() {
        let sig = ErrorSignature::normalize(
            "Error",
            "\n\n  top level failure\n    at lib.js:3:1\nsecond line ignored",
        );
        assert_eq!(sig, "Error:top level failure");
    }

    #[test]
    fn test_are_same_and_hash_stability() {
        assert!(ErrorSignature::are_same(
            ("TypeError", "x is undefined at a.js:1:1"),
            ("util::TypeError", "x is undefined at b.js:9:9"),
        ));

        let s1 = ErrorSignature::create("TypeError", "x is undefined at a.js:1:1");
        let s2 = ErrorSignature::create("TypeError", "x is undefined at b.js:2:2");
        assert_eq!(s1.hash, s2.hash);
        assert_eq!(s1.hash_hex().len(), 8);

        let s3 = ErrorSignature::create("TypeError", "y is undefined");
        assert_ne!(s1.hash, s3.hash);
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        // Published FNV-1a 32-bit test vectors
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_tracker_counts_and_history() {
        let mut tracker = ErrorTracker::new();

        assert!(!tracker.record("TypeError", "x is undefined at a.js:1:1"));
        assert!(tracker.record("TypeError", "x is undefined at b.js:7:3"));
        assert!(!tracker.record("SyntaxError", "unexpected token"));

        assert!(tracker.has_seen("TypeError", "x is undefined"));
        assert!(!tracker.has_seen("TypeError", "y is undefined"));

        let counts = tracker.get_error_counts();
        assert_eq!(counts.get("TypeError:x is undefined"), Some(&2));
        assert_eq!(counts.get("SyntaxError:unexpected token"), Some(&1));
        assert_eq!(tracker.history().len(), 3);

        tracker.reset();
        assert!(tracker.get_error_counts().is_empty());
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn test_error_kind_severity_ordering() {
        assert!(ErrorKind::Syntax.severity() < ErrorKind::Logic.severity());
        assert!(ErrorKind::Logic.severity() < ErrorKind::Runtime.severity());
        assert!(ErrorKind::Runtime.severity() < ErrorKind::Performance.severity());
        assert!(ErrorKind::Performance.severity() < ErrorKind::Security.severity());
        assert_eq!(ErrorKind::Runtime.to_string(), "runtime");
    }
}
