/**
 * Memory Store Module - Bounded, TTL-Capable Outcome Log
 *
 * DESIGN DECISION: In-memory append log behind one internal lock, with lazy
 * TTL pruning and JSON snapshot persistence
 * WHY: The store is the only resource shared across sessions; a single write
 * path with pruning at the head of every operation gives atomicity without a
 * background timer or a clock dependency
 *
 * REASONING CHAIN:
 * 1. Sessions append serialized envelopes; the buffer is bounded by max_size
 *    (oldest evicted) and optionally by ttl_ms (expired entries evicted
 *    lazily at the start of every operation)
 * 2. Two write modes: add_outcome raises on bad input, safe_add_outcome
 *    never raises (failures counted, on_error invoked)
 * 3. get_similar does token-overlap matching over stored patch_data so a
 *    session can enrich scoring with its nearest prior outcomes
 * 4. save/load snapshot the buffer to a JSON file; persistence errors stop
 *    at the on_error callback, and runtime counters are never loaded back
 * 5. Chat records ride in the same store (bounded the same way) so the
 *    transport adapters stay stateless
 *
 * PATTERN: Pattern-STORE-001 (Lazy-TTL Bounded Log)
 * PERFORMANCE: O(n) similarity scan; buffers are small by construction
 * RELATED: envelope.rs (payloads), orchestrator.rs (safe_add_outcome caller)
 */

use crate::config::StoreConfig;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// One stored outcome: the serialized envelope plus its insertion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutcome {
    pub envelope: String,
    pub timestamp: DateTime<Utc>,
}

/// One chat record (role + content), bounded like the outcome log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Runtime metrics; evictions/failures reset with the process, never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// On-disk snapshot shape (wire contract: camelCase bounds, ISO timestamps)
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    buffer: Vec<StoredOutcome>,
    #[serde(rename = "maxSize")]
    max_size: usize,
    #[serde(rename = "ttlMs")]
    ttl_ms: Option<u64>,
    saved_at: DateTime<Utc>,
}

type ErrorCallback = Box<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug, Default)]
struct StoreInner {
    buffer: VecDeque<StoredOutcome>,
    chat: VecDeque<ChatRecord>,
    evictions: u64,
    failures: u64,
    last_error: Option<String>,
}

/**
 * The shared store. All public operations are atomic with respect to one
 * another; TTL pruning runs lazily at the start of each operation.
 */
pub struct MemoryStore {
    config: StoreConfig,
    inner: Mutex<StoreInner>,
    on_error: Option<ErrorCallback>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner::default()),
            on_error: None,
        }
    }

    /// Install a callback that receives every suppressed store error
    pub fn with_error_callback(
        config: StoreConfig,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner::default()),
            on_error: Some(Box::new(on_error)),
        }
    }

    /**
     * Strict write path: appends one serialized envelope, evicting the
     * oldest entries beyond max_size. Raises MemoryWrite on non-JSON input.
     */
    pub fn add_outcome(&self, envelope_json: &str) -> Result<()> {
        if serde_json::from_str::<Value>(envelope_json).is_err() {
            let err = Error::MemoryWrite("outcome is not valid JSON".to_string());
            let mut inner = self.lock();
            inner.failures += 1;
            inner.last_error = Some(err.to_string());
            return Err(err);
        }

        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        inner.buffer.push_back(StoredOutcome {
            envelope: envelope_json.to_string(),
            timestamp: Utc::now(),
        });
        while inner.buffer.len() > self.config.max_size {
            inner.buffer.pop_front();
            inner.evictions += 1;
            tracing::debug!("store evicted oldest outcome (size bound)");
        }
        Ok(())
    }

    /// Safe write path: same behavior, but never raises
    pub fn safe_add_outcome(&self, envelope_json: &str) {
        if let Err(err) = self.add_outcome(envelope_json) {
            tracing::warn!(error = %err, "safe_add_outcome suppressed write error");
            if let Some(callback) = &self.on_error {
                callback(&err);
            }
        }
    }

    /**
     * Similarity lookup: the last five stored envelopes whose patch_data
     * shares at least one lowercase alphanumeric token with the query.
     * Malformed stored entries are skipped.
     */
    pub fn get_similar(&self, patch_data: &Value) -> Vec<Value> {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);

        let query_tokens = tokenize(&patch_data.to_string());
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<Value> = Vec::new();
        for stored in &inner.buffer {
            let Ok(envelope) = serde_json::from_str::<Value>(&stored.envelope) else {
                continue;
            };
            let Some(stored_patch) = envelope.get("patch_data") else {
                continue;
            };
            let stored_tokens = tokenize(&stored_patch.to_string());
            if stored_tokens.intersection(&query_tokens).next().is_some() {
                matches.push(envelope);
            }
        }

        let keep = matches.len().saturating_sub(5);
        matches.split_off(keep)
    }

    /// Append one chat record, bounded by the same max_size
    pub fn add_chat(&self, role: &str, content: &str) {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        inner.chat.push_back(ChatRecord {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        while inner.chat.len() > self.config.max_size {
            inner.chat.pop_front();
            inner.evictions += 1;
        }
    }

    /// Most recent n chat records, oldest first
    pub fn recent_chat(&self, n: usize) -> Vec<ChatRecord> {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        let start = inner.chat.len().saturating_sub(n);
        inner.chat.iter().skip(start).cloned().collect()
    }

    /**
     * Snapshot the outcome buffer to a JSON file, creating parent
     * directories. I/O errors stop at on_error; runtime counters are not
     * persisted.
     */
    pub async fn save<P: AsRef<Path>>(&self, path: P) {
        let snapshot = {
            let mut inner = self.lock();
            self.prune_expired(&mut inner);
            PersistedStore {
                buffer: inner.buffer.iter().cloned().collect(),
                max_size: self.config.max_size,
                ttl_ms: self.config.ttl_ms,
                saved_at: Utc::now(),
            }
        };

        let result = async {
            if let Some(parent) = path.as_ref().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::MemoryWrite(format!("create dirs: {}", e)))?;
                }
            }
            let body = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| Error::MemoryWrite(format!("serialize store: {}", e)))?;
            tokio::fs::write(path.as_ref(), body)
                .await
                .map_err(|e| Error::MemoryWrite(format!("write store file: {}", e)))?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(err) = result {
            tracing::error!(error = %err, "store save failed");
            self.report(err);
        }
    }

    /**
     * Replace the outcome buffer from a JSON snapshot file. A missing file
     * is a silent no-op; any other failure goes through on_error. The
     * store's configured bounds stay in force (the file's bounds are
     * informational), and the loaded buffer is pruned against them.
     */
    pub async fn load<P: AsRef<Path>>(&self, path: P) {
        let bytes = match tokio::fs::read(path.as_ref()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                let err = Error::MemoryLoad(format!("read store file: {}", e));
                tracing::error!(error = %err, "store load failed");
                self.report(err);
                return;
            }
        };

        let persisted: PersistedStore = match serde_json::from_slice(&bytes) {
            Ok(persisted) => persisted,
            Err(e) => {
                let err = Error::MemoryLoad(format!("parse store file: {}", e));
                tracing::error!(error = %err, "store load failed");
                self.report(err);
                return;
            }
        };

        let mut inner = self.lock();
        inner.buffer = persisted.buffer.into();
        while inner.buffer.len() > self.config.max_size {
            inner.buffer.pop_front();
            inner.evictions += 1;
        }
        self.prune_expired(&mut inner);
    }

    pub fn get_metrics(&self) -> StoreMetrics {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        StoreMetrics {
            size: inner.buffer.len(),
            max_size: self.config.max_size,
            evictions: inner.evictions,
            failures: inner.failures,
            last_error: inner.last_error.clone(),
        }
    }

    pub fn len(&self) -> usize {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        inner.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn report(&self, err: Error) {
        let mut inner = self.lock();
        inner.failures += 1;
        inner.last_error = Some(err.to_string());
        drop(inner);
        if let Some(callback) = &self.on_error {
            callback(&err);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // Poisoning only occurs if a panic escaped a store operation; the
        // data is still structurally sound, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lazy TTL eviction, run at the start of every operation
    fn prune_expired(&self, inner: &mut StoreInner) {
        let Some(ttl_ms) = self.config.ttl_ms else {
            return;
        };
        let cutoff = Utc::now() - chrono::Duration::milliseconds(ttl_ms as i64);
        while inner
            .buffer
            .front()
            .is_some_and(|entry| entry.timestamp < cutoff)
        {
            inner.buffer.pop_front();
            inner.evictions += 1;
            tracing::debug!("store evicted expired outcome (ttl)");
        }
        while inner
            .chat
            .front()
            .is_some_and(|entry| entry.timestamp < cutoff)
        {
            inner.chat.pop_front();
            inner.evictions += 1;
        }
    }
}

/// Lowercase alphanumeric word set of a JSON rendering
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::PatchEnvelope;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store_with(max_size: usize) -> MemoryStore {
        MemoryStore::new(StoreConfig {
            max_size,
            ttl_ms: None,
        })
    }

    fn envelope_json(code: &str) -> String {
        PatchEnvelope::new(json!({ "patched_code": code }))
            .to_json()
            .unwrap()
    }

    #[test]
    fn test_bounded_eviction_oldest_first() {
        let store = store_with(3);
        for i in 0..5 {
            store
                .add_outcome(&envelope_json(&format!("snippet_{}", i)))
                .unwrap();
        }
        let metrics = store.get_metrics();
        assert_eq!(metrics.size, 3);
        assert_eq!(metrics.evictions, 2);

        // Oldest entries are gone: every surviving envelope is snippet 2..4
        let hits = store.get_similar(&json!({ "patched_code": "snippet_4" }));
        assert_eq!(hits.len(), 3);
        for envelope in &hits {
            let code = envelope["patch_data"]["patched_code"].as_str().unwrap();
            assert!(!code.contains("snippet_0") && !code.contains("snippet_1"));
        }
    }

    #[test]
    fn test_strict_write_rejects_non_json() {
        let store = store_with(10);
        let err = store.add_outcome("{definitely not json").unwrap_err();
        assert!(matches!(err, Error::MemoryWrite(_)));
        let metrics = store.get_metrics();
        assert_eq!(metrics.failures, 1);
        assert!(metrics.last_error.is_some());
        assert_eq!(metrics.size, 0);
    }

    #[test]
    fn test_safe_write_never_raises_and_reports() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let store = MemoryStore::with_error_callback(
            StoreConfig {
                max_size: 10,
                ttl_ms: None,
            },
            move |_err| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        store.safe_add_outcome("{broken");
        store.safe_add_outcome(&envelope_json("fine"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let metrics = store.get_metrics();
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.size, 1);
    }

    #[test]
    fn test_get_similar_token_overlap_and_cap() {
        let store = store_with(20);
        for i in 0..8 {
            store
                .add_outcome(&envelope_json(&format!(
                    "function handleLogin_{}() {{ validateUser(); }}",
                    i
                )))
                .unwrap();
        }
        store
            .add_outcome(&envelope_json("const unrelated = computeTotals();"))
            .unwrap();

        // Every stored patch shares at least the patched_code key token, so
        // the cap keeps only the five most recent entries
        let hits = store.get_similar(&json!({
            "patched_code": "function handleLogin_9() { validateUser(); }"
        }));
        assert_eq!(hits.len(), 5);
        let codes: Vec<String> = hits
            .iter()
            .map(|e| e["patch_data"]["patched_code"].as_str().unwrap().to_string())
            .collect();
        assert!(codes.iter().any(|c| c.contains("computeTotals")));
        assert!(!codes.iter().any(|c| c.contains("handleLogin_0")));

        // A query with no shared tokens at all matches nothing
        let hits = store.get_similar(&json!("zzzqqq"));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_get_similar_skips_malformed_entries() {
        let store = store_with(10);
        store.add_outcome(&envelope_json("shared_token_alpha")).unwrap();
        // Valid JSON but not an envelope shape (no patch_data): skipped
        store.add_outcome("{\"note\": \"shared_token_alpha\"}").unwrap();
        let hits = store.get_similar(&json!({ "patched_code": "shared_token_alpha" }));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_ttl_expires_entries_lazily() {
        let store = MemoryStore::new(StoreConfig {
            max_size: 10,
            ttl_ms: Some(0),
        });
        store.add_outcome(&envelope_json("ephemeral")).unwrap();
        // ttl of zero: the entry is expired by the next operation's prune
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(store.len(), 0);
        let metrics = store.get_metrics();
        assert!(metrics.evictions >= 1);
    }

    #[test]
    fn test_chat_records_bounded() {
        let store = store_with(2);
        store.add_chat("user", "first");
        store.add_chat("assistant", "second");
        store.add_chat("user", "third");

        let recent = store.recent_chat(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].content, "third");

        let last = store.recent_chat(1);
        assert_eq!(last[0].content, "third");
    }

    #[tokio::test]
    async fn test_save_load_roundtrip_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = store_with(10);
        store.add_outcome(&envelope_json("persisted_snippet")).unwrap();
        store.save(&path).await;
        assert!(path.exists());

        // The file carries the wire keys
        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("buffer").is_some());
        assert!(raw.get("maxSize").is_some());
        assert!(raw.get("ttlMs").is_some());
        assert!(raw.get("saved_at").is_some());

        let restored = store_with(10);
        restored.load(&path).await;
        assert_eq!(restored.len(), 1);
        let hits = restored.get_similar(&json!({ "patched_code": "persisted_snippet" }));
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_silent() {
        let store = store_with(10);
        store.load("/nonexistent/dir/store.json").await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.get_metrics().failures, 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_reports_via_callback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not a store snapshot").unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let store = MemoryStore::with_error_callback(
            StoreConfig {
                max_size: 10,
                ttl_ms: None,
            },
            move |err| {
                assert!(matches!(err, Error::MemoryLoad(_)));
                hits_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        store.load(&path).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_runtime_counters_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = store_with(1);
        store.add_outcome(&envelope_json("one")).unwrap();
        store.add_outcome(&envelope_json("two")).unwrap(); // evicts "one"
        assert_eq!(store.get_metrics().evictions, 1);
        store.save(&path).await;

        let restored = store_with(1);
        restored.load(&path).await;
        let metrics = restored.get_metrics();
        assert_eq!(metrics.size, 1);
        assert_eq!(metrics.evictions, 0, "counters are runtime-only");
        assert_eq!(metrics.failures, 0);
    }
}
