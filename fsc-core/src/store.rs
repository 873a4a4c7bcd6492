//! Process-wide typed key/value store.
//!
//! Orchestrators publish job progress here; any component may read it.
//! Entries carry a runtime-typed value, optional TTL, and optional metadata
//! (category, tags, persistence flag). Reads lazily evict expired entries; a
//! background sweeper removes the rest every 60 s. The store is bounded by
//! entry count and by estimated memory; when either bound is exceeded, the
//! oldest non-persistent entries are evicted. Every mutation is recorded in
//! a fixed-capacity operation ring buffer.
//!
//! The store is built at program start and shared via `Arc`; there is no
//! module-load singleton, so tests construct their own instances.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default bound on entry count.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
/// Default bound on estimated memory, 100 MB.
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 100 * 1024 * 1024;
/// Capacity of the operation ring buffer.
pub const OPERATION_LOG_CAPACITY: usize = 1000;
/// Interval of the background expiry sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A runtime-typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StateValue {
    String(String),
    Number(f64),
    Bool(bool),
    Object(serde_json::Value),
    Null,
}

impl StateValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Object(_) => "object",
            Self::Null => "null",
        }
    }

    /// The raw JSON payload, for size estimates and value search.
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::json!(n),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Object(v) => v.clone(),
            Self::Null => serde_json::Value::Null,
        }
    }
}

/// Optional descriptive metadata on an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Persistent entries are never evicted by the bounds policy.
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    pub key: String,
    pub value: StateValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

impl StateEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn is_persistent(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.persistent)
    }

    /// Estimated memory footprint: `2·|key| + 2·|JSON(value)| + 200`.
    fn cost(&self) -> usize {
        let value_len = self.value.to_json().to_string().len();
        2 * self.key.len() + 2 * value_len + 200
    }
}

/// What a mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Set,
    Delete,
    Expire,
    Evict,
    Clear,
    Increment,
    Append,
    Extend,
}

/// One record in the operation ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateOperation {
    pub kind: OperationKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<StateValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<StateValue>,
    pub at: DateTime<Utc>,
}

/// Options for [`StateStore::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl_seconds: Option<u64>,
    pub metadata: Option<EntryMetadata>,
}

/// Filter for [`StateStore::query`].
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub category: Option<String>,
    /// Match when any of these tags appears in the entry's tags.
    pub tags_any: Vec<String>,
    /// Match entries whose value has this type name.
    pub value_type: Option<String>,
    pub key_regex: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub entries: usize,
    pub memory_bytes: usize,
    pub expired_removed: u64,
    pub evicted: u64,
    pub operations: usize,
}

/// Size bounds for a store instance.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Inner {
    entries: HashMap<String, StateEntry>,
    memory_bytes: usize,
    ops: VecDeque<StateOperation>,
    expired_removed: u64,
    evicted: u64,
}

/// The shared store.
pub struct StateStore {
    limits: StoreLimits,
    clock: Clock,
    inner: Mutex<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self::with_clock(limits, Box::new(Utc::now))
    }

    /// Injectable clock, for TTL tests.
    pub fn with_clock(limits: StoreLimits, clock: Clock) -> Self {
        Self {
            limits,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                memory_bytes: 0,
                ops: VecDeque::with_capacity(OPERATION_LOG_CAPACITY),
                expired_removed: 0,
                evicted: 0,
            }),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ── Writes ────────────────────────────────────────────────────────────

    /// Insert or replace an entry.
    pub fn set(&self, key: &str, value: StateValue, options: SetOptions) {
        let now = self.now();
        let mut inner = self.lock();

        let old = inner.entries.get(key).cloned();
        let entry = StateEntry {
            key: key.to_string(),
            value: value.clone(),
            created_at: old.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            expires_at: options
                .ttl_seconds
                .map(|ttl| now + chrono::Duration::seconds(ttl as i64)),
            metadata: options.metadata,
        };
        insert_entry(&mut inner, entry);
        record(
            &mut inner,
            OperationKind::Set,
            key,
            Some(value),
            old.map(|e| e.value),
            now,
        );
        self.enforce_bounds(&mut inner, now);
    }

    /// Read a value; expired entries are removed and read as absent.
    pub fn get(&self, key: &str) -> Option<StateValue> {
        let now = self.now();
        let mut inner = self.lock();
        let hit = inner
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));
        match hit {
            Some((true, _)) => {
                self.remove_expired(&mut inner, key, now);
                None
            }
            Some((false, value)) => Some(value),
            None => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry; returns whether one existed.
    pub fn delete(&self, key: &str) -> bool {
        let now = self.now();
        let mut inner = self.lock();
        match remove_entry(&mut inner, key) {
            Some(old) => {
                record(
                    &mut inner,
                    OperationKind::Delete,
                    key,
                    None,
                    Some(old.value),
                    now,
                );
                true
            }
            None => false,
        }
    }

    /// Remove every entry, or only those in `category`. Returns the count.
    pub fn clear(&self, category: Option<&str>) -> usize {
        let now = self.now();
        let mut inner = self.lock();
        let keys: Vec<String> = inner
            .entries
            .values()
            .filter(|e| match category {
                Some(cat) => e
                    .metadata
                    .as_ref()
                    .and_then(|m| m.category.as_deref())
                    .is_some_and(|c| c == cat),
                None => true,
            })
            .map(|e| e.key.clone())
            .collect();
        for key in &keys {
            remove_entry(&mut inner, key);
        }
        record(
            &mut inner,
            OperationKind::Clear,
            category.unwrap_or("*"),
            None,
            None,
            now,
        );
        keys.len()
    }

    /// Add `delta` to a numeric entry, creating it at zero first. Returns
    /// the new value.
    pub fn increment(&self, key: &str, delta: f64) -> Result<f64> {
        let now = self.now();
        let mut inner = self.lock();
        let hit = inner
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));
        let current = match hit {
            Some((true, _)) => {
                self.remove_expired(&mut inner, key, now);
                0.0
            }
            Some((false, StateValue::Number(n))) => n,
            Some((false, other)) => {
                return Err(Error::state(format!(
                    "cannot increment {key}: value is {}",
                    other.type_name()
                )))
            }
            None => 0.0,
        };
        let next = current + delta;
        self.update_value(&mut inner, key, StateValue::Number(next), now);
        record(
            &mut inner,
            OperationKind::Increment,
            key,
            Some(StateValue::Number(next)),
            Some(StateValue::Number(current)),
            now,
        );
        Ok(next)
    }

    /// Push an element onto an array entry, creating the array on demand.
    /// Returns the new length.
    pub fn append(&self, key: &str, elem: serde_json::Value) -> Result<usize> {
        let now = self.now();
        let mut inner = self.lock();
        let hit = inner
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));
        let mut array = match hit {
            Some((true, _)) => {
                self.remove_expired(&mut inner, key, now);
                Vec::new()
            }
            Some((false, StateValue::Object(serde_json::Value::Array(items)))) => items,
            Some((false, other)) => {
                return Err(Error::state(format!(
                    "cannot append to {key}: value is {}",
                    other.type_name()
                )))
            }
            None => Vec::new(),
        };
        array.push(elem);
        let len = array.len();
        let value = StateValue::Object(serde_json::Value::Array(array));
        self.update_value(&mut inner, key, value.clone(), now);
        record(&mut inner, OperationKind::Append, key, Some(value), None, now);
        Ok(len)
    }

    /// Merge an object's fields into an object entry, creating it on demand.
    pub fn extend(&self, key: &str, object: serde_json::Value) -> Result<()> {
        let serde_json::Value::Object(fields) = object else {
            return Err(Error::state(format!(
                "extend requires an object argument for {key}"
            )));
        };
        let now = self.now();
        let mut inner = self.lock();
        let hit = inner
            .entries
            .get(key)
            .map(|e| (e.is_expired(now), e.value.clone()));
        let mut map = match hit {
            Some((true, _)) => {
                self.remove_expired(&mut inner, key, now);
                serde_json::Map::new()
            }
            Some((false, StateValue::Object(serde_json::Value::Object(map)))) => map,
            Some((false, other)) => {
                return Err(Error::state(format!(
                    "cannot extend {key}: value is {}",
                    other.type_name()
                )))
            }
            None => serde_json::Map::new(),
        };
        for (k, v) in fields {
            map.insert(k, v);
        }
        let value = StateValue::Object(serde_json::Value::Object(map));
        self.update_value(&mut inner, key, value.clone(), now);
        record(&mut inner, OperationKind::Extend, key, Some(value), None, now);
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────

    /// Filtered listing, sorted by `updated_at` descending, paginated last.
    pub fn query(&self, query: &StoreQuery) -> Result<Vec<StateEntry>> {
        let regex = match &query.key_regex {
            Some(pattern) => Some(
                regex::Regex::new(pattern)
                    .map_err(|e| Error::state(format!("invalid key regex: {e}")))?,
            ),
            None => None,
        };
        let now = self.now();
        let inner = self.lock();
        let mut matches: Vec<StateEntry> = inner
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .filter(|e| match &query.category {
                Some(cat) => e
                    .metadata
                    .as_ref()
                    .and_then(|m| m.category.as_deref())
                    .is_some_and(|c| c == cat),
                None => true,
            })
            .filter(|e| {
                if query.tags_any.is_empty() {
                    return true;
                }
                let tags = e.metadata.as_ref().map(|m| m.tags.as_slice()).unwrap_or(&[]);
                query.tags_any.iter().any(|t| tags.contains(t))
            })
            .filter(|e| match &query.value_type {
                Some(t) => e.value.type_name() == t,
                None => true,
            })
            .filter(|e| match &regex {
                Some(re) => re.is_match(&e.key),
                None => true,
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.key.cmp(&b.key)));
        let paged = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(paged)
    }

    /// Entries whose serialized value contains `term` (case-insensitive).
    pub fn search_by_value(&self, term: &str) -> Vec<StateEntry> {
        let needle = term.to_lowercase();
        let now = self.now();
        let inner = self.lock();
        let mut matches: Vec<StateEntry> = inner
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .filter(|e| e.value.to_json().to_string().to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.key.cmp(&b.key)));
        matches
    }

    /// All live entries, sorted by key.
    pub fn snapshot(&self) -> Vec<StateEntry> {
        let now = self.now();
        let inner = self.lock();
        let mut entries: Vec<StateEntry> = inner
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// The most recent operations, oldest first, up to `limit`.
    pub fn operations(&self, limit: Option<usize>) -> Vec<StateOperation> {
        let inner = self.lock();
        let take = limit.unwrap_or(inner.ops.len()).min(inner.ops.len());
        inner.ops.iter().skip(inner.ops.len() - take).cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.lock();
        StoreStats {
            entries: inner.entries.len(),
            memory_bytes: inner.memory_bytes,
            expired_removed: inner.expired_removed,
            evicted: inner.evicted,
            operations: inner.ops.len(),
        }
    }

    // ── Expiry ────────────────────────────────────────────────────────────

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.remove_expired(&mut inner, key, now);
        }
        expired.len()
    }

    // ── Internal ──────────────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("state store lock poisoned")
    }

    fn update_value(&self, inner: &mut Inner, key: &str, value: StateValue, now: DateTime<Utc>) {
        let entry = match remove_entry(inner, key) {
            Some(mut existing) => {
                existing.value = value;
                existing.updated_at = now;
                existing
            }
            None => StateEntry {
                key: key.to_string(),
                value,
                created_at: now,
                updated_at: now,
                expires_at: None,
                metadata: None,
            },
        };
        insert_entry(inner, entry);
        self.enforce_bounds(inner, now);
    }

    fn remove_expired(&self, inner: &mut Inner, key: &str, now: DateTime<Utc>) {
        if let Some(old) = remove_entry(inner, key) {
            inner.expired_removed += 1;
            record(
                inner,
                OperationKind::Expire,
                key,
                None,
                Some(old.value),
                now,
            );
        }
    }

    /// Evict oldest non-persistent entries while either bound is exceeded.
    fn enforce_bounds(&self, inner: &mut Inner, now: DateTime<Utc>) {
        while inner.entries.len() > self.limits.max_entries
            || inner.memory_bytes > self.limits.max_memory_bytes
        {
            let victim = inner
                .entries
                .values()
                .filter(|e| !e.is_persistent())
                .min_by_key(|e| e.updated_at)
                .map(|e| e.key.clone());
            let Some(key) = victim else { break };
            if let Some(old) = remove_entry(inner, &key) {
                inner.evicted += 1;
                record(
                    inner,
                    OperationKind::Evict,
                    &key,
                    None,
                    Some(old.value),
                    now,
                );
            }
        }
    }
}

fn insert_entry(inner: &mut Inner, entry: StateEntry) {
    if let Some(old) = inner.entries.remove(&entry.key) {
        inner.memory_bytes = inner.memory_bytes.saturating_sub(old.cost());
    }
    inner.memory_bytes += entry.cost();
    inner.entries.insert(entry.key.clone(), entry);
}

fn remove_entry(inner: &mut Inner, key: &str) -> Option<StateEntry> {
    let old = inner.entries.remove(key)?;
    inner.memory_bytes = inner.memory_bytes.saturating_sub(old.cost());
    Some(old)
}

fn record(
    inner: &mut Inner,
    kind: OperationKind,
    key: &str,
    new_value: Option<StateValue>,
    old_value: Option<StateValue>,
    at: DateTime<Utc>,
) {
    inner.ops.push_back(StateOperation {
        kind,
        key: key.to_string(),
        new_value,
        old_value,
        at,
    });
    while inner.ops.len() > OPERATION_LOG_CAPACITY {
        inner.ops.pop_front();
    }
}

// ── Background sweeper ────────────────────────────────────────────────────

/// Handle to the background expiry sweeper; the thread stops when dropped.
pub struct SweeperHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

/// Run [`StateStore::sweep_expired`] every `interval` until the handle is
/// dropped.
pub fn spawn_sweeper(store: Arc<StateStore>, interval: Duration) -> SweeperHandle {
    let stop = Arc::new((Mutex::new(false), Condvar::new()));
    let stop_inner = Arc::clone(&stop);
    let handle = std::thread::spawn(move || {
        let (flag, signal) = &*stop_inner;
        let mut stopped = flag.lock().expect("sweeper flag poisoned");
        loop {
            let (guard, timeout) = signal
                .wait_timeout(stopped, interval)
                .expect("sweeper flag poisoned");
            stopped = guard;
            if *stopped {
                return;
            }
            if timeout.timed_out() {
                let removed = store.sweep_expired();
                if removed > 0 {
                    log::debug!("state sweeper removed {removed} expired entries");
                }
            }
        }
    });
    SweeperHandle {
        stop,
        handle: Some(handle),
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let (flag, signal) = &*self.stop;
        *flag.lock().expect("sweeper flag poisoned") = true;
        signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
