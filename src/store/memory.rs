//! In-process coordination store
//!
//! Mirrors the Redis semantics the worker relies on (FIFO lists with a
//! blocking pop, score-ordered sets, key expiry) without a server. Used by
//! the test-suite and for single-process local runs. Failures can be
//! injected to exercise the retry and restart paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{CoordinationStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Sorted(BTreeMap<String, f64>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    expiry: HashMap<String, Instant>,
}

impl State {
    fn purge(&mut self, key: &str) {
        if let Some(at) = self.expiry.get(key) {
            if *at <= Instant::now() {
                self.expiry.remove(key);
                self.values.remove(key);
            }
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Value> {
        self.purge(key);
        self.values.get_mut(key)
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.expiry.remove(key);
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

macro_rules! typed {
    ($state:expr, $key:expr, $variant:ident, $default:expr) => {{
        $state.purge($key);
        let slot = $state
            .values
            .entry($key.to_string())
            .or_insert_with(|| Value::$variant($default));
        match slot {
            Value::$variant(inner) => inner,
            _ => return Err(wrong_type($key)),
        }
    }};
}

/// In-memory [`CoordinationStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pushed: Notify,
    failures: AtomicUsize,
    timeouts: AtomicUsize,
    push_timeouts: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with a connection error
    pub fn inject_failures(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls time out, after any injected failures
    pub fn inject_timeouts(&self, n: usize) {
        self.timeouts.store(n, Ordering::SeqCst);
    }

    /// Make every push time out without landing until switched off
    pub fn time_out_pushes(&self, on: bool) {
        self.push_timeouts.store(on, Ordering::SeqCst);
    }

    /// Total calls made against the store, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Remaining time-to-live of a key, if it has one
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().await;
        state.purge(key);
        state
            .expiry
            .get(key)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Connection("injected failure".into()));
        }
        let remaining = self.timeouts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.timeouts.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Timeout);
        }
        Ok(())
    }

    async fn try_pop(&self, list: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        let popped = match state.entry(list) {
            Some(Value::List(items)) => items.pop_back(),
            Some(_) => return Err(wrong_type(list)),
            None => None,
        };
        if matches!(state.values.get(list), Some(Value::List(items)) if items.is_empty()) {
            state.remove(list);
        }
        Ok(popped)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn push(&self, list: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        if self.push_timeouts.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }
        {
            let mut state = self.state.lock().await;
            typed!(state, list, List, VecDeque::new()).push_front(value.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn push_oldest(&self, list: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        {
            let mut state = self.state.lock().await;
            typed!(state, list, List, VecDeque::new()).push_back(value.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(&self, list: &str, timeout: Duration) -> StoreResult<Option<String>> {
        self.check()?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list).await? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, list: &str) -> StoreResult<usize> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(list) {
            Some(Value::List(items)) => Ok(items.len()),
            Some(_) => Err(wrong_type(list)),
            None => Ok(0),
        }
    }

    async fn list_trim(&self, list: &str, keep: usize) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(list) {
            Some(Value::List(items)) => items.truncate(keep),
            Some(_) => return Err(wrong_type(list)),
            None => {}
        }
        Ok(())
    }

    async fn list_recent(&self, list: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(list) {
            Some(Value::List(items)) => Ok(items.iter().take(limit).cloned().collect()),
            Some(_) => Err(wrong_type(list)),
            None => Ok(Vec::new()),
        }
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        typed!(state, key, Sorted, BTreeMap::new()).insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_range_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let mut due: Vec<(String, f64)> = match state.entry(key) {
            Some(Value::Sorted(members)) => members
                .iter()
                .filter(|(_, score)| **score <= max)
                .map(|(member, score)| (member.clone(), *score))
                .collect(),
            Some(_) => return Err(wrong_type(key)),
            None => Vec::new(),
        };
        due.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(due)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Sorted(members)) => Ok(members.remove(member).is_some()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Sorted(members)) => Ok(members.len()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn promote_member(&self, key: &str, member: &str, list: &str) -> StoreResult<bool> {
        self.check()?;
        {
            let mut state = self.state.lock().await;
            let removed = match state.entry(key) {
                Some(Value::Sorted(members)) => members.remove(member).is_some(),
                Some(_) => return Err(wrong_type(key)),
                None => false,
            };
            if !removed {
                return Ok(false);
            }
            typed!(state, list, List, VecDeque::new()).push_front(member.to_string());
        }
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(typed!(state, key, Set, HashSet::new()).insert(member.to_string()))
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Set(members)) => Ok(members.contains(member)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Set(members)) => Ok(members.remove(member)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        let hash = typed!(state, key, Hash, HashMap::new());
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.entry(key) {
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .values
            .insert(key.to_string(), Value::Str(value.to_string()));
        match ttl {
            Some(ttl) => {
                state.expiry.insert(key.to_string(), Instant::now() + ttl);
            }
            None => {
                state.expiry.remove(key);
            }
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let value = match state.entry(key) {
            Some(Value::Str(value)) => Some(value.clone()),
            Some(_) => return Err(wrong_type(key)),
            None => None,
        };
        if value.is_some() {
            state.remove(key);
        }
        Ok(value)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check()?;
        let mut state = self.state.lock().await;
        let current = match state.entry(key) {
            Some(Value::Str(value)) => value.parse::<i64>().map_err(|_| {
                StoreError::Command("ERR value is not an integer or out of range".into())
            })?,
            Some(_) => return Err(wrong_type(key)),
            None => 0,
        };
        let next = current + 1;
        state
            .values
            .insert(key.to_string(), Value::Str(next.to_string()));
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.entry(key).is_some() {
            state.expiry.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.state.lock().await.remove(key);
        Ok(())
    }
}
