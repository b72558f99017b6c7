//! In-process store with the same semantics as the Redis store.
//!
//! Expiry is tracked with `tokio::time::Instant`, so tests running on a
//! paused clock can move time forward with `tokio::time::advance`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::store::{ClaimSpec, Store};
use crate::{StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    closed: bool,
}

impl Inner {
    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn list(&mut self, key: &str) -> StoreResult<Option<&mut VecDeque<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn pop_front(&mut self, key: &str) -> StoreResult<Option<String>> {
        let Some(list) = self.list(key)? else {
            return Ok(None);
        };
        let value = list.pop_front();
        if list.is_empty() {
            self.entries.remove(key);
        }
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// Shared-nothing store living inside the current process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        if let Some(list) = inner.list(key)? {
            list.push_back(value.to_string());
            return Ok(list.len() as u64);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::List(VecDeque::from([value.to_string()])),
                expires_at: None,
            },
        );
        Ok(1)
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner.list(key)?.map_or(0, |list| list.len() as u64))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        match inner.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        inner.set(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let live = inner.live(key).is_some();
        inner.entries.remove(key);
        Ok(live)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let matches = match inner.live(key) {
            None => false,
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => value == expected,
            Some(_) => return Err(wrong_type(key)),
        };
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn set_guarded(
        &self,
        guard_key: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        if inner.live(guard_key).is_none() {
            return Ok(false);
        }
        inner.set(key, value, Some(ttl));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner.live(key).is_some())
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let now = Instant::now();
        inner.entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn pop_and_claim(
        &self,
        list_key: &str,
        claim: &ClaimSpec,
    ) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        if inner.live(&claim.claim_key).is_some() {
            return Ok(None);
        }
        let Some(entry) = inner.pop_front(list_key)? else {
            return Ok(None);
        };
        inner.set(
            &claim.heartbeat_key,
            &claim.heartbeat_value,
            Some(claim.heartbeat_ttl),
        );
        inner.set(&claim.claim_key, &entry, Some(claim.claim_ttl));
        Ok(Some(entry))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.lock().await.check_open()
    }

    async fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.entries.clear();
        Ok(())
    }
}

/// Glob match supporting `*` (any run) and `?` (any one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
