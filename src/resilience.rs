//! Retry, circuit breaking and result caching for outbound analysis calls.
//!
//! A [`ResilientCaller`] is cheap to clone and every clone shares one health
//! state and one cache, so all callers hitting the same backend protect it
//! together. Time is read from [`tokio::time::Instant`], which lets tests
//! drive the backoff and cool-down windows with a paused clock.

use log::{debug, info, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::{BreakerConfig, CacheConfig, RetryPolicy};
use crate::error::{GridlyError, Result};

/// Hex SHA-256 over the given parts, separated so that `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
pub fn cache_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One trial call is in flight after the cool-down elapsed.
    HalfOpen { trial_started: Instant },
}

/// Read-only view of the breaker for status display.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHealth {
    pub is_healthy: bool,
    pub last_failure: Option<Instant>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub state: CircuitState,
}

#[derive(Debug)]
struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    is_healthy: bool,
}

impl CircuitBreaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            is_healthy: true,
        }
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        let since = self
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        self.config.reset_timeout().saturating_sub(since)
    }

    /// Decides whether a call may go out now. `Err` carries the wait.
    fn admit(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = self.remaining_cooldown(now);
                if remaining.is_zero() {
                    info!("Circuit breaker cool-down elapsed; allowing a trial call");
                    self.state = CircuitState::HalfOpen { trial_started: now };
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen { trial_started } => {
                let elapsed = now.saturating_duration_since(trial_started);
                let remaining = self.config.reset_timeout().saturating_sub(elapsed);
                if remaining.is_zero() {
                    // The previous trial was dropped or panicked before reporting.
                    warn!("Trial call never reported back; allowing a new trial");
                    self.state = CircuitState::HalfOpen { trial_started: now };
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
        }
    }

    fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit breaker closed after a successful call");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.is_healthy = true;
    }

    fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.is_healthy = false;

        let trial_failed = matches!(self.state, CircuitState::HalfOpen { .. });
        if trial_failed || self.consecutive_failures >= self.config.failure_threshold {
            if self.state == CircuitState::Closed {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    self.consecutive_failures
                );
            }
            self.state = CircuitState::Open;
        }
    }

    /// A non-retryable failure says nothing about backend load; an
    /// interrupted trial returns to `Open` so the next call can try again.
    fn record_inconclusive(&mut self) {
        if matches!(self.state, CircuitState::HalfOpen { .. }) {
            self.state = CircuitState::Open;
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.is_healthy = true;
    }

    fn health(&self) -> ServiceHealth {
        ServiceHealth {
            is_healthy: self.is_healthy,
            last_failure: self.last_failure,
            consecutive_failures: self.consecutive_failures,
            circuit_open: self.state != CircuitState::Closed,
            state: self.state,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    value: serde_json::Value,
}

/// TTL and size bounded result cache; the oldest entry goes first.
#[derive(Debug)]
struct ResultCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<serde_json::Value> {
        let ttl = self.config.ttl();
        let fresh = self
            .entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.stored_at) < ttl)?;
        if fresh {
            self.entries.get(key).map(|entry| entry.value.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    fn insert(&mut self, key: String, value: serde_json::Value, now: Instant) {
        if self.config.capacity == 0 {
            return;
        }
        let ttl = self.config.ttl();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
        self.entries.insert(
            key,
            CacheEntry {
                stored_at: now,
                value,
            },
        );

        while self.entries.len() > self.config.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

struct Shared {
    retry: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
    cache: Mutex<ResultCache>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Attempt<T> {
    Done(T),
    Retry(GridlyError),
}

/// Shared retry / circuit breaker / cache wrapper for one backend.
#[derive(Clone)]
pub struct ResilientCaller {
    shared: Arc<Shared>,
}

impl ResilientCaller {
    pub fn new(retry: RetryPolicy, breaker: BreakerConfig, cache: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                retry,
                breaker: Mutex::new(CircuitBreaker::new(breaker)),
                cache: Mutex::new(ResultCache::new(cache)),
            }),
        }
    }

    pub fn from_config(config: &crate::config::GridlyConfig) -> Self {
        Self::new(
            config.retry.clone(),
            config.breaker.clone(),
            config.cache.clone(),
        )
    }

    pub fn health(&self) -> ServiceHealth {
        lock(&self.shared.breaker).health()
    }

    /// Remaining cool-down if the circuit is currently short-circuiting.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let breaker = lock(&self.shared.breaker);
        match breaker.state {
            CircuitState::Closed => None,
            _ => Some(breaker.remaining_cooldown(Instant::now())),
        }
    }

    /// Operator reset: closes the circuit and forgets failures.
    pub fn reset(&self) {
        info!("Circuit breaker reset by operator");
        lock(&self.shared.breaker).reset();
    }

    pub fn clear_cache(&self) {
        lock(&self.shared.cache).clear();
    }

    pub fn cached_entries(&self) -> usize {
        lock(&self.shared.cache).len()
    }

    fn cached<T: DeserializeOwned>(&self, key: Option<&str>) -> Option<T> {
        let key = key?;
        let value = lock(&self.shared.cache).get(key, Instant::now())?;
        match serde_json::from_value(value) {
            Ok(hit) => {
                debug!("Cache hit for key {}", key);
                Some(hit)
            }
            Err(e) => {
                debug!("Ignoring cache entry {} of a different shape: {}", key, e);
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: Option<&str>, value: &T) {
        let Some(key) = key else { return };
        match serde_json::to_value(value) {
            Ok(json) => lock(&self.shared.cache).insert(key.to_string(), json, Instant::now()),
            Err(e) => warn!("Result for key {} could not be cached: {}", key, e),
        }
    }

    fn circuit_open_error(&self) -> Option<GridlyError> {
        let breaker = lock(&self.shared.breaker);
        (breaker.state == CircuitState::Open).then(|| GridlyError::CircuitOpen {
            retry_after: breaker.remaining_cooldown(Instant::now()),
        })
    }

    /// One admitted call. Retryable failures come back as `Attempt::Retry`.
    async fn attempt<T, F, Fut>(&self, operation: F) -> Result<Attempt<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        lock(&self.shared.breaker)
            .admit(Instant::now())
            .map_err(|retry_after| GridlyError::CircuitOpen { retry_after })?;

        match operation().await {
            Ok(value) => {
                lock(&self.shared.breaker).record_success();
                Ok(Attempt::Done(value))
            }
            Err(e) if e.is_retryable() => {
                lock(&self.shared.breaker).record_failure(Instant::now());
                Ok(Attempt::Retry(e))
            }
            Err(e) => {
                lock(&self.shared.breaker).record_inconclusive();
                Err(match e {
                    GridlyError::CircuitOpen { .. }
                    | GridlyError::TransientService { .. }
                    | GridlyError::PermanentService(_) => e,
                    other => GridlyError::PermanentService(other.to_string()),
                })
            }
        }
    }

    fn backoff_with_jitter(&self, retry: u32) -> Duration {
        let base = self.shared.retry.backoff(retry);
        let ratio = self.shared.retry.jitter_ratio;
        if ratio <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=ratio);
        base + base.mul_f64(jitter)
    }

    async fn retry_loop<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.shared.retry.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.attempt(&mut operation).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(e) => {
                    if attempt < max_retries {
                        if let Some(open) = self.circuit_open_error() {
                            return Err(open);
                        }
                        let delay = self.backoff_with_jitter(attempt);
                        warn!(
                            "Analysis call failed ({}); retry {}/{} in {:?}",
                            e,
                            attempt + 1,
                            max_retries,
                            delay
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let consecutive_failures = lock(&self.shared.breaker).consecutive_failures;
        Err(GridlyError::TransientService {
            consecutive_failures,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts were made".to_string()),
        })
    }

    /// Runs `operation` with retries and circuit breaking. A fresh cached
    /// result for `cache_key` is returned without calling `operation`.
    pub async fn call<T, F, Fut>(&self, cache_key: Option<&str>, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.cached(cache_key) {
            return Ok(hit);
        }

        let value = self.retry_loop(operation).await?;
        self.store(cache_key, &value);
        Ok(value)
    }

    /// Like [`call`](Self::call) but walks `endpoints` in priority order.
    /// A retryable failure moves on to the next endpoint; the last endpoint
    /// gets the full retry policy.
    pub async fn call_with_fallback<E, T, F, Fut>(
        &self,
        endpoints: &[E],
        cache_key: Option<&str>,
        mut operation: F,
    ) -> Result<T>
    where
        E: std::fmt::Debug,
        T: Serialize + DeserializeOwned,
        F: FnMut(&E) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some((last, preferred)) = endpoints.split_last() else {
            return Err(GridlyError::InvalidConfig(
                "no endpoints configured".to_string(),
            ));
        };

        if let Some(hit) = self.cached(cache_key) {
            return Ok(hit);
        }

        for endpoint in preferred {
            match self.attempt(|| operation(endpoint)).await? {
                Attempt::Done(value) => {
                    self.store(cache_key, &value);
                    return Ok(value);
                }
                Attempt::Retry(e) => {
                    if let Some(open) = self.circuit_open_error() {
                        return Err(open);
                    }
                    warn!("Endpoint {:?} failed ({}); falling back", endpoint, e);
                }
            }
        }

        let value = self.retry_loop(|| operation(last)).await?;
        self.store(cache_key, &value);
        Ok(value)
    }
}

impl Default for ResilientCaller {
    fn default() -> Self {
        Self::new(
            RetryPolicy::default(),
            BreakerConfig::default(),
            CacheConfig::default(),
        )
    }
}
