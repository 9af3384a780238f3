use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive successes required in HalfOpen before closing.
const HALF_OPEN_CLOSE_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub call_timeout: Duration,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            call_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum BreakerError<E> {
    /// Short-circuited: the breaker is open and the reset timeout has not
    /// elapsed. The wrapped operation was NOT invoked.
    Open,
    /// The call exceeded `call_timeout`. Counts as a failure.
    Timeout,
    Inner(E),
}

struct Inner {
    state: BreakerState,
    failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

/// Fail-fast wrapper around one flaky remote. State transitions are
/// serialized by the mutex; critical sections never hold it across I/O.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Run `op` under the breaker and the call timeout.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure();
                Err(BreakerError::Timeout)
            }
        }
    }

    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    tracing::info!(breaker = %self.name, "circuit half-open, probing remote");
                    Ok(())
                } else {
                    Err(BreakerError::Open)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= HALF_OPEN_CLOSE_AFTER {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    tracing::info!(breaker = %self.name, "circuit closed");
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.max_failures {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failures,
                        "circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failures = 0;
                tracing::warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            BreakerState::Open => {}
        }
    }
}

/// One breaker per remote host. `get_or_create` hands out the same instance
/// for the same host so failure counts aggregate across requests.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, host: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(host, self.config.clone())))
            .clone()
    }
}
