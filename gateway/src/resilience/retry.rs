use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classification wrapper for errors crossing the network. Call sites decide
/// the class explicitly; there is no reflective "temporary" probing.
#[derive(Debug)]
pub enum RemoteError<E> {
    /// Transport-level failure, timeout, or 5xx: worth another attempt.
    Retryable(E),
    /// 4xx, malformed document, or anything a retry cannot fix.
    NonRetryable(E),
}

impl<E> RemoteError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RemoteError::Retryable(e) | RemoteError::NonRetryable(e) => e,
        }
    }
}

/// Exponential backoff with ±25% jitter.
///
/// Attempt `i` (1-indexed) sleeps `min(initial * multiplier^(i-1), max_delay)`
/// scaled by `1 + U(-0.25, 0.25)` before attempt `i+1`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }

    /// Run `op` until success, a non-retryable error, or attempt exhaustion.
    /// Exhaustion surfaces the last error. Dropping the returned future
    /// cancels the in-flight attempt and any backoff sleep.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError<E>>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(RemoteError::NonRetryable(e)) => return Err(e),
                Err(RemoteError::Retryable(e)) => {
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
