//! Fixed-interval retry inside a bounded window.
//!
//! # Responsibilities
//! - Run the first attempt immediately
//! - Re-attempt at a fixed interval until the window is exhausted
//! - Surface the last error once no further attempt fits

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between backend connection attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Retry `attempt` every `interval` until it succeeds or `window` has elapsed.
///
/// The closure receives the time left in the window so a single attempt can
/// bound itself. The first attempt always runs, even for a zero window.
pub async fn retry_within<T, E, F, Fut>(
    window: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = window.saturating_sub(started.elapsed());

        match attempt(remaining).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if started.elapsed() + interval >= window {
                    tracing::debug!(attempts, window_ms = window.as_millis() as u64, "Retry window exhausted");
                    return Err(e);
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, ()> = retry_within(Duration::from_secs(3), RETRY_INTERVAL, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;

        assert_eq!(res, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_at_fixed_interval_until_window_ends() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let res: Result<(), &str> = retry_within(Duration::from_secs(3), RETRY_INTERVAL, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("refused") }
        })
        .await;

        assert_eq!(res, Err("refused"));
        // attempts at 0.0, 0.5, ... 2.5s
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let res: Result<(), ()> = retry_within(Duration::ZERO, RETRY_INTERVAL, |remaining| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(remaining, Duration::ZERO);
            async { Err(()) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, ()> = retry_within(Duration::from_secs(3), RETRY_INTERVAL, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(res, Ok(2));
    }
}
