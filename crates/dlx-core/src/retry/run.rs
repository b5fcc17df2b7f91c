//! Retry loop: run a closure until success or the policy says stop.

use super::classify;
use super::error::FetchError;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the retry policy says to stop. On a
/// retryable failure, sleeps for the backoff duration (blocking the
/// current thread) then tries again. Intended to run on a
/// `spawn_blocking` worker thread, not the async control context.
pub fn run_with_retry<F>(policy: &RetryPolicy, mut f: F) -> Result<(), FetchError>
where
    F: FnMut(u32) -> Result<(), FetchError>,
{
    let mut attempt = 1u32;
    loop {
        match f(attempt) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        std::thread::sleep(d);
                        attempt += 1;
                    }
                }
            }
        }
    }
}
