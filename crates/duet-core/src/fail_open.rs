//! Fail-open helpers for hook infrastructure
//!
//! A hook handler that crashes blocks the host, so bookkeeping around the
//! real work (event sinks, correlation files, the sub-agent flag, config
//! loading) degrades to a warning instead of an error.
//!
//! Never fail open on:
//! - Permission decisions (those fail *closed*, see `duet-gate`)
//! - Handoff readiness (the consumer needs the real error and exit status)

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay unit between attempts of [`fail_open_with_retries`]
const RETRY_STEP: Duration = Duration::from_millis(25);

/// Run `f`, logging a failure at warn and mapping it to `None`
///
/// ```no_run
/// use duet_core::fail_open::fail_open;
/// use duet_core::Result;
///
/// async fn append_event() -> Result<()> {
///     Ok(())
/// }
///
/// async fn handler() {
///     if fail_open("event_log_append", || append_event()).await.is_none() {
///         // recorded nothing, carry on with the hook
///     }
/// }
/// ```
pub async fn fail_open<F, Fut, T, E>(operation: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    f().await
        .map_err(|e| warn!("{} failed (fail-open): {}", operation, e))
        .ok()
}

/// [`fail_open`] with up to `attempts` tries, waiting 25ms × attempt between them
///
/// Meant for the event store, whose file can be briefly locked by a
/// concurrent handler process.
pub async fn fail_open_with_retries<F, Fut, T, E>(operation: &str, mut f: F, attempts: usize) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt >= attempts => {
                warn!(
                    "{} failed after {} attempts (fail-open): {}",
                    operation, attempt, e
                );
                return None;
            }
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", operation, attempt, attempts, e);
                tokio::time::sleep(RETRY_STEP * attempt as u32).await;
            }
        }
    }
}

/// Synchronous counterpart: the value, or `fallback` after a warning
pub fn fail_safe<T, E: Display>(operation: &str, result: std::result::Result<T, E>, fallback: T) -> T {
    match result {
        Ok(val) => val,
        Err(e) => {
            warn!("{} failed, using safe default: {}", operation, e);
            fallback
        }
    }
}
