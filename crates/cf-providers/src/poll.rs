//! ---
//! cf_section: "02-provider-adapters"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Fixed-delay polling with a deadline."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

/// Evaluate `check` every `interval` until it reports `true` or `timeout` passes.
///
/// Returns `Ok(false)` once the deadline is exceeded; only errors raised by the
/// check itself are propagated. The check always runs at least once.
pub async fn poll_until<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if check().await? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            trace!(attempt, "poll deadline reached");
            return Ok(false);
        }
        sleep(interval.min(deadline - now)).await;
    }
}
