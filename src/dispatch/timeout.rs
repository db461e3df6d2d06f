use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::warn;

use crate::dispatch::correlation::{CorrelationId, CorrelationRegistry};
use crate::error::DispatchError;

/// Spawns the one-shot timer guarding a pending request. On expiry the timer
/// takes the entry from the registry and fails it with `Timeout`; if the
/// entry is already gone a reply won the race and the expiry is a no-op.
///
/// The returned handle is stored on the entry itself (via `registry.arm`) so
/// the reply path can abort the timer when it wins.
pub fn arm(registry: &CorrelationRegistry, id: CorrelationId, budget: Duration) -> AbortHandle {
    let registry = registry.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(budget).await;

        if let Some(pending) = registry.take(&id) {
            warn!(
                correlation_id = %id,
                age_ms = pending.age().as_millis() as u64,
                "no reply within budget, failing request"
            );
            pending.fail(DispatchError::Timeout(budget));
        }
    });

    task.abort_handle()
}
