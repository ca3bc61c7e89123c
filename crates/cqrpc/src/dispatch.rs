//! The dispatch loop shared by clients and servers.

use crate::queue::CompletionQueue;
use crate::registry::Registry;

/// Pulls completions off `queue` and advances their call states.
///
/// Returns when `stop` evaluates true (checked once per event), or once the queue has
/// been shut down and every call state in `registry` has reached its terminal step.
pub(crate) async fn run_until<F>(queue: &CompletionQueue, registry: &Registry, stop: F)
where
    F: Fn() -> bool,
{
    loop {
        match queue.next().await {
            Some(event) => {
                registry.dispatch(event);
                if stop() {
                    tracing::debug!("stop predicate fired, leaving dispatch loop");
                    return;
                }
            }
            None => {
                tracing::debug!(live = registry.len(), "completion queue shut down");
            }
        }

        if queue.is_shutdown() && registry.is_empty() {
            break;
        }
    }

    // Hand the marker on so sibling loops waiting on the same queue return too.
    queue.wake();
}
