//! Fire-and-forget execution for operations whose failure must not affect
//! the caller.

use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{Instrument, warn};

/// Run `operation` on its own task. Its outcome only reaches the log.
///
/// The current span is carried over so the log line keeps its request
/// context (session, connection).
pub fn spawn_best_effort<F, T, E>(label: &'static str, operation: F) -> JoinHandle<()>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(
        async move {
            if let Err(err) = operation.await {
                warn!(operation = label, error = %err, "Best-effort operation failed");
            }
        }
        .in_current_span(),
    )
}
