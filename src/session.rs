//! Scoped acquisition of remote resources.
//!
//! [`scoped`] creates a resource, runs a body against it, and always issues
//! the paired delete before returning. Nesting calls gives strict
//! last-in-first-out teardown because each inner scope finishes (including
//! its delete) before the outer body can return.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tracing::{debug, warn};

type Teardown<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// Creates a resource, runs `body` with it, then deletes it.
///
/// * When `create` fails nothing is deleted and its error is returned.
/// * The delete runs exactly once whether `body` succeeds or fails.
/// * When `body` fails its error is returned; a delete failure in that case
///   is logged rather than returned.
/// * When `body` succeeds but the delete fails, the delete error is
///   returned.
/// * When the returned future is dropped while `body` or the delete is still
///   running, the delete is spawned (or resumed) on the current tokio
///   runtime.
///
/// `delete` must only start work once its future is polled, which holds for
/// closures returning `async` blocks.
///
/// # Errors
///
/// Returns the first failure among `create`, `body`, and the delete.
pub async fn scoped<R, T, E, Create, Delete, DeleteFut, Body, BodyFut>(
    kind: &'static str,
    create: Create,
    delete: Delete,
    body: Body,
) -> Result<T, E>
where
    R: Clone + Display,
    E: Display + Send + 'static,
    Create: Future<Output = Result<R, E>>,
    Delete: FnOnce(R) -> DeleteFut,
    DeleteFut: Future<Output = Result<(), E>> + Send + 'static,
    Body: FnOnce(R) -> BodyFut,
    BodyFut: Future<Output = Result<T, E>>,
{
    let resource = create.await?;
    debug!(kind, resource = %resource, "acquired resource");

    let pending: Teardown<E> = Box::pin(delete(resource.clone()));
    let mut guard = TeardownGuard {
        kind,
        resource: resource.to_string(),
        pending: Some(pending),
    };

    let outcome = body(resource).await;
    let teardown = guard.release().await;
    merge(kind, &guard.resource, outcome, teardown)
}

fn merge<T, E: Display>(
    kind: &str,
    resource: &str,
    outcome: Result<T, E>,
    teardown: Result<(), E>,
) -> Result<T, E> {
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(teardown_err)) => Err(teardown_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown_err)) => {
            warn!(
                kind,
                resource,
                error = %teardown_err,
                "teardown failed after an earlier error; reporting the earlier error"
            );
            Err(err)
        }
    }
}

struct TeardownGuard<E: Display + Send + 'static> {
    kind: &'static str,
    resource: String,
    pending: Option<Teardown<E>>,
}

impl<E: Display + Send + 'static> TeardownGuard<E> {
    async fn release(&mut self) -> Result<(), E> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        // Stays in the guard until complete; `Drop` resumes a cancelled delete.
        let result = pending.await;
        self.pending = None;
        if result.is_ok() {
            debug!(kind = self.kind, resource = %self.resource, "released resource");
        }
        result
    }
}

impl<E: Display + Send + 'static> Drop for TeardownGuard<E> {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let kind = self.kind;
        let resource = std::mem::take(&mut self.resource);
        match Handle::try_current() {
            Ok(runtime) => {
                warn!(kind, resource = %resource, "scope cancelled; scheduling teardown");
                runtime.spawn(async move {
                    if let Err(err) = pending.await {
                        warn!(kind, resource = %resource, error = %err, "deferred teardown failed");
                    }
                });
            }
            Err(_) => {
                warn!(kind, resource = %resource, "scope cancelled outside a runtime; resource leaked");
            }
        }
    }
}
