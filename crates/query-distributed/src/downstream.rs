//! Downstream execution boundary
//!
//! A sharded query hands each sub query to a [`DownstreamExecutor`], which
//! returns a [`SubQueryHandle`]: a future resolving to the sub query's result
//! plus a way to cancel it. The coordinator never looks behind this boundary.

use futures::future::BoxFuture;
use futures::FutureExt;
use query_core::{QueryError, TimeSeriesQuery};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Result of a single sub query
pub type SubQueryResult<T> = std::result::Result<T, QueryError>;

/// Something in flight that can be told to stop.
///
/// Implementations must be idempotent and must treat cancelling an already
/// finished operation as a no-op.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

impl Cancellable for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self)
    }
}

/// Handle to one dispatched sub query
pub struct SubQueryHandle<T> {
    result: BoxFuture<'static, SubQueryResult<T>>,
    canceller: Arc<dyn Cancellable>,
}

impl<T: Send + 'static> SubQueryHandle<T> {
    /// Wrap a result future and its cancel hook
    pub fn new<F>(result: F, canceller: Arc<dyn Cancellable>) -> Self
    where
        F: Future<Output = SubQueryResult<T>> + Send + 'static,
    {
        Self {
            result: result.boxed(),
            canceller,
        }
    }

    /// Create a handle completed through the returned [`SubQueryCompleter`]
    pub fn channel() -> (SubQueryCompleter<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let token = CancellationToken::new();
        let result = async move {
            receiver.await.unwrap_or_else(|_| {
                Err(QueryError::Cancelled(
                    "sub query finished without a result".to_string(),
                ))
            })
        };
        let handle = Self::new(result, Arc::new(token.clone()));
        (SubQueryCompleter { sender, token }, handle)
    }

    /// Create a handle that is already resolved
    pub fn ready(result: SubQueryResult<T>) -> Self {
        Self::new(futures::future::ready(result), Arc::new(CancellationToken::new()))
    }
}

impl<T> SubQueryHandle<T> {
    /// Ask the downstream executor to stop this sub query
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Shared cancel hook for this sub query
    pub fn canceller(&self) -> Arc<dyn Cancellable> {
        Arc::clone(&self.canceller)
    }

    pub(crate) fn into_parts(self) -> (BoxFuture<'static, SubQueryResult<T>>, Arc<dyn Cancellable>) {
        (self.result, self.canceller)
    }
}

/// Producer side of [`SubQueryHandle::channel`]
pub struct SubQueryCompleter<T> {
    sender: oneshot::Sender<SubQueryResult<T>>,
    token: CancellationToken,
}

impl<T> SubQueryCompleter<T> {
    /// Resolve the handle. Returns false if nobody is listening anymore.
    pub fn complete(self, result: SubQueryResult<T>) -> bool {
        self.sender.send(result).is_ok()
    }

    pub fn succeed(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(self, error: QueryError) -> bool {
        self.complete(Err(error))
    }

    /// Whether the handle's owner asked for cancellation
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that fires when the handle is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Runs a single sub query.
///
/// Must not block: the work is expected to proceed on the executor's own
/// substrate, with the outcome reported through the returned handle.
pub trait DownstreamExecutor<T>: Send + Sync {
    fn execute(&self, sub_query: &TimeSeriesQuery) -> SubQueryHandle<T>;
}

/// Downstream executor that spawns an async function per sub query on the
/// current tokio runtime. Cancelling the handle drops the running future.
pub struct SpawningExecutor<F> {
    runner: F,
}

impl<F> SpawningExecutor<F> {
    pub fn new(runner: F) -> Self {
        Self { runner }
    }
}

impl<F, Fut, T> DownstreamExecutor<T> for SpawningExecutor<F>
where
    F: Fn(TimeSeriesQuery) -> Fut + Send + Sync,
    Fut: Future<Output = SubQueryResult<T>> + Send + 'static,
    T: Send + 'static,
{
    fn execute(&self, sub_query: &TimeSeriesQuery) -> SubQueryHandle<T> {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                return SubQueryHandle::ready(Err(QueryError::ExecutionError(format!(
                    "No async runtime to run sub query {}: {}",
                    sub_query.id, e
                ))))
            }
        };

        let (completer, handle) = SubQueryHandle::channel();
        let token = completer.cancellation_token();
        let work = (self.runner)(sub_query.clone());
        let sub_query_id = sub_query.id;

        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Sub query {} cancelled before completion", sub_query_id);
                }
                result = work => {
                    completer.complete(result);
                }
            }
        });
        handle
    }
}
