//! Split execution
//!
//! A [`SplitExecution`] runs the sub queries of one sharded query through a
//! sliding window of at most `window_size` concurrent dispatches. Each
//! successful completion frees a slot and launches the next sub query; the
//! first failure or a cancellation stops everything. Once every sub query has
//! succeeded the results are merged in shard order.
//!
//! Completions arrive as [`SubQueryEvent`]s on a channel owned by the
//! execution and are applied by a single driver task. The window lock only
//! decides which index goes next; the downstream executor, cancel hooks and
//! the merger are always called with no lock held, so any of them may call
//! back into [`SplitExecution::cancel`].

use crate::downstream::{Cancellable, DownstreamExecutor, SubQueryHandle, SubQueryResult};
use crate::error::{Result, ShardingError};
use crate::merger::Merger;
use crate::registry::OutstandingExecutions;
use crate::types::{ExecutionId, ExecutionState, WindowSnapshot};
use parking_lot::Mutex;
use query_core::{QueryError, TimeSeriesQuery};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Completion of one dispatched sub query
#[derive(Debug)]
pub(crate) struct SubQueryEvent<T> {
    pub index: usize,
    pub outcome: SubQueryResult<T>,
}

/// Mutable window state, guarded by the execution's lock
struct Window<T> {
    /// Next sub query to reserve; set to `total` once cancelled
    next_index: usize,
    dispatched: usize,
    succeeded: usize,
    /// Cancel hooks of dispatched sub queries, index aligned
    slots: Vec<Option<Arc<dyn Cancellable>>>,
    /// Results of successful sub queries, index aligned
    results: Vec<Option<T>>,
}

/// Execution of one split query
pub struct SplitExecution<T> {
    id: ExecutionId,
    query: TimeSeriesQuery,
    sub_queries: Vec<TimeSeriesQuery>,
    window_size: usize,
    downstream: Arc<dyn DownstreamExecutor<T>>,
    merger: Arc<dyn Merger<T>>,
    outstanding: Arc<OutstandingExecutions>,
    runtime: Handle,
    window: Mutex<Window<T>>,
    /// Never held while calling out; may be taken while holding `window`
    state: Mutex<ExecutionState>,
    completed: AtomicBool,
    outcome: Mutex<Option<oneshot::Sender<Result<T>>>>,
    events: mpsc::UnboundedSender<SubQueryEvent<T>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<SubQueryEvent<T>>>>,
    /// Fires once the terminal outcome has been delivered
    done: CancellationToken,
    span: tracing::Span,
}

impl<T: Send + 'static> SplitExecution<T> {
    /// Create an execution. Nothing is dispatched until [`start`](Self::start).
    pub(crate) fn new(
        query: TimeSeriesQuery,
        sub_queries: Vec<TimeSeriesQuery>,
        window_size: usize,
        downstream: Arc<dyn DownstreamExecutor<T>>,
        merger: Arc<dyn Merger<T>>,
        outstanding: Arc<OutstandingExecutions>,
        runtime: Handle,
    ) -> (Arc<Self>, oneshot::Receiver<Result<T>>) {
        let id = ExecutionId::new();
        let total = sub_queries.len();
        let window_size = window_size.max(1);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (events, inbox) = mpsc::unbounded_channel();
        let span = tracing::debug_span!(
            "split_execution",
            execution = %id,
            query = %query.id,
            order = query.order,
            sub_queries = total,
            window_size
        );

        let execution = Arc::new(Self {
            id,
            query,
            sub_queries,
            window_size,
            downstream,
            merger,
            outstanding,
            runtime,
            window: Mutex::new(Window {
                next_index: 0,
                dispatched: 0,
                succeeded: 0,
                slots: (0..total).map(|_| None).collect(),
                results: (0..total).map(|_| None).collect(),
            }),
            state: Mutex::new(ExecutionState::Dispatching),
            completed: AtomicBool::new(false),
            outcome: Mutex::new(Some(outcome_tx)),
            events,
            inbox: Mutex::new(Some(inbox)),
            done: CancellationToken::new(),
            span,
        });
        (execution, outcome_rx)
    }

    /// Start the completion driver and fill the initial window.
    ///
    /// Never blocks on sub query results. Calling it more than once only
    /// re-checks the window.
    pub(crate) fn start(self: &Arc<Self>) {
        if let Some(inbox) = self.inbox.lock().take() {
            let driver = Arc::clone(self);
            self.runtime
                .spawn(driver.drive(inbox).instrument(self.span.clone()));
        }

        let _entered = self.span.enter();
        let total = self.sub_queries.len();
        let initial = self.window_size.min(total);

        loop {
            let index = {
                let mut window = self.window.lock();
                if self.is_completed() {
                    tracing::debug!("Cancelled during initial execution. Bailing out.");
                    return;
                }
                // Early completions may already have reserved past the window
                if window.next_index >= initial {
                    break;
                }
                self.reserve_next(&mut window)
            };
            self.dispatch(index);
        }

        let window = self.window.lock();
        if window.next_index < total {
            self.advance(ExecutionState::Dispatching, ExecutionState::WindowFull);
        }
        tracing::debug!(
            "Initial window dispatched {} of {} sub queries",
            window.dispatched,
            total
        );
    }

    /// Claim the sub query at `next_index`. Caller must hold the window lock.
    fn reserve_next(&self, window: &mut Window<T>) -> usize {
        let index = window.next_index;
        window.next_index += 1;
        window.dispatched += 1;

        if window.next_index >= self.sub_queries.len() {
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = ExecutionState::Merging;
            }
        }
        index
    }

    /// Hand a reserved sub query to the downstream executor and track its
    /// cancel hook. Must be called without the window lock.
    fn dispatch(&self, index: usize) {
        if self.is_completed() {
            tracing::debug!("Skipping sub query {}, execution already completed", index);
            return;
        }
        let handle = self.downstream.execute(&self.sub_queries[index]);
        let canceller = self.attach(index, handle);
        tracing::debug!("Dispatched sub query {}", index);

        let mut window = self.window.lock();
        if self.is_completed() {
            // The cancel sweep already ran or is about to skip this slot
            drop(window);
            tracing::debug!("Sub query {} dispatched after completion, cancelling", index);
            canceller.cancel();
            return;
        }
        window.slots[index] = Some(canceller);
    }

    /// Move from `from` to `to` unless the state has moved on
    fn advance(&self, from: ExecutionState, to: ExecutionState) {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
        }
    }

    /// Forward the handle's outcome into this execution's event channel
    fn attach(&self, index: usize, handle: SubQueryHandle<T>) -> Arc<dyn Cancellable> {
        let (result, canceller) = handle.into_parts();
        let events = self.events.clone();
        let done = self.done.clone();

        self.runtime.spawn(
            async move {
                tokio::select! {
                    _ = done.cancelled() => {}
                    outcome = result => {
                        // The driver is gone once terminal; late outcomes are dropped.
                        let _ = events.send(SubQueryEvent { index, outcome });
                    }
                }
            }
            .instrument(self.span.clone()),
        );
        canceller
    }

    /// Apply completions until the execution reaches a terminal outcome
    async fn drive(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<SubQueryEvent<T>>) {
        loop {
            tokio::select! {
                _ = self.done.cancelled() => break,
                event = inbox.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        tracing::debug!("Completion driver finished");
    }

    pub(crate) fn handle_event(&self, event: SubQueryEvent<T>) {
        match event.outcome {
            Ok(value) => self.on_sub_query_success(event.index, value),
            Err(error) => self.on_sub_query_failure(event.index, error),
        }
    }

    /// Record a successful sub query and keep the window full
    pub(crate) fn on_sub_query_success(&self, index: usize, value: T) {
        if self.is_completed() {
            tracing::debug!(
                "Successful response from index {} but we've been cancelled.",
                index
            );
            return;
        }
        tracing::debug!("Received data on index {}", index);

        let (next, merge_input) = {
            let mut window = self.window.lock();
            if self.is_completed() {
                return;
            }
            if !matches!(window.results.get(index), Some(None)) {
                tracing::warn!("Ignoring unexpected result for index {}", index);
                return;
            }
            window.results[index] = Some(value);
            window.succeeded += 1;

            let next = if window.next_index < self.sub_queries.len() {
                Some(self.reserve_next(&mut window))
            } else {
                None
            };

            let merge_input = if window.succeeded == self.sub_queries.len() {
                Some(
                    window
                        .results
                        .iter_mut()
                        .filter_map(Option::take)
                        .collect::<Vec<T>>(),
                )
            } else {
                None
            };
            (next, merge_input)
        };

        if let Some(index) = next {
            self.dispatch(index);
        }
        if let Some(results) = merge_input {
            self.merge(results);
        }
    }

    /// Fail the execution with the first sub query error and stop the rest
    pub(crate) fn on_sub_query_failure(&self, index: usize, error: QueryError) {
        if self.is_completed() {
            // Cancelled siblings report back here; nothing to do.
            tracing::debug!("Discarding error from index {} after completion: {}", index, error);
            return;
        }
        tracing::debug!("Exception on index {}: {}", index, error);

        let failure = ShardingError::SubQuery {
            index,
            order: self.query.order,
            source: error,
        };
        if !self.deliver(Err(failure)) {
            tracing::debug!("Sub query {} failed after another outcome was delivered", index);
        }
        self.cancel();
    }

    /// Cancel the execution and every dispatched sub query.
    ///
    /// Safe to call at any time and any number of times, including from a
    /// downstream executor while it is dispatching. Only the first call
    /// before completion delivers a cancellation.
    pub fn cancel(&self) {
        let _entered = self.span.enter();
        tracing::debug!("Cancelling query.");

        let cancellation = ShardingError::Cancelled {
            order: self.query.order,
            reason: format!("Query was cancelled upstream: {}", self.id),
        };
        if !self.deliver(Err(cancellation)) {
            tracing::debug!("Canceling but already called completed.");
        }

        let cancellers: Vec<Arc<dyn Cancellable>> = {
            let mut window = self.window.lock();
            window.next_index = self.sub_queries.len();
            window.slots.iter_mut().filter_map(Option::take).collect()
        };
        self.outstanding.deregister(&self.id);

        for canceller in &cancellers {
            canceller.cancel();
        }
        if !cancellers.is_empty() {
            tracing::debug!("Cancelled {} dispatched sub queries", cancellers.len());
        }
    }

    /// Combine all shard results and deliver the merged result
    fn merge(&self, results: Vec<T>) {
        self.outstanding.deregister(&self.id);
        tracing::debug!(
            "Merging {} shard results with '{}'",
            results.len(),
            self.merger.strategy()
        );

        let merged = catch_unwind(AssertUnwindSafe(|| self.merger.merge(results)))
            .unwrap_or_else(|_| {
                Err(QueryError::MergeError(format!(
                    "merger '{}' panicked",
                    self.merger.strategy()
                )))
            });

        let outcome = merged.map_err(|source| {
            tracing::warn!("Merge failed for {}: {}", self.id, source);
            ShardingError::Merge {
                order: self.query.order,
                source,
            }
        });

        if !self.deliver(outcome) {
            tracing::warn!(
                "Merge tried to return results despite being completed: {}",
                self.id
            );
        }
    }

    /// Deliver the terminal outcome. Returns false if one was already delivered.
    fn deliver(&self, outcome: Result<T>) -> bool {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let state = match &outcome {
            Ok(_) => ExecutionState::Succeeded,
            Err(ShardingError::Cancelled { .. }) => ExecutionState::Cancelled,
            Err(_) => ExecutionState::Failed,
        };
        *self.state.lock() = state;
        tracing::info!("Execution {} finished: {}", self.id, state);

        if let Some(sender) = self.outcome.lock().take() {
            if sender.send(outcome).is_err() {
                tracing::debug!("Caller dropped the result channel for {}", self.id);
            }
        }
        self.done.cancel();
        true
    }
}

impl<T> SplitExecution<T> {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The query this execution was split from
    pub fn query(&self) -> &TimeSeriesQuery {
        &self.query
    }

    pub fn sub_queries(&self) -> &[TimeSeriesQuery] {
        &self.sub_queries
    }

    /// Effective parallelism
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Whether a terminal outcome has been delivered
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let window = self.window.lock();
        WindowSnapshot {
            total: self.sub_queries.len(),
            window_size: self.window_size,
            dispatched: window.dispatched,
            succeeded: window.succeeded,
            state: *self.state.lock(),
        }
    }
}

impl<T: Send + 'static> Cancellable for SplitExecution<T> {
    fn cancel(&self) {
        SplitExecution::cancel(self)
    }
}

/// Caller's handle to a running split execution.
///
/// Resolves to the merged result or to exactly one terminal error.
pub struct ExecutionHandle<T> {
    execution: Arc<SplitExecution<T>>,
    outcome: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> ExecutionHandle<T> {
    pub(crate) fn new(
        execution: Arc<SplitExecution<T>>,
        outcome: oneshot::Receiver<Result<T>>,
    ) -> Self {
        Self { execution, outcome }
    }

    /// Cancel the execution. Delivers nothing once it has completed.
    pub fn cancel(&self) {
        self.execution.cancel();
    }

    pub fn id(&self) -> ExecutionId {
        self.execution.id()
    }

    pub fn state(&self) -> ExecutionState {
        self.execution.state()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.execution.snapshot()
    }

    pub fn execution(&self) -> &Arc<SplitExecution<T>> {
        &self.execution
    }
}

impl<T> Future for ExecutionHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.outcome).poll(cx);
        match polled {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ShardingError::Cancelled {
                order: self.execution.query.order,
                reason: format!("execution {} dropped its result", self.execution.id),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
