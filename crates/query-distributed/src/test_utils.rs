//! Shared helpers for unit tests

use crate::downstream::{Cancellable, DownstreamExecutor, SubQueryCompleter, SubQueryHandle};
use parking_lot::Mutex;
use query_core::{Metric, QueryError, TimeRange, TimeSeriesQuery};
use query_planner::{QuerySplitter, SplitMetricPlanner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Order used by every test query
pub(crate) const TEST_ORDER: u32 = 5;

/// A query over metrics `m0..m{count}` and its split
pub(crate) fn metric_queries(count: usize) -> (TimeSeriesQuery, Vec<TimeSeriesQuery>) {
    let query = metric_query(count);
    let sub_queries = SplitMetricPlanner::new().split(&query).unwrap();
    (query, sub_queries)
}

pub(crate) fn metric_query(count: usize) -> TimeSeriesQuery {
    (0..count).fold(
        TimeSeriesQuery::new(TimeRange::new(0, 3_600_000)).with_order(TEST_ORDER),
        |query, i| query.with_metric(Metric::new(format!("m{}", i))),
    )
}

fn index_of(sub_query: &TimeSeriesQuery) -> usize {
    sub_query.metrics[0].metric[1..]
        .parse()
        .expect("test metrics are named m<index>")
}

struct CountingCanceller {
    inner: Arc<dyn Cancellable>,
    count: Arc<AtomicUsize>,
}

impl Cancellable for CountingCanceller {
    fn cancel(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel();
    }
}

struct Script<T> {
    dispatched: Vec<usize>,
    completers: HashMap<usize, SubQueryCompleter<T>>,
    cancels: HashMap<usize, Arc<AtomicUsize>>,
    in_flight: usize,
    in_flight_peak: usize,
}

/// Downstream executor driven by the test: records what was dispatched and
/// lets the test resolve each sub query explicitly.
pub(crate) struct ScriptedDownstream<T> {
    script: Mutex<Script<T>>,
    on_dispatch: Mutex<Option<(usize, DispatchHook)>>,
}

type DispatchHook = Box<dyn Fn() + Send + Sync>;

impl<T: Send + 'static> ScriptedDownstream<T> {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                dispatched: Vec::new(),
                completers: HashMap::new(),
                cancels: HashMap::new(),
                in_flight: 0,
                in_flight_peak: 0,
            }),
            on_dispatch: Mutex::new(None),
        }
    }

    /// Run `hook` once inside `execute`, after recording the dispatch of `index`
    pub(crate) fn on_dispatch<F: Fn() + Send + Sync + 'static>(&self, index: usize, hook: F) {
        *self.on_dispatch.lock() = Some((index, Box::new(hook)));
    }

    /// Indices in dispatch order
    pub(crate) fn dispatched(&self) -> Vec<usize> {
        self.script.lock().dispatched.clone()
    }

    pub(crate) fn cancel_count(&self, index: usize) -> usize {
        self.script
            .lock()
            .cancels
            .get(&index)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Highest number of dispatched sub queries not yet resolved by the test
    pub(crate) fn in_flight_peak(&self) -> usize {
        self.script.lock().in_flight_peak
    }

    pub(crate) fn succeed(&self, index: usize, value: T) -> bool {
        self.complete(index, Ok(value))
    }

    pub(crate) fn fail(&self, index: usize, error: QueryError) -> bool {
        self.complete(index, Err(error))
    }

    fn complete(&self, index: usize, result: Result<T, QueryError>) -> bool {
        let completer = {
            let mut script = self.script.lock();
            let completer = script.completers.remove(&index);
            if completer.is_some() {
                script.in_flight -= 1;
            }
            completer
        };
        completer.map(|c| c.complete(result)).unwrap_or(false)
    }
}

impl<T: Send + 'static> DownstreamExecutor<T> for ScriptedDownstream<T> {
    fn execute(&self, sub_query: &TimeSeriesQuery) -> SubQueryHandle<T> {
        let index = index_of(sub_query);
        let (completer, handle) = SubQueryHandle::channel();
        let (result, canceller) = handle.into_parts();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let mut script = self.script.lock();
            script.dispatched.push(index);
            script.completers.insert(index, completer);
            script.cancels.insert(index, count.clone());
            script.in_flight += 1;
            script.in_flight_peak = script.in_flight_peak.max(script.in_flight);
        }

        let hook = {
            let mut on_dispatch = self.on_dispatch.lock();
            match on_dispatch.take() {
                Some((trigger, hook)) if trigger == index => Some(hook),
                other => {
                    *on_dispatch = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook();
        }

        SubQueryHandle::new(
            result,
            Arc::new(CountingCanceller {
                inner: canceller,
                count,
            }),
        )
    }
}

/// Wraps another downstream executor and counts cancel calls per dispatch
pub(crate) struct CountingExecutor<T> {
    inner: Arc<dyn DownstreamExecutor<T>>,
    cancels: Mutex<Vec<Arc<AtomicUsize>>>,
}

impl<T: Send + 'static> CountingExecutor<T> {
    pub(crate) fn new(inner: Arc<dyn DownstreamExecutor<T>>) -> Self {
        Self {
            inner,
            cancels: Mutex::new(Vec::new()),
        }
    }

    /// Cancel calls seen by each handle, in dispatch order
    pub(crate) fn cancel_counts(&self) -> Vec<usize> {
        self.cancels
            .lock()
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .collect()
    }
}

impl<T: Send + 'static> DownstreamExecutor<T> for CountingExecutor<T> {
    fn execute(&self, sub_query: &TimeSeriesQuery) -> SubQueryHandle<T> {
        let (result, canceller) = self.inner.execute(sub_query).into_parts();
        let count = Arc::new(AtomicUsize::new(0));
        self.cancels.lock().push(count.clone());
        SubQueryHandle::new(
            result,
            Arc::new(CountingCanceller {
                inner: canceller,
                count,
            }),
        )
    }
}

/// Wait until `condition` holds, failing the test after a few seconds
pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met in time");
}
