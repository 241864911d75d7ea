// ── Action response router ──
//
// An eager pump drains the caller's action stream on the runtime, hands
// every action to the handler, and drains each resulting stream in its own
// task. Values of named actions are fanned out to the `responses(name)`
// queries open at the time they arrive. A query ends once the action stream
// has ended and no drain task for its name is still running.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// Results produced by an [`ActionHandler`] for one action.
pub type ResultStream = BoxStream<'static, Result<Value, CoreError>>;

type Route = mpsc::UnboundedSender<Result<Value, CoreError>>;

// ── Actions ──────────────────────────────────────────────────────────

/// A request for the handler: a payload plus an optional correlation name.
///
/// Only named actions can be observed through
/// [`Source::responses`](crate::Source::responses); unnamed ones are
/// effect-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action<P> {
    pub payload: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl<P> Action<P> {
    /// An unnamed, effect-only action.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            name: None,
        }
    }

    pub fn named(name: impl Into<String>, payload: P) -> Self {
        Self {
            payload,
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Turns an action into the stream of its results.
///
/// Called synchronously from the pump, once per action and in arrival
/// order. Any `Fn(&Action<P>) -> ResultStream` is a handler.
pub trait ActionHandler<P>: Send + 'static {
    fn handle(&self, action: &Action<P>) -> ResultStream;
}

impl<P, F> ActionHandler<P> for F
where
    F: Fn(&Action<P>) -> ResultStream + Send + 'static,
{
    fn handle(&self, action: &Action<P>) -> ResultStream {
        self(action)
    }
}

/// The handler's result stream, tagged with the triggering action's name.
pub(crate) struct ActionResponse {
    pub(crate) name: Option<String>,
    pub(crate) stream: ResultStream,
}

// ── Router ───────────────────────────────────────────────────────────

/// Open queries and running drain tasks, keyed by action name.
///
/// `finish` reads `in_flight` while holding `routes`. Nothing locks them in
/// the other order.
#[derive(Default)]
struct RouteTable {
    routes: DashMap<String, Vec<Route>>,
    in_flight: DashMap<String, usize>,
    /// Set once the pump stopped. No drain task is started afterwards.
    actions_done: AtomicBool,
}

impl RouteTable {
    fn open(&self, name: &str) -> mpsc::UnboundedReceiver<Result<Value, CoreError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.entry(name.to_owned()).or_default().push(tx);
        if self.actions_done.load(Ordering::Acquire) {
            self.close_if_idle(name);
        }
        rx
    }

    fn deliver(&self, name: &str, item: &Result<Value, CoreError>) {
        let delivered = match self.routes.get_mut(name) {
            Some(mut senders) => {
                senders.retain(|tx| tx.send(item.clone()).is_ok());
                senders.len()
            }
            None => 0,
        };
        if delivered == 0 {
            self.routes.remove_if(name, |_, senders| senders.is_empty());
            debug!(action = name, "no open query, response dropped");
        }
    }

    /// Forget senders whose query was dropped.
    fn prune(&self, name: &str) {
        if let Some(mut senders) = self.routes.get_mut(name) {
            senders.retain(|tx| !tx.is_closed());
        }
        self.routes.remove_if(name, |_, senders| senders.is_empty());
    }

    fn begin_drain(&self, name: &str) {
        *self.in_flight.entry(name.to_owned()).or_default() += 1;
    }

    fn end_drain(&self, name: &str) {
        self.in_flight.remove_if_mut(name, |_, running| {
            *running -= 1;
            *running == 0
        });
        if self.actions_done.load(Ordering::Acquire) {
            self.close_if_idle(name);
        }
    }

    /// End the queries for `name` unless a drain task may still feed them.
    /// Only valid once `actions_done` is set, since `in_flight` can no
    /// longer grow.
    fn close_if_idle(&self, name: &str) {
        if !self.in_flight.contains_key(name) {
            self.routes.remove(name);
        }
    }

    /// Mark the action stream as finished and end every idle query.
    fn finish(&self) {
        self.actions_done.store(true, Ordering::Release);
        self.routes.retain(|name, _| self.in_flight.contains_key(name));
    }
}

/// Owns the route table shared between the pump and the queries.
#[derive(Clone)]
pub(crate) struct ResponseRouter {
    table: Arc<RouteTable>,
}

impl ResponseRouter {
    /// Start pumping `actions` through `handler` on `runtime` until the
    /// stream ends or `cancel` fires.
    pub(crate) fn spawn<P, S, H>(
        runtime: &Handle,
        actions: S,
        handler: H,
        cancel: CancellationToken,
    ) -> Self
    where
        P: Send + 'static,
        S: Stream<Item = Action<P>> + Send + 'static,
        H: ActionHandler<P>,
    {
        let table = Arc::new(RouteTable::default());
        runtime.spawn(pump_task(
            actions,
            handler,
            Arc::clone(&table),
            runtime.clone(),
            cancel,
        ));
        Self { table }
    }

    /// Merged results of every action named `name` that arrive from now on.
    pub(crate) fn responses(&self, name: &str) -> ResponseStream {
        ResponseStream {
            inner: UnboundedReceiverStream::new(self.table.open(name)),
            name: name.to_owned(),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of senders stored for `name`, open or not.
    #[cfg(test)]
    pub(crate) fn stored_routes(&self, name: &str) -> usize {
        self.table.routes.get(name).map_or(0, |senders| senders.len())
    }
}

/// Values produced for one action name.
///
/// Handler errors arrive as `Err` items and do not end the stream. The
/// stream ends once the action stream has ended and every result stream
/// for this name has finished, or when its driver shuts down.
pub struct ResponseStream {
    inner: UnboundedReceiverStream<Result<Value, CoreError>>,
    name: String,
    table: Arc<RouteTable>,
}

impl Stream for ResponseStream {
    type Item = Result<Value, CoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.inner.close();
        self.table.prune(&self.name);
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain the action stream, dispatching each action as it arrives.
async fn pump_task<P, S, H>(
    actions: S,
    handler: H,
    table: Arc<RouteTable>,
    runtime: Handle,
    cancel: CancellationToken,
) where
    P: Send + 'static,
    S: Stream<Item = Action<P>> + Send + 'static,
    H: ActionHandler<P>,
{
    let mut actions = Box::pin(actions);
    let mut dispatched: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(dispatched, "response pump cancelled");
                break;
            }
            next = actions.next() => {
                let Some(action) = next else {
                    info!(dispatched, "action stream completed");
                    break;
                };
                let response = ActionResponse {
                    name: action.name.clone(),
                    stream: handler.handle(&action),
                };
                dispatched += 1;
                debug!(action = action.name().unwrap_or("<unnamed>"), "dispatched action");
                if let Some(name) = &response.name {
                    table.begin_drain(name);
                }
                runtime.spawn(drain_response(response, Arc::clone(&table), cancel.clone()));
            }
        }
    }

    table.finish();
    if cancel.is_cancelled() {
        // Ends every open query.
        table.routes.clear();
    }
}

/// Drive one result stream to completion, forwarding its items to the
/// queries for its name.
async fn drain_response(
    response: ActionResponse,
    table: Arc<RouteTable>,
    cancel: CancellationToken,
) {
    let ActionResponse { name, mut stream } = response;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = stream.next() => {
                let Some(item) = item else { break };
                match &name {
                    Some(name) => table.deliver(name, &item),
                    None => {
                        if let Err(e) = item {
                            warn!(error = %e, "unnamed action failed");
                        }
                    }
                }
            }
        }
    }

    if let Some(name) = &name {
        table.end_drain(name);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use futures_util::{FutureExt, stream};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::timeout;

    type ActionTx = mpsc::UnboundedSender<Action<Vec<i64>>>;

    /// Router whose handler replays the action payload as its results.
    fn echo_router(cancel: &CancellationToken) -> (ActionTx, ResponseRouter) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = |action: &Action<Vec<i64>>| -> ResultStream {
            let items: Vec<_> = action.payload.iter().map(|n| Ok(json!(n))).collect();
            stream::iter(items).boxed()
        };
        let router = ResponseRouter::spawn(
            &Handle::current(),
            UnboundedReceiverStream::new(rx),
            handler,
            cancel.clone(),
        );
        (tx, router)
    }

    async fn take(stream: &mut ResponseStream, n: usize) -> Vec<Value> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(stream.next().await.unwrap().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn named_results_are_merged_per_name() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let mut query = router.responses("load");

        tx.send(Action::named("load", vec![1, 2])).unwrap();
        tx.send(Action::named("other", vec![5])).unwrap();
        tx.send(Action::named("load", vec![10, 20])).unwrap();

        let seen = take(&mut query, 4).await;
        let small: Vec<_> = seen.iter().filter(|v| v.as_i64().unwrap() < 10).collect();
        let large: Vec<_> = seen.iter().filter(|v| v.as_i64().unwrap() >= 10).collect();
        assert_eq!(small, vec![&json!(1), &json!(2)]);
        assert_eq!(large, vec![&json!(10), &json!(20)]);
        assert!(query.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn unnamed_actions_are_effect_only() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let mut query = router.responses("x");

        tx.send(Action::new(vec![1])).unwrap();
        tx.send(Action::named("x", vec![2])).unwrap();

        assert_eq!(take(&mut query, 1).await, vec![json!(2)]);
        tokio::task::yield_now().await;
        assert!(query.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn handler_runs_without_any_query() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel::<Action<()>>();

        let counter = Arc::clone(&calls);
        let handler = move |_: &Action<()>| -> ResultStream {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            stream::empty().boxed()
        };
        let _router = ResponseRouter::spawn(
            &Handle::current(),
            UnboundedReceiverStream::new(rx),
            handler,
            CancellationToken::new(),
        );

        tx.send(Action::named("a", ())).unwrap();
        tx.send(Action::new(())).unwrap();
        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_do_not_end_the_query() {
        let (tx, rx) = mpsc::unbounded_channel::<Action<()>>();
        let handler = |_: &Action<()>| -> ResultStream {
            stream::iter(vec![
                Ok(json!(1)),
                Err(CoreError::action("nope")),
                Ok(json!(2)),
            ])
            .boxed()
        };
        let router = ResponseRouter::spawn(
            &Handle::current(),
            UnboundedReceiverStream::new(rx),
            handler,
            CancellationToken::new(),
        );
        let mut query = router.responses("q");

        tx.send(Action::named("q", ())).unwrap();
        assert_eq!(query.next().await, Some(Ok(json!(1))));
        assert_eq!(query.next().await, Some(Err(CoreError::action("nope"))));
        assert_eq!(query.next().await, Some(Ok(json!(2))));
    }

    #[tokio::test]
    async fn dropped_queries_are_pruned() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let mut kept = router.responses("n");
        let dropped = router.responses("n");
        assert_eq!(router.stored_routes("n"), 2);
        drop(dropped);
        assert_eq!(router.stored_routes("n"), 1);

        tx.send(Action::named("n", vec![3])).unwrap();
        assert_eq!(kept.next().await, Some(Ok(json!(3))));
        assert_eq!(router.stored_routes("n"), 1);
    }

    #[tokio::test]
    async fn reopened_queries_do_not_accumulate() {
        let cancel = CancellationToken::new();
        let (_tx, router) = echo_router(&cancel);

        for _ in 0..10_000 {
            drop(router.responses("never-dispatched"));
        }
        assert_eq!(router.stored_routes("never-dispatched"), 0);
    }

    #[tokio::test]
    async fn query_ends_after_action_stream_completes() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let query = router.responses("n");

        tx.send(Action::named("n", vec![1, 2])).unwrap();
        drop(tx);

        let collected = timeout(Duration::from_secs(5), query.collect::<Vec<_>>())
            .await
            .unwrap();
        assert_eq!(collected, vec![Ok(json!(1)), Ok(json!(2))]);
        assert_eq!(router.stored_routes("n"), 0);
    }

    #[tokio::test]
    async fn query_waits_for_running_result_streams() {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let results = Arc::new(Mutex::new(Some(results_rx)));
        let handler = move |_: &Action<()>| -> ResultStream {
            match results.lock().take() {
                Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
                None => stream::empty().boxed(),
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let router = ResponseRouter::spawn(
            &Handle::current(),
            UnboundedReceiverStream::new(rx),
            handler,
            CancellationToken::new(),
        );
        let mut query = router.responses("slow");

        tx.send(Action::named("slow", ())).unwrap();
        drop(tx);
        results_tx.send(Ok(json!("first"))).unwrap();
        assert_eq!(query.next().await, Some(Ok(json!("first"))));

        // The action stream is over but the result stream is still open.
        tokio::task::yield_now().await;
        assert!(query.next().now_or_never().is_none());

        results_tx.send(Ok(json!("last"))).unwrap();
        drop(results_tx);
        assert_eq!(query.next().await, Some(Ok(json!("last"))));
        assert_eq!(query.next().await, None);
    }

    #[tokio::test]
    async fn query_opened_after_completion_ends_immediately() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let mut early = router.responses("other");
        drop(tx);
        assert_eq!(early.next().await, None);

        let mut late = router.responses("n");
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn cancellation_stops_the_pump_and_ends_queries() {
        let cancel = CancellationToken::new();
        let (tx, router) = echo_router(&cancel);
        let mut query = router.responses("late");

        cancel.cancel();
        assert_eq!(query.next().await, None);

        let _ = tx.send(Action::named("late", vec![1]));
        assert_eq!(router.stored_routes("late"), 0);
    }

    #[test]
    fn actions_serialize_without_empty_names() {
        let unnamed = serde_json::to_value(Action::new(json!({"type": "PUSH"}))).unwrap();
        assert_eq!(unnamed, json!({"payload": {"type": "PUSH"}}));

        let named: Action<Value> =
            serde_json::from_value(json!({"payload": 1, "name": "n"})).unwrap();
        assert_eq!(named.name(), Some("n"));
    }
}
