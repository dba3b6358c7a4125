//! Tool execution as replayable event streams.
//!
//! Every call id maps to at most one running execution. Read-only tools
//! share an optional concurrency bound; mutating tools queue per resource
//! key in issue order. Whatever happens to the tool (error, panic,
//! cancellation), subscribers observe exactly one terminal event.

use crate::merger::TurnResults;
use crate::permission::ToolCallRequest;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::stream::{BoxStream, Fuse, FusedStream, FuturesUnordered, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tg_tools::{ProgressNotification, Tool, ToolContext, ToolError, ToolRegistry, ToolResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Lock key for mutating tools that do not name a resource.
const GLOBAL_RESOURCE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Progress(ProgressNotification),
    Completed(ToolResult),
}

impl ExecutionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug)]
struct SharedExecution {
    events: watch::Sender<Vec<ExecutionEvent>>,
}

impl SharedExecution {
    fn new() -> Self {
        let (events, _) = watch::channel(Vec::new());
        Self { events }
    }

    fn publish(&self, event: ExecutionEvent) {
        self.events.send_modify(|events| events.push(event));
    }
}

/// Call ids with a running execution.
#[derive(Debug, Clone, Default)]
pub struct InFlightExecutions {
    inner: Arc<DashMap<String, Arc<SharedExecution>>>,
}

impl InFlightExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tool_call_id: &str) -> bool {
        self.inner.contains_key(tool_call_id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

struct Cursor {
    rx: watch::Receiver<Vec<ExecutionEvent>>,
    next: usize,
    closed: bool,
    done: bool,
}

/// Progress events followed by exactly one [`ExecutionEvent::Completed`].
///
/// Subscribers joining late replay everything published so far. The stream
/// is fused: polling after the end keeps yielding `None`.
pub struct ExecutionStream {
    execution: Arc<SharedExecution>,
    events: Fuse<BoxStream<'static, ExecutionEvent>>,
}

impl ExecutionStream {
    fn subscribe(execution: Arc<SharedExecution>) -> Self {
        let cursor = Cursor {
            rx: execution.events.subscribe(),
            next: 0,
            closed: false,
            done: false,
        };
        let events = futures_util::stream::unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return None;
            }
            loop {
                let event = cursor.rx.borrow_and_update().get(cursor.next).cloned();
                if let Some(event) = event {
                    cursor.next += 1;
                    cursor.done = event.is_terminal();
                    return Some((event, cursor));
                }
                if cursor.closed {
                    return None;
                }
                if cursor.rx.changed().await.is_err() {
                    cursor.closed = true;
                }
            }
        })
        .boxed()
        .fuse();
        Self { execution, events }
    }

    pub fn shares_execution_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.execution, &other.execution)
    }

    /// Drive to the terminal result, forwarding progress along the way.
    pub async fn into_result(
        mut self,
        tool_call_id: &str,
        progress_tx: Option<&mpsc::UnboundedSender<ProgressNotification>>,
    ) -> ToolResult {
        while let Some(event) = self.next().await {
            match event {
                ExecutionEvent::Progress(note) => {
                    if let Some(tx) = progress_tx {
                        let _ = tx.send(note);
                    }
                }
                ExecutionEvent::Completed(result) => return result,
            }
        }
        ToolResult::error(tool_call_id, "execution ended without a result")
    }
}

impl Stream for ExecutionStream {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl FusedStream for ExecutionStream {
    fn is_terminated(&self) -> bool {
        self.events.is_terminated()
    }
}

/// Per-resource chain of in-flight executions.
#[derive(Default)]
struct ResourceQueue {
    tails: DashMap<String, (u64, oneshot::Receiver<()>)>,
    seq: AtomicU64,
}

impl ResourceQueue {
    /// Take the next turn on `key`; the returned receiver resolves when the
    /// previous holder is done.
    fn enqueue(self: &Arc<Self>, key: String) -> Gate {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (done, tail) = oneshot::channel();
        let previous = self.tails.insert(key.clone(), (seq, tail)).map(|(_, rx)| rx);
        Gate::Resource {
            previous,
            turn: ResourceTurn {
                queue: Arc::clone(self),
                key,
                seq,
                _done: done,
            },
        }
    }
}

/// Dropping the turn releases the resource to the next queued call.
struct ResourceTurn {
    queue: Arc<ResourceQueue>,
    key: String,
    seq: u64,
    _done: oneshot::Sender<()>,
}

impl Drop for ResourceTurn {
    fn drop(&mut self) {
        self.queue
            .tails
            .remove_if(&self.key, |_, (seq, _)| *seq == self.seq);
    }
}

enum Gate {
    ReadOnly(Option<Arc<Semaphore>>),
    Resource {
        previous: Option<oneshot::Receiver<()>>,
        turn: ResourceTurn,
    },
}

struct GateGuard {
    _permit: Option<OwnedSemaphorePermit>,
    _turn: Option<ResourceTurn>,
}

impl Gate {
    async fn wait(self) -> GateGuard {
        match self {
            Gate::ReadOnly(slots) => {
                let permit = match slots {
                    Some(slots) => slots.acquire_owned().await.ok(),
                    None => None,
                };
                GateGuard {
                    _permit: permit,
                    _turn: None,
                }
            }
            Gate::Resource { previous, turn } => {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                GateGuard {
                    _permit: None,
                    _turn: Some(turn),
                }
            }
        }
    }
}

/// Publishes events for one call id and retires it from the in-flight map.
struct Publisher {
    tool_call_id: String,
    execution: Arc<SharedExecution>,
    in_flight: InFlightExecutions,
}

impl Publisher {
    fn progress(&self, note: ProgressNotification) {
        self.execution.publish(ExecutionEvent::Progress(note));
    }

    fn finish(&self, result: ToolResult) {
        self.execution.publish(ExecutionEvent::Completed(result));
        self.in_flight
            .inner
            .remove_if(&self.tool_call_id, |_, current| {
                Arc::ptr_eq(current, &self.execution)
            });
    }
}

#[derive(Clone)]
pub struct ToolExecutionScheduler {
    registry: Arc<ToolRegistry>,
    in_flight: InFlightExecutions,
    read_only_slots: Option<Arc<Semaphore>>,
    resources: Arc<ResourceQueue>,
}

impl ToolExecutionScheduler {
    pub fn new(registry: Arc<ToolRegistry>, in_flight: InFlightExecutions) -> Self {
        Self {
            registry,
            in_flight,
            read_only_slots: None,
            resources: Arc::new(ResourceQueue::default()),
        }
    }

    /// Bound concurrent read-only executions; `None` leaves them unbounded.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.read_only_slots = max.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Start `request` (with its allowed input) or join the execution already
    /// running under the same id.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(tool_call_id = %request.id, tool_name = %request.tool_name)
    )]
    pub fn execute(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> ExecutionStream {
        let execution = match self.in_flight.inner.entry(request.id.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!("joining in-flight execution");
                return ExecutionStream::subscribe(Arc::clone(entry.get()));
            }
            Entry::Vacant(entry) => {
                Arc::clone(entry.insert(Arc::new(SharedExecution::new())).value())
            }
        };
        let stream = ExecutionStream::subscribe(Arc::clone(&execution));
        let publisher = Publisher {
            tool_call_id: request.id.clone(),
            execution,
            in_flight: self.in_flight.clone(),
        };

        let Some(tool) = self.registry.get(&request.tool_name) else {
            publisher.finish(ToolResult::error(
                &request.id,
                format!("unknown tool: {}", request.tool_name),
            ));
            return stream;
        };
        let spec = tool.spec();
        let gate = if spec.is_mutating {
            let key = tool
                .resource_key(&request.input)
                .unwrap_or_else(|| GLOBAL_RESOURCE.to_string());
            self.resources.enqueue(key)
        } else {
            Gate::ReadOnly(self.read_only_slots.clone())
        };

        let run = drive(
            tool,
            request.clone(),
            spec.supports_abort,
            gate,
            publisher,
            cancel.clone(),
        );
        tokio::spawn(run.instrument(tracing::Span::current()));
        stream
    }

    /// Execute a batch of allowed calls; results come back in issue order.
    #[tracing::instrument(level = "info", skip_all, fields(calls = calls.len()))]
    pub async fn run_batch(
        &self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
        progress_tx: Option<mpsc::UnboundedSender<ProgressNotification>>,
    ) -> Vec<ToolResult> {
        let mut pending: FuturesUnordered<_> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let stream = self.execute(call, cancel);
                let progress_tx = progress_tx.clone();
                let tool_call_id = call.id.clone();
                async move {
                    let result = stream.into_result(&tool_call_id, progress_tx.as_ref()).await;
                    (index, result)
                }
            })
            .collect();

        let mut ordered = TurnResults::new(calls.len());
        let mut results = Vec::with_capacity(calls.len());
        while let Some((index, result)) = pending.next().await {
            ordered.insert(index, result);
            results.extend(ordered.drain_ready());
        }
        results
    }
}

async fn drive(
    tool: Arc<dyn Tool>,
    request: ToolCallRequest,
    supports_abort: bool,
    gate: Gate,
    publisher: Publisher,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let guard = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("cancelled before start");
            publisher.finish(ToolResult::cancelled(&request.id));
            return;
        }
        guard = gate.wait() => guard,
    };

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let ctx = ToolContext::new(request.id.clone())
        .with_progress(progress_tx)
        .with_cancel_token(cancel.child_token());
    let input = request.input.clone();
    let mut task = tokio::spawn(async move { tool.execute(input, &ctx).await });

    let mut cancelled = false;
    let mut progress_open = true;
    let joined = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancelled => {
                cancelled = true;
                if supports_abort {
                    task.abort();
                    publisher.finish(ToolResult::cancelled(&request.id));
                    let _ = task.await;
                    drop(guard);
                    tracing::info!(
                        latency_ms = started.elapsed().as_millis() as u64,
                        "tool call aborted"
                    );
                    return;
                }
                tracing::debug!("tool does not support abort; waiting for completion");
            }
            note = progress_rx.recv(), if progress_open => match note {
                Some(note) if !cancelled => publisher.progress(note),
                Some(_) => {}
                None => progress_open = false,
            },
            joined = &mut task => break joined,
        }
    };

    let result = if cancelled {
        tracing::info!("discarding output of tool finished after cancellation");
        ToolResult::cancelled(&request.id)
    } else {
        while let Ok(note) = progress_rx.try_recv() {
            publisher.progress(note);
        }
        match joined {
            Ok(Ok(output)) => ToolResult::from_output(&request.id, output),
            Ok(Err(ToolError::Cancelled)) => ToolResult::cancelled(&request.id),
            Ok(Err(e)) => ToolResult::error(&request.id, e.to_string()),
            Err(e) => ToolResult::error(&request.id, join_error_message(e)),
        }
    };
    tracing::info!(
        latency_ms = started.elapsed().as_millis() as u64,
        is_error = result.is_error,
        "tool call completed"
    );
    publisher.finish(result);
    drop(guard);
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "tool task was aborted".to_string();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    tracing::error!(%detail, "tool panicked");
    format!("tool panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tg_tools::{CANCELLED_MESSAGE, ToolOutput, ToolSpec};

    /// Configurable test tool: emits `steps` progress notes `delay_ms` apart
    /// (or just sleeps `delay_ms`), counting runs and overlap.
    #[derive(Default)]
    struct Scripted {
        name: &'static str,
        mutating: bool,
        abortable: bool,
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        finished: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(name: &'static str, mutating: bool, abortable: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                mutating,
                abortable,
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl Tool for Scripted {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.to_string(),
                description: "scripted test tool".to_string(),
                input_schema: json!({ "type": "object" }),
                is_mutating: self.mutating,
                is_file_edit: false,
                supports_abort: self.abortable,
            }
        }

        fn resource_key(&self, input: &serde_json::Value) -> Option<String> {
            input.get("key").and_then(|v| v.as_str()).map(str::to_string)
        }

        async fn execute(
            &self,
            input: serde_json::Value,
            ctx: &ToolContext,
        ) -> tg_tools::Result<ToolOutput> {
            let label = input["label"].as_str().unwrap_or("scripted").to_string();
            let delay = Duration::from_millis(input["delay_ms"].as_u64().unwrap_or(0));
            let steps = input["steps"].as_u64().unwrap_or(0);
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if input["panic"].as_bool().unwrap_or(false) {
                panic!("tool exploded");
            }
            if input["fail"].as_bool().unwrap_or(false) {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolError::ExecutionFailed("scripted failure".to_string()));
            }
            if steps == 0 {
                tokio::time::sleep(delay).await;
            }
            for step in 0..steps {
                ctx.emit_progress(format!("{label} step {step}"));
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push(label.clone());
            Ok(ToolOutput::text(label))
        }
    }

    fn scheduler(tools: Vec<Arc<dyn Tool>>) -> ToolExecutionScheduler {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        ToolExecutionScheduler::new(Arc::new(registry), InFlightExecutions::new())
    }

    fn call(id: &str, tool: &str, input: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest::new(id, tool, input)
    }

    async fn collect(stream: ExecutionStream) -> Vec<ExecutionEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn duplicate_id_joins_in_flight_execution() {
        let tool = Scripted::new("writer", true, false);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let cancel = CancellationToken::new();
        let request = call("tc1", "writer", json!({"label": "w", "steps": 2, "delay_ms": 60}));

        let first = scheduler.execute(&request, &cancel);
        tokio::time::sleep(Duration::from_millis(90)).await;
        let second = scheduler.execute(&request, &cancel);
        assert!(first.shares_execution_with(&second));

        let (a, b) = tokio::join!(collect(first), collect(second));
        assert_eq!(a, b);
        assert_eq!(a.len(), 3, "two replayed progress notes and one result");
        assert_eq!(tool.runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.in_flight.contains("tc1"));
    }

    #[tokio::test]
    async fn finished_streams_keep_returning_none() {
        let tool = Scripted::new("ticker", false, true);
        let scheduler = scheduler(vec![tool as Arc<dyn Tool>]);
        let cancel = CancellationToken::new();
        let request = call("tc1", "ticker", json!({"steps": 2, "delay_ms": 30}));

        let mut first = scheduler.execute(&request, &cancel);
        let mut joined = scheduler.execute(&request, &cancel);
        assert!(first.shares_execution_with(&joined));
        assert!(!joined.is_terminated());

        let mut events = 0;
        while joined.next().await.is_some() {
            events += 1;
        }
        assert_eq!(events, 3);
        assert!(joined.is_terminated());
        for _ in 0..3 {
            assert!(joined.next().await.is_none());
        }

        while first.next().await.is_some() {}
        assert!(first.next().await.is_none());
        assert!(first.is_terminated());
    }

    #[tokio::test]
    async fn batch_results_follow_issue_order() {
        let tool = Scripted::new("sleepy", false, true);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let calls = vec![
            call("a", "sleepy", json!({"label": "a", "delay_ms": 240})),
            call("b", "sleepy", json!({"label": "b", "delay_ms": 120})),
            call("c", "sleepy", json!({"label": "c", "delay_ms": 10})),
        ];
        let results = scheduler
            .run_batch(&calls, &CancellationToken::new(), None)
            .await;
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(*tool.finished.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(tool.max_active.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn mutating_calls_on_one_resource_never_overlap() {
        let tool = Scripted::new("writer", true, false);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let calls = vec![
            call("w1", "writer", json!({"label": "first", "key": "a.txt", "delay_ms": 80})),
            call("w2", "writer", json!({"label": "second", "key": "a.txt", "delay_ms": 5})),
        ];
        let results = scheduler
            .run_batch(&calls, &CancellationToken::new(), None)
            .await;
        assert!(results.iter().all(|r| !r.is_error));
        assert_eq!(tool.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(*tool.finished.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn read_only_concurrency_is_bounded() {
        let tool = Scripted::new("reader", false, true);
        let scheduler =
            scheduler(vec![tool.clone() as Arc<dyn Tool>]).with_max_concurrency(Some(1));
        let calls: Vec<_> = (0..3)
            .map(|i| call(&format!("r{i}"), "reader", json!({"delay_ms": 20})))
            .collect();
        let results = scheduler
            .run_batch(&calls, &CancellationToken::new(), None)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(tool.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_stay_local() {
        let tool = Scripted::new("scripted", false, true);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let calls = vec![
            call("p", "scripted", json!({"panic": true})),
            call("f", "scripted", json!({"fail": true})),
            call("u", "missing", json!({})),
            call("ok", "scripted", json!({"label": "fine"})),
        ];
        let results = scheduler
            .run_batch(&calls, &CancellationToken::new(), None)
            .await;
        assert!(results[0].is_error);
        assert!(results[0].content[0].as_text().unwrap().contains("tool exploded"));
        assert!(results[1].is_error);
        assert!(results[1].content[0].as_text().unwrap().contains("scripted failure"));
        assert_eq!(
            results[2].content[0].as_text(),
            Some("unknown tool: missing")
        );
        assert!(!results[3].is_error);
        assert_eq!(results[3].content[0].as_text(), Some("fine"));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_yields_one_terminal_result() {
        let tool = Scripted::new("ticker", false, true);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let cancel = CancellationToken::new();
        let mut stream = scheduler.execute(
            &call("tc1", "ticker", json!({"steps": 1000, "delay_ms": 10})),
            &cancel,
        );

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let progress_seen = events.len();
            events.push(event);
            if progress_seen == 2 {
                cancel.cancel();
            }
        }
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        match events.last() {
            Some(ExecutionEvent::Completed(result)) => {
                assert!(result.is_error);
                assert!(result.cancelled);
                assert_eq!(result.content[0].as_text(), Some(CANCELLED_MESSAGE));
            }
            other => panic!("expected terminal result last, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
        assert!(tool.finished.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_abortable_tool_finishes_before_cancelled_result() {
        let tool = Scripted::new("writer", true, false);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let cancel = CancellationToken::new();
        let stream = scheduler.execute(
            &call("tc1", "writer", json!({"label": "w", "delay_ms": 80})),
            &cancel,
        );
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = stream.into_result("tc1", None).await;
        assert!(result.cancelled);
        assert_eq!(*tool.finished.lock().unwrap(), vec!["w"]);
    }

    #[tokio::test]
    async fn calls_not_started_before_cancellation_never_run() {
        let tool = Scripted::new("scripted", true, true);
        let scheduler = scheduler(vec![tool.clone() as Arc<dyn Tool>]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = vec![
            call("a", "scripted", json!({})),
            call("b", "scripted", json!({})),
        ];
        let results = scheduler.run_batch(&calls, &cancel, None).await;
        assert!(results.iter().all(|r| r.cancelled && r.is_error));
        assert_eq!(tool.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_forwards_progress() {
        let tool = Scripted::new("ticker", false, true);
        let scheduler = scheduler(vec![tool as Arc<dyn Tool>]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler
            .run_batch(
                &[call("tc1", "ticker", json!({"label": "t", "steps": 2, "delay_ms": 1}))],
                &CancellationToken::new(),
                Some(tx),
            )
            .await;
        assert_eq!(rx.recv().await.unwrap().message, "t step 0");
        assert_eq!(rx.recv().await.unwrap().message, "t step 1");
    }
}
