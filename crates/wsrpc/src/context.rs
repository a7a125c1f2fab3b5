//! Per-connection state shared by the dispatch loop, handlers, background
//! operations, and request callers.
//!
//! The pending-request registry and the response slot table live behind one
//! lock, so an id is never half-registered: registration, delivery, and
//! removal are atomic with respect to each other. Neither lock is held
//! across an `.await`, except the send-half lock which serializes writes.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsrpc_protocol::{
    ErrorObject, Notification, ParseOptions, RequestId, Response, ResponsePayload, parse_response,
};

use crate::config::ConnectionConfig;
use crate::errors::RpcError;
use crate::transport::{FrameSink, TransportError};

/// Handle to a registered background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A received payload waiting to be claimed.
#[derive(Debug)]
pub(crate) enum Slot {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Default)]
pub(crate) struct CorrelationTable {
    pub(crate) pending: HashMap<RequestId, oneshot::Sender<()>>,
    pub(crate) responses: HashMap<RequestId, Slot>,
}

/// What [`ConnectionContext::shutdown`] released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Background tasks aborted.
    pub tasks_aborted: usize,
    /// Suspended requests released with `Cancelled`.
    pub waiters_released: usize,
    /// Response slots discarded.
    pub slots_discarded: usize,
}

/// Mutable state of one connection.
pub struct ConnectionContext {
    config: Arc<ConnectionConfig>,
    me: Weak<ConnectionContext>,
    pub(crate) table: Mutex<CorrelationTable>,
    tasks: Mutex<HashMap<TaskHandle, JoinHandle<()>>>,
    next_task: AtomicU64,
    next_request: AtomicI64,
    data: DashMap<String, Arc<dyn Any + Send + Sync>>,
    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    pub(crate) cancel: CancellationToken,
}

impl ConnectionContext {
    /// Fresh context with no transport attached.
    pub fn new(config: Arc<ConnectionConfig>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            me: me.clone(),
            table: Mutex::new(CorrelationTable::default()),
            tasks: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            next_request: AtomicI64::new(1),
            data: DashMap::new(),
            sink: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// The connection's configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// A strong reference to this context, for handlers that need to move
    /// it into a background task. `None` only while the context is being
    /// dropped.
    pub fn shared(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    /// Token cancelled when the connection tears down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Whether teardown has started.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once teardown has started.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    // ── Transport ───────────────────────────────────────────────────

    pub(crate) async fn attach(&self, sink: Box<dyn FrameSink>) {
        *self.sink.lock().await = Some(sink);
    }

    /// Detach the send half and close it with `code`.
    pub(crate) async fn close_transport(&self, code: u16) -> Result<(), TransportError> {
        let sink = self.sink.lock().await.take();
        match sink {
            Some(mut sink) => sink.close(code).await,
            None => Err(TransportError::NotConnected),
        }
    }

    /// Send one raw text frame.
    pub async fn send_text(&self, text: String) -> Result<(), RpcError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send_text(text).await?;
        Ok(())
    }

    /// Send a response frame.
    pub async fn send_response(&self, response: &Response) -> Result<(), RpcError> {
        self.send_text(response.to_json()?).await
    }

    /// Send a notification; nothing waits for an answer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let text = serde_json::to_string(&Notification::new(method, params))?;
        debug!(method, "sending notification");
        self.send_text(text).await
    }

    /// Send a transport-level ping.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.ping().await
    }

    /// Next id from this connection's request counter.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    // ── Inbound responses ───────────────────────────────────────────

    /// Store a received response and wake its waiter.
    ///
    /// Error-shaped responses are not routed to waiters here; the first one
    /// is returned as [`RpcError::ReceivedErrorResponse`] after every
    /// success in the frame has been stored.
    pub fn deliver_response(&self, text: &str) -> Result<(), RpcError> {
        let parsed = parse_response(text, ParseOptions::default())?;
        let mut first_error = None;
        for response in parsed.into_responses() {
            match (response.payload, response.id) {
                (ResponsePayload::Result(value), Some(id)) => {
                    let _ = self.store(id, Slot::Result(value));
                }
                (ResponsePayload::Result(_), None) => {
                    warn!(connection = %self.name(), "response without id dropped");
                }
                (ResponsePayload::Error(err), _) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(RpcError::ReceivedErrorResponse(err)),
            None => Ok(()),
        }
    }

    /// Route error responses to the requests waiting on their ids.
    ///
    /// Success responses in the same frame are stored as usual. Errors
    /// without a matching waiter are logged and dropped.
    pub fn deliver_error(&self, text: &str) -> Result<(), RpcError> {
        let parsed = parse_response(text, ParseOptions::default())?;
        for response in parsed.into_responses() {
            match (response.payload, response.id) {
                (ResponsePayload::Result(value), Some(id)) => {
                    let _ = self.store(id, Slot::Result(value));
                }
                (ResponsePayload::Error(err), Some(id)) => {
                    if !self.fail_waiter(id.clone(), err.clone()) {
                        warn!(connection = %self.name(), %id, error = %err, "error frame for unknown request");
                    }
                }
                (ResponsePayload::Error(err), None) => {
                    warn!(connection = %self.name(), error = %err, "error frame without id");
                }
                (ResponsePayload::Result(_), None) => {
                    warn!(connection = %self.name(), "response without id dropped");
                }
            }
        }
        Ok(())
    }

    /// Store a slot for `id` and wake its waiter. Returns whether a waiter
    /// was registered.
    fn store(&self, id: RequestId, slot: Slot) -> bool {
        let mut table = self.table.lock();
        if self.cancel.is_cancelled() {
            debug!(%id, "response after teardown dropped");
            return false;
        }
        if let Some(waiter) = table.pending.remove(&id) {
            let _ = table.responses.insert(id.clone(), slot);
            // the waiter may have given up already; its guard cleans the slot
            let _ = waiter.send(());
            debug!(%id, "response delivered");
            return true;
        }
        match table.responses.entry(id) {
            Entry::Occupied(entry) => {
                debug!(id = %entry.key(), "duplicate response ignored");
            }
            Entry::Vacant(entry) => {
                debug!(id = %entry.key(), "response for unregistered id stored");
                let _ = entry.insert(slot);
            }
        }
        false
    }

    fn fail_waiter(&self, id: RequestId, err: ErrorObject) -> bool {
        let mut table = self.table.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(waiter) = table.pending.remove(&id) else {
            return false;
        };
        let _ = table.responses.insert(id, Slot::Error(err));
        let _ = waiter.send(());
        true
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    /// Number of stored responses nobody has claimed.
    pub fn unclaimed_response_count(&self) -> usize {
        self.table.lock().responses.len()
    }

    // ── Background tasks ────────────────────────────────────────────

    /// Register a spawned task so teardown cancels it.
    ///
    /// After teardown the task is aborted at once and `Cancelled` returned.
    pub fn register_background_task(&self, task: JoinHandle<()>) -> Result<TaskHandle, RpcError> {
        let mut tasks = self.tasks.lock();
        if self.cancel.is_cancelled() {
            task.abort();
            return Err(RpcError::Cancelled);
        }
        prune_finished(&mut tasks);
        let handle = TaskHandle(self.next_task.fetch_add(1, Ordering::Relaxed));
        let _ = tasks.insert(handle, task);
        debug!(%handle, count = tasks.len(), "background task registered");
        Ok(handle)
    }

    /// Spawn `future` on the current runtime and register it.
    pub fn spawn_background_task<F>(&self, future: F) -> Result<TaskHandle, RpcError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        self.register_background_task(tokio::spawn(future))
    }

    /// Abort and forget a background task. Returns `false` if the handle is
    /// unknown, was already cancelled, or its task already finished.
    pub fn cancel_background_task(&self, handle: TaskHandle) -> bool {
        let task = self.tasks.lock().remove(&handle);
        match task {
            Some(task) if !task.is_finished() => {
                task.abort();
                debug!(%handle, "background task cancelled");
                true
            }
            _ => false,
        }
    }

    /// Snapshot of running task handles, in registration order.
    pub fn list_background_tasks(&self) -> Vec<TaskHandle> {
        let mut tasks = self.tasks.lock();
        prune_finished(&mut tasks);
        let mut handles: Vec<TaskHandle> = tasks.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Number of running background tasks.
    pub fn background_task_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        prune_finished(&mut tasks);
        tasks.len()
    }

    // ── Opaque data store ───────────────────────────────────────────

    /// Store a value under `key`, returning the previous one.
    pub fn insert_data<T>(&self, key: impl Into<String>, value: T) -> Option<Arc<dyn Any + Send + Sync>>
    where
        T: Any + Send + Sync,
    {
        self.data.insert(key.into(), Arc::new(value))
    }

    /// Fetch the value under `key` if it has type `T`.
    pub fn data<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.data.get(key).map(|entry| Arc::clone(entry.value()))?;
        value.downcast::<T>().ok()
    }

    /// Remove the value under `key`. Returns whether one was present.
    pub fn remove_data(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    /// Whether a value is stored under `key`.
    pub fn has_data(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Cancel the connection: abort every background task, release every
    /// suspended request with `Cancelled`, and discard unclaimed responses.
    ///
    /// Idempotent; later calls report nothing released.
    pub fn shutdown(&self) -> ShutdownReport {
        self.cancel.cancel();

        let tasks: Vec<(TaskHandle, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (_, task) in &tasks {
            task.abort();
        }

        let (pending, responses) = {
            let mut table = self.table.lock();
            (
                std::mem::take(&mut table.pending),
                std::mem::take(&mut table.responses),
            )
        };
        // dropping the senders wakes every waiter with a receive error
        let report = ShutdownReport {
            tasks_aborted: tasks.iter().filter(|(_, task)| !task.is_finished()).count(),
            waiters_released: pending.len(),
            slots_discarded: responses.len(),
        };
        drop(pending);

        if report != ShutdownReport::default() {
            info!(
                connection = %self.name(),
                tasks = report.tasks_aborted,
                waiters = report.waiters_released,
                slots = report.slots_discarded,
                "connection state released"
            );
        }
        report
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("name", &self.config.name)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .field("tasks", &self.background_task_count())
            .finish_non_exhaustive()
    }
}

fn prune_finished(tasks: &mut HashMap<TaskHandle, JoinHandle<()>>) {
    tasks.retain(|_, task| !task.is_finished());
}
