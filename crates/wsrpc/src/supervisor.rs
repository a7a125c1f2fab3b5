//! Connection lifecycle: connect, run the dispatch loop and background
//! operations, then tear everything down.
//!
//! ```text
//! Idle -> Connecting -> Running -> Unwinding -> Closed
//! ```
//!
//! Unwinding always runs, whether the loop ended cleanly, failed, or the
//! connection was cancelled, and the trigger is returned to the caller of
//! [`ConnectionSupervisor::handle`] only after it has finished.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::context::ConnectionContext;
use crate::dispatch_loop::run_dispatch_loop;
use crate::errors::ConnectionError;
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::transport::{CLOSE_GOING_AWAY, Connector, Duplex, TransportError, WebSocketConnector};

/// How long teardown waits for the close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-lived operation started once the connection is running. It is
/// handed the shared context and cancelled at teardown.
pub type BackgroundOp = Box<dyn FnOnce(Arc<ConnectionContext>) -> BoxFuture<'static, ()> + Send>;

/// Box an async closure as a [`BackgroundOp`].
pub fn background<F, Fut>(op: F) -> BackgroundOp
where
    F: FnOnce(Arc<ConnectionContext>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(op(ctx)))
}

/// Lifecycle state of a supervised connection, ordered by progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorState {
    /// Constructed, `handle` not yet called.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Dispatch loop and background operations are running.
    Running,
    /// Teardown in progress.
    Unwinding,
    /// Terminal.
    Closed,
}

#[derive(Default)]
struct Inner {
    queued: Vec<BackgroundOp>,
    context: Option<Arc<ConnectionContext>>,
    tasks: Vec<AbortHandle>,
}

struct Shared {
    name: String,
    id: Uuid,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn set_state(&self, state: SupervisorState) {
        let _ = self.state.send_replace(state);
    }

    fn add_background(&self, op: BackgroundOp) -> bool {
        let mut inner = self.inner.lock();
        let state = *self.state.borrow();
        match state {
            SupervisorState::Idle | SupervisorState::Connecting => {
                inner.queued.push(op);
                true
            }
            SupervisorState::Running => match &inner.context {
                Some(ctx) => start_background(ctx, op),
                None => false,
            },
            SupervisorState::Unwinding | SupervisorState::Closed => {
                warn!(connection = %self.name, ?state, "background operation rejected, connection is closing");
                false
            }
        }
    }

    /// Teardown steps one and two: release the context, abort our own
    /// tasks. Returns the context so the caller can close the transport.
    fn release(&self) -> Option<Arc<ConnectionContext>> {
        let (ctx, tasks) = {
            let mut inner = self.inner.lock();
            self.set_state(SupervisorState::Unwinding);
            inner.queued.clear();
            (inner.context.take(), std::mem::take(&mut inner.tasks))
        };
        if let Some(ctx) = &ctx {
            let report = ctx.shutdown();
            debug!(
                connection = %self.name,
                tasks = report.tasks_aborted,
                waiters = report.waiters_released,
                "context released"
            );
        }
        for task in &tasks {
            task.abort();
        }
        ctx
    }

    /// Teardown step three, then the terminal state.
    async fn close(&self, ctx: Option<Arc<ConnectionContext>>) {
        if let Some(ctx) = ctx {
            match tokio::time::timeout(CLOSE_TIMEOUT, ctx.close_transport(CLOSE_GOING_AWAY)).await {
                Ok(Ok(())) => debug!(connection = %self.name, "close frame sent"),
                Ok(Err(e)) => debug!(connection = %self.name, error = %e, "close frame not sent"),
                Err(_) => warn!(connection = %self.name, "close frame timed out"),
            }
        }
        self.cancel.cancel();
        self.set_state(SupervisorState::Closed);
        info!(connection = %self.name, "connection closed");
    }
}

fn start_background(ctx: &Arc<ConnectionContext>, op: BackgroundOp) -> bool {
    let future = op(Arc::clone(ctx));
    match ctx.spawn_background_task(future) {
        Ok(handle) => {
            debug!(connection = %ctx.name(), %handle, "background operation started");
            true
        }
        Err(e) => {
            warn!(connection = %ctx.name(), error = %e, "failed to register background operation");
            false
        }
    }
}

/// Tears down if `handle()` is dropped before it finished.
struct UnwindGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let ctx = self.shared.release();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(&self.shared);
                let _ = runtime.spawn(async move { shared.close(ctx).await });
            }
            Err(_) => {
                self.shared.cancel.cancel();
                self.shared.set_state(SupervisorState::Closed);
            }
        }
    }
}

/// Owns one connection from connect to teardown.
pub struct ConnectionSupervisor {
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl ConnectionSupervisor {
    /// Supervisor opening its transport through `connector`.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            id: Uuid::now_v7(),
            cancel: CancellationToken::new(),
            state,
            inner: Mutex::new(Inner::default()),
        });
        Self {
            config: Arc::new(config),
            connector,
            shared,
        }
    }

    /// Supervisor for a `ws://` / `wss://` endpoint.
    pub fn websocket(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    /// Add an operation to start once the connection is running.
    #[must_use]
    pub fn with_background(self, op: BackgroundOp) -> Self {
        let _ = self.shared.add_background(op);
        self
    }

    /// Handle for observing and cancelling the connection from elsewhere.
    pub fn control(&self) -> SupervisorControl {
        SupervisorControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drive the connection until it ends.
    ///
    /// Returns `Ok(())` when the peer closed the connection or the stream
    /// ended, otherwise the error that ended it. Teardown has completed by
    /// the time this returns. Dropping the future tears the connection down
    /// as well; the close frame is then sent from a spawned task.
    #[instrument(skip_all, fields(connection = %self.shared.name, id = %self.shared.id))]
    pub async fn handle(self) -> Result<(), ConnectionError> {
        let Self {
            config,
            connector,
            shared,
        } = self;
        let mut guard = UnwindGuard {
            shared: Arc::clone(&shared),
            armed: true,
        };

        let outcome = run(&shared, &config, connector.as_ref()).await;
        match &outcome {
            Ok(()) => info!("connection ended"),
            Err(e) => info!(error = %e, "connection ended with error"),
        }

        guard.armed = false;
        let ctx = shared.release();
        shared.close(ctx).await;
        outcome
    }
}

async fn run(
    shared: &Shared,
    config: &Arc<ConnectionConfig>,
    connector: &dyn Connector,
) -> Result<(), ConnectionError> {
    shared.set_state(SupervisorState::Connecting);
    let address = config.address();
    info!(%address, "connecting");

    let connected = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => return Err(ConnectionError::Cancelled),
        connected = connector.connect(&address, &config.transport) => connected,
    };
    let Duplex {
        sink,
        source,
        liveness,
    } = connected.inspect_err(|e| warn!(%address, error = %e, "connect failed"))?;

    let ctx = ConnectionContext::new(Arc::clone(config));
    ctx.attach(sink).await;

    let dispatch = tokio::spawn(run_dispatch_loop(Arc::clone(&ctx), source).in_current_span());
    let heartbeat = config.transport.heartbeat.filter(|d| !d.is_zero()).map(|interval| {
        tokio::spawn(
            run_heartbeat(Arc::clone(&ctx), liveness, interval, ctx.cancellation_token())
                .in_current_span(),
        )
    });

    {
        let mut inner = shared.inner.lock();
        inner.tasks.push(dispatch.abort_handle());
        if let Some(heartbeat) = &heartbeat {
            inner.tasks.push(heartbeat.abort_handle());
        }
        inner.context = Some(Arc::clone(&ctx));
        shared.set_state(SupervisorState::Running);
        for op in std::mem::take(&mut inner.queued) {
            let _ = start_background(&ctx, op);
        }
    }
    info!(%address, "connection running");

    let heartbeat_done = async move {
        match heartbeat {
            Some(task) => task.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        joined = dispatch => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(ConnectionError::TaskFailed(e.to_string())),
        },
        beat = heartbeat_done => match beat {
            Ok(HeartbeatResult::TimedOut(silent)) => {
                Err(TransportError::HeartbeatTimeout(silent).into())
            }
            Ok(HeartbeatResult::PingFailed(e)) => Err(e.into()),
            Ok(HeartbeatResult::Cancelled) => Err(ConnectionError::Cancelled),
            Err(e) => Err(ConnectionError::TaskFailed(e.to_string())),
        },
        () = shared.cancel.cancelled() => Err(ConnectionError::Cancelled),
    }
}

/// Cloneable handle to a supervised connection.
#[derive(Clone)]
pub struct SupervisorControl {
    shared: Arc<Shared>,
}

impl SupervisorControl {
    /// Cancel the connection. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        *self.shared.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    /// Wait until the connection reaches `state` or a later one.
    pub async fn wait_for(&self, state: SupervisorState) -> SupervisorState {
        let mut rx = self.subscribe();
        let reached = rx.wait_for(|current| *current >= state).await;
        reached.map_or(SupervisorState::Closed, |s| *s)
    }

    /// Add a background operation. Queued before the connection runs,
    /// started at once while it runs, rejected (`false`) once it is closing.
    pub fn add_background(&self, op: BackgroundOp) -> bool {
        self.shared.add_background(op)
    }

    /// The running connection's context, if there is one.
    pub fn context(&self) -> Option<Arc<ConnectionContext>> {
        self.shared.inner.lock().context.clone()
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}
