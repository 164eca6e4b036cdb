use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use super::error::ListenerError;
use super::handler::{Handler, HandlerContext};
use super::message::Message;
use super::metrics::ListenerMetrics;

/// Configuration for a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Number of worker tasks
    pub worker_count: usize,
}

impl ListenerConfig {
    /// Load configuration from environment variables
    ///
    /// - `SERVICE_QUEUE_WORKERS`: worker tasks per listener (default: 4)
    pub fn from_env() -> Self {
        let worker_count = std::env::var("SERVICE_QUEUE_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        Self { worker_count }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}

/// Lifecycle of a [`Listener`].
///
/// `Created → Listening → Draining → Done`. Only [`Listener::listen`] leaves
/// `Created`; asking for [`Listener::done`] first does not change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Created = 0,
    Listening = 1,
    /// Cancellation fired or the channel closed; in-flight handlers finish.
    Draining = 2,
    Done = 3,
}

impl ListenerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Listening,
            2 => Self::Draining,
            _ => Self::Done,
        }
    }
}

/// State shared by the listener, its workers and every [`Done`] future.
struct Lifecycle {
    state: AtomicU8,
    done_tx: watch::Sender<bool>,
}

impl Lifecycle {
    fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(ListenerState::Created as u8),
            done_tx,
        }
    }

    fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ListenerState, to: ListenerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.state
            .store(ListenerState::Done as u8, Ordering::Release);
        self.done_tx.send_replace(true);
    }
}

/// Completion signal returned by [`Listener::done`].
///
/// Resolves once every worker has returned. Cloning or requesting the
/// signal again is cheap; all copies resolve together.
pub struct Done {
    inner: BoxFuture<'static, ()>,
}

impl Done {
    fn new(mut rx: watch::Receiver<bool>) -> Self {
        let inner = async move {
            // a dropped sender means the listener is gone; nothing left to wait for
            if rx.wait_for(|done| *done).await.is_err() {
                debug!("Listener dropped before completion");
            }
        }
        .boxed();
        Self { inner }
    }

    fn ready() -> Self {
        Self {
            inner: futures::future::ready(()).boxed(),
        }
    }
}

impl Future for Done {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done").finish_non_exhaustive()
    }
}

/// Builder for [`Listener`]. Obtain one with [`Listener::builder`].
pub struct ListenerBuilder<M> {
    name: Option<String>,
    worker_count: Option<usize>,
    handler: Option<Arc<dyn Handler>>,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message> ListenerBuilder<M> {
    /// Name used as the `listener` field on every log line.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of worker tasks; must be at least one.
    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = Some(n);
        self
    }

    /// Apply a loaded [`ListenerConfig`].
    pub fn config(mut self, config: &ListenerConfig) -> Self {
        self.worker_count = Some(config.worker_count);
        self
    }

    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Use a handler that is shared with other listeners.
    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the arguments and create the listener.
    ///
    /// When no worker count was given, [`ListenerConfig::from_env`] decides.
    ///
    /// # Errors
    ///
    /// [`ListenerError::InvalidArgument`] when the worker count is zero or no
    /// handler was supplied.
    pub fn build(self) -> Result<Listener<M>, ListenerError> {
        let worker_count = self
            .worker_count
            .unwrap_or_else(|| ListenerConfig::from_env().worker_count);
        if worker_count == 0 {
            return Err(ListenerError::InvalidArgument(
                "worker_count must be at least 1".to_string(),
            ));
        }
        let handler = self.handler.ok_or_else(|| {
            ListenerError::InvalidArgument("handler is required".to_string())
        })?;

        Ok(Listener {
            name: Arc::from(self.name.unwrap_or_else(|| "queue".to_string())),
            worker_count,
            handler,
            metrics: Arc::new(ListenerMetrics::new()),
            lifecycle: Arc::new(Lifecycle::new()),
            _message: PhantomData,
        })
    }
}

/// Bounded worker pool that consumes messages from a channel.
///
/// `listen` spawns `worker_count` tokio tasks sharing one receiver. Each
/// worker takes the next message, runs the handler and acks or nacks the
/// message depending on the result. Cancelling the token stops workers from
/// taking new messages; handlers already running complete and their
/// messages are still acked or nacked. Closing the channel has the same
/// effect once it is empty.
///
/// ```
/// use service_common::queue::memory::{MemoryLedger, MemoryMessage};
/// use service_common::queue::{handler_fn, Listener};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let listener = Listener::<MemoryMessage>::builder()
///     .name("orders")
///     .worker_count(2)
///     .handler(handler_fn(|_ctx, _md, _payload| async { Ok(()) }))
///     .build()
///     .unwrap();
///
/// let ledger = MemoryLedger::new();
/// let (tx, rx) = tokio::sync::mpsc::channel(8);
/// listener.listen(CancellationToken::new(), rx).unwrap();
///
/// tx.send(ledger.message("m1", b"hello".to_vec())).await.unwrap();
/// drop(tx);
///
/// listener.done().await;
/// assert_eq!(ledger.acked(), 1);
/// # }
/// ```
pub struct Listener<M> {
    name: Arc<str>,
    worker_count: usize,
    handler: Arc<dyn Handler>,
    metrics: Arc<ListenerMetrics>,
    lifecycle: Arc<Lifecycle>,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message> Listener<M> {
    pub fn builder() -> ListenerBuilder<M> {
        ListenerBuilder {
            name: None,
            worker_count: None,
            handler: None,
            _message: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn state(&self) -> ListenerState {
        self.lifecycle.state()
    }

    pub fn metrics(&self) -> &Arc<ListenerMetrics> {
        &self.metrics
    }

    /// Start the workers and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ListenerError::AlreadyStarted`] if `listen` was already called.
    /// - [`ListenerError::InvalidArgument`] outside a tokio runtime.
    pub fn listen(
        &self,
        token: CancellationToken,
        rx: mpsc::Receiver<M>,
    ) -> Result<(), ListenerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ListenerError::InvalidArgument(format!("listen requires a tokio runtime: {e}"))
        })?;
        if !self
            .lifecycle
            .transition(ListenerState::Created, ListenerState::Listening)
        {
            return Err(ListenerError::AlreadyStarted);
        }

        info!(
            listener = %self.name,
            workers = self.worker_count,
            "Starting queue listener"
        );

        let rx = Arc::new(Mutex::new(rx));
        let tracker = TaskTracker::new();
        for worker_id in 0..self.worker_count {
            let worker = Worker {
                id: worker_id,
                listener: Arc::clone(&self.name),
                rx: Arc::clone(&rx),
                token: token.clone(),
                handler: Arc::clone(&self.handler),
                metrics: Arc::clone(&self.metrics),
                lifecycle: Arc::clone(&self.lifecycle),
            };
            tracker.spawn_on(worker.run(), &runtime);
        }
        tracker.close();

        let lifecycle = Arc::clone(&self.lifecycle);
        let name = Arc::clone(&self.name);
        runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    if lifecycle.transition(ListenerState::Listening, ListenerState::Draining) {
                        info!(listener = %name, "Queue listener cancelled, draining in-flight messages");
                    }
                }
                () = tracker.wait() => {}
            }
            tracker.wait().await;
            lifecycle.finish();
            info!(listener = %name, "Queue listener stopped");
        });

        Ok(())
    }

    /// Completion signal.
    ///
    /// Resolves after every worker has returned. While the listener has not
    /// been started there are no workers, so the returned signal is already
    /// resolved; the listener stays in [`ListenerState::Created`] and can
    /// still be started, after which `done` waits for the real workers.
    pub fn done(&self) -> Done {
        if self.lifecycle.state() == ListenerState::Created {
            debug!(listener = %self.name, "Completion requested before listen");
            return Done::ready();
        }
        Done::new(self.lifecycle.done_tx.subscribe())
    }
}

struct Worker<M> {
    id: usize,
    listener: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<M>>>,
    token: CancellationToken,
    handler: Arc<dyn Handler>,
    metrics: Arc<ListenerMetrics>,
    lifecycle: Arc<Lifecycle>,
}

impl<M: Message> Worker<M> {
    async fn run(self) {
        debug!(listener = %self.listener, worker = self.id, "Queue worker started");
        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    debug!(listener = %self.listener, worker = self.id, "Queue worker cancelled");
                    break;
                }
                msg = async { self.rx.lock().await.recv().await } => msg,
            };
            let Some(msg) = next else {
                debug!(listener = %self.listener, worker = self.id, "Queue channel closed");
                break;
            };
            self.process(&msg).await;
        }
        if self
            .lifecycle
            .transition(ListenerState::Listening, ListenerState::Draining)
        {
            debug!(listener = %self.listener, "Queue listener draining");
        }
    }

    /// Run the handler for one message and settle it. Not raced against the
    /// cancellation token.
    async fn process(&self, msg: &M) {
        self.metrics.record_received();
        let ctx = HandlerContext::new(Arc::clone(&self.listener), self.id, msg.id());
        let span = ctx.span().clone();
        let result = AssertUnwindSafe(
            self.handler
                .handle(&ctx, msg.metadata(), msg.payload())
                .instrument(span),
        )
        .catch_unwind()
        .await;

        match result {
            Ok(Ok(())) => {
                self.metrics.record_ack();
                if let Err(e) = msg.ack().await {
                    warn!(
                        listener = %self.listener,
                        message_id = %msg.id(),
                        error = %e,
                        "Failed to ack message"
                    );
                }
            }
            Ok(Err(e)) => {
                warn!(
                    listener = %self.listener,
                    worker = self.id,
                    message_id = %msg.id(),
                    error = %e,
                    "Handler failed, nacking message"
                );
                self.nack(msg).await;
            }
            Err(panic) => {
                error!(
                    listener = %self.listener,
                    worker = self.id,
                    message_id = %msg.id(),
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked, nacking message"
                );
                self.nack(msg).await;
            }
        }
    }

    async fn nack(&self, msg: &M) {
        self.metrics.record_nack();
        if let Err(e) = msg.nack().await {
            warn!(
                listener = %self.listener,
                message_id = %msg.id(),
                error = %e,
                "Failed to nack message"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
