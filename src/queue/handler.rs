use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::Span;

use crate::metadata::Metadata;

/// Per-message context handed to a [`Handler`].
///
/// The context is detached from the listener's cancellation token: it
/// carries the identity of the delivery and the `queue_message` tracing
/// span the handler runs in, but nothing that stops when shutdown starts.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    listener: Arc<str>,
    worker: usize,
    message_id: String,
    span: Span,
}

impl HandlerContext {
    /// Context for one delivery, with a fresh `queue_message` span.
    pub fn new(
        listener: impl Into<Arc<str>>,
        worker: usize,
        message_id: impl Into<String>,
    ) -> Self {
        let listener = listener.into();
        let message_id = message_id.into();
        let span = tracing::info_span!(
            "queue_message",
            listener = %listener,
            worker = worker,
            message_id = %message_id
        );
        Self {
            listener,
            worker,
            message_id,
            span,
        }
    }

    /// Name of the listener that received the message.
    pub fn listener(&self) -> &str {
        &self.listener
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Span the handler future is instrumented with. Use it as the parent
    /// of work spawned off the handler.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Message handler invoked by listener workers.
///
/// Returning `Ok` acks the message, returning `Err` nacks it. The handler
/// runs to completion even after the listener's cancellation token fires.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        metadata: &Metadata,
        payload: &[u8],
    ) -> anyhow::Result<()>;
}

/// [`Handler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure taking owned context, metadata and payload as a
/// [`Handler`].
///
/// ```
/// use service_common::queue::handler_fn;
///
/// let handler = handler_fn(|ctx, _metadata, payload: Vec<u8>| async move {
///     if payload.is_empty() {
///         anyhow::bail!("empty payload in {}", ctx.message_id());
///     }
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(HandlerContext, Metadata, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(HandlerContext, Metadata, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &HandlerContext,
        metadata: &Metadata,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), metadata.clone(), payload.to_vec()).await
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        metadata: &Metadata,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        (**self).handle(ctx, metadata, payload).await
    }
}
