//! # Queue Listener Module
//!
//! A bounded pool of tokio worker tasks that consumes messages from a
//! channel, runs a [`Handler`] for each one and acknowledges the outcome.
//!
//! ## Semantics
//!
//! - Every message a worker receives is acked (handler `Ok`) or nacked
//!   (handler `Err` or panic) exactly once.
//! - Cancelling the token passed to [`Listener::listen`] stops pickup of new
//!   messages. Handlers already running are not interrupted.
//! - Handlers receive a [`HandlerContext`] that carries the delivery's
//!   identity and tracing span but not the cancellation token.
//! - [`Listener::done`] resolves once every worker has returned, and at once
//!   when the listener has not been started.
//!
//! ## Configuration
//!
//! - `SERVICE_QUEUE_WORKERS`: default worker count when the builder is not
//!   given one (default: 4)
//!
//! Transports implement [`Message`]; [`memory`] provides an in-process one.

mod error;
mod handler;
mod listener;
pub mod memory;
mod message;
mod metrics;

pub use error::ListenerError;
pub use handler::{handler_fn, Handler, HandlerContext, HandlerFn};
pub use listener::{Done, Listener, ListenerBuilder, ListenerConfig, ListenerState};
pub use message::Message;
pub use metrics::ListenerMetrics;
