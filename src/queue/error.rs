use thiserror::Error;

/// Errors returned while building or starting a [`Listener`](super::Listener).
///
/// Handler failures are not listener errors; they nack the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// A builder argument or the calling environment is unusable.
    #[error("invalid listener argument: {0}")]
    InvalidArgument(String),

    /// `listen` was called on a listener that already started or finished.
    #[error("listener already started")]
    AlreadyStarted,
}
