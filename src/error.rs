use thiserror::Error;

/// Result type for wrapper operations.
pub type WrapperResult<T> = Result<T, WrapperError>;

/// Errors raised by the wrapper runtime or transported back from the server.
///
/// Every variant is `Clone + Send` so error values can travel on reply
/// channels without a surrogate representation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WrapperError {
    /// Condition raised by a wrapped method; the message crosses the
    /// boundary verbatim.
    #[error("{0}")]
    Method(String),
    #[error("object does not define method `{0}`")]
    NoSuchMethod(String),
    #[error("method panicked: {0}")]
    Panicked(String),
    /// The wrapper refused the request because it is shutting down, or the
    /// inbox was already closed when the request arrived.
    #[error("wrapper is shutting down")]
    Closed,
    /// The payload handle was emptied by an earlier move transport.
    #[error("value has been moved out of its domain")]
    Moved,
    #[error("payload is not a {0}")]
    WrongType(&'static str),
    #[error("cannot recover the object from a locally hosted wrapper")]
    RecoveryNotPermitted,
    #[error("wrapped object has already been recovered")]
    AlreadyRecovered,
    #[error("{0}")]
    Disconnected(String),
    #[error("failed to spawn server thread: {0}")]
    Spawn(String),
}

impl WrapperError {
    pub fn method<E: ToString>(err: E) -> Self {
        WrapperError::Method(err.to_string())
    }

    pub fn panicked<E: ToString>(err: E) -> Self {
        WrapperError::Panicked(err.to_string())
    }

    pub fn disconnected<E: ToString>(err: E) -> Self {
        WrapperError::Disconnected(err.to_string())
    }

    pub(crate) fn spawn<E: ToString>(err: E) -> Self {
        WrapperError::Spawn(err.to_string())
    }
}
