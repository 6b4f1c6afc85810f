use thiserror::Error;

pub type CoapResult<T> = Result<T, CoapError>;

/// Errors of the messaging engine. Most of them never reach the application: inbound
///  decode failures are logged and the datagram is dropped, stale notifications are discarded
///  silently, and a [CoapError::CommunicationFailure] is delivered asynchronously through the
///  owning transaction's callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoapError {
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    #[error("buffer too small: {required} bytes required, capacity is {capacity}")]
    BufferTooSmall { required: usize, capacity: usize },

    #[error("out of memory")]
    OutOfMemory,

    #[error("no transaction for token")]
    TokenNotFound,

    #[error("retry budget exhausted without acknowledgement")]
    CommunicationFailure,

    #[error("stale observe sequence number {received}, last seen {stored}")]
    InvalidObserveSequence { received: u32, stored: u32 },

    #[error("token is already in use by a live transaction")]
    DuplicateToken,

    #[error("invalid uri {0:?}")]
    InvalidUri(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<std::collections::TryReserveError> for CoapError {
    fn from(_: std::collections::TryReserveError) -> Self {
        CoapError::OutOfMemory
    }
}
