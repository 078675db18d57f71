use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by index construction, placement, lookup and persistence.
///
/// There is no internal retry or recovery anywhere in the crate; every
/// failure propagates directly to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Matrix dimensions are mismatched or an entry falls outside the
    /// asserted shape.
    #[error("shape error: {0}")]
    Shape(String),

    /// The requested residency target is unavailable or the transfer failed.
    #[error("device error: {0}")]
    Device(#[from] candle_core::Error),

    /// File read/write failure during save/load.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted container is malformed or structurally incompatible.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_cbor::Error> for Error {
    fn from(err: serde_cbor::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl Error {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::Shape(msg.into())
    }
}
