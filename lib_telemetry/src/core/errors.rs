//! # Pipeline Error Taxonomy
//!
//! Every error the pipeline can produce. Apart from [`StartupError`], all of them
//! are recoverable: the ingestion loop logs them and carries on with the next cycle.

use thiserror::Error;

use crate::core::hub::SubscriberId;

/// The frame source could not deliver a frame this cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An I/O error while reading from the underlying device or stream.
    #[error("transport read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The source reached end-of-stream (device unplugged, channel dropped).
    #[error("transport closed: {0}")]
    Closed(String),

    /// The source could not be opened.
    #[error("failed to open {target}: {reason}")]
    Open {
        /// The device path or other transport identifier.
        target: String,
        /// Why opening failed.
        reason: String,
    },
}

/// The frame is not a parseable structure.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The frame text is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The frame parsed but its content breaks the reading invariant.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The frame parsed to something other than an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing field `{0}`")]
    Missing(&'static str),

    /// A numeric field holds a non-number (string, boolean, null, ...).
    #[error("field `{0}` is not a number")]
    NotNumeric(&'static str),

    /// The household identifier is not a whole number.
    #[error("field `{0}` is not an integer")]
    NotInteger(&'static str),

    /// A numeric field is below zero.
    #[error("field `{field}` is negative ({value})")]
    Negative {
        /// Offending field.
        field: &'static str,
        /// The value as received.
        value: f64,
    },

    /// The pump flag is not a genuine boolean.
    #[error("field `{0}` is not a boolean")]
    NotBoolean(&'static str),
}

/// Outcome of a failed [`decode`](crate::core::decoder::decode).
#[derive(Debug, Error)]
pub enum Rejected {
    /// Structural parse failure.
    #[error("malformed frame: {0}")]
    Malformed(#[from] DecodeError),

    /// Parsed, but semantically invalid.
    #[error("invalid frame: {0}")]
    Invalid(#[from] ValidationError),
}

impl Rejected {
    /// Short label used in logs and stats.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejected::Malformed(_) => "malformed",
            Rejected::Invalid(_) => "invalid",
        }
    }
}

/// A store write failed. The reading is lost for persistence but still broadcast.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File-backed store I/O failure.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Database connection could not be obtained.
    #[error("failed to connect to database: {0}")]
    Connection(String),

    /// Database rejected the write.
    #[error("query execution failed: {0}")]
    Query(String),

    /// The write did not finish in time and was abandoned.
    #[error("write timed out after {} ms", .0.as_millis())]
    TimedOut(std::time::Duration),

    /// Shutdown was signaled while the write was still pending.
    #[error("write abandoned on shutdown")]
    Interrupted,
}

/// Delivery to one subscriber failed; that subscriber is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The subscriber's queue is full: it is not keeping up.
    #[error("subscriber {0} is lagging, queue full")]
    Lagging(SubscriberId),

    /// The subscriber's receiving side is gone.
    #[error("subscriber {0} is disconnected")]
    Disconnected(SubscriberId),
}

/// Fatal conditions that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The frame source could not be acquired.
    #[error("cannot open frame source: {0}")]
    Source(#[from] TransportError),

    /// The storage handle could not be acquired.
    #[error("cannot open storage `{url}`: {reason}")]
    Storage {
        /// Connection string, with any password masked.
        url: String,
        /// Why opening failed.
        reason: String,
    },

    /// The connection string names a store this build does not support.
    #[error("unsupported storage url `{0}` (expected postgres://, postgresql:// or file://)")]
    UnsupportedStorage(String),

    /// The push server could not bind its listening socket.
    #[error("cannot bind push server on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
