//! # lib_telemetry
//!
//! Home water/electricity telemetry pipeline: frames come in from a sensor feed,
//! get validated into [`Reading`]s, are appended to a store and fanned out to every
//! connected WebSocket subscriber.
//!
//! ## Modules
//!
//! - **`core`**: the reading model, decoder/validator, broadcast hub, shutdown
//!   coordinator and the ingestion loop that ties them together.
//! - **`ingestors`**: frame sources (serial device, mock generator, in-process channel).
//! - **`connections`**: persistence sinks (PostgreSQL, JSON Lines file).
//! - **`downstream`**: the axum WebSocket server serving subscribers.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
#[cfg(feature = "downstream")]
pub mod downstream;
pub mod ingestors;

// --- Public API Re-exports ---
pub use crate::core::decoder::decode;
pub use crate::core::errors::{
    DecodeError, DeliveryError, PersistenceError, Rejected, StartupError, TransportError,
    ValidationError,
};
pub use crate::core::hub::{BroadcastHub, BroadcastReport, HubOptions, SubscriberId, Subscription};
pub use crate::core::ingestion::{IngestionLoop, IngestionStats};
pub use crate::core::reading::{Reading, StampedReading};
pub use crate::core::shutdown::ShutdownCoordinator;
pub use connections::{open_sink, ReadingSink};
pub use ingestors::{Frame, FrameSource};
