//! # Core Pipeline Module
//!
//! Everything between "a frame arrived" and "subscribers got it".
//!
//! ## Core Components:
//!
//! - **`reading`**: the validated [`Reading`](reading::Reading), its stamped form and
//!   the stored/broadcast document layouts.
//! - **`decoder`**: pure parse + field-by-field validation of raw frames.
//! - **`hub`**: the subscriber set and the zero-copy fan-out of accepted readings.
//! - **`shutdown`**: the single cooperative stop signal shared by all workers.
//! - **`ingestion`**: the loop that drives source → decoder → sink → hub.
//! - **`errors`**: the error taxonomy used across the crate.

/// Error taxonomy shared by every component.
pub mod errors;
/// Validated readings and their stored/broadcast shapes.
pub mod reading;
/// Frame decoding and validation.
pub mod decoder;
/// Subscriber set and fan-out.
pub mod hub;
/// Cooperative cancellation.
pub mod shutdown;
/// The ingestion orchestrator.
pub mod ingestion;

// --- Public API Re-exports ---
pub use hub::{BroadcastHub, HubOptions};
pub use ingestion::{CycleOutcome, IngestionLoop, IngestionStats};
pub use shutdown::ShutdownCoordinator;
