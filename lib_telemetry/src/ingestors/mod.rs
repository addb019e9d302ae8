//! # Frame Sources
//!
//! Everything that can feed raw frames into the ingestion loop. A source is polled:
//! `next_frame` must come back promptly with `Ok(None)` when nothing is available,
//! so the loop stays responsive to shutdown.
//!
//! ## Contained Modules:
//! - **`serial_port`**: newline-delimited JSON from a serial device (feature `serial`).
//! - **`mock_feed`**: synthetic readings at a fixed cadence.
//! - **`channel_feed`**: frames pushed by another task through an MPSC channel.

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::errors::TransportError;

/// One raw unit of data, opaque until decoded.
pub type Frame = Bytes;

/// Newline-delimited serial device source.
#[cfg(feature = "serial")]
pub mod serial_port;
/// Random-reading generator.
pub mod mock_feed;
/// In-process channel source.
pub mod channel_feed;

#[cfg(feature = "serial")]
pub use serial_port::{SerialFrameSource, SerialOptions};
pub use mock_feed::MockFrameSource;
pub use channel_feed::ChannelFrameSource;

/// A pollable producer of raw frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns the next frame if one is available right now.
    ///
    /// Must not block for longer than the source's own read timeout.
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Releases the underlying handle. Called exactly once, when ingestion stops.
    async fn close(&mut self) {}

    /// Short label for logs, e.g. the device path.
    fn describe(&self) -> String;
}
