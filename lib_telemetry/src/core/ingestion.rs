//! # Ingestion Loop
//!
//! Poll → decode → stamp → persist → broadcast, once per cycle, until shutdown.
//!
//! Nothing that goes wrong inside a cycle escapes it: transport errors, rejected
//! frames and failed writes are logged and counted, and the loop moves on. When
//! the loop stops it closes the frame source and the sink, once each.

use std::sync::Arc;
use std::time::Duration;

use crate::connections::ReadingSink;
use crate::core::decoder::decode;
use crate::core::errors::{PersistenceError, Rejected};
use crate::core::hub::BroadcastHub;
use crate::core::reading::{StampedReading, Stamper};
use crate::core::shutdown::ShutdownCoordinator;
use crate::ingestors::{Frame, FrameSource};

/// Counters collected over one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    /// Frames returned by the source.
    pub frames: u64,
    /// Frames that became readings.
    pub accepted: u64,
    /// Frames that failed the structural parse.
    pub malformed: u64,
    /// Frames that parsed but broke the reading invariant.
    pub invalid: u64,
    /// Polls that ended in a transport error.
    pub transport_errors: u64,
    /// Runs of consecutive transport errors; each run is logged once.
    pub transport_outages: u64,
    /// Accepted readings the sink failed to store (including timed-out writes).
    pub persist_failures: u64,
    /// Broadcasts actually performed (subscribers present).
    pub broadcasts: u64,
    /// Individual payload deliveries.
    pub delivered: u64,
    /// Subscribers removed because a send failed.
    pub dropped_subscribers: u64,
}

/// What happened in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The source had nothing.
    Idle,
    /// A frame was turned into a reading and handed to the sink and the hub.
    Accepted,
    /// A frame was dropped by the decoder.
    Rejected,
    /// The source failed this cycle.
    TransportError,
}

/// The orchestrator owning the source and the sink for the duration of a run.
pub struct IngestionLoop {
    source: Box<dyn FrameSource>,
    sink: Box<dyn ReadingSink>,
    hub: Arc<BroadcastHub>,
    shutdown: ShutdownCoordinator,
    poll_interval: Duration,
    append_timeout: Duration,
    stamper: Stamper,
    source_down: bool,
    stats: IngestionStats,
}

/// Default bound on one sink write.
pub const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_secs(5);

impl IngestionLoop {
    /// Wires up a loop. `poll_interval` is the pause after an idle or failed cycle.
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn ReadingSink>,
        hub: Arc<BroadcastHub>,
        shutdown: ShutdownCoordinator,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            hub,
            shutdown,
            poll_interval,
            append_timeout: DEFAULT_APPEND_TIMEOUT,
            stamper: Stamper::new(),
            source_down: false,
            stats: IngestionStats::default(),
        }
    }

    /// Overrides the bound on a single sink write.
    pub fn with_append_timeout(mut self, append_timeout: Duration) -> Self {
        self.append_timeout = append_timeout;
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> &IngestionStats {
        &self.stats
    }

    /// Runs until shutdown, then releases the source and the sink.
    pub async fn run(mut self) -> IngestionStats {
        tracing::info!(
            "Ingestion started: {} -> {}",
            self.source.describe(),
            self.sink.describe()
        );

        while !self.shutdown.is_signaled() {
            if self.cycle().await == CycleOutcome::Accepted {
                continue;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.source.close().await;
        self.sink.close().await;
        tracing::info!("Ingestion stopped: {:?}", self.stats);
        self.stats
    }

    /// One poll-decode-persist-broadcast iteration.
    pub async fn cycle(&mut self) -> CycleOutcome {
        match self.source.next_frame().await {
            Ok(frame) => {
                if self.source_down {
                    self.source_down = false;
                    tracing::info!("{} is delivering again", self.source.describe());
                }
                match frame {
                    Some(frame) => {
                        self.stats.frames += 1;
                        self.process(frame).await
                    }
                    None => CycleOutcome::Idle,
                }
            }
            Err(e) => {
                self.stats.transport_errors += 1;
                if self.source_down {
                    tracing::debug!("{} still failing: {}", self.source.describe(), e);
                } else {
                    self.source_down = true;
                    self.stats.transport_outages += 1;
                    tracing::warn!("No frames from {}: {}", self.source.describe(), e);
                }
                CycleOutcome::TransportError
            }
        }
    }

    async fn process(&mut self, frame: Frame) -> CycleOutcome {
        let reading = match decode(&frame) {
            Ok(reading) => reading,
            Err(rejected) => {
                match &rejected {
                    Rejected::Malformed(_) => self.stats.malformed += 1,
                    Rejected::Invalid(_) => self.stats.invalid += 1,
                }
                tracing::warn!(
                    reason = rejected.reason(),
                    frame = %String::from_utf8_lossy(&frame),
                    "Dropping frame: {}",
                    rejected
                );
                return CycleOutcome::Rejected;
            }
        };

        let stamped = self.stamper.stamp(reading);
        self.stats.accepted += 1;
        tracing::debug!(home = stamped.reading.home_id, "Accepted reading");

        // Persistence and broadcast are independent: a failed write does not
        // keep the reading from subscribers.
        if let Err(e) = self.persist(&stamped).await {
            self.stats.persist_failures += 1;
            tracing::error!(
                home = stamped.reading.home_id,
                "Failed to persist reading to {}: {}",
                self.sink.describe(),
                e
            );
        }

        if self.hub.has_subscribers() {
            let report = self.hub.broadcast(&stamped);
            self.stats.broadcasts += 1;
            self.stats.delivered += report.delivered as u64;
            self.stats.dropped_subscribers += report.dropped.len() as u64;
        }

        CycleOutcome::Accepted
    }

    /// One sink write, bounded by `append_timeout` and abandoned on shutdown.
    async fn persist(&mut self, stamped: &StampedReading) -> Result<(), PersistenceError> {
        let limit = self.append_timeout;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(PersistenceError::Interrupted),
            written = tokio::time::timeout(limit, self.sink.append(stamped)) => {
                written.unwrap_or(Err(PersistenceError::TimedOut(limit)))
            }
        }
    }
}
