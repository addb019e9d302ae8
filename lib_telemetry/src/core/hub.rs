//! # Broadcast Hub
//!
//! The `BroadcastHub` owns the set of connected subscribers and fans every accepted
//! reading out to them.
//!
//! ## Core Design Principles:
//!
//! 1.  **Serialize once, share everywhere**: the broadcast payload is rendered to JSON
//!     a single time and wrapped in an `Arc<str>`. Every subscriber queue receives a
//!     pointer to the same text.
//!
//! 2.  **Bounded, non-blocking sends**: each subscriber gets a bounded MPSC queue and
//!     the hub only ever uses `try_send`. A full queue means the subscriber is not
//!     keeping up; it is dropped instead of stalling everybody else.
//!
//! 3.  **Failure isolation**: a failed send removes that one subscriber (exactly as if
//!     it had disconnected) and the fan-out continues with the rest.
//!
//! 4.  **Cheap emptiness check**: an `AtomicBool` mirrors "the set is non-empty" so the
//!     ingestion loop can skip broadcasting without taking the lock. The set itself is
//!     the source of truth; the flag is only updated while the lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::errors::DeliveryError;
use crate::core::reading::{StampedReading, ELECTRICITY_USAGE};

/// Identifier handed out on connect. Never reused within one hub.
pub type SubscriberId = u64;

/// Tuning knobs for the hub.
#[derive(Debug, Clone, Copy)]
pub struct HubOptions {
    /// Whether `ElectricityUsage` is part of the public payload.
    pub include_electricity_usage: bool,
    /// Capacity of each subscriber's pending-message queue.
    pub queue_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            include_electricity_usage: false,
            queue_capacity: 64,
        }
    }
}

/// # Subscription
///
/// What a new subscriber gets back from [`BroadcastHub::connect`]: its id and the
/// receiving half of its queue. The queue yields `None` once the hub has dropped the
/// subscriber.
#[derive(Debug)]
pub struct Subscription {
    /// Id to pass back to [`BroadcastHub::disconnect`].
    pub id: SubscriberId,
    /// Serialized payloads, in ingestion order.
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Outcome of a single [`BroadcastHub::broadcast`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of send attempts made.
    pub attempted: usize,
    /// Number of subscribers that accepted the payload.
    pub delivered: usize,
    /// Subscribers removed during this call and why.
    pub dropped: Vec<DeliveryError>,
}

/// Internal record of one connected subscriber.
struct SubscriberHandle {
    /// Peer description used in logs (usually the remote socket address).
    peer: String,
    /// Sending half of the subscriber's bounded queue.
    sender: mpsc::Sender<Arc<str>>,
}

/// # Broadcast Hub
///
/// Shared between the subscriber-serving worker (connect/disconnect) and the
/// ingestion loop (`has_subscribers` + `broadcast`). All membership changes are
/// serialized by one mutex.
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberHandle>>,
    active: AtomicBool,
    next_id: AtomicU64,
    options: HubOptions,
}

impl BroadcastHub {
    /// Creates an empty hub.
    pub fn new(options: HubOptions) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            options: HubOptions {
                queue_capacity: options.queue_capacity.max(1),
                ..options
            },
        }
    }

    /// The options this hub was built with.
    pub fn options(&self) -> HubOptions {
        self.options
    }

    // A poisoned lock only means another thread panicked mid-update of a plain
    // HashMap; the map itself is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, SubscriberHandle>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Connect
    ///
    /// Registers a new subscriber and returns its [`Subscription`]. This is the only
    /// place the set goes from empty to non-empty.
    pub fn connect(&self, peer: impl Into<String>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.options.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = peer.into();

        let mut subscribers = self.lock();
        subscribers.insert(id, SubscriberHandle { peer: peer.clone(), sender });
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!("First subscriber connected, broadcasting enabled");
        }
        tracing::info!(subscriber = id, %peer, total = subscribers.len(), "Subscriber connected");

        Subscription { id, receiver }
    }

    /// # Disconnect
    ///
    /// Removes a subscriber. Returns `false` if it was already gone (for instance
    /// because a failed send removed it first).
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let removed = subscribers.remove(&id);
        if let Some(handle) = &removed {
            tracing::info!(subscriber = id, peer = %handle.peer, total = subscribers.len(), "Subscriber disconnected");
        }
        self.refresh_flag(&subscribers);
        removed.is_some()
    }

    /// Whether anybody is listening. Lock-free.
    pub fn has_subscribers(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Builds the public payload for one reading: the reading's wire fields,
    /// minus `ElectricityUsage` unless configured, plus `timestamp`.
    pub fn payload(&self, stamped: &StampedReading) -> Result<Value, serde_json::Error> {
        let mut payload = serde_json::to_value(&stamped.reading)?;
        if let Value::Object(fields) = &mut payload {
            if !self.options.include_electricity_usage {
                fields.remove(ELECTRICITY_USAGE);
            }
            fields.insert("timestamp".to_string(), Value::String(stamped.timestamp()));
        }
        Ok(payload)
    }

    /// # Broadcast
    ///
    /// Pushes one reading to every current subscriber.
    ///
    /// ## Logic:
    /// 1.  With no subscribers, returns immediately: no serialization, no send attempt.
    /// 2.  Renders the payload once into an `Arc<str>`.
    /// 3.  `try_send`s a clone of the `Arc` to each subscriber queue.
    /// 4.  Subscribers whose queue is full or closed are removed with `retain`; the
    ///     others still receive the payload.
    pub fn broadcast(&self, stamped: &StampedReading) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if !self.has_subscribers() {
            return report;
        }

        let text: Arc<str> = match self.payload(stamped) {
            Ok(payload) => Arc::from(payload.to_string()),
            Err(e) => {
                tracing::error!(home = stamped.reading.home_id, "Failed to render payload: {}", e);
                return report;
            }
        };

        let mut subscribers = self.lock();
        subscribers.retain(|&id, handle| {
            report.attempted += 1;
            match handle.sender.try_send(Arc::clone(&text)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, peer = %handle.peer, "Subscriber queue full, dropping slow subscriber");
                    report.dropped.push(DeliveryError::Lagging(id));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::info!(subscriber = id, peer = %handle.peer, "Subscriber gone, removing");
                    report.dropped.push(DeliveryError::Disconnected(id));
                    false
                }
            }
        });
        self.refresh_flag(&subscribers);
        report
    }

    fn refresh_flag(&self, subscribers: &HashMap<SubscriberId, SubscriberHandle>) {
        let now_active = !subscribers.is_empty();
        if self.active.swap(now_active, Ordering::AcqRel) && !now_active {
            tracing::info!("Last subscriber left, broadcasting paused");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reading::{Reading, Stamper};
    use chrono::{Local, TimeZone};
    use serde_json::{json, Number};

    fn stamped() -> StampedReading {
        let reading = Reading {
            home_id: 1,
            water_level: Number::from(55),
            electricity_usage: Number::from_f64(120.5).unwrap(),
            power: Number::from_f64(30.2).unwrap(),
            pump_running: true,
        };
        let at = Local.with_ymd_and_hms(2024, 10, 1, 8, 0, 0).unwrap();
        Stamper::new().stamp_at(reading, at)
    }

    #[test]
    fn empty_hub_makes_no_send_attempts() {
        let hub = BroadcastHub::new(HubOptions::default());
        assert!(!hub.has_subscribers());

        let report = hub.broadcast(&stamped());
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(report.attempted, 0);
    }

    #[test]
    fn flag_follows_membership() {
        let hub = BroadcastHub::new(HubOptions::default());
        let a = hub.connect("a");
        let b = hub.connect("b");
        assert!(hub.has_subscribers());
        assert_eq!(hub.subscriber_count(), 2);

        assert!(hub.disconnect(a.id));
        assert!(hub.has_subscribers());
        assert!(hub.disconnect(b.id));
        assert!(!hub.has_subscribers());
        assert!(!hub.disconnect(b.id));

        let _c = hub.connect("c");
        assert!(hub.has_subscribers());
    }

    #[test]
    fn payload_excludes_electricity_by_default() {
        let hub = BroadcastHub::new(HubOptions::default());
        let payload = hub.payload(&stamped()).unwrap();
        assert_eq!(
            payload,
            json!({
                "HomeID": 1,
                "CurrentWaterLevel": 55,
                "Power": 30.2,
                "PumpRunningStatus": true,
                "timestamp": "2024-10-01 08:00:00"
            })
        );
    }

    #[test]
    fn payload_can_include_electricity() {
        let hub = BroadcastHub::new(HubOptions {
            include_electricity_usage: true,
            ..HubOptions::default()
        });
        let payload = hub.payload(&stamped()).unwrap();
        assert_eq!(payload["ElectricityUsage"], json!(120.5));
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_block_others() {
        let hub = BroadcastHub::new(HubOptions::default());
        let a = hub.connect("a");
        let mut b = hub.connect("b");
        drop(a.receiver);

        let report = hub.broadcast(&stamped());
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![DeliveryError::Disconnected(a.id)]);

        let text = b.receiver.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["HomeID"], json!(1));

        assert_eq!(hub.subscriber_count(), 1);
        assert!(!hub.disconnect(a.id));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped() {
        let hub = BroadcastHub::new(HubOptions {
            queue_capacity: 1,
            ..HubOptions::default()
        });
        let mut slow = hub.connect("slow");
        let mut fast = hub.connect("fast");

        hub.broadcast(&stamped());
        assert!(fast.receiver.recv().await.is_some());

        let report = hub.broadcast(&stamped());
        assert_eq!(report.dropped, vec![DeliveryError::Lagging(slow.id)]);
        assert_eq!(report.delivered, 1);
        assert!(fast.receiver.recv().await.is_some());

        // The first payload is still queued, then the queue reports the drop.
        assert!(slow.receiver.recv().await.is_some());
        assert!(slow.receiver.recv().await.is_none());
    }

    #[test]
    fn last_failure_empties_the_set() {
        let hub = BroadcastHub::new(HubOptions::default());
        let only = hub.connect("only");
        drop(only.receiver);

        hub.broadcast(&stamped());
        assert!(!hub.has_subscribers());
        assert_eq!(hub.broadcast(&stamped()).attempted, 0);
    }
}
