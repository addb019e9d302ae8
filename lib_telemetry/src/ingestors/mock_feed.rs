//! # Mock Sensor Feed
//!
//! Stands in for the serial device when there is no hardware attached. It emits one
//! JSON frame per `interval`, shaped exactly like the microcontroller's output, so
//! the decoder and everything downstream run unchanged.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::Instant;

use crate::core::errors::TransportError;
use crate::core::reading::{ELECTRICITY_USAGE, HOME_ID, POWER, PUMP_RUNNING, WATER_LEVEL};
use crate::ingestors::{Frame, FrameSource};

/// Synthetic frame generator with a fixed emission cadence.
pub struct MockFrameSource {
    rng: StdRng,
    interval: Duration,
    next_due: Instant,
    emitted: u64,
}

impl MockFrameSource {
    /// Creates a generator. With a `seed` the sequence of frames is reproducible.
    pub fn new(interval: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            interval,
            next_due: Instant::now(),
            emitted: 0,
        }
    }

    /// Number of frames produced so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn generate(&mut self) -> Frame {
        // Two homes, water level as a whole percentage, usage and power as floats.
        let frame = json!({
            HOME_ID: self.rng.random_range(1..=2u64),
            WATER_LEVEL: self.rng.random_range(0..=100u64),
            ELECTRICITY_USAGE: self.rng.random_range(100.0..500.0f64),
            POWER: self.rng.random_range(0.0..100.0f64),
            PUMP_RUNNING: self.rng.random_bool(0.5),
        });
        Frame::from(frame.to_string())
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let now = Instant::now();
        if now < self.next_due {
            return Ok(None);
        }
        self.next_due = now + self.interval;
        self.emitted += 1;
        Ok(Some(self.generate()))
    }

    fn describe(&self) -> String {
        format!("mock feed (every {} ms)", self.interval.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::decode;

    #[tokio::test(start_paused = true)]
    async fn emits_once_per_interval() {
        let mut source = MockFrameSource::new(Duration::from_secs(1), Some(7));

        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(source.next_frame().await.unwrap().is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(source.next_frame().await.unwrap().is_some());
        assert_eq!(source.emitted(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_valid_and_in_range() {
        let mut source = MockFrameSource::new(Duration::from_millis(10), Some(42));
        for _ in 0..200 {
            let frame = source.next_frame().await.unwrap().unwrap();
            let reading = decode(&frame).unwrap();
            assert!((1..=2).contains(&reading.home_id));

            let water = reading.water_level.as_u64().unwrap();
            assert!(water <= 100);
            let usage = reading.electricity_usage.as_f64().unwrap();
            assert!((100.0..500.0).contains(&usage));
            let power = reading.power.as_f64().unwrap();
            assert!((0.0..100.0).contains(&power));

            tokio::time::advance(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_frames() {
        let mut a = MockFrameSource::new(Duration::ZERO, Some(3));
        let mut b = MockFrameSource::new(Duration::ZERO, Some(3));
        for _ in 0..5 {
            assert_eq!(a.next_frame().await.unwrap().unwrap(), b.next_frame().await.unwrap().unwrap());
        }
    }
}
