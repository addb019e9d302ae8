//! # Serial Port Frame Source
//!
//! The sensor board prints one JSON object per line over a serial link. This
//! module opens the device with `tokio-serial` and cuts the byte stream into
//! frames on `\n`.
//!
//! Reads are bounded by `read_timeout`. A line that is still incomplete when the
//! timeout fires is kept in an internal buffer and completed on a later poll, so no
//! bytes are lost between cycles.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::core::errors::TransportError;
use crate::ingestors::{Frame, FrameSource};

/// Longest line accepted before the buffer is discarded as garbage.
const MAX_FRAME_LEN: usize = 16 * 1024;

/// How to reach the sensor board.
#[derive(Debug, Clone)]
pub struct SerialOptions {
    /// Device path or port name (`/dev/ttyUSB0`, `COM3`, ...).
    pub path: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Upper bound on a single poll.
    pub read_timeout: Duration,
    /// Pause after opening the port; boards that reset on connect need it.
    pub settle_delay: Duration,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(100),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Newline-delimited frame reader over any async byte stream.
pub struct LineFrameSource<R> {
    reader: Option<BufReader<R>>,
    pending: Vec<u8>,
    read_timeout: Duration,
    label: String,
}

/// The serial flavour of [`LineFrameSource`].
pub type SerialFrameSource = LineFrameSource<SerialStream>;

impl SerialFrameSource {
    /// Opens the device and waits for it to settle. Failure here is fatal for startup.
    pub async fn open(options: &SerialOptions) -> Result<Self, TransportError> {
        let port = tokio_serial::new(&options.path, options.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Open {
                target: options.path.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            "Opened serial port {} at {} baud, settling for {} ms",
            options.path,
            options.baud_rate,
            options.settle_delay.as_millis()
        );
        tokio::time::sleep(options.settle_delay).await;

        Ok(LineFrameSource::new(
            port,
            options.read_timeout,
            format!("serial {} @ {}", options.path, options.baud_rate),
        ))
    }
}

impl<R: AsyncRead + Unpin + Send> LineFrameSource<R> {
    /// Wraps a byte stream.
    pub fn new(reader: R, read_timeout: Duration, label: impl Into<String>) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            pending: Vec::new(),
            read_timeout,
            label: label.into(),
        }
    }

    fn take_line(&mut self) -> Option<Frame> {
        let mut line = std::mem::take(&mut self.pending);
        while line.last().is_some_and(|b| b.is_ascii_whitespace()) {
            line.pop();
        }
        if line.is_empty() {
            None
        } else {
            Some(Frame::from(line))
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for LineFrameSource<R> {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Err(TransportError::Closed(format!("{} already closed", self.label))),
        };

        // `read_until` appends to `pending`, so a timeout leaves the partial line there.
        match timeout(self.read_timeout, reader.read_until(b'\n', &mut self.pending)).await {
            Err(_elapsed) => {
                if self.pending.len() > MAX_FRAME_LEN {
                    let dropped = self.pending.len();
                    self.pending.clear();
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("discarded {} bytes without a line break", dropped),
                    )));
                }
                Ok(None)
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Ok(Ok(0)) => match self.take_line() {
                Some(frame) => Ok(Some(frame)),
                None => Err(TransportError::Closed(format!("{} reached end of stream", self.label))),
            },
            Ok(Ok(_)) => Ok(self.take_line()),
        }
    }

    async fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::info!("Closed {}", self.label);
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
