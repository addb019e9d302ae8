//! # JSON Lines File Store
//!
//! One stored document per line, appended to a local file. Good enough for a
//! single board without a database, and trivial to load into other tools later.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::connections::ReadingSink;
use crate::core::errors::PersistenceError;
use crate::core::reading::StampedReading;

/// Append-only JSON Lines sink.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonLinesSink {
    /// Opens (creating if needed) the file and its parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        tracing::info!("Appending readings to {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }
}

#[async_trait]
impl ReadingSink for JsonLinesSink {
    async fn append(&mut self, stamped: &StampedReading) -> Result<(), PersistenceError> {
        let file = self.file.as_mut().ok_or_else(|| {
            PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "store already closed"))
        })?;
        let mut line = serde_json::to_vec(&stamped.document())?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.sync_all().await {
                tracing::warn!("Failed to sync {}: {}", self.path.display(), e);
            }
            tracing::info!("Closed {}", self.path.display());
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::decode;
    use crate::core::reading::Stamper;
    use serde_json::Value;

    #[tokio::test]
    async fn appends_one_document_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let mut sink = JsonLinesSink::open(&path).await.unwrap();
        let mut stamper = Stamper::new();

        for home in [1, 2] {
            let raw = format!(
                r#"{{"HomeID":{},"CurrentWaterLevel":40,"ElectricityUsage":200.5,"Power":12.5,"PumpRunningStatus":false}}"#,
                home
            );
            let stamped = stamper.stamp(decode(raw.as_bytes()).unwrap());
            sink.append(&stamped).await.unwrap();
        }
        sink.close().await;

        let text = std::fs::read_to_string(&path).unwrap();
        let docs: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["HomeID"], 1);
        assert_eq!(docs[1]["HomeID"], 2);
        assert_eq!(docs[1]["ElectricityUsage"], 200.5);
        assert!(docs[0]["timestamp"].is_string());
        assert!(docs[0]["ingestedAt"].is_string());
    }

    #[tokio::test]
    async fn append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::open(dir.path().join("r.jsonl")).await.unwrap();
        sink.close().await;

        let raw = br#"{"HomeID":1,"CurrentWaterLevel":1,"ElectricityUsage":1,"Power":1,"PumpRunningStatus":true}"#;
        let stamped = Stamper::new().stamp(decode(raw).unwrap());
        assert!(matches!(sink.append(&stamped).await, Err(PersistenceError::Io(_))));
    }
}
