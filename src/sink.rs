//! Append-only outputs for extracted review batches.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::models::ReviewRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receives each page's admitted records as one batch.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn push_batch(&self, records: &[ReviewRecord]) -> Result<(), SinkError>;
}

/// One JSON object per line, written a whole batch at a time.
pub struct JsonLinesSink {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn append_to(path: &Path) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::from_writer(file))
    }

    pub fn stdout() -> Self {
        Self::from_writer(tokio::io::stdout())
    }

    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
        }
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn push_batch(&self, records: &[ReviewRecord]) -> Result<(), SinkError> {
        // Serialize up front so a bad record never leaves half a batch on disk.
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<ReviewRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in push order.
    pub fn records(&self) -> Vec<ReviewRecord> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(Vec::len)
            .collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn push_batch(&self, records: &[ReviewRecord]) -> Result<(), SinkError> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(records.to_vec());
        Ok(())
    }
}

/// Forwards batches to another sink and ticks a progress bar.
pub struct ProgressSink {
    inner: Arc<dyn RecordSink>,
    progress: ProgressBar,
}

impl ProgressSink {
    pub fn new(inner: Arc<dyn RecordSink>, total: u64) -> Self {
        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} reviews {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { inner, progress }
    }

    pub fn progress(&self) -> &ProgressBar {
        &self.progress
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.progress.finish_with_message(message.into());
    }
}

#[async_trait]
impl RecordSink for ProgressSink {
    async fn push_batch(&self, records: &[ReviewRecord]) -> Result<(), SinkError> {
        self.inner.push_batch(records).await?;
        self.progress.inc(records.len() as u64);
        Ok(())
    }
}
