//! Asynchronous trial logger that batches records and appends them to a file.
//! Uses a channel-based architecture so the trial loop never waits on disk
//! longer than it takes to enqueue.

use async_trait::async_trait;
use chrono::SecondsFormat;
use linkbandit_core::config::{LogFormat, TrialLogConfig, MAX_LOG_BATCH_SIZE};
use linkbandit_core::{BanditError, BanditResult, TrialRecord, TrialSink};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const CSV_HEADER: &str = "trial,option,reward,timestamp\n";

/// Trial logger with a background batch writer.
pub struct TrialLogger {
    path: PathBuf,
    sender: Mutex<Option<mpsc::Sender<TrialRecord>>>,
    writer: Mutex<Option<JoinHandle<BanditResult<u64>>>>,
}

impl TrialLogger {
    /// Open the log described by `config`, spawning the background writer.
    pub async fn new(config: &TrialLogConfig) -> BanditResult<Self> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| BanditError::invalid_config("trial_log.path is not set"))?;
        Self::open(
            path,
            config.format,
            config.batch_size,
            Duration::from_millis(config.flush_interval_ms),
        )
        .await
    }

    pub async fn open(
        path: impl AsRef<Path>,
        format: LogFormat,
        batch_size: usize,
        flush_interval: Duration,
    ) -> BanditResult<Self> {
        let path = path.as_ref().to_path_buf();
        let batch_size = batch_size.clamp(1, MAX_LOG_BATCH_SIZE);
        let (sender, receiver) = mpsc::channel::<TrialRecord>(batch_size.saturating_mul(16));

        let writer = BatchWriter::open(&path, format).await?;
        let handle = tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await
        });

        info!(path = %path.display(), format = ?format, "trial logger initialized");

        Ok(Self {
            path,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting records, flush everything queued, and return the total
    /// number of records this logger wrote.
    pub async fn close(&self) -> BanditResult<u64> {
        drop(self.sender.lock().take());
        let handle = self.writer.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| BanditError::Io(io::Error::other(e.to_string())))?,
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TrialSink for TrialLogger {
    async fn append(&self, record: &TrialRecord) -> BanditResult<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(BanditError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "trial logger is closed",
            )));
        };
        sender.send(record.clone()).await.map_err(|_| {
            metrics::counter!("trial_log.dropped").increment(1);
            BanditError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "trial log writer has stopped",
            ))
        })?;
        metrics::counter!("trial_log.queued").increment(1);
        Ok(())
    }
}

/// Background writer that batches records and appends them to the log file.
struct BatchWriter {
    file: tokio::fs::File,
    format: LogFormat,
}

impl BatchWriter {
    async fn open(path: &Path, format: LogFormat) -> BanditResult<Self> {
        let is_new = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        if is_new && format == LogFormat::Csv {
            file.write_all(CSV_HEADER.as_bytes()).await?;
        }

        Ok(Self { file, format })
    }

    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<TrialRecord>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> BanditResult<u64> {
        let mut buffer: Vec<TrialRecord> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);
        let mut written = 0u64;

        loop {
            tokio::select! {
                maybe = receiver.recv() => match maybe {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= batch_size {
                            written += self.flush(&mut buffer).await?;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        written += self.flush(&mut buffer).await?;
                    }
                }
            }
        }

        written += self.flush(&mut buffer).await?;
        self.file.sync_all().await?;
        debug!(written, "trial log writer finished");
        Ok(written)
    }

    async fn flush(&mut self, buffer: &mut Vec<TrialRecord>) -> BanditResult<u64> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let count = buffer.len();

        let mut chunk = String::new();
        for record in buffer.iter() {
            match self.format {
                LogFormat::Csv => chunk.push_str(&csv_row(record)),
                LogFormat::JsonLines => {
                    chunk.push_str(&serde_json::to_string(record)?);
                    chunk.push('\n');
                }
            }
        }

        if let Err(e) = self.file.write_all(chunk.as_bytes()).await {
            metrics::counter!("trial_log.flush_errors").increment(1);
            error!(error = %e, count, "failed to append trial batch");
            return Err(e.into());
        }
        self.file.flush().await?;

        metrics::counter!("trial_log.flushed").increment(count as u64);
        debug!(count, "trial batch appended");
        buffer.clear();
        Ok(count as u64)
    }
}

/// One CSV row; an empty reward cell marks a skipped trial.
pub fn csv_row(record: &TrialRecord) -> String {
    let reward = record.reward.map(|r| r.to_string()).unwrap_or_default();
    format!(
        "{},{},{},{}\n",
        record.trial,
        csv_field(&record.option.label()),
        reward,
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
