//! File-backed durable log.
//!
//! An append-only file holding a format header followed by length-prefixed
//! MessagePack records. One process appends through [`FileLog`]; any number of
//! [`FileConsumer`]s, in the same process or another one, tail it.

use async_trait::async_trait;
use bytes::BytesMut;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use trackhub_protocol::codec::{self, HEADER_SIZE};
use trackhub_protocol::{LocationEvent, LogRecord, ProtocolError};

use crate::traits::{LogConsumer, LogError, LogPublisher, StartFrom};

/// File log configuration.
#[derive(Debug, Clone)]
pub struct FileLogConfig {
    /// Path of the log file.
    pub path: PathBuf,
    /// Call `fsync` after every appended record.
    pub sync: bool,
    /// How often an idle consumer checks the file for growth.
    pub poll_interval: Duration,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trackhub.log"),
            sync: false,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// How long an opener waits for a concurrent creator to write the header
/// before treating an empty file as abandoned.
const HEADER_WAIT: Duration = Duration::from_millis(500);

/// Validate the header of the file at `path`.
///
/// Returns `Ok(false)` while fewer than [`HEADER_SIZE`] bytes exist.
async fn has_header(path: &Path) -> Result<bool, LogError> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() < HEADER_SIZE as u64 {
        return Ok(false);
    }

    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header).await?;
    codec::decode_header(&header)?;
    Ok(true)
}

/// Open the log for appending, creating it with a header if it is missing.
///
/// Only the opener whose `create_new` succeeds writes the header; everyone
/// else validates it.
async fn create_or_validate(path: &Path, poll_interval: Duration) -> Result<File, LogError> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(mut file) => {
            file.write_all(&codec::encode_header()).await?;
            file.flush().await?;
            debug!(path = %path.display(), "Created log file");
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let deadline = Instant::now() + HEADER_WAIT;
            while !has_header(path).await? {
                if Instant::now() < deadline {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }

                let mut file = OpenOptions::new().append(true).open(path).await?;
                if file.metadata().await?.len() != 0 {
                    return Err(ProtocolError::InvalidHeader.into());
                }
                // Left empty by an interrupted create.
                file.write_all(&codec::encode_header()).await?;
                file.flush().await?;
                warn!(path = %path.display(), "Wrote header to empty log file");
                break;
            }
        }
        Err(e) => return Err(e.into()),
    }

    Ok(OpenOptions::new().append(true).open(path).await?)
}

/// Append side of a file log.
pub struct FileLog {
    config: FileLogConfig,
    file: Mutex<File>,
    /// End offset after the latest append, for in-process consumers.
    appended: watch::Sender<u64>,
}

impl FileLog {
    /// Open (or create) the log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has a foreign header.
    pub async fn open(config: FileLogConfig) -> Result<Self, LogError> {
        let file = create_or_validate(&config.path, config.poll_interval).await?;
        let end = file.metadata().await?.len();
        let (appended, _) = watch::channel(end);

        info!(path = %config.path.display(), bytes = end, "File log opened");

        Ok(Self {
            config,
            file: Mutex::new(file),
            appended,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Create a consumer of this log.
    ///
    /// Starting from the end is exact here: the append lock is held while the
    /// end offset is taken, so the consumer never lands inside a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for reading.
    pub async fn consumer(
        &self,
        start: StartFrom,
        shutdown: watch::Receiver<bool>,
    ) -> Result<FileConsumer, LogError> {
        let file = self.file.lock().await;
        let end = file.metadata().await?.len();
        let offset = match start {
            StartFrom::Beginning => HEADER_SIZE as u64,
            StartFrom::End => end,
        };
        let mut consumer =
            FileConsumer::at_offset(&self.config.path, offset, self.config.poll_interval, shutdown)
                .await?;
        consumer.appended = Some(self.appended.subscribe());
        Ok(consumer)
    }
}

#[async_trait]
impl LogPublisher for FileLog {
    async fn publish(&self, event: &LocationEvent) -> Result<(), LogError> {
        let data = codec::encode(&LogRecord::new(event.clone()))?;

        let mut file = self.file.lock().await;
        file.write_all(&data).await?;
        file.flush().await?;
        if self.config.sync {
            file.sync_data().await?;
        }
        let end = file.metadata().await?.len();
        drop(file);

        self.appended.send_replace(end);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

enum Wake {
    Shutdown,
    Appended,
    Poll,
}

/// Tailing reader of a file log.
pub struct FileConsumer {
    file: File,
    buffer: BytesMut,
    poll_interval: Duration,
    appended: Option<watch::Receiver<u64>>,
    shutdown: watch::Receiver<bool>,
    stopping: bool,
}

impl FileConsumer {
    /// Open a consumer on `path`.
    ///
    /// Use this from a process that does not own the [`FileLog`]. The consumer
    /// never writes: until the appending process has created the file and its
    /// header, this polls every `poll_interval`. Starting from the end uses the
    /// file length once the header is there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file has a foreign header, or
    /// [`LogError::Closed`] if shutdown is requested while waiting.
    pub async fn open(
        path: impl AsRef<Path>,
        start: StartFrom,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Self, LogError> {
        let path = path.as_ref();
        let mut waiting = false;

        loop {
            match has_header(path).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(LogError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            if !waiting {
                info!(path = %path.display(), "Waiting for log file");
                waiting = true;
            }
            if *shutdown.borrow() {
                return Err(LogError::Closed);
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(LogError::Closed);
                    }
                }
                () = tokio::time::sleep(poll_interval) => {}
            }
        }

        let end = tokio::fs::metadata(path).await?.len();
        let offset = match start {
            StartFrom::Beginning => HEADER_SIZE as u64,
            StartFrom::End => end,
        };
        Self::at_offset(path, offset, poll_interval, shutdown).await
    }

    async fn at_offset(
        path: &Path,
        offset: u64,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, LogError> {
        let mut file = File::open(path).await?;

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header).await?;
        codec::decode_header(&header)?;
        file.seek(SeekFrom::Start(offset)).await?;

        debug!(path = %path.display(), offset, "File consumer opened");

        Ok(Self {
            file,
            buffer: BytesMut::with_capacity(8192),
            poll_interval,
            appended: None,
            shutdown,
            stopping: false,
        })
    }

    async fn wait_for_growth(&mut self) -> Wake {
        let shutdown = &mut self.shutdown;
        let appended = &mut self.appended;

        tokio::select! {
            // A dropped sender counts as a shutdown request.
            changed = shutdown.changed() => match changed {
                Ok(()) => Wake::Poll,
                Err(_) => Wake::Shutdown,
            },
            Ok(()) = async {
                match appended.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => Wake::Appended,
            () = tokio::time::sleep(self.poll_interval) => Wake::Poll,
        }
    }
}

#[async_trait]
impl LogConsumer for FileConsumer {
    async fn next(&mut self) -> Result<Option<LocationEvent>, LogError> {
        loop {
            match codec::decode_from(&mut self.buffer) {
                Ok(Some(record)) => return Ok(Some(record.event)),
                Ok(None) => {}
                Err(ProtocolError::Decode(e)) => {
                    warn!(error = %e, "Skipping undecodable log record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if self.file.read_buf(&mut self.buffer).await? > 0 {
                continue;
            }

            // Caught up with the writer.
            if self.stopping || *self.shutdown.borrow() {
                return Ok(None);
            }

            match self.wait_for_growth().await {
                Wake::Shutdown => self.stopping = true,
                Wake::Appended | Wake::Poll => {}
            }
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(dir: &tempfile::TempDir) -> FileLogConfig {
        FileLogConfig {
            path: dir.path().join("locations.log"),
            sync: false,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn event(source: &str, n: f64) -> LocationEvent {
        LocationEvent::new(source, n, n, Utc::now())
    }

    #[tokio::test]
    async fn test_replay_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(config(&dir)).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        for i in 0..3 {
            log.publish(&event("bus-1", f64::from(i))).await.unwrap();
        }

        let mut consumer = log.consumer(StartFrom::Beginning, rx).await.unwrap();
        for i in 0..3 {
            let got = consumer.next().await.unwrap().unwrap();
            assert_eq!(got.longitude(), f64::from(i));
        }
    }

    #[tokio::test]
    async fn test_start_from_end_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(config(&dir)).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        log.publish(&event("bus-1", 0.0)).await.unwrap();
        let mut consumer = log.consumer(StartFrom::End, rx).await.unwrap();
        log.publish(&event("bus-1", 1.0)).await.unwrap();

        let got = consumer.next().await.unwrap().unwrap();
        assert_eq!(got.longitude(), 1.0);
    }

    #[tokio::test]
    async fn test_consumer_waits_for_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(FileLog::open(config(&dir)).await.unwrap());
        let (_tx, rx) = watch::channel(false);
        let mut consumer = log.consumer(StartFrom::End, rx).await.unwrap();

        let writer = std::sync::Arc::clone(&log);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.publish(&event("bus-2", 5.0)).await.unwrap();
        });

        let got = tokio::time::timeout(Duration::from_secs(5), consumer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.source_id(), "bus-2");
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream_after_catching_up() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileLog::open(config(&dir)).await.unwrap();
        let (tx, rx) = watch::channel(false);

        let mut consumer = log.consumer(StartFrom::End, rx).await.unwrap();
        log.publish(&event("bus-1", 1.0)).await.unwrap();
        tx.send(true).unwrap();

        assert!(consumer.next().await.unwrap().is_some());
        assert!(consumer.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_separate_consumer_waits_for_publisher() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let (_tx, rx) = watch::channel(false);

        let path = cfg.path.clone();
        let poll_interval = cfg.poll_interval;
        let opening = tokio::spawn(async move {
            FileConsumer::open(&path, StartFrom::Beginning, poll_interval, rx).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!opening.is_finished());
        assert!(!cfg.path.exists());

        let log = FileLog::open(cfg).await.unwrap();
        log.publish(&event("bus-3", 3.0)).await.unwrap();

        let mut consumer = tokio::time::timeout(Duration::from_secs(5), opening)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), consumer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.source_id(), "bus-3");
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let (tx, rx) = watch::channel(false);

        let path = cfg.path.clone();
        let opening = tokio::spawn(async move {
            FileConsumer::open(&path, StartFrom::End, Duration::from_millis(10), rx).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), opening)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(LogError::Closed)));
        assert!(!cfg.path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_write_one_header() {
        for round in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(&dir);
            let (_tx, rx) = watch::channel(false);

            let first = tokio::spawn(FileLog::open(cfg.clone()));
            let second = tokio::spawn(FileLog::open(cfg.clone()));
            let path = cfg.path.clone();
            let reader = tokio::spawn(async move {
                FileConsumer::open(&path, StartFrom::Beginning, Duration::from_millis(1), rx).await
            });

            let first = first.await.unwrap().unwrap();
            let second = second.await.unwrap().unwrap();
            let mut reader = reader.await.unwrap().unwrap();

            let bytes = tokio::fs::read(&cfg.path).await.unwrap();
            assert_eq!(bytes.len(), HEADER_SIZE, "round {round}");
            assert!(codec::decode_header(&bytes).is_ok());

            first.publish(&event("bus-1", 1.0)).await.unwrap();
            second.publish(&event("bus-2", 2.0)).await.unwrap();

            let got = reader.next().await.unwrap().unwrap();
            assert_eq!(got.source_id(), "bus-1");
            let got = reader.next().await.unwrap().unwrap();
            assert_eq!(got.source_id(), "bus-2");
        }
    }

    #[tokio::test]
    async fn test_empty_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        tokio::fs::write(&cfg.path, b"").await.unwrap();

        let log = FileLog::open(cfg.clone()).await.unwrap();
        log.publish(&event("bus-1", 1.0)).await.unwrap();

        let bytes = tokio::fs::read(&cfg.path).await.unwrap();
        assert_eq!(&bytes[..HEADER_SIZE], &codec::encode_header());
    }

    #[tokio::test]
    async fn test_foreign_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        tokio::fs::write(&cfg.path, b"not a trackhub log").await.unwrap();

        assert!(matches!(
            FileLog::open(cfg).await,
            Err(LogError::Protocol(ProtocolError::InvalidHeader))
        ));
    }
}
