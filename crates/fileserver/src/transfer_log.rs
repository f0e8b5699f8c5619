//! Durable, append-only record of every transfer attempt
//!
//! Writes are fire-and-forget: [`TransferLog::record`] hands the event to a
//! task on the log's own tracker and returns at once. All statements against
//! the single SQLite connection go through one mutex, held for exactly one
//! insert. Store failures are reported through `tracing` and never reach the
//! request that produced the event.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_log (
    id INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL,
    file_path TEXT NOT NULL,
    status TEXT NOT NULL,
    start_byte INTEGER,
    end_byte INTEGER,
    client_ip TEXT
)
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO transfer_log (timestamp, file_path, status, start_byte, end_byte, client_ip)
VALUES (?, ?, ?, ?, ?, ?)
"#;

const SELECT_EVENTS: &str = r#"
SELECT timestamp, file_path, status, start_byte, end_byte, client_ip
FROM transfer_log
ORDER BY timestamp, id
"#;

/// Transfer log errors
#[derive(Debug, Error)]
pub enum TransferLogError {
    #[error("transfer log store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("transfer log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log was closed; no further events are accepted
    #[error("transfer log is closed")]
    Closed,

    #[error("corrupt transfer log row: {0}")]
    Corrupt(String),
}

/// Lifecycle checkpoint of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Start,
    Complete,
    RangeStart,
    RangeComplete,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Start => "start",
            TransferStatus::Complete => "complete",
            TransferStatus::RangeStart => "range-start",
            TransferStatus::RangeComplete => "range-complete",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = TransferLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(TransferStatus::Start),
            "complete" => Ok(TransferStatus::Complete),
            "range-start" => Ok(TransferStatus::RangeStart),
            "range-complete" => Ok(TransferStatus::RangeComplete),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(TransferLogError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// One persisted transfer checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub timestamp: DateTime<Utc>,
    /// Request path below the token, e.g. `/resources/a.png`
    pub logical_path: String,
    pub status: TransferStatus,
    pub start_byte: Option<u64>,
    pub end_byte: Option<u64>,
    pub client_address: String,
}

impl TransferEvent {
    /// Create an event stamped with the current time
    pub fn new(
        logical_path: impl Into<String>,
        status: TransferStatus,
        client_address: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_path: logical_path.into(),
            status,
            start_byte: None,
            end_byte: None,
            client_address: client_address.into(),
        }
    }

    /// Attach the served byte interval
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.start_byte = Some(start);
        self.end_byte = Some(end);
        self
    }
}

struct LogInner {
    /// `None` once closed
    conn: Mutex<Option<SqliteConnection>>,
    tasks: TaskTracker,
    /// Runtime the log was opened on; writes are spawned here so events can
    /// be submitted from any thread, including `Drop` impls
    runtime: Handle,
    /// Held shared by `record` across its check and spawn, and exclusively
    /// by `close` while flipping it, so no write is spawned after the drain
    closed: RwLock<bool>,
    /// Serializes `flush` and `close` so the tracker is never reopened
    /// underneath a pending close
    drain: Mutex<()>,
}

/// Handle to the transfer log; cheap to clone and shared by all requests
#[derive(Clone)]
pub struct TransferLog {
    inner: Arc<LogInner>,
}

impl TransferLog {
    /// Open (creating if needed) the SQLite store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferLogError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .connect()
            .await?;

        tracing::info!(path = %path.display(), "Transfer log opened");
        Self::with_connection(conn).await
    }

    /// Open a private in-memory store
    pub async fn in_memory() -> Result<Self, TransferLogError> {
        let conn = SqliteConnectOptions::from_str("sqlite::memory:")?
            .connect()
            .await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(mut conn: SqliteConnection) -> Result<Self, TransferLogError> {
        sqlx::query(CREATE_TABLE).execute(&mut conn).await?;

        Ok(Self {
            inner: Arc::new(LogInner {
                conn: Mutex::new(Some(conn)),
                tasks: TaskTracker::new(),
                runtime: Handle::current(),
                closed: RwLock::new(false),
                drain: Mutex::new(()),
            }),
        })
    }

    /// Submit an event without waiting for it to be written
    ///
    /// # Errors
    /// * `TransferLogError::Closed` - the log has already been closed
    pub fn record(&self, event: TransferEvent) -> Result<(), TransferLogError> {
        let closed = self.inner.closed.read();
        if *closed {
            return Err(TransferLogError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        let write = async move {
            if let Err(e) = inner.insert(&event).await {
                tracing::error!(
                    path = %event.logical_path,
                    status = %event.status,
                    "Error logging transfer to database: {}",
                    e
                );
            }
        };
        self.inner.tasks.spawn_on(write, &self.inner.runtime);

        Ok(())
    }

    /// Wait until every event submitted so far has been written
    pub async fn flush(&self) {
        let _drain = self.inner.drain.lock().await;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        if !self.is_closed() {
            self.inner.tasks.reopen();
        }
    }

    /// Stop accepting events, drain pending writes and close the store
    ///
    /// Safe to call more than once; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), TransferLogError> {
        let _drain = self.inner.drain.lock().await;
        *self.inner.closed.write() = true;
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let conn = self.inner.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.close().await?;
            tracing::info!("Transfer log closed");
        }

        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.read()
    }

    /// All persisted events, ordered by timestamp
    pub async fn events(&self) -> Result<Vec<TransferEvent>, TransferLogError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(TransferLogError::Closed)?;
        let rows = sqlx::query(SELECT_EVENTS).fetch_all(&mut *conn).await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Number of persisted events
    pub async fn count(&self) -> Result<u64, TransferLogError> {
        let mut guard = self.inner.conn.lock().await;
        let conn = guard.as_mut().ok_or(TransferLogError::Closed)?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_log")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count.max(0) as u64)
    }
}

impl LogInner {
    async fn insert(&self, event: &TransferEvent) -> Result<(), TransferLogError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(TransferLogError::Closed)?;

        sqlx::query(INSERT_EVENT)
            .bind(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
            .bind(event.logical_path.as_str())
            .bind(event.status.as_str())
            .bind(event.start_byte.and_then(|b| i64::try_from(b).ok()))
            .bind(event.end_byte.and_then(|b| i64::try_from(b).ok()))
            .bind(event.client_address.as_str())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

fn event_from_row(row: &SqliteRow) -> Result<TransferEvent, TransferLogError> {
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| TransferLogError::Corrupt(format!("bad timestamp '{}': {}", timestamp, e)))?
        .with_timezone(&Utc);
    let status: String = row.try_get("status")?;
    let start_byte: Option<i64> = row.try_get("start_byte")?;
    let end_byte: Option<i64> = row.try_get("end_byte")?;
    let client_ip: Option<String> = row.try_get("client_ip")?;

    Ok(TransferEvent {
        timestamp,
        logical_path: row.try_get("file_path")?,
        status: status.parse()?,
        start_byte: start_byte.and_then(|b| u64::try_from(b).ok()),
        end_byte: end_byte.and_then(|b| u64::try_from(b).ok()),
        client_address: client_ip.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_read_back() {
        let log = TransferLog::in_memory().await.unwrap();
        let event = TransferEvent::new("/data.bin", TransferStatus::RangeStart, "10.0.0.7")
            .with_range(0, 5);

        log.record(event.clone()).unwrap();
        log.flush().await;

        let events = log.events().await.unwrap();
        assert_eq!(events.len(), 1);
        let stored = &events[0];
        assert_eq!(stored.logical_path, "/data.bin");
        assert_eq!(stored.status, TransferStatus::RangeStart);
        assert_eq!(stored.start_byte, Some(0));
        assert_eq!(stored.end_byte, Some(5));
        assert_eq!(stored.client_address, "10.0.0.7");
        // Stored at millisecond precision
        assert_eq!(
            stored.timestamp.timestamp_millis(),
            event.timestamp.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_full_transfer_has_no_offsets() {
        let log = TransferLog::in_memory().await.unwrap();
        log.record(TransferEvent::new("/a.txt", TransferStatus::Start, "::1"))
            .unwrap();
        log.flush().await;

        let events = log.events().await.unwrap();
        assert_eq!(events[0].start_byte, None);
        assert_eq!(events[0].end_byte, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_all_persisted() {
        let log = TransferLog::in_memory().await.unwrap();
        let mut handles = Vec::new();

        for i in 0..64u64 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let event = TransferEvent::new(
                    format!("/file-{}.bin", i),
                    TransferStatus::RangeComplete,
                    "127.0.0.1",
                )
                .with_range(i, i + 10);
                log.record(event).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        log.flush().await;

        assert_eq!(log.count().await.unwrap(), 64);
        let events = log.events().await.unwrap();
        let mut paths: Vec<_> = events.iter().map(|e| e.logical_path.clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 64);
        assert!(events.iter().all(|e| e.end_byte == e.start_byte.map(|s| s + 10)));
    }

    #[tokio::test]
    async fn test_events_ordered_by_timestamp() {
        let log = TransferLog::in_memory().await.unwrap();
        let mut late = TransferEvent::new("/late", TransferStatus::Complete, "a");
        let mut early = TransferEvent::new("/early", TransferStatus::Start, "a");
        early.timestamp = late.timestamp - chrono::Duration::seconds(5);
        late.timestamp += chrono::Duration::seconds(5);

        log.record(late).unwrap();
        log.flush().await;
        log.record(early).unwrap();
        log.flush().await;

        let events = log.events().await.unwrap();
        assert_eq!(events[0].logical_path, "/early");
        assert_eq!(events[1].logical_path, "/late");
    }

    #[tokio::test]
    async fn test_record_after_close_fails() {
        let log = TransferLog::in_memory().await.unwrap();
        log.close().await.unwrap();

        let result = log.record(TransferEvent::new("/x", TransferStatus::Start, "a"));
        assert!(matches!(result, Err(TransferLogError::Closed)));
        assert!(log.is_closed());
        assert!(matches!(log.events().await, Err(TransferLogError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_record_keeps_accepted_events() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("database.db");
        let log = TransferLog::open(&db).await.unwrap();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let log = log.clone();
                tokio::spawn(async move {
                    let mut accepted = 0u64;
                    for i in 0.. {
                        let event =
                            TransferEvent::new(format!("/{}/{}", w, i), TransferStatus::Start, "a");
                        match log.record(event) {
                            Ok(()) => accepted += 1,
                            Err(TransferLogError::Closed) => break,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                        tokio::task::yield_now().await;
                    }
                    accepted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.close().await.unwrap();

        let mut accepted = 0;
        for writer in writers {
            accepted += writer.await.unwrap();
        }
        assert!(accepted > 0);

        let reopened = TransferLog::open(&db).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), accepted);
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let log = TransferLog::in_memory().await.unwrap();
        log.close().await.unwrap();
        log.close().await.unwrap();
        log.clone().close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("logs").join("database.db");

        let log = TransferLog::open(&db).await.unwrap();
        for i in 0..20 {
            log.record(TransferEvent::new(format!("/{}", i), TransferStatus::Start, "a"))
                .unwrap();
        }
        log.close().await.unwrap();

        let reopened = TransferLog::open(&db).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 20);
        reopened.close().await.unwrap();
    }

    #[test]
    fn test_status_labels() {
        for status in [
            TransferStatus::Start,
            TransferStatus::Complete,
            TransferStatus::RangeStart,
            TransferStatus::RangeComplete,
            TransferStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
        assert!("done".parse::<TransferStatus>().is_err());
    }
}
