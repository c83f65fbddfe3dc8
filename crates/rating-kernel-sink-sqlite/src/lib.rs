use std::path::Path;

use anyhow::{Context, Result};
use rating_kernel_core::{KernelError, ScoreSink};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const CREATE_SCORE_QUEUE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS score_queue (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  payload TEXT NOT NULL,
  enqueued_at TEXT NOT NULL
);
";

/// SQLite-backed append-only queue for serialized score records.
///
/// The kernel treats the queue as opaque: payloads go in via single appends
/// and are never re-read by the scoring path. The read side here exists for
/// operator tooling only; consumption and aggregation belong to a separate
/// worker.
pub struct SqliteSink {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct QueuedScore {
    pub id: i64,
    pub payload: String,
    pub enqueued_at: String,
}

impl SqliteSink {
    /// Open (creating if needed) the score queue database.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened, pragmas cannot be
    /// applied, or the queue table cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open score queue at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        conn.execute_batch(CREATE_SCORE_QUEUE_SQL).context("failed to create score_queue table")?;

        Ok(Self { conn })
    }

    /// Number of queued records.
    ///
    /// # Errors
    /// Returns an error when the queue table cannot be queried.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM score_queue", [], |row| row.get(0))
            .context("failed to count score_queue rows")?;
        usize::try_from(count).context("score_queue count does not fit usize")
    }

    /// Whether the queue holds no records.
    ///
    /// # Errors
    /// Returns an error when the queue table cannot be queried.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// List queued records in append order, oldest first.
    ///
    /// # Errors
    /// Returns an error when the queue table cannot be queried.
    pub fn list(&self, limit: usize) -> Result<Vec<QueuedScore>> {
        let mut statement = self
            .conn
            .prepare("SELECT id, payload, enqueued_at FROM score_queue ORDER BY id ASC LIMIT ?1")
            .context("failed to prepare score_queue listing")?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = statement
            .query_map(params![limit], |row| {
                Ok(QueuedScore {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    enqueued_at: row.get(2)?,
                })
            })
            .context("failed to query score_queue rows")?;

        let mut queued = Vec::new();
        for row in rows {
            queued.push(row.context("failed to read score_queue row")?);
        }
        Ok(queued)
    }
}

impl ScoreSink for SqliteSink {
    fn append(&mut self, payload: &str) -> Result<(), KernelError> {
        let enqueued_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| KernelError::SinkWrite(format!("timestamp format failed: {err}")))?;

        self.conn
            .execute(
                "INSERT INTO score_queue (payload, enqueued_at) VALUES (?1, ?2)",
                params![payload, enqueued_at],
            )
            .map_err(|err| KernelError::SinkWrite(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("ratingkernel-sink-{}.sqlite3", ulid::Ulid::new()))
    }

    fn open_sink(path: &Path) -> SqliteSink {
        match SqliteSink::open(path) {
            Ok(sink) => sink,
            Err(err) => panic!("sink should open: {err}"),
        }
    }

    // Test IDs: TSNK-001
    #[test]
    fn appends_are_listed_in_fifo_order() {
        let path = unique_temp_db_path();
        let mut sink = open_sink(&path);

        for payload in ["first", "second", "third"] {
            if let Err(err) = sink.append(payload) {
                panic!("append should succeed: {err}");
            }
        }

        let queued = match sink.list(10) {
            Ok(queued) => queued,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert_eq!(
            queued.iter().map(|row| row.payload.as_str()).collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );
        assert!(queued.windows(2).all(|pair| pair[0].id < pair[1].id));

        let _ = std::fs::remove_file(&path);
    }

    // Test IDs: TSNK-002
    #[test]
    fn payloads_are_stored_opaquely() {
        let path = unique_temp_db_path();
        let mut sink = open_sink(&path);

        let payload = r#"{"voter_id":"cafe","distancia_manhattan":"1","distancia_pearson":"0"}"#;
        if let Err(err) = sink.append(payload) {
            panic!("append should succeed: {err}");
        }

        let queued = match sink.list(1) {
            Ok(queued) => queued,
            Err(err) => panic!("list should succeed: {err}"),
        };
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload, payload);

        let value: serde_json::Value = match serde_json::from_str(&queued[0].payload) {
            Ok(value) => value,
            Err(err) => panic!("payload should round-trip as JSON: {err}"),
        };
        assert_eq!(value.get("voter_id").and_then(serde_json::Value::as_str), Some("cafe"));

        let _ = std::fs::remove_file(&path);
    }

    // Test IDs: TSNK-003
    #[test]
    fn len_tracks_appends() {
        let path = unique_temp_db_path();
        let mut sink = open_sink(&path);

        assert_eq!(sink.is_empty().ok(), Some(true));
        for index in 0..5 {
            if let Err(err) = sink.append(&format!("payload-{index}")) {
                panic!("append should succeed: {err}");
            }
        }
        assert_eq!(sink.len().ok(), Some(5));

        let _ = std::fs::remove_file(&path);
    }

    // Test IDs: TSNK-004
    #[test]
    fn reopening_preserves_queued_records() {
        let path = unique_temp_db_path();
        {
            let mut sink = open_sink(&path);
            if let Err(err) = sink.append("durable") {
                panic!("append should succeed: {err}");
            }
        }

        let reopened = open_sink(&path);
        assert_eq!(reopened.len().ok(), Some(1));

        let _ = std::fs::remove_file(&path);
    }
}
