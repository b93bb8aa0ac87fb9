use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utils::log_msg::LogStream;
use uuid::Uuid;

/// One captured fragment of a job's stdout or stderr.
///
/// Fragment boundaries follow the pipe reads and carry no meaning; readers
/// must not assume line alignment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub data: String,
}

impl LogRecord {
    pub async fn append(pool: &SqlitePool, record: &LogRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO job_logs (job_id, timestamp, stream, data)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(record.job_id)
        .bind(record.timestamp)
        .bind(record.stream)
        .bind(&record.data)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All records of a job in capture order.
    pub async fn find_by_job_id(
        pool: &SqlitePool,
        job_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LogRecord>(
            r#"SELECT job_id, timestamp, stream, data
               FROM job_logs
               WHERE job_id = ?
               ORDER BY timestamp ASC, rowid ASC"#,
        )
        .bind(job_id)
        .fetch_all(pool)
        .await
    }
}

/// Concatenate the data of every record on `stream`, in order.
pub fn concat_stream(records: &[LogRecord], stream: LogStream) -> String {
    records
        .iter()
        .filter(|r| r.stream == stream)
        .map(|r| r.data.as_str())
        .collect()
}
