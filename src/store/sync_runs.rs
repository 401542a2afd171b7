use crate::errors::StoreError;
use crate::store::connection::Database;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub id: i64,
    pub job: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub pages_fetched: Option<i64>,
    pub listings_seen: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Outcome of trying to take the pass guard.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStart {
    Started(i64),
    InProgress(i64),
}

const ABANDONED: &str = "abandoned: lock expired before the run finished";

/// Claims the guard for `job` unless a younger unfinished run holds it.
/// Unfinished runs older than `lock_ttl_secs` are closed as abandoned first.
pub fn start_sync_run(
    db: &Database,
    job: &str,
    now: i64,
    lock_ttl_secs: i64,
) -> Result<RunStart, StoreError> {
    db.with_conn(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            r#"
            UPDATE sync_runs SET finished_at = ?1, success = 0, error_message = ?2
            WHERE job = ?3 AND finished_at IS NULL AND started_at <= ?4
            "#,
            params![now, ABANDONED, job, now - lock_ttl_secs],
        )?;

        let holder: Option<i64> = tx
            .query_row(
                "SELECT id FROM sync_runs WHERE job = ?1 AND finished_at IS NULL ORDER BY started_at DESC LIMIT 1",
                params![job],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(run_id) = holder {
            tx.commit()?;
            return Ok(RunStart::InProgress(run_id));
        }

        tx.execute(
            "INSERT INTO sync_runs (job, started_at, success) VALUES (?1, ?2, 0)",
            params![job, now],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(RunStart::Started(run_id))
    })
}

pub fn end_sync_run(
    db: &Database,
    run_id: i64,
    now: i64,
    pages: usize,
    listings: usize,
    success: bool,
    error: Option<String>,
) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET finished_at = ?1, pages_fetched = ?2, listings_seen = ?3, success = ?4, error_message = ?5 WHERE id = ?6",
            params![now, pages as i64, listings as i64, success, error, run_id],
        )?;
        Ok(())
    })
}

pub fn get_recent_runs(db: &Database, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, job, started_at, finished_at, pages_fetched, listings_seen, success, error_message FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SyncRun {
                id: row.get(0)?,
                job: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                pages_fetched: row.get(4)?,
                listings_seen: row.get(5)?,
                success: row.get(6)?,
                error_message: row.get(7)?,
            })
        })?;

        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?);
        }
        Ok(runs)
    })
}
