use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;

use super::{drop_regressions, JobStateStore};
use crate::db::{Database, DatabaseError};
use crate::error::StoreError;
use crate::job::record::field;
use crate::job::{Job, JobProgressRecord, RecordUpdate};

/// [`JobStateStore`] backed by the `job_fields` table.
#[derive(Clone)]
pub struct SqliteStateStore {
    db: Database,
}

impl SqliteStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn load_fields(
    conn: &rusqlite::Connection,
    job_id: &str,
) -> Result<HashMap<String, String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT field, value FROM job_fields WHERE job_id = ?1")?;
    let rows = stmt.query_map([job_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut fields = HashMap::new();
    for row in rows {
        let (name, value) = row?;
        fields.insert(name, value);
    }
    Ok(fields)
}

impl JobStateStore for SqliteStateStore {
    fn initialize(&self, job: &Job) -> Result<JobProgressRecord, StoreError> {
        let record = JobProgressRecord::queued(job, Utc::now());
        let fields = record.to_fields()?;

        self.db.transaction(|tx| {
            tx.execute("DELETE FROM job_fields WHERE job_id = ?1", [&job.id])?;
            let mut stmt =
                tx.prepare("INSERT INTO job_fields (job_id, field, value) VALUES (?1, ?2, ?3)")?;
            for (name, value) in &fields {
                stmt.execute(params![job.id, name, value])?;
            }
            Ok(())
        })?;

        log::debug!("Initialized job record {}", job.id);
        Ok(record)
    }

    fn update(&self, job_id: &str, update: &RecordUpdate) -> Result<(), StoreError> {
        let fields = update.to_fields()?;

        let found = self.db.transaction(|tx| {
            let current = load_fields(tx, job_id)?;
            if current.is_empty() {
                return Ok(false);
            }

            let mut fields = drop_regressions(job_id, &current, fields);
            fields.push((field::UPDATED_AT, Utc::now().to_rfc3339()));

            let mut stmt = tx.prepare(
                "INSERT INTO job_fields (job_id, field, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(job_id, field) DO UPDATE SET value = excluded.value",
            )?;
            for (name, value) in &fields {
                stmt.execute(params![job_id, name, value])?;
            }
            Ok(true)
        })?;

        if found {
            Ok(())
        } else {
            Err(StoreError::UnknownJob(job_id.to_string()))
        }
    }

    fn read(&self, job_id: &str) -> Result<Option<JobProgressRecord>, StoreError> {
        let fields = self.db.with_conn(|conn| load_fields(conn, job_id))?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(JobProgressRecord::from_fields(job_id, &fields)?))
    }
}
