use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::Result;
use crate::parser::job_type::JobType;

/// A persisted job posting. Identity is `(title, company, posting_date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub posting_date: NaiveDate,
    pub job_type: JobType,
    #[serde(serialize_with = "serialize_tags")]
    pub tags: Vec<String>,
}

impl JobListing {
    /// Tags as stored: comma-joined text.
    pub fn tags_text(&self) -> String {
        self.tags.join(", ")
    }
}

fn serialize_tags<S: serde::Serializer>(tags: &[String], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&tags.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Record store over the `jobs` table. One connection per session.
pub struct JobStore {
    conn: Connection,
    #[cfg(test)]
    close_log: Option<crate::render::testing::EventLog>,
}

impl JobStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // Best effort; Connection::open reports the real failure.
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(JobStore {
            conn,
            #[cfg(test)]
            close_log: None,
        })
    }

    pub fn in_memory() -> Result<Self> {
        let store = JobStore {
            conn: Connection::open_in_memory()?,
            #[cfg(test)]
            close_log: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id           INTEGER PRIMARY KEY,
                title        TEXT NOT NULL,
                company      TEXT NOT NULL,
                location     TEXT NOT NULL,
                posting_date TEXT NOT NULL,
                job_type     TEXT NOT NULL
                             CHECK(job_type IN ('Internship','Contract','Part-Time','Full-Time')),
                tags         TEXT,
                created_at   TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_identity ON jobs(title, company, posting_date);
            ",
        )?;
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn exists(&self, title: &str, company: &str, posting_date: NaiveDate) -> Result<bool> {
        exists_on(&self.conn, title, company, posting_date)
    }

    /// Check-then-insert inside one transaction. Any error rolls the transaction
    /// back when it is dropped uncommitted. Safe only with a single writer.
    pub fn insert(&self, listing: &JobListing) -> Result<InsertOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        if exists_on(&tx, &listing.title, &listing.company, listing.posting_date)? {
            return Ok(InsertOutcome::Duplicate);
        }

        tx.execute(
            "INSERT INTO jobs (title, company, location, posting_date, job_type, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                listing.title,
                listing.company,
                listing.location,
                listing.posting_date,
                listing.job_type.as_str(),
                listing.tags_text(),
            ],
        )?;
        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    }

    pub fn stats(&self) -> Result<Stats> {
        let total: usize = self.conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
        let mut stmt = self
            .conn
            .prepare("SELECT job_type, COUNT(*) FROM jobs GROUP BY job_type ORDER BY job_type")?;
        let by_type = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let newest: Option<NaiveDate> = self
            .conn
            .query_row("SELECT MAX(posting_date) FROM jobs", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(Stats {
            total,
            by_type,
            newest,
        })
    }

    /// Release the connection, surfacing any close error.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        #[cfg(test)]
        if let Some(log) = &self.close_log {
            log.lock().unwrap().push("store closed");
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn with_close_log(mut self, log: crate::render::testing::EventLog) -> Self {
        self.close_log = Some(log);
        self
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn exists_on(conn: &Connection, title: &str, company: &str, posting_date: NaiveDate) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM jobs WHERE title = ?1 AND company = ?2 AND posting_date = ?3 LIMIT 1",
            params![title, company, posting_date],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub by_type: Vec<(String, usize)>,
    pub newest: Option<NaiveDate>,
}
