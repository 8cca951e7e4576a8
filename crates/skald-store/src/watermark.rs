//! Per-session analysis watermarks.
//!
//! The watermark records how far enqueueing has progressed through one
//! session file: the timestamp of the newest record already covered by a
//! queued job. Readiness evaluation treats everything at or before it as
//! handled, which is what stops an idle file from re-triggering forever.

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use skald_core::clock::now_rfc3339;

use crate::store::SqliteStore;

/// One row of the `watermarks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub session_file: String,
    /// Unix seconds of the newest record covered by an enqueued job.
    pub analyzed_until: i64,
    pub last_entry_id: Option<String>,
    pub updated_at: String,
}

impl SqliteStore {
    pub fn watermark(&self, session_file: &str) -> anyhow::Result<Option<Watermark>> {
        let row = self
            .conn()
            .query_row(
                "SELECT session_file, analyzed_until, last_entry_id, updated_at
                 FROM watermarks WHERE session_file = ?1",
                params![session_file],
                |row| {
                    Ok(Watermark {
                        session_file: row.get(0)?,
                        analyzed_until: row.get(1)?,
                        last_entry_id: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("load watermark for {session_file}"))?;
        Ok(row)
    }

    /// Advance (or create) the watermark for a session file.
    pub fn set_watermark(
        &self,
        session_file: &str,
        analyzed_until: i64,
        last_entry_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO watermarks (session_file, analyzed_until, last_entry_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_file, analyzed_until, last_entry_id, now_rfc3339()],
        )?;
        tracing::debug!(session_file, analyzed_until, "watermark advanced");
        Ok(())
    }

    /// Number of session files with a watermark (sessions seen so far).
    pub fn count_watermarks(&self) -> anyhow::Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM watermarks", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
