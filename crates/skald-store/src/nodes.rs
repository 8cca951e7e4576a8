//! Versioned analysis nodes.
//!
//! A node is one unit of analysis output, keyed `(id, version)`.
//! Reanalysis inserts the next version under the same id; analysis
//! columns are never updated in place. The single exception is
//! `last_connection_at`, which is scheduler bookkeeping stamped when a
//! connection-discovery job is enqueued for the node.

use anyhow::{bail, Context};
use rusqlite::{params, OptionalExtension};
use skald_core::clock::{now_rfc3339, now_unix};
use skald_core::NodeId;

use crate::store::SqliteStore;

/// One row of the `nodes` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub version: i64,
    pub analyzer_version: i64,
    pub session_file: String,
    pub segment_start: Option<String>,
    pub segment_end: Option<String>,
    pub payload: serde_json::Value,
    pub analyzed_at: String,
    pub last_connection_at: Option<String>,
}

impl NodeRecord {
    pub fn new(
        id: impl Into<NodeId>,
        version: i64,
        analyzer_version: i64,
        session_file: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            analyzer_version,
            session_file: session_file.into(),
            segment_start: None,
            segment_end: None,
            payload,
            analyzed_at: now_rfc3339(),
            last_connection_at: None,
        }
    }

    pub fn with_segment(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.segment_start = start;
        self.segment_end = end;
        self
    }
}

impl SqliteStore {
    /// Insert one node version. Fails on a duplicate `(id, version)`.
    pub fn insert_node(&self, node: &NodeRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&node.payload)?;
        self.conn()
            .execute(
                "INSERT INTO nodes (
                    id, version, analyzer_version, session_file,
                    segment_start, segment_end, payload, analyzed_at, last_connection_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    node.id,
                    node.version,
                    node.analyzer_version,
                    node.session_file,
                    node.segment_start,
                    node.segment_end,
                    payload,
                    node.analyzed_at,
                    node.last_connection_at,
                ],
            )
            .with_context(|| format!("insert node {} v{}", node.id, node.version))?;
        tracing::debug!(node_id = %node.id, version = node.version, "node stored");
        Ok(())
    }

    /// Highest version of a node, or `None` if the id is unknown.
    pub fn latest_node(&self, id: &str) -> anyhow::Result<Option<NodeRecord>> {
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id = ?1
                     ORDER BY n.version DESC LIMIT 1"
                ),
                params![id],
                map_node_row,
            )
            .optional()?;
        row.map(row_to_node).transpose()
    }

    /// Latest node versions whose analyzer is older than `current`,
    /// oldest analysis first. Feeds the reanalysis batch.
    pub fn stale_nodes(&self, current: i64, limit: u32) -> anyhow::Result<Vec<NodeRecord>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes n
             JOIN (SELECT id, MAX(version) AS version FROM nodes GROUP BY id) latest
               ON n.id = latest.id AND n.version = latest.version
             WHERE n.analyzer_version < ?1
             ORDER BY n.analyzed_at ASC, n.id ASC
             LIMIT ?2"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![current, limit], map_node_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(row_to_node)
            .collect()
    }

    /// Latest node versions analyzed within the lookback window whose
    /// last connection pass is absent or older than the cooldown.
    pub fn connection_candidates(
        &self,
        lookback_secs: i64,
        cooldown_secs: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<NodeRecord>> {
        let now = now_unix();
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes n
             JOIN (SELECT id, MAX(version) AS version FROM nodes GROUP BY id) latest
               ON n.id = latest.id AND n.version = latest.version
             WHERE CAST(strftime('%s', n.analyzed_at) AS INTEGER) >= ?1
               AND (n.last_connection_at IS NULL
                    OR CAST(strftime('%s', n.last_connection_at) AS INTEGER) <= ?2)
             ORDER BY n.analyzed_at DESC, n.id ASC
             LIMIT ?3"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![now - lookback_secs, now - cooldown_secs, limit],
            map_node_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(row_to_node)
            .collect()
    }

    /// Stamp `last_connection_at` on every version of a node, so a pending
    /// connection-discovery job suppresses re-triggering.
    pub fn touch_connection(&self, id: &str) -> anyhow::Result<()> {
        let updated = self.conn().execute(
            "UPDATE nodes SET last_connection_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), id],
        )?;
        if updated == 0 {
            bail!("node {id} not found");
        }
        Ok(())
    }

    /// Number of distinct node ids.
    pub fn count_nodes(&self) -> anyhow::Result<u64> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(DISTINCT id) FROM nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ── Row mapping ──

const NODE_COLUMNS: &str = "n.id, n.version, n.analyzer_version, n.session_file, \
     n.segment_start, n.segment_end, n.payload, n.analyzed_at, n.last_connection_at";

struct NodeRow {
    id: String,
    version: i64,
    analyzer_version: i64,
    session_file: String,
    segment_start: Option<String>,
    segment_end: Option<String>,
    payload_str: String,
    analyzed_at: String,
    last_connection_at: Option<String>,
}

fn map_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        version: row.get(1)?,
        analyzer_version: row.get(2)?,
        session_file: row.get(3)?,
        segment_start: row.get(4)?,
        segment_end: row.get(5)?,
        payload_str: row.get(6)?,
        analyzed_at: row.get(7)?,
        last_connection_at: row.get(8)?,
    })
}

fn row_to_node(row: NodeRow) -> anyhow::Result<NodeRecord> {
    let payload: serde_json::Value = serde_json::from_str(&row.payload_str)
        .with_context(|| format!("corrupt payload for node {} v{}", row.id, row.version))?;
    Ok(NodeRecord {
        id: row.id,
        version: row.version,
        analyzer_version: row.analyzer_version,
        session_file: row.session_file,
        segment_start: row.segment_start,
        segment_end: row.segment_end,
        payload,
        analyzed_at: row.analyzed_at,
        last_connection_at: row.last_connection_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skald_core::clock::format_unix;
    use skald_core::new_node_id;

    fn tmp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_or_create(&dir.path().join("skald.db")).unwrap();
        (dir, store)
    }

    fn node(id: &str, version: i64, analyzer_version: i64) -> NodeRecord {
        NodeRecord::new(
            id,
            version,
            analyzer_version,
            "/tmp/s.jsonl",
            serde_json::json!({"summary": "did things"}),
        )
    }

    #[test]
    fn insert_and_load_latest() {
        let (_dir, store) = tmp_store();
        let id = new_node_id();
        store.insert_node(&node(&id, 1, 1)).unwrap();
        store.insert_node(&node(&id, 2, 2)).unwrap();

        let latest = store.latest_node(&id).unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.analyzer_version, 2);
        assert_eq!(latest.payload["summary"], "did things");

        assert!(store.latest_node("node_unknown").unwrap().is_none());
    }

    #[test]
    fn duplicate_version_rejected() {
        let (_dir, store) = tmp_store();
        let id = new_node_id();
        store.insert_node(&node(&id, 1, 1)).unwrap();
        assert!(store.insert_node(&node(&id, 1, 2)).is_err());
    }

    #[test]
    fn segment_bounds_roundtrip() {
        let (_dir, store) = tmp_store();
        let id = new_node_id();
        let rec = node(&id, 1, 1).with_segment(Some("rec_1".into()), Some("rec_9".into()));
        store.insert_node(&rec).unwrap();

        let loaded = store.latest_node(&id).unwrap().unwrap();
        assert_eq!(loaded.segment_start.as_deref(), Some("rec_1"));
        assert_eq!(loaded.segment_end.as_deref(), Some("rec_9"));
    }

    #[test]
    fn stale_nodes_sees_only_latest_versions() {
        let (_dir, store) = tmp_store();
        let a = new_node_id();
        let b = new_node_id();
        store.insert_node(&node(&a, 1, 1)).unwrap();
        store.insert_node(&node(&a, 2, 2)).unwrap();
        store.insert_node(&node(&b, 1, 1)).unwrap();

        // a's latest is already at analyzer 2; only b is stale.
        let stale = store.stale_nodes(2, 10).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, b);
        assert_eq!(stale[0].version, 1);

        // Against analyzer 3, both latest versions are stale.
        let stale = store.stale_nodes(3, 10).unwrap();
        assert_eq!(stale.len(), 2);

        let stale = store.stale_nodes(3, 1).unwrap();
        assert_eq!(stale.len(), 1, "batch limit respected");
    }

    #[test]
    fn connection_candidates_respect_lookback_and_cooldown() {
        let (_dir, store) = tmp_store();
        let hour = 3600;
        let day = 24 * hour;
        let now = now_unix();

        // Fresh node, never connected: candidate.
        let fresh = new_node_id();
        let mut rec = node(&fresh, 1, 1);
        rec.analyzed_at = format_unix(now - hour);
        store.insert_node(&rec).unwrap();

        // Fresh node connected an hour ago: inside cooldown, excluded.
        let cooling = new_node_id();
        let mut rec = node(&cooling, 1, 1);
        rec.analyzed_at = format_unix(now - hour);
        rec.last_connection_at = Some(format_unix(now - hour));
        store.insert_node(&rec).unwrap();

        // Old node outside the lookback window: excluded.
        let ancient = new_node_id();
        let mut rec = node(&ancient, 1, 1);
        rec.analyzed_at = format_unix(now - 8 * day);
        store.insert_node(&rec).unwrap();

        // Connected 25h ago with a 24h cooldown: candidate again.
        let cooled = new_node_id();
        let mut rec = node(&cooled, 1, 1);
        rec.analyzed_at = format_unix(now - 2 * day);
        rec.last_connection_at = Some(format_unix(now - 25 * hour));
        store.insert_node(&rec).unwrap();

        let candidates = store.connection_candidates(7 * day, day, 10).unwrap();
        let ids: Vec<&str> = candidates.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&fresh.as_str()));
        assert!(ids.contains(&cooled.as_str()));
        assert!(!ids.contains(&cooling.as_str()));
        assert!(!ids.contains(&ancient.as_str()));
        // Newest analysis first.
        assert_eq!(ids[0], fresh.as_str());
    }

    #[test]
    fn touch_connection_stamps_all_versions() {
        let (_dir, store) = tmp_store();
        let id = new_node_id();
        store.insert_node(&node(&id, 1, 1)).unwrap();
        store.insert_node(&node(&id, 2, 1)).unwrap();

        store.touch_connection(&id).unwrap();
        let latest = store.latest_node(&id).unwrap().unwrap();
        assert!(latest.last_connection_at.is_some());

        assert!(store.touch_connection("node_missing").is_err());
    }

    #[test]
    fn count_nodes_is_distinct_ids() {
        let (_dir, store) = tmp_store();
        let id = new_node_id();
        store.insert_node(&node(&id, 1, 1)).unwrap();
        store.insert_node(&node(&id, 2, 1)).unwrap();
        store.insert_node(&node(&new_node_id(), 1, 1)).unwrap();
        assert_eq!(store.count_nodes().unwrap(), 2);
    }
}
