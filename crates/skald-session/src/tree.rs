use crate::record::SessionRecord;
use std::collections::HashMap;

/// Parent-pointer tree over a record sequence. Derived and rebuildable;
/// the log file stays the source of truth.
pub struct SessionTree<'a> {
    records: &'a [SessionRecord],
    children: HashMap<&'a str, Vec<usize>>,
    leaf: Option<usize>,
}

impl<'a> SessionTree<'a> {
    pub fn build(records: &'a [SessionRecord]) -> Self {
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            if let Some(parent) = record.parent_id.as_deref() {
                children.entry(parent).or_default().push(idx);
            }
        }
        // Child lists in timestamp order, ids as tiebreaker.
        for list in children.values_mut() {
            list.sort_by(|&a, &b| {
                (records[a].timestamp, records[a].id.as_str())
                    .cmp(&(records[b].timestamp, records[b].id.as_str()))
            });
        }

        // The leaf is the most-recently-timestamped record with no
        // recorded child; id tiebreak keeps it unique and deterministic.
        let leaf = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !children.contains_key(r.id.as_str()))
            .max_by(|(_, a), (_, b)| {
                (a.timestamp, a.id.as_str()).cmp(&(b.timestamp, b.id.as_str()))
            })
            .map(|(idx, _)| idx);

        Self {
            records,
            children,
            leaf,
        }
    }

    /// The active branch tip, if the log has any records.
    pub fn leaf(&self) -> Option<&'a SessionRecord> {
        self.leaf.map(|idx| &self.records[idx])
    }

    pub fn children_of(&self, id: &str) -> Vec<&'a SessionRecord> {
        self.children
            .get(id)
            .map(|list| list.iter().map(|&idx| &self.records[idx]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub(crate) fn record(id: &str, parent: Option<&str>, ts: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            timestamp: OffsetDateTime::parse(ts, &Rfc3339).unwrap(),
            kind: RecordKind::Message,
            payload: serde_json::Value::Null,
            summary: None,
        }
    }

    #[test]
    fn linear_chain_leaf_is_last() {
        let records = vec![
            record("r1", None, "2026-08-01T10:00:00Z"),
            record("r2", Some("r1"), "2026-08-01T10:00:05Z"),
            record("r3", Some("r2"), "2026-08-01T10:00:10Z"),
        ];
        let tree = SessionTree::build(&records);
        assert_eq!(tree.leaf().unwrap().id, "r3");
        assert_eq!(tree.children_of("r1").len(), 1);
    }

    #[test]
    fn branched_tree_leaf_is_newest_childless() {
        // r1 → r2 (old branch tip), r1 → r3 (newer tip)
        let records = vec![
            record("r1", None, "2026-08-01T10:00:00Z"),
            record("r2", Some("r1"), "2026-08-01T10:00:05Z"),
            record("r3", Some("r1"), "2026-08-01T10:05:00Z"),
        ];
        let tree = SessionTree::build(&records);
        assert_eq!(tree.leaf().unwrap().id, "r3");
        assert_eq!(tree.children_of("r1").len(), 2);
        // Child lists sorted by timestamp.
        let kids = tree.children_of("r1");
        assert_eq!(kids[0].id, "r2");
        assert_eq!(kids[1].id, "r3");
    }

    #[test]
    fn exactly_one_leaf_even_on_timestamp_tie() {
        let records = vec![
            record("r1", None, "2026-08-01T10:00:00Z"),
            record("a", Some("r1"), "2026-08-01T10:00:05Z"),
            record("b", Some("r1"), "2026-08-01T10:00:05Z"),
        ];
        let tree = SessionTree::build(&records);
        // Tie broken by id: "b" > "a".
        assert_eq!(tree.leaf().unwrap().id, "b");
    }

    #[test]
    fn empty_log_has_no_leaf() {
        let records: Vec<SessionRecord> = Vec::new();
        let tree = SessionTree::build(&records);
        assert!(tree.leaf().is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn single_record_is_its_own_leaf() {
        let records = vec![record("r1", None, "2026-08-01T10:00:00Z")];
        let tree = SessionTree::build(&records);
        assert_eq!(tree.leaf().unwrap().id, "r1");
        assert_eq!(tree.len(), 1);
    }
}
