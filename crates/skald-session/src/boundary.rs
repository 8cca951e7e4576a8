use crate::record::{RecordKind, SessionRecord};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ── Boundary model ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Branch,
    TreeJump,
    Compaction,
    Resume,
}

impl BoundaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryKind::Branch => "branch",
            BoundaryKind::TreeJump => "tree_jump",
            BoundaryKind::Compaction => "compaction",
            BoundaryKind::Resume => "resume",
        }
    }
}

/// A detected segment edge. Derived per scan, never stored; only the
/// watermark of the last boundary turned into a job persists.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub entry_id: String,
    pub timestamp: OffsetDateTime,
    pub previous_entry_id: Option<String>,
}

impl Boundary {
    pub fn ts_unix(&self) -> i64 {
        self.timestamp.unix_timestamp()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundaryConfig {
    /// Gap between consecutive records that marks a resume edge.
    pub resume_gap_secs: i64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            resume_gap_secs: 600,
        }
    }
}

// ── Detection ──

/// Single linear scan classifying every transition. A record may emit
/// more than one boundary kind (a compaction after a long gap emits both
/// compaction and resume). Deterministic: same input, same output.
///
/// Leaf tracking: branch_summary and fork records describe the tree
/// rather than extend it, so they do not advance the tracked leaf. That
/// is what lets "parent differs from the previous record but matches the
/// tracked leaf" pass without a tree_jump.
pub fn detect_boundaries(records: &[SessionRecord], config: &BoundaryConfig) -> Vec<Boundary> {
    let mut boundaries = Vec::new();
    let mut tracked_leaf: Option<&str> = None;
    let mut prev: Option<&SessionRecord> = None;

    for record in records {
        if let Some(prev_record) = prev {
            let gap = record.ts_unix() - prev_record.ts_unix();
            if gap >= config.resume_gap_secs {
                boundaries.push(Boundary {
                    kind: BoundaryKind::Resume,
                    entry_id: record.id.clone(),
                    timestamp: record.timestamp,
                    previous_entry_id: Some(prev_record.id.clone()),
                });
            }

            if let Some(parent) = record.parent_id.as_deref() {
                if parent != prev_record.id && Some(parent) != tracked_leaf {
                    boundaries.push(Boundary {
                        kind: BoundaryKind::TreeJump,
                        entry_id: record.id.clone(),
                        timestamp: record.timestamp,
                        previous_entry_id: Some(prev_record.id.clone()),
                    });
                }
            }
        }

        match record.kind {
            RecordKind::BranchSummary => {
                boundaries.push(Boundary {
                    kind: BoundaryKind::Branch,
                    entry_id: record.id.clone(),
                    timestamp: record.timestamp,
                    previous_entry_id: prev.map(|p| p.id.clone()),
                });
            }
            RecordKind::Compaction => {
                boundaries.push(Boundary {
                    kind: BoundaryKind::Compaction,
                    entry_id: record.id.clone(),
                    timestamp: record.timestamp,
                    previous_entry_id: prev.map(|p| p.id.clone()),
                });
            }
            _ => {}
        }

        if !matches!(record.kind, RecordKind::BranchSummary | RecordKind::Fork) {
            tracked_leaf = Some(record.id.as_str());
        }
        prev = Some(record);
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use time::format_description::well_known::Rfc3339;

    fn record(id: &str, parent: Option<&str>, ts: &str, kind: RecordKind) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            timestamp: OffsetDateTime::parse(ts, &Rfc3339).unwrap(),
            kind,
            payload: serde_json::Value::Null,
            summary: None,
        }
    }

    fn msg(id: &str, parent: Option<&str>, ts: &str) -> SessionRecord {
        record(id, parent, ts, RecordKind::Message)
    }

    #[test]
    fn quiet_linear_chain_has_no_boundaries() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:00:05Z"),
            msg("r3", Some("r2"), "2026-08-01T10:00:10Z"),
        ];
        assert!(detect_boundaries(&records, &BoundaryConfig::default()).is_empty());
    }

    #[test]
    fn branch_summary_emits_branch() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            record(
                "s1",
                Some("r1"),
                "2026-08-01T10:00:05Z",
                RecordKind::BranchSummary,
            ),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, BoundaryKind::Branch);
        assert_eq!(boundaries[0].entry_id, "s1");
        assert_eq!(boundaries[0].previous_entry_id.as_deref(), Some("r1"));
    }

    #[test]
    fn silent_jump_emits_tree_jump() {
        // r4 continues from r1 while the tip is r3: a jump with no summary.
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:00:05Z"),
            msg("r3", Some("r2"), "2026-08-01T10:00:10Z"),
            msg("r4", Some("r1"), "2026-08-01T10:00:15Z"),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, BoundaryKind::TreeJump);
        assert_eq!(boundaries[0].entry_id, "r4");
        assert_eq!(boundaries[0].previous_entry_id.as_deref(), Some("r3"));
    }

    #[test]
    fn continuing_past_a_summary_is_not_a_jump() {
        // The summary record does not advance the leaf, so r3's parent
        // (r2) still matches the tracked leaf.
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:00:05Z"),
            record(
                "s1",
                Some("r2"),
                "2026-08-01T10:00:06Z",
                RecordKind::BranchSummary,
            ),
            msg("r3", Some("r2"), "2026-08-01T10:00:10Z"),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 1); // only the branch, no tree_jump
        assert_eq!(boundaries[0].kind, BoundaryKind::Branch);
    }

    #[test]
    fn continuing_past_a_fork_marker_is_not_a_jump() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            record("f1", Some("r1"), "2026-08-01T10:00:02Z", RecordKind::Fork),
            msg("r2", Some("r1"), "2026-08-01T10:00:05Z"),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert!(boundaries.is_empty());
    }

    #[test]
    fn compaction_emits_compaction() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            record(
                "c1",
                Some("r1"),
                "2026-08-01T10:00:05Z",
                RecordKind::Compaction,
            ),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, BoundaryKind::Compaction);
    }

    #[test]
    fn long_gap_emits_resume() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:15:00Z"), // 15 min gap
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, BoundaryKind::Resume);
        assert_eq!(boundaries[0].entry_id, "r2");
    }

    #[test]
    fn gap_below_threshold_is_silent() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:09:59Z"),
        ];
        assert!(detect_boundaries(&records, &BoundaryConfig::default()).is_empty());
    }

    #[test]
    fn compaction_after_gap_emits_both_kinds() {
        // Policy: detect all applicable kinds, not pick one.
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            record(
                "c1",
                Some("r1"),
                "2026-08-01T10:20:00Z",
                RecordKind::Compaction,
            ),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        let kinds: Vec<BoundaryKind> = boundaries.iter().map(|b| b.kind).collect();
        assert!(kinds.contains(&BoundaryKind::Resume));
        assert!(kinds.contains(&BoundaryKind::Compaction));
        assert!(boundaries.iter().all(|b| b.entry_id == "c1"));
    }

    #[test]
    fn detection_is_idempotent() {
        let records = vec![
            msg("r1", None, "2026-08-01T10:00:00Z"),
            msg("r2", Some("r1"), "2026-08-01T10:15:00Z"),
            record(
                "c1",
                Some("r2"),
                "2026-08-01T10:16:00Z",
                RecordKind::Compaction,
            ),
            msg("r3", Some("r1"), "2026-08-01T10:17:00Z"),
        ];
        let config = BoundaryConfig::default();
        let first = detect_boundaries(&records, &config);
        let second = detect_boundaries(&records, &config);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3); // resume, compaction, tree_jump
    }

    #[test]
    fn first_record_never_emits_transition_boundaries() {
        let records = vec![msg("r1", None, "2026-08-01T10:00:00Z")];
        assert!(detect_boundaries(&records, &BoundaryConfig::default()).is_empty());
    }
}
