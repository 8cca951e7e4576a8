use crate::boundary::{Boundary, BoundaryKind};
use crate::record::{RecordKind, SessionRecord};
use crate::tree::SessionTree;
use serde::{Deserialize, Serialize};

// ── Readiness ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOrigin {
    /// Written by an agent on this host.
    Local,
    /// Arriving via file replication; needs a longer quiet window
    /// because partial syncs look like mid-write files for longer.
    Synced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadyReason {
    Idle,
    Boundary,
    Stability,
}

impl ReadyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyReason::Idle => "idle",
            ReadyReason::Boundary => "boundary",
            ReadyReason::Stability => "stability",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessConfig {
    pub idle_timeout_secs: i64,
    pub local_stability_secs: i64,
    pub synced_stability_secs: i64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            local_stability_secs: 5,
            synced_stability_secs: 30,
        }
    }
}

impl ReadinessConfig {
    fn stability_window(&self, origin: FileOrigin) -> i64 {
        match origin {
            FileOrigin::Local => self.local_stability_secs,
            FileOrigin::Synced => self.synced_stability_secs,
        }
    }
}

/// Decide whether a session file is ready for analysis. Pure function of
/// its inputs; the watermark is the only persisted state and it is passed
/// in. Precedence: idle > boundary > stability, one reason surfaced.
///
/// Idle and stability additionally require content newer than the
/// watermark; without that gate a quiet file would re-trigger on every
/// evaluation. Boundary newness is its own gate.
pub fn evaluate_readiness(
    records: &[SessionRecord],
    boundaries: &[Boundary],
    watermark_unix: Option<i64>,
    file_mtime_unix: i64,
    now_unix: i64,
    origin: FileOrigin,
    config: &ReadinessConfig,
) -> Option<ReadyReason> {
    let last_ts = records.iter().map(SessionRecord::ts_unix).max()?;
    let unseen_content = watermark_unix.map_or(true, |w| last_ts > w);
    let new_boundary = boundaries
        .iter()
        .any(|b| watermark_unix.map_or(true, |w| b.ts_unix() > w));

    if unseen_content && now_unix - last_ts >= config.idle_timeout_secs {
        Some(ReadyReason::Idle)
    } else if new_boundary {
        Some(ReadyReason::Boundary)
    } else if unseen_content && now_unix - file_mtime_unix >= config.stability_window(origin) {
        Some(ReadyReason::Stability)
    } else {
        None
    }
}

// ── Segment planning ──

/// One segment to enqueue, with everything the dispatcher needs to build
/// a job and advance the watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub start_id: Option<String>,
    pub end_id: Option<String>,
    /// Watermark value once this segment is enqueued.
    pub end_ts_unix: i64,
    pub reason: ReadyReason,
    pub boundary_kind: Option<BoundaryKind>,
    /// Segment covers a fork marker; such segments get fork priority.
    pub contains_fork: bool,
}

/// Cut the unanalyzed span of a session into segments.
///
/// Boundary readiness produces one segment per new boundary, each ending
/// just before its boundary entry; two boundary kinds on the same entry
/// collapse into one segment. Idle/stability readiness produces a single
/// segment from the first post-watermark record to the tree's leaf.
pub fn plan_segments(
    records: &[SessionRecord],
    boundaries: &[Boundary],
    watermark_unix: Option<i64>,
    reason: ReadyReason,
) -> Vec<SegmentPlan> {
    if records.is_empty() {
        return Vec::new();
    }
    let past_watermark =
        |ts: i64| -> bool { watermark_unix.map_or(true, |w| ts > w) };
    // First record index not yet covered by the watermark.
    let mut cut = records
        .iter()
        .position(|r| past_watermark(r.ts_unix()))
        .unwrap_or(records.len());

    let contains_fork = |span: &[SessionRecord]| -> bool {
        span.iter().any(|r| r.kind == RecordKind::Fork)
    };

    match reason {
        ReadyReason::Boundary => {
            let mut plans: Vec<SegmentPlan> = Vec::new();
            for boundary in boundaries {
                if !past_watermark(boundary.ts_unix()) {
                    continue;
                }
                let Some(entry_idx) = records.iter().position(|r| r.id == boundary.entry_id)
                else {
                    continue;
                };
                // Same entry already planned (multiple kinds on one record).
                if plans
                    .iter()
                    .any(|p| p.end_id == boundary.previous_entry_id && p.end_ts_unix == boundary.ts_unix())
                {
                    continue;
                }
                let span = &records[cut..entry_idx];
                if span.is_empty() {
                    continue;
                }
                plans.push(SegmentPlan {
                    start_id: Some(span[0].id.clone()),
                    end_id: boundary.previous_entry_id.clone(),
                    end_ts_unix: boundary.ts_unix(),
                    reason: ReadyReason::Boundary,
                    boundary_kind: Some(boundary.kind),
                    contains_fork: contains_fork(span),
                });
                cut = entry_idx;
            }
            plans
        }
        ReadyReason::Idle | ReadyReason::Stability => {
            let span = &records[cut..];
            if span.is_empty() {
                return Vec::new();
            }
            let end_ts = span.iter().map(SessionRecord::ts_unix).max().unwrap_or(0);
            // The segment ends at the active branch tip, not the last
            // line: appends can land out of file order.
            let leaf_id = SessionTree::build(records).leaf().map(|r| r.id.clone());
            vec![SegmentPlan {
                start_id: Some(span[0].id.clone()),
                end_id: leaf_id,
                end_ts_unix: end_ts,
                reason,
                boundary_kind: None,
                contains_fork: contains_fork(span),
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{detect_boundaries, BoundaryConfig};
    use crate::record::RecordKind;
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    const T0: i64 = 1_756_000_000;

    fn record(id: &str, parent: Option<&str>, offset_secs: i64, kind: RecordKind) -> SessionRecord {
        let ts = OffsetDateTime::from_unix_timestamp(T0 + offset_secs).unwrap();
        SessionRecord {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            timestamp: ts,
            kind,
            payload: serde_json::Value::Null,
            summary: None,
        }
    }

    fn msg(id: &str, parent: Option<&str>, offset_secs: i64) -> SessionRecord {
        record(id, parent, offset_secs, RecordKind::Message)
    }

    fn config() -> ReadinessConfig {
        ReadinessConfig::default()
    }

    #[test]
    fn idle_session_with_no_boundary_is_idle() {
        let records = vec![msg("r1", None, 0), msg("r2", Some("r1"), 30)];
        let boundaries = Vec::new();
        let now = T0 + 30 + 600; // exactly the idle timeout after last record
        let reason = evaluate_readiness(
            &records,
            &boundaries,
            None,
            now,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, Some(ReadyReason::Idle));
    }

    #[test]
    fn unresolved_boundary_fires_before_idle_timeout() {
        // Quiet but below the idle timeout; a compaction boundary exists.
        let records = vec![
            msg("r1", None, 0),
            record("c1", Some("r1"), 30, RecordKind::Compaction),
            msg("r2", Some("c1"), 60),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        let now = T0 + 60 + 120; // 2 min quiet, not idle yet
        let reason = evaluate_readiness(
            &records,
            &boundaries,
            None,
            now, // mtime = now: file just changed
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, Some(ReadyReason::Boundary));
    }

    #[test]
    fn idle_wins_when_idle_and_boundary_both_apply() {
        let records = vec![
            msg("r1", None, 0),
            record("c1", Some("r1"), 30, RecordKind::Compaction),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert!(!boundaries.is_empty());
        let now = T0 + 30 + 3600;
        let reason = evaluate_readiness(
            &records,
            &boundaries,
            None,
            T0 + 30,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, Some(ReadyReason::Idle));
    }

    #[test]
    fn active_file_is_not_ready() {
        let records = vec![msg("r1", None, 0), msg("r2", Some("r1"), 30)];
        let now = T0 + 32; // 2s after last write, below every window
        let reason = evaluate_readiness(
            &records,
            &Vec::new(),
            None,
            T0 + 30,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn stable_local_file_is_ready_after_5s() {
        let records = vec![msg("r1", None, 0), msg("r2", Some("r1"), 30)];
        let now = T0 + 30 + 6;
        let reason = evaluate_readiness(
            &records,
            &Vec::new(),
            None,
            T0 + 30,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, Some(ReadyReason::Stability));
    }

    #[test]
    fn synced_file_needs_the_longer_window() {
        let records = vec![msg("r1", None, 0)];
        let now = T0 + 10; // stable for 10s: enough locally, not for synced
        let local = evaluate_readiness(
            &records,
            &Vec::new(),
            None,
            T0,
            now,
            FileOrigin::Local,
            &config(),
        );
        let synced = evaluate_readiness(
            &records,
            &Vec::new(),
            None,
            T0,
            now,
            FileOrigin::Synced,
            &config(),
        );
        assert_eq!(local, Some(ReadyReason::Stability));
        assert_eq!(synced, None);

        let later = T0 + 31;
        let synced = evaluate_readiness(
            &records,
            &Vec::new(),
            None,
            T0,
            later,
            FileOrigin::Synced,
            &config(),
        );
        assert_eq!(synced, Some(ReadyReason::Stability));
    }

    #[test]
    fn watermark_suppresses_idle_retrigger() {
        let records = vec![msg("r1", None, 0), msg("r2", Some("r1"), 30)];
        let now = T0 + 30 + 7200;
        // Everything up to the last record is already analyzed.
        let reason = evaluate_readiness(
            &records,
            &Vec::new(),
            Some(T0 + 30),
            T0 + 30,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn watermark_suppresses_old_boundaries() {
        let records = vec![
            msg("r1", None, 0),
            record("c1", Some("r1"), 30, RecordKind::Compaction),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        let now = T0 + 90;
        let reason = evaluate_readiness(
            &records,
            &boundaries,
            Some(T0 + 30), // boundary at T0+30 already processed
            T0 + 30,
            now,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn empty_log_is_never_ready() {
        let reason = evaluate_readiness(
            &[],
            &Vec::new(),
            None,
            T0,
            T0 + 86_400,
            FileOrigin::Local,
            &config(),
        );
        assert_eq!(reason, None);
    }

    // ── plan_segments ──

    #[test]
    fn idle_plan_covers_everything_past_watermark() {
        let records = vec![
            msg("r1", None, 0),
            msg("r2", Some("r1"), 30),
            msg("r3", Some("r2"), 60),
        ];
        let plans = plan_segments(&records, &[], Some(T0), ReadyReason::Idle);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].start_id.as_deref(), Some("r2"));
        assert_eq!(plans[0].end_id.as_deref(), Some("r3"));
        assert_eq!(plans[0].end_ts_unix, T0 + 60);
        assert_eq!(plans[0].reason, ReadyReason::Idle);
        assert!(plans[0].boundary_kind.is_none());
    }

    #[test]
    fn boundary_plan_ends_before_the_boundary_entry() {
        let records = vec![
            msg("r1", None, 0),
            msg("r2", Some("r1"), 30),
            record("c1", Some("r2"), 60, RecordKind::Compaction),
            msg("r3", Some("c1"), 90),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        let plans = plan_segments(&records, &boundaries, None, ReadyReason::Boundary);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].start_id.as_deref(), Some("r1"));
        assert_eq!(plans[0].end_id.as_deref(), Some("r2"));
        assert_eq!(plans[0].end_ts_unix, T0 + 60);
        assert_eq!(plans[0].boundary_kind, Some(BoundaryKind::Compaction));
    }

    #[test]
    fn two_boundaries_make_two_chained_segments() {
        let records = vec![
            msg("r1", None, 0),
            record("c1", Some("r1"), 60, RecordKind::Compaction),
            msg("r2", Some("c1"), 90),
            record("c2", Some("r2"), 120, RecordKind::Compaction),
            msg("r3", Some("c2"), 150),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        let plans = plan_segments(&records, &boundaries, None, ReadyReason::Boundary);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].start_id.as_deref(), Some("r1"));
        assert_eq!(plans[0].end_id.as_deref(), Some("r1"));
        assert_eq!(plans[1].start_id.as_deref(), Some("c1"));
        assert_eq!(plans[1].end_id.as_deref(), Some("r2"));
    }

    #[test]
    fn double_kind_boundary_plans_one_segment() {
        // Compaction after a long gap: two boundaries, one segment.
        let records = vec![
            msg("r1", None, 0),
            record("c1", Some("r1"), 1200, RecordKind::Compaction),
        ];
        let boundaries = detect_boundaries(&records, &BoundaryConfig::default());
        assert_eq!(boundaries.len(), 2);
        let plans = plan_segments(&records, &boundaries, None, ReadyReason::Boundary);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].end_id.as_deref(), Some("r1"));
    }

    #[test]
    fn out_of_order_append_still_ends_at_the_leaf() {
        // r2 lands in the file after its own child r3. The leaf is r3;
        // the last line is not.
        let records = vec![
            msg("r1", None, 0),
            msg("r3", Some("r2"), 60),
            msg("r2", Some("r1"), 30),
        ];
        let plans = plan_segments(&records, &[], None, ReadyReason::Idle);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].end_id.as_deref(), Some("r3"));
        assert_eq!(plans[0].end_ts_unix, T0 + 60);
    }

    #[test]
    fn fork_marker_in_span_sets_contains_fork() {
        let records = vec![
            msg("r1", None, 0),
            record("f1", Some("r1"), 10, RecordKind::Fork),
            msg("r2", Some("r1"), 20),
        ];
        let plans = plan_segments(&records, &[], None, ReadyReason::Idle);
        assert_eq!(plans.len(), 1);
        assert!(plans[0].contains_fork);
    }

    #[test]
    fn fully_analyzed_log_plans_nothing() {
        let records = vec![msg("r1", None, 0), msg("r2", Some("r1"), 30)];
        let plans = plan_segments(&records, &[], Some(T0 + 30), ReadyReason::Idle);
        assert!(plans.is_empty());
    }
}
