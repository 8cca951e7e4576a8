mod boundary;
mod readiness;
mod record;
mod tree;

pub use boundary::{detect_boundaries, Boundary, BoundaryConfig, BoundaryKind};
pub use readiness::{
    evaluate_readiness, plan_segments, FileOrigin, ReadinessConfig, ReadyReason, SegmentPlan,
};
pub use record::{load_records, LoadedSession, RecordKind, SessionRecord};
pub use tree::SessionTree;
