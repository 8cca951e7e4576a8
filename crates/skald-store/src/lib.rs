pub mod lock;
pub mod nodes;
pub mod paths;
pub mod queue;
pub mod store;
pub mod watermark;

pub use lock::StateLock;
pub use nodes::NodeRecord;
pub use paths::{default_state_root, instance_id, StatePaths};
pub use queue::{EnqueueError, FailOutcome, QueueConfig, QueueStats};
pub use store::SqliteStore;
pub use watermark::Watermark;
