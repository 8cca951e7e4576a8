pub mod config;
pub mod control;
pub mod dispatcher;
pub mod health;
pub mod runtime;
pub mod scheduler;
pub mod watcher;
pub mod worker;

pub use config::{default_config_path, DaemonConfig, WatchOrigin};
pub use dispatcher::Dispatcher;
pub use health::{run_checks, HealthReport};
pub use scheduler::{NightlyReport, Scheduler};
pub use watcher::{watch, SessionWatcher, EVENT_CHANNEL_CAPACITY};
pub use worker::Worker;
