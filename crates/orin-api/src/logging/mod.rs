//! Audit trail: activity logging through an async queue

mod logger;
pub mod types;

pub use logger::{ActivityLogger, ActivitySink, LoggerConfig};
pub use types::{ActivityLog, ActivityStatus, ActivityType};
