/// Jobs are keyed by a scheduler-assigned UUID v4.
pub type JobId = uuid::Uuid;

/// Compute nodes are identified by the string id the node registry hands out.
pub type NodeId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
