/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Store-assigned document version (optimistic concurrency token, starts at 1).
pub type Version = u64;
