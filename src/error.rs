use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("missing required setting: {key}")]
    Missing { key: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Price history or notification ledger could not be used.
///
/// Aborts the current tick; nothing is notified and nothing is recorded.
#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("storage call timed out: {operation}")]
    Timeout { operation: String },
}

#[derive(Debug, Display, Error)]
pub enum SourceError {
    #[display("request to {source_url} failed")]
    Request { source_url: String },
    #[display("failed to parse price from {source_url}")]
    Parse { source_url: String },
}

#[derive(Debug, Display, Error)]
pub enum DeliveryError {
    #[display("failed to reach {channel}")]
    Request { channel: String },
    #[display("{channel} rejected the message")]
    Rejected { channel: String },
    #[display("delivery to {channel} timed out")]
    Timeout { channel: String },
}
