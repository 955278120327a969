// =============================================================================
// Error taxonomy for the ingestion pipeline
// =============================================================================
//
// The taxonomy decides the caller's recovery action:
//   TransientNetwork  -> retry with backoff
//   RateLimited       -> sleep, retry the same request once
//   Parse             -> drop the message, bump parse_errors
//   Validation        -> drop the row, bump the counter
//   Persistence       -> roll back, recreate the session, drop the batch
//   Fatal             -> abort the owning task

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
