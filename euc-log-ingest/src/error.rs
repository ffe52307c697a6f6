use thiserror::Error;

/// Enumeration of the ways an ingestion cycle can fail.
///
/// Only `InvalidTimestamp` is recovered inside a file (the row is skipped). Every other
/// variant aborts the current cycle, leaves the checkpoint untouched and sends the loop
/// into its long delay.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to obtain a valid access token: {0}")]
    Auth(String),
    #[error("malformed header in {file}: {reason}")]
    MalformedHeader { file: String, reason: String },
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("storage transport failed: {0}")]
    Transport(String),
    #[error("event sink rejected an event: {0}")]
    Sink(String),
    #[error("checkpoint store failed: {0}")]
    Store(String),
    #[error("shutdown requested while processing {0}")]
    Cancelled(String),
}

impl IngestError {
    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Auth(_) => "auth",
            IngestError::MalformedHeader { .. } => "malformed_header",
            IngestError::InvalidTimestamp(_) => "invalid_timestamp",
            IngestError::Transport(_) => "transport",
            IngestError::Sink(_) => "sink",
            IngestError::Store(_) => "store",
            IngestError::Cancelled(_) => "cancelled",
        }
    }

    /// Row-level errors are skipped by the loop, everything else ends the cycle.
    pub fn is_row_level(&self) -> bool {
        matches!(self, IngestError::InvalidTimestamp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timestamps_are_row_level() {
        let row = IngestError::InvalidTimestamp("yesterday".to_string());
        assert!(row.is_row_level());
        assert_eq!(row.kind(), "invalid_timestamp");

        let file = IngestError::MalformedHeader {
            file: "a.csv".to_string(),
            reason: "first column is time".to_string(),
        };
        assert!(!file.is_row_level());
        assert!(!IngestError::Auth("expired".to_string()).is_row_level());
        assert!(!IngestError::Transport("reset".to_string()).is_row_level());
    }

    #[test]
    fn test_messages_name_the_file() {
        let err = IngestError::MalformedHeader {
            file: "2021_06_01.csv".to_string(),
            reason: "empty file".to_string(),
        };
        assert!(err.to_string().contains("2021_06_01.csv"));
    }
}
