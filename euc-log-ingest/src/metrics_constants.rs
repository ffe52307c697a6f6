pub const CYCLE_STARTS: &str = "euc_ingest_cycle_starts";
pub const CYCLE_FAILURES: &str = "euc_ingest_cycle_failures";
pub const CYCLES_CAUGHT_UP: &str = "euc_ingest_cycles_caught_up";

pub const FILES_PROCESSED: &str = "euc_ingest_files_processed";
pub const FILE_PROCESSING_TIME: &str = "euc_ingest_file_processing_ms";
pub const ROWS_READ: &str = "euc_ingest_rows_read";
pub const ROWS_SKIPPED: &str = "euc_ingest_rows_skipped";
pub const EVENTS_EMITTED: &str = "euc_ingest_events_emitted";

// Unix seconds of the last checkpoint commit
pub const CHECKPOINT_COMMITTED_AT: &str = "euc_ingest_checkpoint_committed_at";
