//! FileChunkingManager (C4) and ProgressiveMetadata / IndexingProgressLog
//! (C8): the per-file ingestion lifecycle and the resumable progress state
//! it reports into.

pub mod manager;
pub mod progress;

pub use manager::FileChunkingManager;
pub use manager::FileIngestMetadata;
pub use manager::FileResult;
pub use progress::FileIndexingRecord;
pub use progress::FileIndexingStatus;
pub use progress::IndexingProgressLog;
pub use progress::IndexingSession;
pub use progress::OperationType;
pub use progress::ProgressiveMetadata;
