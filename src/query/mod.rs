//! StalenessDetector (C9) and QueryEngine (C10): the read path that turns a
//! query vector into ranked, freshness-aware results.

pub mod engine;
pub mod staleness;

pub use crate::config::StalenessMode;
pub use engine::EnhancedResult;
pub use engine::QueryEngine;
pub use engine::QueryRequest;
pub use engine::TemporalParams;
pub use staleness::StalenessDetector;
pub use staleness::StalenessIndicator;
