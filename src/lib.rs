//! A local, on-disk semantic code search engine.
//!
//! Given a source tree, this crate chunks files, embeds the chunks through
//! a pluggable [`EmbeddingProvider`](embeddings::EmbeddingProvider), and
//! persists everything to a content-addressed filesystem store so nearest
//! neighbor and full-text queries can run without a network round trip.
//! [`Engine`] is the single entry point that wires the components
//! together for one project.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use retrieval_engine::Engine;
//! use retrieval_engine::EngineConfig;
//! use retrieval_engine::embeddings::OpenAIEmbeddings;
//!
//! # async fn run() -> retrieval_engine::Result<()> {
//! let project_root = std::path::Path::new(".");
//! let config = EngineConfig::load(project_root)?;
//! let provider = Arc::new(OpenAIEmbeddings::new(std::env::var("OPENAI_API_KEY").unwrap()));
//! let engine = Engine::new(config, provider, project_root)?;
//! let results = engine.query("parse the config file", None, 10).await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod index;
pub mod indexing;
pub mod logging;
pub mod query;
pub mod slot;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use engine::EngineStats;
pub use error::EngineError;
pub use error::Result;
