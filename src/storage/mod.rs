//! FilesystemVectorStore (C5): the on-disk chunk store. Content-addressed
//! paths, atomic writes, payload indexes, and the scroll/search primitives
//! the auxiliary index managers and the query engine are built on.

pub mod atomic;
pub mod payload_index;
pub mod vector_store;

pub use payload_index::PayloadIndex;
pub use vector_store::FilesystemVectorStore;
