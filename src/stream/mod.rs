//! HTTP stream ingestion

pub mod source;

pub use source::{StreamEvent, StreamSource, CHUNK_SIZE};
