pub mod config;
pub mod engine;
pub mod fallback;
pub mod humanize;
pub mod ingest;
pub mod observability;
pub mod queue;
pub mod storage;

pub use engine::{EngineError, LogEngine};
