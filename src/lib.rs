// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod enrich;
pub mod fetch;
pub mod narrate;
pub mod pipeline;
pub mod record;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{Pipeline, RunSummary};
pub use crate::record::{ArticleRecord, RawArticle, RecordStatus};
pub use crate::store::RecordStore;
