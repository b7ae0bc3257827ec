pub mod channel;
pub mod dispatcher;
pub mod pipeline;
pub mod producer;
pub mod recorder;
pub mod sched;
pub mod task;
pub mod worker;

// Re-export for easier testing
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunReport};
