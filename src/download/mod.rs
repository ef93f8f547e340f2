//! Download management and processing

pub mod cleanup;
pub mod direct;
pub mod engine;
pub mod formats;
pub mod hook;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod task;
pub mod ytdlp;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use engine::{DownloadOutcome, EngineOptions, VideoEngine, VideoInfo};
pub use formats::Quality;
pub use pipeline::{run_download, PipelineDeps, PipelineOutcome};
pub use progress::ProgressTracker;
pub use registry::TaskRegistry;
pub use task::{DownloadTask, TaskStatus};
pub use ytdlp_errors::FailureKind;
