//! In-process implementations of the domain ports.

pub mod local_pipeline;
pub mod tokio_executor;

pub use local_pipeline::{
    LocalBranch, LocalPipeline, LocalRowInput, LocalStage, StageLifecycle, DEFAULT_INPUT_CAPACITY,
};
pub use tokio_executor::TokioExecutor;
