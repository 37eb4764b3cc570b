//! Pipeline execution context port.
//!
//! The pipeline engine itself lives outside this crate. The replay feeder
//! only needs the narrow surface described here: lifecycle listener wiring,
//! the original producing branch, and a bounded row input.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::Row;

/// Named points in a pipeline's lifecycle where listeners fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPoint {
    /// Graph is prepared; the original producer is about to be wired and started.
    BeforeProducerStart,
    /// Graph is running and able to consume injected rows.
    ReadyForInput,
}

/// Identity of a registered listener, used to find and remove it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerTag {
    /// The engine's default wiring of the original producing branch.
    DefaultWiring,
    /// Starts execution of the named branch.
    StartBranch(String),
    /// Installed by a cache replay session.
    CacheReplay(Uuid),
    /// Any other listener, identified by name.
    Named(String),
}

impl fmt::Display for ListenerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultWiring => f.write_str("default-wiring"),
            Self::StartBranch(branch) => write!(f, "start-branch:{branch}"),
            Self::CacheReplay(id) => write!(f, "cache-replay:{id}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// One-shot lifecycle callback.
pub type Listener = Box<dyn FnOnce() + Send + 'static>;

/// A stage of a processing branch.
pub trait ProcessingStage: Send + Sync {
    fn name(&self) -> &str;

    /// Signal downstream that this stage will emit no more rows.
    fn set_output_done(&self);

    /// Release the stage's resources.
    fn dispose(&self);

    fn mark_stopped(&self);
}

/// A branch of the graph that produces rows.
pub trait ProducerBranch: Send + Sync {
    fn id(&self) -> &str;

    /// Ask every stage of the branch to stop.
    fn stop_all(&self);

    fn stages(&self) -> Vec<Arc<dyn ProcessingStage>>;
}

/// Bounded hand-off into a running graph.
#[async_trait]
pub trait RowInput: Send + Sync {
    /// Offer `row`, waiting at most `timeout` for room.
    ///
    /// On timeout (or if the input no longer accepts rows) the row is handed
    /// back unaccepted.
    async fn try_put(&self, row: Row, timeout: Duration) -> Result<(), Row>;

    /// No more rows will be produced.
    fn finished(&self);

    /// Whether the consuming side is still executing.
    fn is_running(&self) -> bool;
}

/// Execution context of a pipeline that has been built but not yet started.
///
/// Listener lists are mutated before the pipeline starts; implementations
/// must not fire a listener more than once.
pub trait PipelineContext: Send + Sync {
    /// Remove every listener at `point` whose tag matches `predicate`.
    /// Returns the number of listeners removed.
    fn remove_matching(
        &self,
        point: ExecutionPoint,
        predicate: &dyn Fn(&ListenerTag) -> bool,
    ) -> usize;

    /// Register a listener that fires once when `point` is reached.
    fn register_once(&self, point: ExecutionPoint, tag: ListenerTag, listener: Listener);

    /// The branch that would produce rows if no replay took place.
    fn producer_branch(&self) -> Arc<dyn ProducerBranch>;

    /// Open an injection point feeding the graph in place of the producer.
    fn open_row_input(&self) -> Arc<dyn RowInput>;
}
