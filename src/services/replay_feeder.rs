//! Replays a cached row sequence into a running pipeline.
//!
//! The feeder takes over the role of the pipeline's original producing
//! branch. Before the pipeline starts it rewires the lifecycle listeners:
//!
//! 1. the default wiring of the original producer and the listener that would
//!    start it are removed,
//! 2. a listener before the producer starts shuts the original branch down,
//! 3. a listener at ready-for-input opens a one-shot readiness gate.
//!
//! A background task on the shared executor waits for the gate, then pushes
//! the cached rows through the pipeline's bounded input in order, retrying a
//! timed-out hand-off for as long as the pipeline keeps running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::{ReplayError, ReplayResult};
use crate::domain::models::{ReplayConfig, ReplayOutcome, RowSequence};
use crate::domain::ports::{
    submit, ExecutionPoint, ListenerTag, PipelineContext, ProducerBranch, RowInput, TaskExecutor,
    TaskHandle,
};

/// Substitutes a cached row sequence for a pipeline's original producer.
#[derive(Clone)]
pub struct CacheReplayFeeder {
    executor: Arc<dyn TaskExecutor>,
    config: ReplayConfig,
}

impl CacheReplayFeeder {
    /// Feeder running its replay sessions on `executor`.
    pub fn new(executor: Arc<dyn TaskExecutor>, config: ReplayConfig) -> Self {
        Self { executor, config }
    }

    /// Arm `ctx` to be fed from `rows` instead of its original producer.
    ///
    /// Must be called before the pipeline starts. The listener surgery is
    /// done by the time this returns; the rows are delivered by a background
    /// task once the pipeline signals it is ready for input.
    pub fn replay(&self, ctx: &dyn PipelineContext, rows: RowSequence) -> ReplayHandle {
        let session_id = Uuid::new_v4();
        let producer = ctx.producer_branch();
        let producer_id = producer.id().to_string();
        let input = ctx.open_row_input();

        let unwired = ctx.remove_matching(ExecutionPoint::BeforeProducerStart, &|tag| {
            matches!(tag, ListenerTag::DefaultWiring)
        });
        let unstarted = ctx.remove_matching(ExecutionPoint::ReadyForInput, &|tag| {
            matches!(tag, ListenerTag::StartBranch(branch) if *branch == producer_id)
        });
        debug!(
            session_id = %session_id,
            producer = %producer_id,
            unwired,
            unstarted,
            "removed original producer listeners"
        );

        ctx.register_once(
            ExecutionPoint::BeforeProducerStart,
            ListenerTag::CacheReplay(session_id),
            Box::new(move || shut_down_branch(producer.as_ref())),
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        ctx.register_once(
            ExecutionPoint::ReadyForInput,
            ListenerTag::CacheReplay(session_id),
            Box::new(move || {
                // The session may already have given up waiting.
                let _ = ready_tx.send(());
            }),
        );

        let span = info_span!("cache_replay", session_id = %session_id, rows = rows.len());
        let session = ReplaySession {
            id: session_id,
            rows,
            input,
            gate: ready_rx,
            ready_timeout: self.config.ready_timeout(),
            put_timeout: self.config.put_timeout(),
            max_put_attempts: self.config.max_put_attempts,
        };

        ReplayHandle {
            session_id,
            task: submit(self.executor.as_ref(), session.run().instrument(span)),
        }
    }
}

/// Orderly forced shutdown of the branch the replay replaces.
fn shut_down_branch(branch: &dyn ProducerBranch) {
    branch.stop_all();
    for stage in branch.stages() {
        stage.set_output_done();
        stage.dispose();
        stage.mark_stopped();
        trace!(branch = %branch.id(), stage = %stage.name(), "stage stopped");
    }
    debug!(branch = %branch.id(), "original producer shut down");
}

/// Future resolving to the outcome of one replay.
#[derive(Debug)]
pub struct ReplayHandle {
    session_id: Uuid,
    task: TaskHandle<ReplayResult<ReplayOutcome>>,
}

impl ReplayHandle {
    /// Identifier of the session, as tagged on its listeners and logs.
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }
}

impl Future for ReplayHandle {
    type Output = ReplayResult<ReplayOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ReplayError::TaskLost)))
    }
}

/// Calls `finished()` when dropped, whatever path the session exits by.
struct FinishOnDrop(Arc<dyn RowInput>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finished();
    }
}

/// State of one replay, owned by its background task.
struct ReplaySession {
    id: Uuid,
    rows: RowSequence,
    input: Arc<dyn RowInput>,
    gate: oneshot::Receiver<()>,
    ready_timeout: Duration,
    put_timeout: Duration,
    max_put_attempts: Option<u32>,
}

impl ReplaySession {
    async fn run(self) -> ReplayResult<ReplayOutcome> {
        let _finish = FinishOnDrop(Arc::clone(&self.input));

        match tokio::time::timeout(self.ready_timeout, self.gate).await {
            Ok(Ok(())) => debug!("pipeline ready, replaying cached rows"),
            Ok(Err(_)) => {
                warn!("pipeline dropped its readiness listener, cache replay not started");
                return Err(ReplayError::ReadinessAbandoned);
            }
            Err(_) => {
                warn!(waited = ?self.ready_timeout, "cache replay did not start");
                return Err(ReplayError::ReadinessTimeout {
                    waited: self.ready_timeout,
                });
            }
        }

        let delivered = deliver(
            &self.rows,
            self.input.as_ref(),
            self.put_timeout,
            self.max_put_attempts,
        )
        .await;

        let outcome = ReplayOutcome {
            session_id: self.id,
            delivered,
            total: self.rows.len(),
        };
        if outcome.is_complete() {
            info!(delivered, "cache replay complete");
        } else {
            info!(
                delivered,
                undelivered = outcome.undelivered(),
                "cache replay stopped early"
            );
        }
        Ok(outcome)
    }
}

/// Push `rows` in order, returning how many were accepted.
///
/// Each row is cloned before hand-off so consumers never share data with the
/// cached sequence. Stops as soon as the input reports it is no longer
/// running, or when a row exhausts `max_put_attempts`.
async fn deliver(
    rows: &RowSequence,
    input: &dyn RowInput,
    put_timeout: Duration,
    max_put_attempts: Option<u32>,
) -> usize {
    let mut delivered = 0;

    'rows: for row in rows {
        if !input.is_running() {
            break;
        }

        let mut pending = row.clone();
        let mut attempts = 0_u32;
        loop {
            match input.try_put(pending, put_timeout).await {
                Ok(()) => {
                    delivered += 1;
                    continue 'rows;
                }
                Err(rejected) => {
                    attempts += 1;
                    if !input.is_running() {
                        break 'rows;
                    }
                    if max_put_attempts.is_some_and(|max| attempts >= max) {
                        warn!(attempts, delivered, "row hand-off abandoned");
                        break 'rows;
                    }
                    trace!(attempts, "row hand-off timed out, retrying");
                    pending = rejected;
                }
            }
        }
    }

    delivered
}
