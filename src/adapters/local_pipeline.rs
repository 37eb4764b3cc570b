//! In-process pipeline execution context.
//!
//! A small, self-contained implementation of [`PipelineContext`] built on
//! tokio primitives. Rows injected through its [`RowInput`] land in a bounded
//! channel whose receiving end is handed to the consumer.
//!
//! Like a full engine, a freshly built pipeline wires its original producer
//! by default: a [`ListenerTag::DefaultWiring`] listener before the producer
//! starts, and a [`ListenerTag::StartBranch`] listener once ready for input
//! that makes the producer emit its own rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info};

use crate::domain::models::Row;
use crate::domain::ports::{
    ExecutionPoint, Listener, ListenerTag, PipelineContext, ProcessingStage, ProducerBranch,
    RowInput,
};

/// Default capacity of the hand-off channel.
pub const DEFAULT_INPUT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shutdown transitions a stage went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageLifecycle {
    pub output_done: bool,
    pub disposed: bool,
    pub stopped: bool,
}

/// A processing stage that records its shutdown transitions.
#[derive(Debug)]
pub struct LocalStage {
    name: String,
    output_done: AtomicBool,
    disposed: AtomicBool,
    stopped: AtomicBool,
}

impl LocalStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_done: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn lifecycle(&self) -> StageLifecycle {
        StageLifecycle {
            output_done: self.output_done.load(Ordering::SeqCst),
            disposed: self.disposed.load(Ordering::SeqCst),
            stopped: self.stopped.load(Ordering::SeqCst),
        }
    }
}

impl ProcessingStage for LocalStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_output_done(&self) {
        self.output_done.store(true, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// The pipeline's original producing branch.
#[derive(Debug)]
pub struct LocalBranch {
    id: String,
    stages: Vec<Arc<LocalStage>>,
    native_rows: Vec<Row>,
    stop_requested: AtomicBool,
    started: AtomicBool,
}

impl LocalBranch {
    pub fn new(id: impl Into<String>, stage_names: &[&str]) -> Self {
        Self {
            id: id.into(),
            stages: stage_names
                .iter()
                .map(|name| Arc::new(LocalStage::new(*name)))
                .collect(),
            native_rows: Vec::new(),
            stop_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Rows the branch emits when it is started normally.
    #[must_use]
    pub fn with_native_rows(mut self, rows: Vec<Row>) -> Self {
        self.native_rows = rows;
        self
    }

    pub fn local_stages(&self) -> &[Arc<LocalStage>] {
        &self.stages
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

impl ProducerBranch for LocalBranch {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop_all(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stages(&self) -> Vec<Arc<dyn ProcessingStage>> {
        self.stages
            .iter()
            .map(|stage| Arc::clone(stage) as Arc<dyn ProcessingStage>)
            .collect()
    }
}

/// Bounded hand-off into the local pipeline.
#[derive(Debug)]
pub struct LocalRowInput {
    sender: Mutex<Option<mpsc::Sender<Row>>>,
    running: Arc<AtomicBool>,
    finished_calls: AtomicUsize,
}

impl LocalRowInput {
    pub fn finished_calls(&self) -> usize {
        self.finished_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowInput for LocalRowInput {
    async fn try_put(&self, row: Row, timeout: Duration) -> Result<(), Row> {
        if !self.is_running() {
            return Err(row);
        }
        let Some(sender) = lock(&self.sender).clone() else {
            return Err(row);
        };
        sender.send_timeout(row, timeout).await.map_err(|err| match err {
            SendTimeoutError::Timeout(row) | SendTimeoutError::Closed(row) => row,
        })
    }

    fn finished(&self) {
        self.finished_calls.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender lets the consumer drain and then observe the end.
        lock(&self.sender).take();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

type ListenerList = Vec<(ListenerTag, Listener)>;

/// In-process pipeline execution context.
pub struct LocalPipeline {
    listeners: Mutex<HashMap<ExecutionPoint, ListenerList>>,
    running: Arc<AtomicBool>,
    producer: Arc<LocalBranch>,
    input: Arc<LocalRowInput>,
    output: Mutex<Option<mpsc::Receiver<Row>>>,
    producer_wired: Arc<AtomicBool>,
}

impl LocalPipeline {
    /// Build a pipeline around `producer` with the default producer wiring.
    pub fn new(producer: LocalBranch, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let running = Arc::new(AtomicBool::new(false));
        let pipeline = Self {
            listeners: Mutex::new(HashMap::new()),
            running: Arc::clone(&running),
            producer: Arc::new(producer),
            input: Arc::new(LocalRowInput {
                sender: Mutex::new(Some(tx)),
                running,
                finished_calls: AtomicUsize::new(0),
            }),
            output: Mutex::new(Some(rx)),
            producer_wired: Arc::new(AtomicBool::new(false)),
        };
        pipeline.install_default_wiring();
        pipeline
    }

    fn install_default_wiring(&self) {
        let wired = Arc::clone(&self.producer_wired);
        self.register_once(
            ExecutionPoint::BeforeProducerStart,
            ListenerTag::DefaultWiring,
            Box::new(move || wired.store(true, Ordering::SeqCst)),
        );

        let producer = Arc::clone(&self.producer);
        let input = Arc::clone(&self.input);
        self.register_once(
            ExecutionPoint::ReadyForInput,
            ListenerTag::StartBranch(self.producer.id.clone()),
            Box::new(move || {
                producer.started.store(true, Ordering::SeqCst);
                let rows = producer.native_rows.clone();
                tokio::spawn(async move {
                    for row in rows {
                        if input.try_put(row, Duration::from_secs(1)).await.is_err() {
                            break;
                        }
                    }
                    input.finished();
                });
            }),
        );
    }

    /// Run the lifecycle: fire the pre-start listeners, mark the pipeline
    /// running, then fire the ready-for-input listeners.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.fire(ExecutionPoint::BeforeProducerStart);
        self.running.store(true, Ordering::SeqCst);
        info!(producer = %self.producer.id, "local pipeline running");
        self.fire(ExecutionPoint::ReadyForInput);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!(producer = %self.producer.id, "local pipeline stopped");
    }

    /// Tear the pipeline down without starting it. Pending listeners are
    /// dropped unfired.
    pub fn abort(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.listeners).clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Consumer end of the hand-off channel. Only the first call gets it.
    pub fn take_output(&self) -> Option<mpsc::Receiver<Row>> {
        lock(&self.output).take()
    }

    pub fn producer(&self) -> &Arc<LocalBranch> {
        &self.producer
    }

    pub fn input(&self) -> &Arc<LocalRowInput> {
        &self.input
    }

    pub fn producer_was_wired(&self) -> bool {
        self.producer_wired.load(Ordering::SeqCst)
    }

    /// Tags of the listeners currently registered at `point`, in order.
    pub fn listener_tags(&self, point: ExecutionPoint) -> Vec<ListenerTag> {
        lock(&self.listeners)
            .get(&point)
            .map(|list| list.iter().map(|(tag, _)| tag.clone()).collect())
            .unwrap_or_default()
    }

    fn fire(&self, point: ExecutionPoint) {
        let listeners = lock(&self.listeners).remove(&point).unwrap_or_default();
        for (tag, listener) in listeners {
            debug!(point = ?point, listener = %tag, "firing listener");
            listener();
        }
    }
}

impl PipelineContext for LocalPipeline {
    fn remove_matching(
        &self,
        point: ExecutionPoint,
        predicate: &dyn Fn(&ListenerTag) -> bool,
    ) -> usize {
        let mut listeners = lock(&self.listeners);
        let Some(list) = listeners.get_mut(&point) else {
            return 0;
        };
        let before = list.len();
        list.retain(|(tag, _)| !predicate(tag));
        before - list.len()
    }

    fn register_once(&self, point: ExecutionPoint, tag: ListenerTag, listener: Listener) {
        lock(&self.listeners)
            .entry(point)
            .or_default()
            .push((tag, listener));
    }

    fn producer_branch(&self) -> Arc<dyn ProducerBranch> {
        Arc::clone(&self.producer) as Arc<dyn ProducerBranch>
    }

    fn open_row_input(&self) -> Arc<dyn RowInput> {
        Arc::clone(&self.input) as Arc<dyn RowInput>
    }
}
