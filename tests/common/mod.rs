//! Common test utilities for integration tests
//!
//! Provides scripted loaders and a scripted pipeline context shared across
//! the cache and replay test files.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rowcache::domain::models::{Field, ValueKind};
use rowcache::domain::ports::{Listener, RowInput};
use rowcache::{
    CacheLoader, ExecutionPoint, ListenerTag, LoadError, LocalBranch, PipelineContext,
    ProducerBranch, Row, RowSchema, RowSequence, Value,
};

/// Setup test logging
///
/// Initializes a tracing subscriber writing to the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("rowcache=debug")
        .try_init();
}

/// Sequence of single-column rows holding `0..n`.
pub fn int_rows(n: i64) -> RowSequence {
    let schema = Arc::new(RowSchema::new(vec![Field::new("n", ValueKind::Int)]));
    (0..n)
        .map(|i| Row::new(Arc::clone(&schema), vec![Value::Int(i)]))
        .collect()
}

/// The `n` column of each row, in order.
pub fn ints(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get("n") {
            Some(Value::Int(n)) => *n,
            other => panic!("row without an int `n` column: {other:?}"),
        })
        .collect()
}

// ========================
// Loaders
// ========================

struct LoaderScript {
    calls: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    delay: Duration,
    failing_calls: Mutex<HashSet<usize>>,
    fail_from: Mutex<Option<usize>>,
}

/// Loader returning `"{key}-v{n}"` for its n-th call, after `delay`.
///
/// Calls can be scripted to fail. Clones share the same script, so a test can
/// keep one clone to inspect and steer the loader handed to the cache.
#[derive(Clone)]
pub struct ScriptedLoader {
    script: Arc<LoaderScript>,
}

impl ScriptedLoader {
    pub fn new(delay: Duration) -> Self {
        Self {
            script: Arc::new(LoaderScript {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak_running: AtomicUsize::new(0),
                delay,
                failing_calls: Mutex::new(HashSet::new()),
                fail_from: Mutex::new(None),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Most invocations that were ever running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.script.peak_running.load(Ordering::SeqCst)
    }

    /// Make the `call`-th invocation (1-based) fail.
    pub fn fail_call(&self, call: usize) {
        self.script.failing_calls.lock().unwrap().insert(call);
    }

    /// Make every invocation from the `call`-th on fail.
    pub fn fail_from(&self, call: usize) {
        *self.script.fail_from.lock().unwrap() = Some(call);
    }

    fn fails(&self, call: usize) -> bool {
        self.script.failing_calls.lock().unwrap().contains(&call)
            || self
                .script
                .fail_from
                .lock()
                .unwrap()
                .is_some_and(|from| call >= from)
    }
}

#[async_trait]
impl CacheLoader<String, String> for ScriptedLoader {
    async fn load(&self, key: &String) -> Result<String, LoadError> {
        let call = self.script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.script.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.script.delay).await;
        self.script.running.fetch_sub(1, Ordering::SeqCst);
        if self.fails(call) {
            Err(LoadError::new(format!("load {call} of {key} failed")))
        } else {
            Ok(format!("{key}-v{call}"))
        }
    }
}

/// Loader producing `int_rows(rows)` and counting its calls.
#[derive(Clone)]
pub struct RowsLoader {
    rows: i64,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl RowsLoader {
    pub fn new(rows: i64, delay: Duration) -> Self {
        Self {
            rows,
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheLoader<String, RowSequence> for RowsLoader {
    async fn load(&self, key: &String) -> Result<RowSequence, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if key.starts_with("broken") {
            return Err(LoadError::new(format!("query {key} failed")));
        }
        Ok(int_rows(self.rows))
    }
}

// ========================
// Pipeline fakes
// ========================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Accepted(i64),
    Finished,
}

/// Row input whose acceptance is scripted by the test.
pub struct ScriptedInput {
    running: AtomicBool,
    accepting: AtomicBool,
    stop_after: Option<usize>,
    accepted: Mutex<Vec<Row>>,
    events: Mutex<Vec<InputEvent>>,
    put_attempts: AtomicUsize,
    finished_calls: AtomicUsize,
}

impl ScriptedInput {
    /// Input that accepts every row once the pipeline runs.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            stop_after: None,
            accepted: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            put_attempts: AtomicUsize::new(0),
            finished_calls: AtomicUsize::new(0),
        }
    }

    /// Stop running right after the `n`-th row is accepted.
    pub fn stopping_after(mut self, n: usize) -> Self {
        self.stop_after = Some(n);
        self
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// While not accepting, every put waits out its timeout and is rejected.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> Vec<Row> {
        self.accepted.lock().unwrap().clone()
    }

    /// Mutable access to the accepted rows, as a downstream stage would have.
    pub fn with_accepted_mut<R>(&self, f: impl FnOnce(&mut Vec<Row>) -> R) -> R {
        f(&mut self.accepted.lock().unwrap())
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn finished_calls(&self) -> usize {
        self.finished_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowInput for ScriptedInput {
    async fn try_put(&self, row: Row, timeout: Duration) -> Result<(), Row> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_running() {
            return Err(row);
        }
        if !self.accepting.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(row);
        }

        let n = match row.get("n") {
            Some(Value::Int(n)) => *n,
            _ => -1,
        };
        let count = {
            let mut accepted = self.accepted.lock().unwrap();
            accepted.push(row);
            accepted.len()
        };
        self.events.lock().unwrap().push(InputEvent::Accepted(n));
        if self.stop_after.is_some_and(|limit| count >= limit) {
            self.set_running(false);
        }
        Ok(())
    }

    fn finished(&self) {
        self.finished_calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(InputEvent::Finished);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub const PRODUCER_ID: &str = "producer";

/// Pipeline context driven step by step by the test.
///
/// Comes pre-wired the way an engine would be: the producer's default wiring
/// before start, its start listener at ready-for-input, and one unrelated
/// listener at each point.
pub struct ScriptedPipeline {
    listeners: Mutex<HashMap<ExecutionPoint, Vec<(ListenerTag, Listener)>>>,
    producer: Arc<LocalBranch>,
    input: Arc<ScriptedInput>,
    default_wired: Arc<AtomicBool>,
    producer_started: Arc<AtomicBool>,
    unrelated_fired: Arc<AtomicUsize>,
}

impl ScriptedPipeline {
    pub fn new(input: ScriptedInput) -> Self {
        let pipeline = Self {
            listeners: Mutex::new(HashMap::new()),
            producer: Arc::new(LocalBranch::new(PRODUCER_ID, &["scan", "project"])),
            input: Arc::new(input),
            default_wired: Arc::new(AtomicBool::new(false)),
            producer_started: Arc::new(AtomicBool::new(false)),
            unrelated_fired: Arc::new(AtomicUsize::new(0)),
        };

        let wired = Arc::clone(&pipeline.default_wired);
        pipeline.register_once(
            ExecutionPoint::BeforeProducerStart,
            ListenerTag::DefaultWiring,
            Box::new(move || wired.store(true, Ordering::SeqCst)),
        );
        let started = Arc::clone(&pipeline.producer_started);
        pipeline.register_once(
            ExecutionPoint::ReadyForInput,
            ListenerTag::StartBranch(PRODUCER_ID.to_string()),
            Box::new(move || started.store(true, Ordering::SeqCst)),
        );
        for point in [ExecutionPoint::BeforeProducerStart, ExecutionPoint::ReadyForInput] {
            let fired = Arc::clone(&pipeline.unrelated_fired);
            pipeline.register_once(
                point,
                ListenerTag::Named("metrics".to_string()),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        pipeline
    }

    /// Fire and drop every listener at `point`, in registration order.
    pub fn fire(&self, point: ExecutionPoint) -> usize {
        let listeners = self.listeners.lock().unwrap().remove(&point).unwrap_or_default();
        let fired = listeners.len();
        for (_, listener) in listeners {
            listener();
        }
        fired
    }

    /// Fire the pre-start listeners, start running, then signal readiness.
    pub fn start(&self) {
        self.fire(ExecutionPoint::BeforeProducerStart);
        self.input.set_running(true);
        self.fire(ExecutionPoint::ReadyForInput);
    }

    pub fn tags(&self, point: ExecutionPoint) -> Vec<ListenerTag> {
        self.listeners
            .lock()
            .unwrap()
            .get(&point)
            .map(|list| list.iter().map(|(tag, _)| tag.clone()).collect())
            .unwrap_or_default()
    }

    pub fn input(&self) -> &Arc<ScriptedInput> {
        &self.input
    }

    pub fn producer(&self) -> &Arc<LocalBranch> {
        &self.producer
    }

    pub fn default_wiring_ran(&self) -> bool {
        self.default_wired.load(Ordering::SeqCst)
    }

    pub fn producer_started(&self) -> bool {
        self.producer_started.load(Ordering::SeqCst)
    }

    pub fn unrelated_listeners_fired(&self) -> usize {
        self.unrelated_fired.load(Ordering::SeqCst)
    }
}

impl PipelineContext for ScriptedPipeline {
    fn remove_matching(
        &self,
        point: ExecutionPoint,
        predicate: &dyn Fn(&ListenerTag) -> bool,
    ) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        let Some(list) = listeners.get_mut(&point) else {
            return 0;
        };
        let before = list.len();
        list.retain(|(tag, _)| !predicate(tag));
        before - list.len()
    }

    fn register_once(&self, point: ExecutionPoint, tag: ListenerTag, listener: Listener) {
        self.listeners
            .lock()
            .unwrap()
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
