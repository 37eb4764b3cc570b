//! Implementation of the `rowcache demo` command.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use clap::Args;
use serde::Serialize;
use tracing::info;

use crate::adapters::{LocalBranch, LocalPipeline, TokioExecutor, DEFAULT_INPUT_CAPACITY};
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::LoadError;
use crate::domain::models::{Config, Field, Row, RowSchema, RowSequence, Value, ValueKind};
use crate::domain::ports::loader_fn;
use crate::services::{CacheStats, CachedReplayService};

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Rows produced by the synthetic computation
    #[arg(long, default_value_t = 1_000)]
    pub rows: usize,

    /// Number of pipelines the cached rows are replayed into
    #[arg(long, default_value_t = 3)]
    pub replays: usize,

    /// Simulated cost of the computation, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub load_delay_ms: u64,

    /// Cache key of the computation
    #[arg(long, default_value = "SELECT * FROM orders")]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub replay: usize,
    pub delivered: usize,
    pub consumed: usize,
    pub total: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct DemoOutput {
    pub query: String,
    pub replays: Vec<ReplaySummary>,
    pub cache: CacheStats,
}

impl CommandOutput for DemoOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Query: {}", self.query)];
        for replay in &self.replays {
            lines.push(format!(
                "  replay {}: delivered {}/{} rows, consumer saw {} ({} ms)",
                replay.replay, replay.delivered, replay.total, replay.consumed, replay.elapsed_ms
            ));
        }
        lines.push(format!(
            "\nCache: {} entr{}, {} load(s), {} hit(s), {} stale hit(s), {} miss(es)",
            self.cache.entries,
            if self.cache.entries == 1 { "y" } else { "ies" },
            self.cache.loads_started,
            self.cache.hits,
            self.cache.stale_hits,
            self.cache.misses,
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Rows standing in for the result of an expensive query.
pub fn synthetic_rows(query: &str, count: usize) -> RowSequence {
    let schema = Arc::new(RowSchema::new(vec![
        Field::new("id", ValueKind::Int),
        Field::new("source", ValueKind::Text),
        Field::new("amount", ValueKind::Float),
        Field::new("created_at", ValueKind::Timestamp),
    ]));
    let base = Utc::now();

    (0..count)
        .map(|i| {
            let id = i64::try_from(i).unwrap_or(i64::MAX);
            Row::new(
                Arc::clone(&schema),
                vec![
                    Value::Int(id),
                    Value::from(query),
                    Value::Float(1.5 * (id % 10_000) as f64),
                    Value::Timestamp(base - TimeDelta::seconds(id)),
                ],
            )
        })
        .collect()
}

pub async fn execute(args: DemoArgs, config: &Config, json_mode: bool) -> Result<()> {
    let output_data = run(args, config).await?;
    output(&output_data, json_mode);
    Ok(())
}

/// Run the demo and collect its report.
pub async fn run(args: DemoArgs, config: &Config) -> Result<DemoOutput> {
    let executor = Arc::new(TokioExecutor::current());
    let row_count = args.rows;
    let delay = Duration::from_millis(args.load_delay_ms);

    let loader = loader_fn(move |query: String| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, LoadError>(synthetic_rows(&query, row_count))
    });
    let service = CachedReplayService::new(loader, executor, &config.cache, config.replay.clone());

    let mut replays = Vec::with_capacity(args.replays);
    for replay in 1..=args.replays {
        let pipeline = LocalPipeline::new(
            LocalBranch::new("service", &["input", "compute", "output"]),
            DEFAULT_INPUT_CAPACITY,
        );
        let mut rows_out = pipeline
            .take_output()
            .context("Pipeline output already taken")?;

        let started = Instant::now();
        let handle = service
            .replay_cached(&args.query, &pipeline)
            .await
            .context("Failed to load rows for replay")?;

        let consumer = tokio::spawn(async move {
            let mut consumed = 0_usize;
            while rows_out.recv().await.is_some() {
                consumed += 1;
            }
            consumed
        });

        pipeline.start();
        let outcome = handle.await.context("Cache replay failed")?;
        let consumed = consumer.await.context("Consumer task failed")?;
        pipeline.stop();

        info!(replay, delivered = outcome.delivered, consumed, "replay finished");
        replays.push(ReplaySummary {
            replay,
            delivered: outcome.delivered,
            consumed,
            total: outcome.total,
            elapsed_ms: started.elapsed().as_millis(),
        });
    }

    Ok(DemoOutput {
        query: args.query,
        replays,
        cache: service.cache().stats(),
    })
}
