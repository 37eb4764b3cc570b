mod common;

use std::sync::Arc;

use common::{int_rows, ints, InputEvent, ScriptedInput, ScriptedPipeline};
use proptest::prelude::*;
use rowcache::{CacheReplayFeeder, ReplayConfig, TokioExecutor};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    /// Property: a replay delivers a prefix of the cached rows, in order
    ///
    /// However early the pipeline stops, the rows it accepted are exactly the
    /// first `delivered` cached rows, the reported count matches, and
    /// `finished()` is the last thing the input sees, exactly once.
    #[test]
    fn prop_replay_delivers_ordered_prefix(
        len in 0i64..60,
        stop_after in prop::option::of(1usize..80),
    ) {
        let rt = runtime();
        let (delivered, total, accepted, events) = rt.block_on(async {
            let input = match stop_after {
                Some(n) => ScriptedInput::new().stopping_after(n),
                None => ScriptedInput::new(),
            };
            let pipeline = ScriptedPipeline::new(input);
            let feeder = CacheReplayFeeder::new(
                Arc::new(TokioExecutor::current()),
                ReplayConfig::default(),
            );

            let handle = feeder.replay(&pipeline, int_rows(len));
            pipeline.start();
            let outcome = handle.await.expect("replay should complete");
            (
                outcome.delivered,
                outcome.total,
                ints(&pipeline.input().accepted()),
                pipeline.input().events(),
            )
        });

        let len_usize = usize::try_from(len).unwrap();
        let expected = stop_after.map_or(len_usize, |n| n.min(len_usize));

        prop_assert_eq!(total, len_usize);
        prop_assert_eq!(delivered, expected);
        prop_assert_eq!(accepted.len(), delivered);
        prop_assert_eq!(accepted, (0..len).take(expected).collect::<Vec<_>>());
        prop_assert_eq!(
            events.iter().filter(|e| **e == InputEvent::Finished).count(),
            1
        );
        prop_assert_eq!(events.last(), Some(&InputEvent::Finished));
    }
}
