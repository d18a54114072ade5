// エンジン全体の性質テスト
mod fixtures;

use async_trait::async_trait;
use fixtures::*;
use immunopep::core::{
    CompletionStrategy, Lookup, LookupError, LookupFactory, PipelineError, RetryPolicy, WorkItem,
};
use immunopep::engine::{CancellationController, ProcessingEngine};
use immunopep::services::{DefaultPipelineConfig, MemoryRowSink, NoOpProgressReporter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn engine(
    config: DefaultPipelineConfig,
) -> ProcessingEngine<DefaultPipelineConfig, NoOpProgressReporter, MemoryRowSink> {
    ProcessingEngine::new(config, NoOpProgressReporter::new(), MemoryRowSink::new())
}

fn expected_rows(count: usize) -> Vec<String> {
    sorted(
        (0..count)
            .map(|i| format!("t{i}\tPAYLOAD-{i}"))
            .collect(),
    )
}

#[tokio::test]
async fn test_every_task_appears_exactly_once() {
    let engine = engine(DefaultPipelineConfig::new(4).with_flush_threshold(7).with_block_size(50));

    let outcome = engine
        .run(tasks(500), UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();

    assert_eq!(outcome.output, Some(500));
    assert_eq!(outcome.summary.submitted, 500);
    assert_eq!(outcome.summary.collected, 500);
    assert_eq!(outcome.summary.rows_written, 500);
    assert_eq!(outcome.summary.blocks_written, 10);
    assert_eq!(sorted(engine.sink().rows()), expected_rows(500));
}

#[tokio::test]
async fn test_worker_count_does_not_change_rows() {
    let single = engine(DefaultPipelineConfig::new(1).with_flush_threshold(3));
    let parallel = engine(DefaultPipelineConfig::new(4).with_flush_threshold(3));

    single
        .run(tasks(101), UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();
    parallel
        .run(tasks(101), UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();

    assert_eq!(sorted(single.sink().rows()), sorted(parallel.sink().rows()));
    assert_eq!(single.sink().rows().len(), 101);
}

#[tokio::test]
async fn test_250_tasks_over_three_workers() {
    let engine = engine(DefaultPipelineConfig::new(3).with_flush_threshold(100));

    let outcome = engine
        .run(tasks(250), UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();

    assert!(!outcome.summary.interrupted);
    assert_eq!(outcome.summary.collected, 250);
    assert_eq!(outcome.summary.rows_written, 250);
    assert_eq!(engine.sink().header().as_deref(), Some("key\tvalue"));
    assert_eq!(sorted(engine.sink().rows()), expected_rows(250));

    // 84/83/83件はいずれも閾値未満なので、各ワーカーは最終バッチ1つだけを送る
    let workers = &outcome.summary.workers;
    assert_eq!(
        workers.iter().map(|w| w.worker_id).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        workers.iter().map(|w| w.processed).collect::<Vec<_>>(),
        vec![84, 83, 83]
    );
    assert!(workers.iter().all(|w| w.batches == 1));
}

#[tokio::test]
async fn test_250_tasks_full_and_partial_batches_per_worker() {
    let engine = engine(DefaultPipelineConfig::new(3).with_flush_threshold(50));

    let outcome = engine
        .run(tasks(250), UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();

    let workers = &outcome.summary.workers;
    assert_eq!(
        workers.iter().map(|w| w.processed).collect::<Vec<_>>(),
        vec![84, 83, 83]
    );
    // 50件の満杯バッチ1つ + 残りの部分バッチ1つ
    assert!(workers.iter().all(|w| w.batches == 2));
    assert_eq!(outcome.summary.rows_written, 250);
    assert_eq!(sorted(engine.sink().rows()), expected_rows(250));
}

#[tokio::test]
#[allow(deprecated)]
async fn test_expected_count_strategy_collects_every_task() {
    let engine = engine(
        DefaultPipelineConfig::new(4)
            .with_flush_threshold(9)
            .with_block_size(25)
            .with_completion_strategy(CompletionStrategy::ExpectedCount),
    );

    let outcome = timeout(
        Duration::from_secs(10),
        engine.run(tasks(300), UppercaseFactory::new(), KeyValueAggregate::default()),
    )
    .await
    .expect("expected-count run should finish")
    .unwrap();

    assert!(!outcome.summary.interrupted);
    assert_eq!(outcome.output, Some(300));
    assert_eq!(outcome.summary.collected, 300);
    assert_eq!(outcome.summary.rows_written, 300);
    assert_eq!(outcome.summary.blocks_written, 12);
    assert!(outcome.summary.failed_workers.is_empty());
    assert_eq!(sorted(engine.sink().rows()), expected_rows(300));
    assert!(engine.sink().is_finalized());
}

#[tokio::test]
async fn test_empty_input_writes_header_only() {
    let engine = engine(DefaultPipelineConfig::new(3));

    let outcome = engine
        .run(vec![], UppercaseFactory::new(), KeyValueAggregate::default())
        .await
        .unwrap();

    assert_eq!(outcome.summary.submitted, 0);
    assert_eq!(outcome.summary.blocks_written, 0);
    assert_eq!(engine.sink().header().as_deref(), Some("key\tvalue"));
    assert!(engine.sink().blocks().is_empty());
    assert!(engine.sink().is_finalized());
}

#[tokio::test]
async fn test_interrupt_keeps_flushed_blocks_and_reports_interrupted() {
    let controller = CancellationController::new();
    let engine = engine(
        DefaultPipelineConfig::new(2)
            .with_flush_threshold(2)
            .with_block_size(4)
            .with_channel_capacity(4),
    )
    .with_controller(controller.clone());

    let canceller = {
        let controller = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            controller.cancel();
        })
    };

    let outcome = timeout(
        Duration::from_secs(10),
        engine.run(
            tasks(400),
            UppercaseFactory::slow(Duration::from_millis(5)),
            KeyValueAggregate::default(),
        ),
    )
    .await
    .expect("interrupted run should finish promptly")
    .unwrap();
    canceller.await.unwrap();

    assert!(outcome.summary.interrupted);
    assert!(outcome.output.is_none());
    assert!(outcome.summary.submitted < 400);
    assert!(outcome.summary.rows_written <= outcome.summary.collected);
    assert_eq!(engine.sink().rows().len(), outcome.summary.rows_written);
    assert!(engine.sink().is_finalized());
}

/// 指定回数だけ外部コマンドエラーを返すルックアップ
struct FlakyLookup {
    failures: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Lookup for FlakyLookup {
    type Payload = String;
    type Value = String;

    async fn lookup(&mut self, payload: &String) -> Result<String, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LookupError::external_command("samtools view", "truncated file"));
        }
        Ok(payload.clone())
    }
}

struct FlakyFactory {
    failures: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

impl FlakyFactory {
    fn new(failures: u32) -> Self {
        Self {
            failures: Arc::new(AtomicU32::new(failures)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl LookupFactory for FlakyFactory {
    type Lookup = FlakyLookup;

    async fn open(&self, _worker_id: usize) -> anyhow::Result<FlakyLookup> {
        Ok(FlakyLookup {
            failures: Arc::clone(&self.failures),
            calls: Arc::clone(&self.calls),
        })
    }
}

#[tokio::test]
async fn test_two_failures_then_success_retries_twice() {
    let engine = engine(
        DefaultPipelineConfig::new(1).with_retry_policy(RetryPolicy::immediate(5)),
    );
    let factory = FlakyFactory::new(2);
    let calls = Arc::clone(&factory.calls);

    let outcome = engine
        .run(
            vec![WorkItem::new("m1", "x".to_string())],
            factory,
            KeyValueAggregate::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.summary.retries, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.sink().rows(), vec!["m1\tx"]);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let engine = engine(
        DefaultPipelineConfig::new(2).with_retry_policy(RetryPolicy::immediate(3)),
    );
    let factory = FlakyFactory::new(u32::MAX);
    let calls = Arc::clone(&factory.calls);

    let result = timeout(
        Duration::from_secs(10),
        engine.run(tasks(1), factory, KeyValueAggregate::default()),
    )
    .await
    .expect("failed run should finish promptly");

    match result {
        Err(PipelineError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(engine.sink().rows().is_empty());
}
