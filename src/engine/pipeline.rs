// Pipeline - Dispatcher → Worker → Collector パイプライン
// チャンネル構築、ワーカー起動、終了待機のオーケストレーション

use super::{cancellation::CancellationController, dispatcher::Dispatcher, worker::Worker};
use crate::{
    core::{
        Aggregate, Lookup, LookupFactory, PipelineConfig, PipelineError, PipelineResult,
        ProgressReporter, RowSink, RunOutcome, RunSummary, WorkItem, WorkerReport,
    },
    services::persistence::{spawn_result_collector, CollectorSettings},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};

/// ファクトリが生成するルックアップのペイロード型
pub type PayloadOf<F> = <<F as LookupFactory>::Lookup as Lookup>::Payload;

/// ファクトリが生成するルックアップの結果型
pub type ValueOf<F> = <<F as LookupFactory>::Lookup as Lookup>::Value;

/// 固定サイズのワーカープールによるパイプライン
pub struct ProcessingPipeline<F> {
    factory: Arc<F>,
}

impl<F> ProcessingPipeline<F>
where
    F: LookupFactory + 'static,
{
    pub fn new(factory: Arc<F>) -> Self {
        Self { factory }
    }

    /// タスク列を処理
    ///
    /// ワーカーのリソースは起動前にすべて開かれる。1つでも開けなければ何も起動せずにエラーを返す。
    pub async fn execute<C, R, S, A>(
        &self,
        items: Vec<WorkItem<PayloadOf<F>>>,
        aggregate: A,
        config: &C,
        reporter: Arc<R>,
        sink: Arc<S>,
        controller: &CancellationController,
    ) -> PipelineResult<RunOutcome<A::Output>>
    where
        C: PipelineConfig + ?Sized,
        R: ProgressReporter + ?Sized + 'static,
        S: RowSink + ?Sized + 'static,
        A: Aggregate<ValueOf<F>>,
    {
        let start_time = Instant::now();
        let worker_count = config.worker_count();
        let total_items = items.len();

        // ワーカーごとのリソースを先に開く
        let mut lookups = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let lookup = self
                .factory
                .open(worker_id)
                .await
                .map_err(|e| PipelineError::worker_startup(worker_id, e))?;
            lookups.push(lookup);
        }

        // 1回の実行用トークン（致命的エラーはこの実行だけを中断する）
        let token = controller.child_token();
        reporter.report_started(total_items, worker_count).await;

        // ワーカーごとの専用チャンネル
        let mut input_senders = Vec::with_capacity(worker_count);
        let mut output_receivers = Vec::with_capacity(worker_count);
        let mut worker_handles = Vec::with_capacity(worker_count);

        for (worker_id, lookup) in lookups.into_iter().enumerate() {
            let (input_tx, input_rx) = mpsc::channel(config.channel_capacity());
            let (output_tx, output_rx) = mpsc::channel(config.channel_capacity());
            input_senders.push(input_tx);
            output_receivers.push(output_rx);

            let worker = Worker::new(
                worker_id,
                lookup,
                input_rx,
                output_tx,
                config.flush_threshold(),
                config.retry_policy(),
                token.clone(),
            );
            let worker_token = token.clone();
            worker_handles.push(tokio::spawn(async move {
                let result = worker.run().await;
                if result.is_err() {
                    // 致命的エラーは実行全体を中断させる
                    worker_token.cancel();
                }
                result
            }));
        }

        // Collector起動
        let collector_handle = spawn_result_collector(
            output_receivers,
            aggregate,
            CollectorSettings {
                block_size: config.block_size(),
                completion: config.completion_strategy(),
                expected_total: total_items,
                progress_interval: config.progress_interval(),
            },
            Arc::clone(&reporter),
            Arc::clone(&sink),
            token.clone(),
        );

        // Dispatcherは制御タスク上で実行
        let dispatch = Dispatcher::new(input_senders, token.clone(), config.progress_interval())
            .run(items, Arc::clone(&reporter))
            .await;

        // 全ワーカーの終了を待機
        let mut worker_reports: Vec<WorkerReport> = Vec::with_capacity(worker_count);
        let mut first_worker_error: Option<PipelineError> = None;
        for handle in worker_handles {
            match handle.await {
                Ok(Ok(report)) => worker_reports.push(report),
                Ok(Err(e)) => {
                    first_worker_error.get_or_insert(e);
                }
                Err(join_error) => {
                    token.cancel();
                    first_worker_error.get_or_insert(join_error.into());
                }
            }
        }

        let collected = collector_handle.await?;

        let (collector_report, output) = collected?;
        if let Some(e) = first_worker_error {
            error!(
                submitted = dispatch.submitted,
                collected = collector_report.collected,
                rows_written = collector_report.rows_written,
                failed_workers = ?collector_report.failed_workers,
                "ワーカーの致命的エラーにより実行を中断しました"
            );
            return Err(e);
        }

        let summary = RunSummary {
            submitted: dispatch.submitted,
            collected: collector_report.collected,
            skipped: collector_report.skipped,
            discarded: worker_reports.iter().map(|r| r.discarded).sum(),
            retries: worker_reports.iter().map(|r| r.retries).sum(),
            rows_written: collector_report.rows_written,
            blocks_written: collector_report.blocks_written,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            interrupted: collector_report.interrupted || dispatch.cancelled,
            failed_workers: collector_report.failed_workers,
            workers: worker_reports,
        };

        reporter.report_completed(&summary).await;
        info!(
            submitted = summary.submitted,
            collected = summary.collected,
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed_ms,
            interrupted = summary.interrupted,
            "パイプラインが終了しました"
        );

        let output = if summary.interrupted { None } else { output };
        Ok(RunOutcome { summary, output })
    }
}
