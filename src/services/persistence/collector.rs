// Collector - 結果収集とブロック書き出し機能

use super::block_buffer::BlockBuffer;
use crate::core::{
    Aggregate, CollectorReport, CompletionStrategy, Message, Outcome, OutputMessage,
    PipelineError, PipelineResult, ProgressReporter, RowSink,
};
use crate::engine::rotation::Rotation;
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collectorの動作設定
#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    pub block_size: usize,
    pub completion: CompletionStrategy,
    /// 投入予定の総件数（進捗表示と `ExpectedCount` の判定に使う）
    pub expected_total: usize,
    pub progress_interval: usize,
}

/// Collector: 全ワーカーの出力チャンネルから結果を収集し、シンクへ書き出す
///
/// 終了時、中断されていなければ集約結果を返す。中断時は書き出しバッファを破棄して `None` を返す。
pub fn spawn_result_collector<V, A, R, S>(
    receivers: Vec<mpsc::Receiver<OutputMessage<V>>>,
    aggregate: A,
    settings: CollectorSettings,
    reporter: Arc<R>,
    sink: Arc<S>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<PipelineResult<(CollectorReport, Option<A::Output>)>>
where
    V: Send + 'static,
    A: Aggregate<V>,
    R: ProgressReporter + ?Sized + 'static,
    S: RowSink + ?Sized + 'static,
{
    tokio::spawn(async move {
        let collector = Collector {
            receivers,
            settings,
            reporter,
            sink,
            token,
        };
        collector.run(aggregate).await
    })
}

struct Collector<V, R: ?Sized, S: ?Sized> {
    receivers: Vec<mpsc::Receiver<OutputMessage<V>>>,
    settings: CollectorSettings,
    reporter: Arc<R>,
    sink: Arc<S>,
    token: CancellationToken,
}

impl<V, R, S> Collector<V, R, S>
where
    V: Send + 'static,
    R: ProgressReporter + ?Sized + 'static,
    S: RowSink + ?Sized + 'static,
{
    async fn run<A>(mut self, mut aggregate: A) -> PipelineResult<(CollectorReport, Option<A::Output>)>
    where
        A: Aggregate<V>,
    {
        let worker_count = self.receivers.len();
        let mut report = CollectorReport::default();
        let mut completed = vec![false; worker_count];
        let mut rotation = Rotation::new(worker_count);
        let mut buffer = BlockBuffer::new(self.settings.block_size);
        let progress_interval = self.settings.progress_interval.max(1);
        let mut next_progress = progress_interval;

        #[allow(deprecated)]
        let expected = match self.settings.completion {
            CompletionStrategy::ShutdownSignals => None,
            CompletionStrategy::ExpectedCount => Some(self.settings.expected_total),
        };

        self.sink
            .write_header(aggregate.header())
            .await
            .map_err(PipelineError::persistence)?;

        while !completed.iter().all(|done| *done) {
            if expected.is_some_and(|total| report.collected >= total) {
                debug!(collected = report.collected, "予定件数に達したため収集を終了します");
                break;
            }

            let (worker_id, message) =
                next_message(&mut self.receivers, &completed, &rotation).await;
            rotation.advance_past(worker_id);

            match message {
                Some(Message::Item(batch)) => {
                    report.batches += 1;
                    for item in batch.items {
                        report.collected += 1;
                        match item.outcome {
                            Outcome::Value(value) => {
                                for row in aggregate.merge(&item.key, value) {
                                    if let Some(block) = buffer.push(row) {
                                        self.write_block(&block, &mut report).await?;
                                    }
                                }
                            }
                            Outcome::Skipped { reason } => {
                                report.skipped += 1;
                                self.reporter.report_skipped(&item.key, &reason).await;
                            }
                        }
                    }

                    if report.collected >= next_progress {
                        self.reporter
                            .report_progress(report.collected, self.settings.expected_total)
                            .await;
                        next_progress = (report.collected / progress_interval + 1) * progress_interval;
                    }
                }
                Some(Message::Shutdown) => {
                    debug!(worker_id, "ワーカーのシャットダウンを確認しました");
                    completed[worker_id] = true;
                }
                None => {
                    warn!(worker_id, "シャットダウン通知なしで出力チャンネルが閉じられました");
                    completed[worker_id] = true;
                    report.failed_workers.push(worker_id);
                }
            }
        }

        report.unresponsive_workers = completed
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(worker_id, _)| worker_id)
            .collect();
        if !report.unresponsive_workers.is_empty() {
            debug!(
                workers = ?report.unresponsive_workers,
                "シャットダウンを確認できなかったワーカーがあります"
            );
        }

        report.interrupted = self.token.is_cancelled();
        let output = if report.interrupted {
            report.rows_discarded = buffer.discard();
            warn!(
                rows_discarded = report.rows_discarded,
                "中断されたため未書き出しの行を破棄しました"
            );
            None
        } else {
            for row in aggregate.drain_rows() {
                if let Some(block) = buffer.push(row) {
                    self.write_block(&block, &mut report).await?;
                }
            }
            if let Some(block) = buffer.take_remaining() {
                self.write_block(&block, &mut report).await?;
            }
            Some(aggregate.finish())
        };

        self.sink
            .finalize()
            .await
            .map_err(PipelineError::persistence)?;

        info!(
            collected = report.collected,
            rows_written = report.rows_written,
            blocks = report.blocks_written,
            "収集を完了しました"
        );
        Ok((report, output))
    }

    async fn write_block(
        &self,
        block: &[String],
        report: &mut CollectorReport,
    ) -> PipelineResult<()> {
        self.sink
            .write_block(block)
            .await
            .map_err(PipelineError::persistence)?;
        report.blocks_written += 1;
        report.rows_written += block.len();
        self.reporter
            .report_block_written(report.blocks_written, report.rows_written)
            .await;
        Ok(())
    }
}

/// 未完了の出力チャンネルのいずれかにメッセージが届くまで待機する
///
/// 走査はカーソル位置から始まり、複数のチャンネルが同時に準備できている場合はカーソルに近い方が選ばれる。
/// 呼び出し側が返されたチャンネルの次へカーソルを進めることで、どのチャンネルも取り残されない。
async fn next_message<V>(
    receivers: &mut [mpsc::Receiver<OutputMessage<V>>],
    completed: &[bool],
    rotation: &Rotation,
) -> (usize, Option<OutputMessage<V>>) {
    poll_fn(|cx| {
        for worker_id in rotation.order() {
            if completed[worker_id] {
                continue;
            }
            if let Poll::Ready(message) = receivers[worker_id].poll_recv(cx) {
                return Poll::Ready((worker_id, message));
            }
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Batch, ResultItem};
    use crate::services::monitoring::implementations::NoOpProgressReporter;
    use crate::services::persistence::implementations::MemoryRowSink;
    use tokio::time::{timeout, Duration};

    /// 値をそのまま1行にする集約
    struct EchoAggregate;

    impl Aggregate<u32> for EchoAggregate {
        type Output = ();

        fn header(&self) -> &str {
            "key\tvalue"
        }

        fn merge(&mut self, key: &str, value: u32) -> Vec<String> {
            vec![format!("{key}\t{value}")]
        }

        fn finish(self) -> Self::Output {}
    }

    fn settings(block_size: usize) -> CollectorSettings {
        CollectorSettings {
            block_size,
            completion: CompletionStrategy::ShutdownSignals,
            expected_total: 0,
            progress_interval: 100,
        }
    }

    fn batch(worker_id: usize, keys: &[&str]) -> OutputMessage<u32> {
        Message::Item(Batch {
            worker_id,
            items: keys.iter().map(|k| ResultItem::value(*k, 1)).collect(),
        })
    }

    fn channels(
        count: usize,
    ) -> (
        Vec<mpsc::Sender<OutputMessage<u32>>>,
        Vec<mpsc::Receiver<OutputMessage<u32>>>,
    ) {
        (0..count).map(|_| mpsc::channel(16)).unzip()
    }

    #[tokio::test]
    async fn test_collector_waits_for_every_shutdown() {
        let (senders, receivers) = channels(2);
        let sink = Arc::new(MemoryRowSink::new());

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            settings(2),
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            CancellationToken::new(),
        );

        senders[0].send(batch(0, &["a", "b", "c"])).await.unwrap();
        senders[0].send(Message::Shutdown).await.unwrap();
        senders[1].send(batch(1, &["d"])).await.unwrap();

        // worker 1 のShutdownがまだなので終了しない
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        senders[1].send(Message::Shutdown).await.unwrap();
        let (report, output) = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(report.collected, 4);
        assert_eq!(report.rows_written, 4);
        assert_eq!(report.blocks_written, 2);
        assert!(report.failed_workers.is_empty());
        assert!(output.is_some());
        assert_eq!(sink.header(), Some("key\tvalue".to_string()));
        assert!(sink.is_finalized());
    }

    #[tokio::test]
    async fn test_collector_closed_channel_marks_worker_failed() {
        let (mut senders, receivers) = channels(2);
        let sink = Arc::new(MemoryRowSink::new());

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            settings(10),
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            CancellationToken::new(),
        );

        senders[0].send(batch(0, &["a"])).await.unwrap();
        senders[0].send(Message::Shutdown).await.unwrap();
        // worker 1 はShutdownを送らずに消える
        drop(senders.remove(1));

        let (report, _) = timeout(Duration::from_secs(1), handle)
            .await
            .expect("閉じたチャンネルでCollectorが停止しません")
            .unwrap()
            .unwrap();

        assert_eq!(report.failed_workers, vec![1]);
        assert_eq!(sink.rows(), vec!["a\t1".to_string()]);
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn test_collector_expected_count_strategy() {
        let (senders, receivers) = channels(2);
        let sink = Arc::new(MemoryRowSink::new());

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            CollectorSettings {
                block_size: 10,
                completion: CompletionStrategy::ExpectedCount,
                expected_total: 3,
                progress_interval: 100,
            },
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            CancellationToken::new(),
        );

        senders[0].send(batch(0, &["a", "b"])).await.unwrap();
        senders[1].send(batch(1, &["c"])).await.unwrap();

        // Shutdownを送らなくても件数で終了する
        let (report, output) = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(report.collected, 3);
        assert_eq!(report.unresponsive_workers, vec![0, 1]);
        assert!(output.is_some());
        assert_eq!(sink.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_collector_empty_input_writes_header_only() {
        let (senders, receivers) = channels(3);
        let sink = Arc::new(MemoryRowSink::new());

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            settings(10),
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            CancellationToken::new(),
        );

        for sender in &senders {
            sender.send(Message::Shutdown).await.unwrap();
        }

        let (report, _) = handle.await.unwrap().unwrap();

        assert_eq!(report.batches, 0);
        assert_eq!(report.blocks_written, 0);
        assert_eq!(sink.header(), Some("key\tvalue".to_string()));
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn test_collector_discards_buffer_when_cancelled() {
        let (senders, receivers) = channels(1);
        let sink = Arc::new(MemoryRowSink::new());
        let token = CancellationToken::new();

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            settings(2),
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            token.clone(),
        );

        senders[0].send(batch(0, &["a", "b", "c"])).await.unwrap();
        token.cancel();
        senders[0].send(Message::Shutdown).await.unwrap();

        let (report, output) = handle.await.unwrap().unwrap();

        assert!(report.interrupted);
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.rows_discarded, 1);
        assert!(output.is_none());
        assert!(sink.is_finalized());
    }

    #[tokio::test]
    async fn test_collector_skipped_items_are_not_written() {
        let (senders, receivers) = channels(1);
        let sink = Arc::new(MemoryRowSink::new());

        let handle = spawn_result_collector(
            receivers,
            EchoAggregate,
            settings(10),
            Arc::new(NoOpProgressReporter::new()),
            sink.clone(),
            CancellationToken::new(),
        );

        senders[0]
            .send(Message::Item(Batch {
                worker_id: 0,
                items: vec![
                    ResultItem::value("a", 1),
                    ResultItem::skipped("b", "unknown allele"),
                ],
            }))
            .await
            .unwrap();
        senders[0].send(Message::Shutdown).await.unwrap();

        let (report, _) = handle.await.unwrap().unwrap();

        assert_eq!(report.collected, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(sink.rows(), vec!["a\t1".to_string()]);
    }

    #[tokio::test]
    async fn test_next_message_prefers_cursor_position() {
        let (senders, mut receivers) = channels(3);
        for (worker_id, sender) in senders.iter().enumerate() {
            sender.send(batch(worker_id, &["x"])).await.unwrap();
        }

        let completed = vec![false; 3];
        let mut rotation = Rotation::new(3);
        rotation.advance_past(0);

        // 3チャンネルすべて準備済みでもカーソル(1)から順に選ばれる
        let mut order = Vec::new();
        for _ in 0..3 {
            let (worker_id, _) = next_message(&mut receivers, &completed, &rotation).await;
            rotation.advance_past(worker_id);
            order.push(worker_id);
        }
        assert_eq!(order, vec![1, 2, 0]);
    }
}
