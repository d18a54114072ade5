// Worker - 専用チャンネルから作業を受け取り、結果をバッチで送出する

use super::cancellation::drain_input;
use crate::core::{
    Batch, InputMessage, Lookup, LookupError, Message, OutputMessage, PipelineError,
    PipelineResult, ResultItem, RetryPolicy, WorkItem, WorkerReport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 単一ワーカー
///
/// `FETCH → EXECUTE → BUFFER → [FLUSH] → FETCH` を Shutdown を受信するまで繰り返し、
/// 最後に残りのバッファを送出してから出力チャンネルへ Shutdown を1回だけ送る。
/// 致命的エラーで終了した場合は Shutdown を送らない（Collector側ではチャンネルの切断として観測される）。
pub struct Worker<L: Lookup> {
    id: usize,
    lookup: L,
    input: mpsc::Receiver<InputMessage<L::Payload>>,
    output: mpsc::Sender<OutputMessage<L::Value>>,
    flush_threshold: usize,
    retry: RetryPolicy,
    token: CancellationToken,
    buffer: Vec<ResultItem<L::Value>>,
    report: WorkerReport,
}

impl<L: Lookup> Worker<L> {
    pub fn new(
        id: usize,
        lookup: L,
        input: mpsc::Receiver<InputMessage<L::Payload>>,
        output: mpsc::Sender<OutputMessage<L::Value>>,
        flush_threshold: usize,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        let flush_threshold = flush_threshold.max(1);
        Self {
            id,
            lookup,
            input,
            output,
            flush_threshold,
            retry,
            token,
            buffer: Vec::with_capacity(flush_threshold),
            report: WorkerReport {
                worker_id: id,
                ..Default::default()
            },
        }
    }

    /// ワーカーを実行し、終了時にルックアップのリソースを解放する
    pub async fn run(mut self) -> PipelineResult<WorkerReport> {
        debug!(worker_id = self.id, "ワーカーを開始しました");
        let result = self.process().await;

        if let Err(e) = self.lookup.close().await {
            warn!(worker_id = self.id, error = %e, "リソースの解放に失敗しました");
        }

        match result {
            Ok(()) => {
                debug!(
                    worker_id = self.id,
                    processed = self.report.processed,
                    batches = self.report.batches,
                    "ワーカーを終了しました"
                );
                Ok(self.report)
            }
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "ワーカーが致命的エラーで停止しました");
                Err(e)
            }
        }
    }

    async fn process(&mut self) -> PipelineResult<()> {
        loop {
            // FETCH
            let item = match self.input.recv().await {
                Some(Message::Item(item)) => item,
                Some(Message::Shutdown) => break,
                None => {
                    warn!(worker_id = self.id, "Shutdownなしで入力チャンネルが閉じられました");
                    break;
                }
            };

            if self.token.is_cancelled() {
                self.report.discarded += 1 + drain_input(&mut self.input).await;
                debug!(
                    worker_id = self.id,
                    discarded = self.report.discarded,
                    "中断により残りの入力を破棄しました"
                );
                break;
            }

            // EXECUTE → BUFFER
            let result = self.execute(item).await?;
            self.buffer.push(result);

            if self.buffer.len() >= self.flush_threshold {
                self.flush().await?;
            }
        }

        // FLUSH_FINAL
        if !self.buffer.is_empty() {
            self.flush().await?;
        }

        // EMIT_SHUTDOWN
        if self.output.send(Message::Shutdown).await.is_err() {
            debug!(worker_id = self.id, "Collectorは既に終了しています");
        }
        Ok(())
    }

    /// ルックアップを実行し、再試行可能なエラーはポリシーに従って再実行する
    async fn execute(&mut self, item: WorkItem<L::Payload>) -> PipelineResult<ResultItem<L::Value>> {
        let mut attempt = 1;
        loop {
            match self.lookup.lookup(&item.payload).await {
                Ok(value) => {
                    self.report.processed += 1;
                    return Ok(ResultItem::value(item.key, value));
                }
                Err(LookupError::UnknownKey { key }) => {
                    self.report.processed += 1;
                    self.report.skipped += 1;
                    return Ok(ResultItem::skipped(item.key, format!("未知のキー: {key}")));
                }
                Err(error) if error.is_retryable() => {
                    if !self.retry.allows_retry_after(attempt) {
                        return Err(PipelineError::retries_exhausted(item.key, attempt, error));
                    }
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        worker_id = self.id,
                        key = %item.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "外部コマンドが失敗しました。再試行します"
                    );
                    self.report.retries += 1;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(PipelineError::lookup_failed(item.key, error)),
            }
        }
    }

    async fn flush(&mut self) -> PipelineResult<()> {
        let items = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.flush_threshold));
        let size = items.len();
        let batch = Batch {
            worker_id: self.id,
            items,
        };

        self.output
            .send(Message::Item(batch))
            .await
            .map_err(|_| {
                PipelineError::channel(format!("worker {}: 出力チャンネルが閉じられました", self.id))
            })?;

        self.report.batches += 1;
        debug!(worker_id = self.id, size, "バッチを送出しました");
        Ok(())
    }
}
