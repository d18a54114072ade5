// Dispatcher - 作業アイテムをワーカーへラウンドロビン配信

use super::rotation::Rotation;
use crate::core::{DispatchReport, InputMessage, Message, ProgressReporter, WorkItem};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dispatcher: タスク列をワーカー 0, 1, …, N-1, 0, … の順に配信する
///
/// 入力チャンネルは有界で、満杯のチャンネルへの送信はブロックする。
/// 配信の終了後（中断時も含む）、全チャンネルへ Shutdown を1回ずつ送る。
pub struct Dispatcher<P> {
    senders: Vec<mpsc::Sender<InputMessage<P>>>,
    token: CancellationToken,
    progress_interval: usize,
}

impl<P: Send + 'static> Dispatcher<P> {
    pub fn new(
        senders: Vec<mpsc::Sender<InputMessage<P>>>,
        token: CancellationToken,
        progress_interval: usize,
    ) -> Self {
        Self {
            senders,
            token,
            progress_interval: progress_interval.max(1),
        }
    }

    pub async fn run<I, R>(self, items: I, reporter: Arc<R>) -> DispatchReport
    where
        I: IntoIterator<Item = WorkItem<P>>,
        R: ProgressReporter + ?Sized,
    {
        let mut rotation = Rotation::new(self.senders.len());
        let mut report = DispatchReport {
            per_worker: vec![0; self.senders.len()],
            ..Default::default()
        };

        for item in items {
            if self.token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let worker_id = rotation.next_index();
            let sent = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                result = self.senders[worker_id].send(Message::Item(item)) => result,
            };

            if sent.is_err() {
                // 受信側が消えている = ワーカーが停止済み
                warn!(worker_id, "入力チャンネルが閉じられています。配信を中止します");
                self.token.cancel();
                report.cancelled = true;
                break;
            }

            report.submitted += 1;
            report.per_worker[worker_id] += 1;
            if report.submitted % self.progress_interval == 0 {
                reporter.report_submitted(report.submitted).await;
            }
        }

        for (worker_id, sender) in self.senders.iter().enumerate() {
            if sender.send(Message::Shutdown).await.is_err() {
                debug!(worker_id, "停止済みワーカーへのShutdown送信をスキップしました");
            }
        }

        reporter.report_submitted(report.submitted).await;
        if report.cancelled {
            warn!(submitted = report.submitted, "配信を中断しました");
        } else {
            info!(
                submitted = report.submitted,
                per_worker = ?report.per_worker,
                "全アイテムの配信を完了しました"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MockProgressReporter;
    use crate::services::monitoring::implementations::NoOpProgressReporter;
    use tokio::time::{timeout, Duration};

    type Receivers = Vec<mpsc::Receiver<InputMessage<usize>>>;

    fn channels(count: usize, capacity: usize) -> (Vec<mpsc::Sender<InputMessage<usize>>>, Receivers) {
        (0..count).map(|_| mpsc::channel(capacity)).unzip()
    }

    fn items(count: usize) -> Vec<WorkItem<usize>> {
        (0..count).map(|i| WorkItem::new(format!("t{i}"), i)).collect()
    }

    fn drain(receivers: &mut Receivers) -> Vec<Vec<InputMessage<usize>>> {
        receivers
            .iter_mut()
            .map(|rx| {
                let mut messages = Vec::new();
                while let Ok(message) = rx.try_recv() {
                    messages.push(message);
                }
                messages
            })
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_counts_for_250_items() {
        let (senders, mut receivers) = channels(3, 300);
        let dispatcher = Dispatcher::new(senders, CancellationToken::new(), 100);

        let report = dispatcher
            .run(items(250), Arc::new(NoOpProgressReporter::new()))
            .await;

        assert_eq!(report.submitted, 250);
        assert_eq!(report.per_worker, vec![84, 83, 83]);
        assert!(!report.cancelled);

        let received = drain(&mut receivers);
        for messages in &received {
            // 各チャンネルの末尾にShutdownがちょうど1つ
            assert!(messages.last().unwrap().is_shutdown());
            assert_eq!(messages.iter().filter(|m| m.is_shutdown()).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_dispatch_is_deterministic() {
        let mut assignments = Vec::new();
        for _ in 0..2 {
            let (senders, mut receivers) = channels(4, 64);
            Dispatcher::new(senders, CancellationToken::new(), 10)
                .run(items(37), Arc::new(NoOpProgressReporter::new()))
                .await;

            let keys: Vec<Vec<String>> = drain(&mut receivers)
                .into_iter()
                .map(|messages| {
                    messages
                        .into_iter()
                        .filter_map(|m| match m {
                            Message::Item(item) => Some(item.key),
                            Message::Shutdown => None,
                        })
                        .collect()
                })
                .collect();
            assignments.push(keys);
        }

        assert_eq!(assignments[0], assignments[1]);
        assert_eq!(assignments[0][1][0], "t1");
        assert_eq!(assignments[0][1][1], "t5");
    }

    #[tokio::test]
    async fn test_empty_task_list_sends_only_shutdown() {
        let (senders, mut receivers) = channels(2, 4);

        let report = Dispatcher::new(senders, CancellationToken::new(), 10)
            .run(Vec::new(), Arc::new(NoOpProgressReporter::new()))
            .await;

        assert_eq!(report.submitted, 0);
        for messages in drain(&mut receivers) {
            assert_eq!(messages, vec![Message::Shutdown]);
        }
    }

    #[tokio::test]
    async fn test_cancel_unblocks_full_channel() {
        // 容量1のチャンネルで受信しないまま配信するとブロックする
        let (senders, mut receivers) = channels(1, 1);
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(senders, token.clone(), 10);

        let handle = tokio::spawn(async move {
            dispatcher
                .run(items(10), Arc::new(NoOpProgressReporter::new()))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        // Shutdown送信のために1件読み出してチャンネルを空ける
        let first = receivers[0].recv().await.unwrap();
        assert!(!first.is_shutdown());

        let report = timeout(Duration::from_secs(1), handle)
            .await
            .expect("中断後もDispatcherが停止しません")
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.submitted, 1);
        assert_eq!(receivers[0].recv().await, Some(Message::Shutdown));
    }

    #[tokio::test]
    async fn test_closed_worker_channel_cancels_run() {
        let (senders, mut receivers) = channels(2, 10);
        let token = CancellationToken::new();
        drop(receivers.remove(1));

        let report = Dispatcher::new(senders, token.clone(), 10)
            .run(items(5), Arc::new(NoOpProgressReporter::new()))
            .await;

        assert!(report.cancelled);
        assert!(token.is_cancelled());
        assert_eq!(report.submitted, 1);
    }

    #[tokio::test]
    async fn test_submitted_progress_is_reported() {
        let (senders, _receivers) = channels(2, 20);
        let mut reporter = MockProgressReporter::new();
        // 間隔ごとに2回 + 終了時に1回
        reporter.expect_report_submitted().times(3).return_const(());

        Dispatcher::new(senders, CancellationToken::new(), 5)
            .run(items(10), Arc::new(reporter))
            .await;
    }
}
