// Cancellation Controller - 中断シグナルの伝播

use crate::core::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 実行中断を制御するコントローラー
///
/// 外部割り込み（Ctrl-C）またはプログラムからの `cancel` でトークンを発火させる。
/// トークンを見たDispatcherは配信を止め、Workerは入力を処理せずに読み捨てる。
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 1回の実行用の子トークン
    ///
    /// 親の中断は子へ伝播するが、子の中断（致命的エラー）は親へ伝播しない。
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Ctrl-Cを監視するタスクを起動
    ///
    /// トークンが先に中断された場合はそのまま終了する。
    pub fn listen_for_interrupt(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            warn!("割り込みを受信しました。実行中の処理の完了を待って終了します");
                            token.cancel();
                        }
                        Err(e) => warn!(error = %e, "割り込みシグナルの監視に失敗しました"),
                    }
                }
                _ = token.cancelled() => {
                    debug!("割り込み監視を終了します");
                }
            }
        })
    }
}

/// 入力チャンネルに残ったアイテムを処理せずに読み捨てる
///
/// Shutdownを受信するかチャンネルが閉じるまで読み続け、捨てた件数を返す。
pub async fn drain_input<T>(input: &mut mpsc::Receiver<Message<T>>) -> usize {
    let mut discarded = 0;
    while let Some(message) = input.recv().await {
        match message {
            Message::Item(_) => discarded += 1,
            Message::Shutdown => break,
        }
    }
    discarded
}
