// パイプラインで受け渡されるデータ型定義

use serde::{Deserialize, Serialize};

/// ワーカーに配信される1件の作業単位
///
/// 作成後は不変。チャンネル経由で所有権が移動し、ちょうど1つのワーカーに消費される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<P> {
    pub key: String,
    pub payload: P,
}

impl<P> WorkItem<P> {
    pub fn new(key: impl Into<String>, payload: P) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// 1件のルックアップ結果
///
/// 回復可能なアイテム単位のエラーはチャンネルを越えず、`Skipped` として表現される。
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<V> {
    Value(V),
    Skipped { reason: String },
}

/// WorkItemから計算された結果
#[derive(Debug, Clone, PartialEq)]
pub struct ResultItem<V> {
    pub key: String,
    pub outcome: Outcome<V>,
}

impl<V> ResultItem<V> {
    pub fn value(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Value(value),
        }
    }

    pub fn skipped(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped { .. })
    }
}

/// 1つのワーカーがまとめて送出する結果のバッチ
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<V> {
    pub worker_id: usize,
    pub items: Vec<ResultItem<V>>,
}

impl<V> Batch<V> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// チャンネル上のメッセージ
///
/// `Shutdown` は「このチャンネルにはもうメッセージが来ない」ことを表す終端マーカー。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Item(T),
    Shutdown,
}

impl<T> Message<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Dispatcher → Worker のメッセージ
pub type InputMessage<P> = Message<WorkItem<P>>;

/// Worker → Collector のメッセージ
pub type OutputMessage<V> = Message<Batch<V>>;

/// Collectorの終了判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompletionStrategy {
    /// 全ワーカーのShutdown通知を受信した時点で終了する（標準）
    #[default]
    ShutdownSignals,
    /// 収集件数が投入件数に達した時点で終了する
    ///
    /// ワーカーが結果を出さずに停止すると終了保証がないため非推奨。
    #[deprecated(note = "ワーカー異常終了時に終了保証がないため ShutdownSignals を使用してください")]
    ExpectedCount,
}

/// Dispatcherの配信結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub submitted: usize,
    pub per_worker: Vec<usize>,
    pub cancelled: bool,
}

/// 1ワーカーの処理結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub processed: usize,
    pub skipped: usize,
    pub retries: usize,
    pub discarded: usize,
    pub batches: usize,
}

/// Collectorの集計結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorReport {
    pub collected: usize,
    pub skipped: usize,
    pub batches: usize,
    pub rows_written: usize,
    pub blocks_written: usize,
    pub rows_discarded: usize,
    pub failed_workers: Vec<usize>,
    pub unresponsive_workers: Vec<usize>,
    pub interrupted: bool,
}

/// 実行全体のサマリー
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub submitted: usize,
    pub collected: usize,
    pub skipped: usize,
    pub discarded: usize,
    pub retries: usize,
    pub rows_written: usize,
    pub blocks_written: usize,
    pub elapsed_ms: u64,
    pub interrupted: bool,
    pub failed_workers: Vec<usize>,
    /// ワーカーID順の処理結果
    pub workers: Vec<WorkerReport>,
}

/// エンジン実行の戻り値
///
/// 中断された場合、集約結果 `output` は `None` になる。
#[derive(Debug)]
pub struct RunOutcome<O> {
    pub summary: RunSummary,
    pub output: Option<O>,
}
