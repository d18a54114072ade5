// 並列処理システムのトレイト定義
// エンジンと各ツールの境界となる抽象化インターフェース

use super::error::LookupError;
use super::retry::RetryPolicy;
use super::types::{CompletionStrategy, RunSummary};
use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

/// エンジンの設定を抽象化するトレイト
#[automock]
pub trait PipelineConfig: Send + Sync {
    /// ワーカー数を取得
    fn worker_count(&self) -> usize;

    /// チャンネル容量を取得（入力はWorkItem数、出力はBatch数）
    fn channel_capacity(&self) -> usize;

    /// ワーカーのバッチ送出閾値を取得
    fn flush_threshold(&self) -> usize;

    /// Collectorがシンクへ書き出すブロックの行数を取得
    fn block_size(&self) -> usize;

    /// 進捗報告の間隔（件数）を取得
    fn progress_interval(&self) -> usize;

    /// Collectorの終了判定方式を取得
    fn completion_strategy(&self) -> CompletionStrategy;

    /// 外部コマンドの再試行ポリシーを取得
    fn retry_policy(&self) -> RetryPolicy;
}

/// 進捗報告の抽象化トレイト
#[automock]
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// 処理開始時の報告
    async fn report_started(&self, total_items: usize, workers: usize);

    /// 配信件数の報告
    async fn report_submitted(&self, submitted: usize);

    /// 収集件数の報告
    async fn report_progress(&self, collected: usize, total: usize);

    /// スキップされたアイテムの報告
    async fn report_skipped(&self, key: &str, reason: &str);

    /// ブロック書き出しの報告
    async fn report_block_written(&self, blocks: usize, rows: usize);

    /// 処理完了時の報告
    async fn report_completed(&self, summary: &RunSummary);
}

/// 出力行の書き出し先を抽象化するトレイト
///
/// ヘッダー1行の後にブロック単位で追記される。
#[automock]
#[async_trait]
pub trait RowSink: Send + Sync {
    /// ヘッダー行の書き出し（出力を初期化する）
    async fn write_header(&self, header: &str) -> Result<()>;

    /// 行ブロックの追記
    async fn write_block(&self, rows: &[String]) -> Result<()>;

    /// 書き出しの完了処理
    async fn finalize(&self) -> Result<()>;
}

/// ワーカー1つが保持するルックアップ処理
///
/// 接続などのリソースはワーカーの生存期間中ずっと保持され、`close` で解放される。
#[async_trait]
pub trait Lookup: Send + 'static {
    type Payload: Send + Sync + 'static;
    type Value: Send + 'static;

    /// 1件のペイロードを評価
    async fn lookup(&mut self, payload: &Self::Payload) -> Result<Self::Value, LookupError>;

    /// リソースの解放
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// ワーカーごとのルックアップを開くファクトリ
#[async_trait]
pub trait LookupFactory: Send + Sync {
    type Lookup: Lookup;

    async fn open(&self, worker_id: usize) -> Result<Self::Lookup>;
}

/// Collectorが所有する集約状態
///
/// `merge` が返した行はすぐに書き出しバッファへ入る（1件から複数行を出してもよい）。
/// 集約してから出力するツールは `drain_rows` で残りの行を返す。
pub trait Aggregate<V>: Send + 'static {
    type Output: Send + 'static;

    /// 出力ファイルのヘッダー行
    fn header(&self) -> &str;

    /// 1件の結果を取り込む
    fn merge(&mut self, key: &str, value: V) -> Vec<String>;

    /// 全ワーカー完了後に書き出す行
    fn drain_rows(&mut self) -> Vec<String> {
        Vec::new()
    }

    /// 最終的な集約結果
    fn finish(self) -> Self::Output;
}
