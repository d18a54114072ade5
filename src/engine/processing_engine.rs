// ProcessingEngine - 依存性注入による並列処理エンジン
// 設定・進捗報告・出力シンク・中断制御をコンストラクタで受け取り、各ツールで共有する

use super::{cancellation::CancellationController, pipeline::ProcessingPipeline};
use super::pipeline::{PayloadOf, ValueOf};
use crate::core::{
    Aggregate, LookupFactory, PipelineConfig, PipelineError, PipelineResult, ProgressReporter,
    RowSink, RunOutcome, WorkItem,
};
use std::sync::Arc;

/// 並列処理エンジン
///
/// 並列処理で共有される依存関係はArcで管理する。
pub struct ProcessingEngine<C, R, S> {
    config: Arc<C>,
    reporter: Arc<R>,
    sink: Arc<S>,
    controller: CancellationController,
}

impl<C, R, S> ProcessingEngine<C, R, S>
where
    C: PipelineConfig,
    R: ProgressReporter + 'static,
    S: RowSink + 'static,
{
    pub fn new(config: C, reporter: R, sink: S) -> Self {
        Self {
            config: Arc::new(config),
            reporter: Arc::new(reporter),
            sink: Arc::new(sink),
            controller: CancellationController::new(),
        }
    }

    /// 外部の中断コントローラーを使用する
    pub fn with_controller(mut self, controller: CancellationController) -> Self {
        self.controller = controller;
        self
    }

    /// タスク列を並列処理
    pub async fn run<F, A>(
        &self,
        items: Vec<WorkItem<PayloadOf<F>>>,
        factory: F,
        aggregate: A,
    ) -> PipelineResult<RunOutcome<A::Output>>
    where
        F: LookupFactory + 'static,
        A: Aggregate<ValueOf<F>>,
    {
        self.validate_config()?;

        let pipeline = ProcessingPipeline::new(Arc::new(factory));
        pipeline
            .execute(
                items,
                aggregate,
                self.config.as_ref(),
                Arc::clone(&self.reporter),
                Arc::clone(&self.sink),
                &self.controller,
            )
            .await
    }

    fn validate_config(&self) -> PipelineResult<()> {
        let checks = [
            (self.config.worker_count(), "ワーカー数は1以上である必要があります"),
            (
                self.config.channel_capacity(),
                "チャンネル容量は1以上である必要があります",
            ),
            (
                self.config.flush_threshold(),
                "バッチ閾値は1以上である必要があります",
            ),
            (
                self.config.block_size(),
                "ブロックサイズは1以上である必要があります",
            ),
            (
                self.config.progress_interval(),
                "進捗報告間隔は1以上である必要があります",
            ),
        ];
        for (value, message) in checks {
            if value == 0 {
                return Err(PipelineError::configuration(message));
            }
        }
        if self.config.retry_policy().max_attempts() == 0 {
            return Err(PipelineError::configuration(
                "最大試行回数は1以上である必要があります",
            ));
        }
        Ok(())
    }

    /// 設定への参照を取得
    pub fn config(&self) -> &C {
        &self.config
    }

    /// レポーターへの参照を取得
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// シンクへの参照を取得
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 中断コントローラーを取得
    pub fn controller(&self) -> &CancellationController {
        &self.controller
    }
}
