pub mod collect_binders;
pub mod genotypes;
pub mod read_support;
pub mod tally;
pub mod transforms;

pub use collect_binders::*;
pub use genotypes::*;
pub use read_support::*;
pub use tally::*;
pub use transforms::*;

use super::args::EngineArgs;
use crate::core::{Aggregate, LookupFactory, RowSink, RunOutcome, RunSummary, WorkItem};
use crate::engine::{CancellationController, PayloadOf, ProcessingEngine, ValueOf};
use crate::services::{ConsoleProgressReporter, DefaultPipelineConfig, TsvFileSink};
use anyhow::{Context, Result};
use std::path::Path;

/// コマンドの終了状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Completed,
    Interrupted,
}

impl CommandStatus {
    pub fn from_summary(summary: &RunSummary) -> Self {
        if summary.interrupted {
            Self::Interrupted
        } else {
            Self::Completed
        }
    }

    /// プロセスの終了コード（中断時は130）
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Interrupted => 130,
        }
    }
}

/// エンジン引数から設定を組み立てる
pub fn pipeline_config(args: &EngineArgs) -> DefaultPipelineConfig {
    DefaultPipelineConfig::new(args.workers)
        .with_flush_threshold(args.flush_threshold)
        .with_block_size(args.block_size)
        .with_channel_capacity(args.channel_capacity)
}

/// TSV出力・コンソール進捗・Ctrl-C監視付きでエンジンを実行
pub(crate) async fn run_to_tsv<F, A>(
    config: DefaultPipelineConfig,
    output: &Path,
    items: Vec<WorkItem<PayloadOf<F>>>,
    factory: F,
    aggregate: A,
) -> Result<RunOutcome<A::Output>>
where
    F: LookupFactory + 'static,
    A: Aggregate<ValueOf<F>>,
{
    run_with_sink(config, TsvFileSink::new(output), output, items, factory, aggregate).await
}

/// 任意の行シンクに対してコンソール進捗・Ctrl-C監視付きでエンジンを実行
///
/// `output` は結果の保存先としてユーザーに表示するパス。
pub(crate) async fn run_with_sink<S, F, A>(
    config: DefaultPipelineConfig,
    sink: S,
    output: &Path,
    items: Vec<WorkItem<PayloadOf<F>>>,
    factory: F,
    aggregate: A,
) -> Result<RunOutcome<A::Output>>
where
    S: RowSink + 'static,
    F: LookupFactory + 'static,
    A: Aggregate<ValueOf<F>>,
{
    let controller = CancellationController::new();
    let listener = controller.listen_for_interrupt();

    let engine = ProcessingEngine::new(config, ConsoleProgressReporter::new(), sink)
        .with_controller(controller);
    let result = engine.run(items, factory, aggregate).await;
    listener.abort();

    let outcome = result?;
    if outcome.summary.interrupted {
        println!("⚠️  中断されました。書き出し済みのブロックは {} に残っています", output.display());
    } else {
        println!("📄 結果は {} に保存されました", output.display());
    }
    Ok(outcome)
}

/// 実行サマリーをJSONで保存
pub async fn write_summary(path: Option<&Path>, summary: &RunSummary) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(summary).context("サマリーのシリアライズに失敗しました")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("サマリーを書き込めません: {}", path.display()))?;
    println!("📊 サマリーを {} に保存しました", path.display());
    Ok(())
}
