//! 免疫ペプチドーム解析のための並列ルックアップエンジンとバッチツール
//!
//! タスク列をワーカーへラウンドロビンで配信し、各ワーカーが外部リソース
//! （SQLite、外部コマンド、ファイルシステム）を参照した結果をバッチで返す。
//! コレクターは結果を集約し、ブロック単位でTSVまたはSQLiteへ書き出す。

pub mod cli;
pub mod core;
pub mod engine;
pub mod logging;
pub mod lookups;
pub mod services;
pub mod transforms;

pub use crate::core::{PipelineError, PipelineResult, RunSummary};
pub use crate::engine::{CancellationController, ProcessingEngine};
