// 進捗監視の具象実装

use crate::core::{ProgressReporter, RunSummary};
use async_trait::async_trait;
use tracing::warn;

/// コンソール出力による進捗報告実装
#[derive(Debug, Default, Clone)]
pub struct ConsoleProgressReporter {
    quiet: bool,
}

impl ConsoleProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

#[async_trait]
impl ProgressReporter for ConsoleProgressReporter {
    async fn report_started(&self, total_items: usize, workers: usize) {
        if !self.quiet {
            println!("🚀 Submitting {total_items} items to {workers} workers...");
        }
    }

    async fn report_submitted(&self, submitted: usize) {
        if !self.quiet {
            println!("📤 {submitted} items submitted to workers");
        }
    }

    async fn report_progress(&self, collected: usize, total: usize) {
        if !self.quiet {
            let percentage = if total == 0 {
                100.0
            } else {
                (collected as f64 / total as f64) * 100.0
            };
            println!("📊 Progress: {collected}/{total} ({percentage:.1}%)");
        }
    }

    async fn report_skipped(&self, key: &str, reason: &str) {
        // スキップは常にログへ残す
        warn!(key, reason, "アイテムをスキップしました");
    }

    async fn report_block_written(&self, blocks: usize, rows: usize) {
        if !self.quiet {
            println!("💾 Block {blocks} written ({rows} rows total)");
        }
    }

    async fn report_completed(&self, summary: &RunSummary) {
        if self.quiet {
            return;
        }
        if summary.interrupted {
            println!(
                "⚠️  Interrupted! Submitted: {}, Collected: {}, Rows written: {}",
                summary.submitted, summary.collected, summary.rows_written
            );
        } else {
            println!(
                "✅ Completed! Collected: {}, Skipped: {}, Rows written: {} in {}ms",
                summary.collected, summary.skipped, summary.rows_written, summary.elapsed_ms
            );
        }
    }
}

/// 何もしない進捗報告実装（テスト・ベンチマーク用）
#[derive(Debug, Default, Clone)]
pub struct NoOpProgressReporter;

impl NoOpProgressReporter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProgressReporter for NoOpProgressReporter {
    async fn report_started(&self, _total_items: usize, _workers: usize) {}

    async fn report_submitted(&self, _submitted: usize) {}

    async fn report_progress(&self, _collected: usize, _total: usize) {}

    async fn report_skipped(&self, _key: &str, _reason: &str) {}

    async fn report_block_written(&self, _blocks: usize, _rows: usize) {}

    async fn report_completed(&self, _summary: &RunSummary) {}
}
