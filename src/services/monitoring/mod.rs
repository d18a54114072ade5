// 進捗監視機能
// 配信・収集件数の報告、スキップ通知、完了サマリー

pub mod implementations;

// 公開API
pub use implementations::{ConsoleProgressReporter, NoOpProgressReporter};
