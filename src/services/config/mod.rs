// 設定管理機能
// ワーカー数、チャンネル容量、バッチ・ブロックサイズ、再試行ポリシー

pub mod implementations;

// 公開API
pub use implementations::DefaultPipelineConfig;
