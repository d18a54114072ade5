// コアレイヤー - 基盤となるトレイト、型、エラー定義
// 他のレイヤーから参照される基本的な抽象化を提供

pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

// 公開API - 明示的にエクスポートして曖昧性を回避
pub use error::{ErrorContext, ErrorSeverity, LookupError, PipelineError, PipelineResult};
pub use retry::{Backoff, RetryPolicy};
pub use traits::{Aggregate, Lookup, LookupFactory, PipelineConfig, ProgressReporter, RowSink};
pub use types::{
    Batch, CollectorReport, CompletionStrategy, DispatchReport, InputMessage, Message, Outcome,
    OutputMessage, ResultItem, RunOutcome, RunSummary, WorkItem, WorkerReport,
};
