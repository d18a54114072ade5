// エンジン層 - Dispatcher / Worker / Collector による並列処理エンジン

pub mod cancellation;
pub mod dispatcher;
pub mod pipeline;
pub mod processing_engine;
pub mod rotation;
pub mod worker;

// 公開API
pub use cancellation::{drain_input, CancellationController};
pub use dispatcher::Dispatcher;
pub use pipeline::{PayloadOf, ProcessingPipeline, ValueOf};
pub use processing_engine::ProcessingEngine;
pub use rotation::Rotation;
pub use worker::Worker;
