// 結果永続化機能
// 結果の収集、ブロック単位の書き出し、行シンク（TSV / SQLite）

pub mod block_buffer;
pub mod collector;
pub mod implementations;
pub mod sqlite;

// 公開API
pub use block_buffer::BlockBuffer;
pub use collector::{spawn_result_collector, CollectorSettings};
pub use implementations::{MemoryRowSink, TsvFileSink};
pub use sqlite::SqliteTableSink;
