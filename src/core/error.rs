// パイプライン専用のカスタムエラー型定義

use thiserror::Error;

/// 1件のルックアップで発生するエラー
///
/// ワーカー内部で処理され、チャンネルを越えて伝播することはない。
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("未知のキー: {key}")]
    UnknownKey { key: String },

    #[error("外部コマンドエラー: {command} - {stderr}")]
    ExternalCommand { command: String, stderr: String },

    #[error("ルックアップ失敗: {source}")]
    Fatal {
        #[source]
        source: anyhow::Error,
    },
}

impl LookupError {
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    pub fn external_command(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExternalCommand {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn fatal(source: anyhow::Error) -> Self {
        Self::Fatal { source }
    }

    /// 再試行ポリシーの対象かどうか
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalCommand { .. })
    }
}

/// パイプライン全体のエラー型
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("設定エラー: {message}")]
    ConfigurationError { message: String },

    #[error("入力ファイルエラー: {path} - {source}")]
    TaskSourceError {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("不正な入力行: {line_number}行目 - {reason}")]
    MalformedInputLine { line_number: usize, reason: String },

    #[error("再試行上限到達: {key} ({attempts}回試行) - {source}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        #[source]
        source: LookupError,
    },

    #[error("ルックアップエラー: {key} - {source}")]
    LookupFailed {
        key: String,
        #[source]
        source: LookupError,
    },

    #[error("ワーカー起動エラー: worker {worker_id} - {source}")]
    WorkerStartupError {
        worker_id: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("永続化エラー: {source}")]
    PersistenceError {
        #[source]
        source: anyhow::Error,
    },

    #[error("チャンネルエラー: {message}")]
    ChannelError { message: String },

    #[error("タスクエラー: {source}")]
    TaskError {
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("内部エラー: {source}")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    pub fn task_source(path: impl Into<String>, source: anyhow::Error) -> Self {
        Self::TaskSourceError {
            path: path.into(),
            source,
        }
    }

    pub fn malformed_input(line_number: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInputLine {
            line_number,
            reason: reason.into(),
        }
    }

    pub fn retries_exhausted(key: impl Into<String>, attempts: u32, source: LookupError) -> Self {
        Self::RetriesExhausted {
            key: key.into(),
            attempts,
            source,
        }
    }

    pub fn lookup_failed(key: impl Into<String>, source: LookupError) -> Self {
        Self::LookupFailed {
            key: key.into(),
            source,
        }
    }

    pub fn worker_startup(worker_id: usize, source: anyhow::Error) -> Self {
        Self::WorkerStartupError { worker_id, source }
    }

    pub fn persistence(source: anyhow::Error) -> Self {
        Self::PersistenceError { source }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::ChannelError {
            message: message.into(),
        }
    }

    pub fn internal(source: anyhow::Error) -> Self {
        Self::InternalError { source }
    }

    /// エラーの重要度を取得
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MalformedInputLine { .. } => ErrorSeverity::Low,
            Self::TaskSourceError { .. } | Self::ChannelError { .. } => ErrorSeverity::Medium,
            Self::ConfigurationError { .. }
            | Self::WorkerStartupError { .. }
            | Self::PersistenceError { .. }
            | Self::LookupFailed { .. }
            | Self::TaskError { .. } => ErrorSeverity::High,
            Self::RetriesExhausted { .. } | Self::InternalError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 実行を継続できるかどうか
    ///
    /// 回復可能なのは入力1行単位のエラーのみ。それ以外は実行全体を停止させる。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedInputLine { .. })
    }

    /// エラーコンテキストを取得
    pub fn context(&self) -> ErrorContext {
        match self {
            Self::TaskSourceError { path, .. } => ErrorContext::new("task_source")
                .with_resource(path.clone())
                .with_suggestion("入力ファイルのパスと形式を確認してください"),
            Self::RetriesExhausted { key, .. } => ErrorContext::new("external_command")
                .with_resource(key.clone())
                .with_suggestion("外部ツールのパスと入力ファイルを確認してください"),
            Self::WorkerStartupError { worker_id, .. } => ErrorContext::new("worker_startup")
                .with_resource(format!("worker {worker_id}"))
                .with_suggestion("データベースファイルの存在と権限を確認してください"),
            Self::ConfigurationError { message } => ErrorContext::new("configuration")
                .with_suggestion(format!("設定を確認してください: {message}")),
            _ => ErrorContext::new("unknown"),
        }
    }
}

/// エラーの重要度レベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// 低重要度 - 警告ログのみ
    Low,
    /// 中重要度
    Medium,
    /// 高重要度 - 実行停止
    High,
    /// 致命的
    Critical,
}

impl ErrorSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// エラーコンテキスト情報
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// 実行していた操作
    pub operation: String,
    /// 関連するリソース（ファイルパス、ワーカー等）
    pub resource: Option<String>,
    /// エラー解決のための提案
    pub suggestion: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            resource: None,
            suggestion: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// パイプラインの結果型
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl From<anyhow::Error> for PipelineError {
    fn from(error: anyhow::Error) -> Self {
        PipelineError::InternalError { source: error }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(error: tokio::task::JoinError) -> Self {
        PipelineError::TaskError { source: error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_pipeline_error_creation() {
        let source_error =
            PipelineError::task_source("/data/genotypes.tsv", anyhow::anyhow!("not found"));
        assert!(source_error.to_string().contains("入力ファイルエラー"));
        assert!(source_error.to_string().contains("/data/genotypes.tsv"));

        let config_error = PipelineError::configuration("ワーカー数は1以上である必要があります");
        assert!(config_error.to_string().contains("設定エラー"));

        let malformed = PipelineError::malformed_input(12, "列数が不足しています");
        assert!(malformed.to_string().contains("12行目"));
    }

    #[test]
    fn test_retries_exhausted_keeps_source() {
        let error = PipelineError::retries_exhausted(
            "TCGA-01",
            5,
            LookupError::external_command("samtools mpileup", "[E::hts_open] fail"),
        );

        assert!(error.to_string().contains("5回試行"));
        assert!(error.source().is_some());
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_lookup_error_retryable() {
        assert!(LookupError::external_command("samtools view", "err").is_retryable());
        assert!(!LookupError::unknown_key("HLA-Z*99").is_retryable());
        assert!(!LookupError::fatal(anyhow::anyhow!("db closed")).is_retryable());
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::High);
        assert!(ErrorSeverity::High > ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium > ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::Low.as_str(), "LOW");

        let malformed = PipelineError::malformed_input(1, "empty");
        assert_eq!(malformed.severity(), ErrorSeverity::Low);
        assert!(malformed.is_recoverable());
    }

    #[test]
    fn test_error_context() {
        let error = PipelineError::worker_startup(3, anyhow::anyhow!("unable to open database"));
        let context = error.context();

        assert_eq!(context.operation, "worker_startup");
        assert_eq!(context.resource, Some("worker 3".to_string()));
        assert!(context.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_task_error_from_join_error() {
        let task = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        task.abort();

        let join_error = task.await.expect_err("タスクエラーが期待されます");
        let error: PipelineError = join_error.into();

        assert!(error.to_string().contains("タスクエラー"));
        assert_eq!(error.severity(), ErrorSeverity::High);
    }
}
