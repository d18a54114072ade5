// 外部コマンド実行の抽象化

use anyhow::{Context, Result};
use async_trait::async_trait;
use mockall::automock;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// 外部コマンドの出力
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// 標準エラー出力が空であれば成功とみなす
    pub fn is_clean(&self) -> bool {
        self.stderr.is_empty()
    }
}

/// 外部コマンド実行の抽象化トレイト
#[automock]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// コマンドを実行して出力を取得
    ///
    /// `max_lines` を指定した場合、その行数を読んだ時点でプロセスを停止する。
    async fn run(
        &self,
        program: &str,
        args: &[String],
        max_lines: Option<usize>,
    ) -> Result<CommandOutput>;
}

/// tokio::process による実装
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        max_lines: Option<usize>,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("コマンドを起動できません: {program}"))?;

        let stdout = child
            .stdout
            .take()
            .context("標準出力を取得できません")?;
        let mut stderr = child
            .stderr
            .take()
            .context("標準エラー出力を取得できません")?;

        // パイプが詰まらないよう標準エラー出力は並行して読む
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            stderr.read_to_string(&mut buffer).await.map(|_| buffer)
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut captured = String::new();
        let mut line_count = 0;
        let mut truncated = false;
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("標準出力の読み込みに失敗しました: {program}"))?
        {
            captured.push_str(&line);
            captured.push('\n');
            line_count += 1;
            if max_lines.is_some_and(|max| line_count >= max) {
                truncated = true;
                break;
            }
        }

        if truncated {
            // 必要な行は読み終えたので残りの出力は捨てる
            drop(lines);
            if let Err(e) = child.start_kill() {
                debug!(program, error = %e, "プロセスは既に終了しています");
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("プロセスの終了待機に失敗しました: {program}"))?;
        let stderr = stderr_task
            .await
            .context("標準エラー出力の読み込みタスクが失敗しました")?
            .with_context(|| format!("標準エラー出力の読み込みに失敗しました: {program}"))?;

        debug!(program, ?status, truncated, lines = line_count, "コマンドが終了しました");
        Ok(CommandOutput {
            stdout: captured,
            stderr,
        })
    }
}
