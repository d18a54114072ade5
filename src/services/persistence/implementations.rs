// 行シンクの具象実装

use crate::core::RowSink;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex as AsyncMutex;

/// メモリ内行シンク実装（テスト用）
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSink {
    header: Arc<Mutex<Option<String>>>,
    blocks: Arc<Mutex<Vec<Vec<String>>>>,
    finalized: Arc<Mutex<bool>>,
}

impl MemoryRowSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<String> {
        self.header.lock().map(|h| h.clone()).unwrap_or(None)
    }

    /// 書き出されたブロック
    pub fn blocks(&self) -> Vec<Vec<String>> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// 書き出された全行（ブロック順）
    pub fn rows(&self) -> Vec<String> {
        self.blocks().into_iter().flatten().collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.lock().map(|f| *f).unwrap_or(false)
    }
}

#[async_trait]
impl RowSink for MemoryRowSink {
    async fn write_header(&self, header: &str) -> Result<()> {
        let mut guard = self
            .header
            .lock()
            .map_err(|e| anyhow::anyhow!("ロックエラー: {e}"))?;
        *guard = Some(header.to_string());
        Ok(())
    }

    async fn write_block(&self, rows: &[String]) -> Result<()> {
        let mut guard = self
            .blocks
            .lock()
            .map_err(|e| anyhow::anyhow!("ロックエラー: {e}"))?;
        guard.push(rows.to_vec());
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let mut guard = self
            .finalized
            .lock()
            .map_err(|e| anyhow::anyhow!("ロックエラー: {e}"))?;
        *guard = true;
        Ok(())
    }
}

/// タブ区切りファイルへの行シンク実装
///
/// ヘッダー書き出し時にファイルを作り直し、各ブロックは追記後すぐにフラッシュされる。
/// 中断時でも書き出し済みのブロックはディスクに残る。
pub struct TsvFileSink {
    file_path: PathBuf,
    writer: Arc<AsyncMutex<Option<BufWriter<File>>>>,
}

impl TsvFileSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            writer: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    async fn write_lines(writer: &mut BufWriter<File>, lines: &[String]) -> Result<()> {
        for line in lines {
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| anyhow::anyhow!("書き込みエラー: {e}"))?;
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| anyhow::anyhow!("書き込みエラー: {e}"))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("フラッシュエラー: {e}"))
    }
}

#[async_trait]
impl RowSink for TsvFileSink {
    async fn write_header(&self, header: &str) -> Result<()> {
        // 親ディレクトリが存在しない場合は作成
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| anyhow::anyhow!("ディレクトリ作成エラー: {e}"))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)
            .await
            .map_err(|e| anyhow::anyhow!("ファイル作成エラー: {e}"))?;

        let mut writer = BufWriter::new(file);
        Self::write_lines(&mut writer, &[header.to_string()]).await?;

        *self.writer.lock().await = Some(writer);
        Ok(())
    }

    async fn write_block(&self, rows: &[String]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            anyhow::anyhow!(
                "ヘッダー書き出し前にブロックが渡されました: {}",
                self.file_path.display()
            )
        })?;
        Self::write_lines(writer, rows).await
    }

    async fn finalize(&self) -> Result<()> {
        let writer_opt = self.writer.lock().await.take();
        if let Some(mut writer) = writer_opt {
            writer
                .shutdown()
                .await
                .map_err(|e| anyhow::anyhow!("クローズエラー: {e}"))?;
        }
        Ok(())
    }
}
