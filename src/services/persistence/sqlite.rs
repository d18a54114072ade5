// SQLiteテーブルへの行シンク実装

use crate::core::RowSink;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as AsyncMutex;

/// タブ区切りの行を既存テーブルへ挿入するシンク
///
/// ヘッダー行の各列名がそのまま挿入先のカラム名になる。値は文字列のまま渡し、
/// 型変換はカラムの型アフィニティに任せる。各ブロックは1トランザクションで確定する。
pub struct SqliteTableSink {
    database: PathBuf,
    table: String,
    writer: AsyncMutex<Option<TableWriter>>,
}

struct TableWriter {
    connection: SqliteConnection,
    insert: String,
    columns: usize,
}

impl SqliteTableSink {
    pub fn new<P: AsRef<Path>>(database: P, table: impl Into<String>) -> Self {
        Self {
            database: database.as_ref().to_path_buf(),
            table: table.into(),
            writer: AsyncMutex::new(None),
        }
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    fn is_identifier(name: &str) -> bool {
        !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit())
    }

    fn insert_statement(&self, header: &str) -> Result<(String, usize)> {
        let columns: Vec<&str> = header.split('\t').collect();
        if !Self::is_identifier(&self.table) {
            bail!("テーブル名が不正です: {}", self.table);
        }
        if let Some(column) = columns.iter().find(|c| !Self::is_identifier(c)) {
            bail!("カラム名が不正です: {column:?}");
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let statement = format!(
            "INSERT INTO {}({}) VALUES ({placeholders})",
            self.table,
            columns.join(", ")
        );
        Ok((statement, columns.len()))
    }
}

#[async_trait]
impl RowSink for SqliteTableSink {
    async fn write_header(&self, header: &str) -> Result<()> {
        let (insert, columns) = self.insert_statement(header)?;
        let connection = SqliteConnectOptions::new()
            .filename(&self.database)
            .connect()
            .await
            .with_context(|| format!("データベースを開けません: {}", self.database.display()))?;

        *self.writer.lock().await = Some(TableWriter {
            connection,
            insert,
            columns,
        });
        Ok(())
    }

    async fn write_block(&self, rows: &[String]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            bail!(
                "ヘッダー書き出し前にブロックが渡されました: {}",
                self.database.display()
            );
        };

        let mut tx = writer.connection.begin().await?;
        for row in rows {
            let fields: Vec<&str> = row.split('\t').collect();
            if fields.len() != writer.columns {
                bail!(
                    "列数が一致しません（期待値 {}、実際 {}）: {row}",
                    writer.columns,
                    fields.len()
                );
            }
            let mut query = sqlx::query(&writer.insert);
            for field in fields {
                query = query.bind(field);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit()
            .await
            .with_context(|| format!("{} への書き込みに失敗しました", self.table))?;
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().await.take() {
            writer.connection.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_table(database: &Path) {
        let mut connection = SqliteConnectOptions::new()
            .filename(database)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        sqlx::query("CREATE TABLE binders(hla_id INT, pep_id INT, ic50 REAL)")
            .execute(&mut connection)
            .await
            .unwrap();
        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_sink_inserts_blocks_with_column_affinity() {
        let temp_dir = TempDir::new().unwrap();
        let database = temp_dir.path().join("binders.db");
        create_table(&database).await;
        let sink = SqliteTableSink::new(&database, "binders");

        sink.write_header("hla_id\tpep_id\tic50").await.unwrap();
        sink.write_block(&["1\t10\t12.5".to_string(), "2\t11\t500".to_string()])
            .await
            .unwrap();
        sink.write_block(&["1\t12\t0.25".to_string()]).await.unwrap();
        sink.finalize().await.unwrap();

        let mut connection = SqliteConnectOptions::new()
            .filename(&database)
            .connect()
            .await
            .unwrap();
        let rows: Vec<(i64, i64, f64)> =
            sqlx::query_as("SELECT hla_id, pep_id, ic50 FROM binders ORDER BY pep_id")
                .fetch_all(&mut connection)
                .await
                .unwrap();
        assert_eq!(rows, vec![(1, 10, 12.5), (2, 11, 500.0), (1, 12, 0.25)]);
    }

    #[tokio::test]
    async fn test_sqlite_sink_rejects_wrong_column_count() {
        let temp_dir = TempDir::new().unwrap();
        let database = temp_dir.path().join("binders.db");
        create_table(&database).await;
        let sink = SqliteTableSink::new(&database, "binders");

        sink.write_header("hla_id\tpep_id\tic50").await.unwrap();
        let result = sink.write_block(&["1\t10".to_string()]).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_sink_rejects_unsafe_column_names() {
        let temp_dir = TempDir::new().unwrap();
        let database = temp_dir.path().join("binders.db");
        create_table(&database).await;
        let sink = SqliteTableSink::new(&database, "binders");

        assert!(sink.write_header("hla_id\tpep_id); DROP TABLE binders;--").await.is_err());
        assert!(sink.write_block(&["1\t2\t3".to_string()]).await.is_err());
    }
}
