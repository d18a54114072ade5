// アレルごとの結合ペプチド一覧からSQLiteデータベースを作成

use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE hla(id INT, allele TEXT)",
    "CREATE TABLE peptide(id INT, sequence TEXT)",
    "CREATE TABLE binders(hla_id INT, pep_id INT)",
];

pub(crate) const INDEXES: [&str; 4] = [
    "CREATE INDEX peptide_ind ON peptide(id)",
    "CREATE INDEX peptide_seq ON peptide(sequence)",
    "CREATE INDEX binder_hla_ind ON binders(hla_id)",
    "CREATE INDEX binder_pep_ind ON binders(pep_id)",
];

/// 作成結果の統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderDbStats {
    pub alleles: usize,
    pub peptides: usize,
    pub binders: usize,
}

/// ディレクトリ内の各ファイル（ファイル名の最初の `.` より前がアレル名）から
/// `hla` / `peptide` / `binders` テーブルを作成する
///
/// 既存のデータベースは上書きしない。idは1から振り、ファイル名順に割り当てる。
pub async fn build_binder_database(flat_dir: &Path, database: &Path) -> Result<BinderDbStats> {
    if database.exists() {
        bail!(
            "データベースファイルは既に存在します: {}",
            database.display()
        );
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(flat_dir)
        .await
        .with_context(|| format!("ディレクトリを読めません: {}", flat_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut connection = SqliteConnectOptions::new()
        .filename(database)
        .create_if_missing(true)
        .connect()
        .await
        .with_context(|| format!("データベースを作成できません: {}", database.display()))?;

    let mut tx = connection.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    let mut stats = BinderDbStats::default();
    let mut peptide_ids: HashMap<String, i64> = HashMap::new();
    for (index, path) in files.iter().enumerate() {
        let hla_id = index as i64 + 1;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let allele = file_name.split('.').next().unwrap_or_default();
        sqlx::query("INSERT INTO hla(id, allele) VALUES (?, ?)")
            .bind(hla_id)
            .bind(allele)
            .execute(&mut *tx)
            .await?;
        stats.alleles += 1;

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("ファイルを読めません: {}", path.display()))?;
        let mut allele_binders = 0;
        for line in content.lines() {
            let sequence = line.trim_end();
            if sequence.is_empty() {
                continue;
            }
            let pep_id = match peptide_ids.get(sequence) {
                Some(id) => *id,
                None => {
                    let id = peptide_ids.len() as i64 + 1;
                    sqlx::query("INSERT INTO peptide(id, sequence) VALUES (?, ?)")
                        .bind(id)
                        .bind(sequence)
                        .execute(&mut *tx)
                        .await?;
                    peptide_ids.insert(sequence.to_string(), id);
                    id
                }
            };
            sqlx::query("INSERT INTO binders(hla_id, pep_id) VALUES (?, ?)")
                .bind(hla_id)
                .bind(pep_id)
                .execute(&mut *tx)
                .await?;
            allele_binders += 1;
        }
        stats.binders += allele_binders;
        debug!(allele, binders = allele_binders, "アレルを登録しました");
    }

    for statement in INDEXES {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await.context("データベースへの書き込みに失敗しました")?;
    connection.close().await?;

    stats.peptides = peptide_ids.len();
    info!(
        alleles = stats.alleles,
        peptides = stats.peptides,
        binders = stats.binders,
        "結合ペプチドデータベースを作成しました"
    );
    Ok(stats)
}
