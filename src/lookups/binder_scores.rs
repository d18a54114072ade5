// NetMHCpanスコアファイルからの結合ペプチド抽出
// スコアファイルとペプチド参照ファイルを行ごとに対応させ、IC50が閾値以下の組を binders へ登録する

use crate::core::{
    Aggregate, Lookup, LookupError, LookupFactory, PipelineError, PipelineResult, WorkItem,
};
use crate::transforms::binder_db::INDEXES;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 結合ペプチドとみなすIC50の上限（nM）
pub const IC50_THRESHOLD: f64 = 500.0;

/// 挿入先のテーブル
pub const BINDERS_TABLE: &str = "binders";

/// 挿入先のカラム（行シンクのヘッダー）
pub const BINDERS_HEADER: &str = "hla_id\tpep_id\tic50";

const SCORE_SUFFIX: &str = ".pMHC.parsed";
const PEPTIDE_SUFFIX: &str = "_peptides.txt";

const REFERENCE_SCHEMA: [&str; 3] = [
    "CREATE TABLE peptide(id INT, sequence TEXT)",
    "CREATE TABLE hla(id INT, allele TEXT)",
    "CREATE TABLE binders(hla_id INT, pep_id INT, ic50 REAL)",
];

/// アレル名・ペプチド配列 → id の対応表
#[derive(Debug, Clone, Default)]
pub struct BinderIds {
    alleles: HashMap<String, i64>,
    peptides: HashMap<String, i64>,
}

impl BinderIds {
    pub fn allele(&self, allele: &str) -> Option<i64> {
        self.alleles.get(allele).copied()
    }

    pub fn peptide(&self, sequence: &str) -> Option<i64> {
        self.peptides.get(sequence).copied()
    }

    pub fn allele_count(&self) -> usize {
        self.alleles.len()
    }

    pub fn peptide_count(&self) -> usize {
        self.peptides.len()
    }

    /// 未登録なら1から順にidを振る。登録済みならNone
    fn assign(map: &mut HashMap<String, i64>, name: &str) -> Option<i64> {
        if map.contains_key(name) {
            return None;
        }
        let id = map.len() as i64 + 1;
        map.insert(name.to_string(), id);
        Some(id)
    }
}

/// アレルリストの1行をスコアファイル名の表記（`:` → `-`）に揃える
pub fn allele_name(line: &str) -> String {
    line.trim().replace(':', "-")
}

/// `prot{長さ}_{番号}_{生物種}_peptides.txt`
pub fn peptide_reference_name(peptide_length: usize, contig_file: usize, species: &str) -> String {
    format!("prot{peptide_length}_{contig_file}_{species}{PEPTIDE_SUFFIX}")
}

async fn peptide_files(root_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(root_dir)
        .await
        .with_context(|| format!("ディレクトリを読めません: {}", root_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let is_peptide_file = entry
            .file_name()
            .to_string_lossy()
            .ends_with(PEPTIDE_SUFFIX);
        if is_peptide_file && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// `peptide` / `hla` / 空の `binders` テーブルを持つデータベースを作成する
///
/// ペプチドはファイル名順・行順に、アレルはリスト順にidを振る。重複は最初のidを使う。
/// 既存のデータベースは上書きしない。
pub async fn create_reference_tables(
    database: &Path,
    root_dir: &Path,
    hla_list: &Path,
) -> Result<BinderIds> {
    if database.exists() {
        bail!(
            "データベースファイルは既に存在します: {}",
            database.display()
        );
    }

    let alleles = tokio::fs::read_to_string(hla_list)
        .await
        .with_context(|| format!("アレルリストを読めません: {}", hla_list.display()))?;
    let files = peptide_files(root_dir).await?;

    let mut connection = SqliteConnectOptions::new()
        .filename(database)
        .create_if_missing(true)
        .connect()
        .await
        .with_context(|| format!("データベースを作成できません: {}", database.display()))?;

    let mut tx = connection.begin().await?;
    for statement in REFERENCE_SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    let mut ids = BinderIds::default();
    for path in &files {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("ファイルを読めません: {}", path.display()))?;
        for sequence in content.lines().map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(id) = BinderIds::assign(&mut ids.peptides, sequence) {
                sqlx::query("INSERT INTO peptide(id, sequence) VALUES (?, ?)")
                    .bind(id)
                    .bind(sequence)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        debug!(file = %path.display(), peptides = ids.peptide_count(), "ペプチドファイルを登録しました");
    }

    for line in alleles.lines().filter(|l| !l.trim().is_empty()) {
        let allele = allele_name(line);
        if let Some(id) = BinderIds::assign(&mut ids.alleles, &allele) {
            sqlx::query("INSERT INTO hla(id, allele) VALUES (?, ?)")
                .bind(id)
                .bind(&allele)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await.context("参照テーブルの書き込みに失敗しました")?;
    connection.close().await?;

    info!(
        peptide_files = files.len(),
        peptides = ids.peptide_count(),
        alleles = ids.allele_count(),
        "参照テーブルを作成しました"
    );
    Ok(ids)
}

/// 登録後の検索用インデックスを作成する
pub async fn create_binder_indexes(database: &Path) -> Result<()> {
    let mut connection = SqliteConnectOptions::new()
        .filename(database)
        .connect()
        .await
        .with_context(|| format!("データベースを開けません: {}", database.display()))?;
    for statement in INDEXES {
        sqlx::query(statement).execute(&mut connection).await?;
    }
    connection.close().await?;
    Ok(())
}

/// 1つのNetMHCpanスコアファイルと、その行に対応するペプチド参照ファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreFile {
    pub hla: String,
    pub peptide_length: usize,
    pub contig_file: usize,
    pub scores: PathBuf,
    pub peptides: PathBuf,
}

/// `{生物種}_{HLA}_{長さ}_{番号}.pMHC.parsed` を (HLA, 長さ, 番号) に分解
pub fn parse_score_file_name(file_name: &str) -> Option<(String, usize, usize)> {
    if !file_name.ends_with(SCORE_SUFFIX) {
        return None;
    }
    let stem = file_name.split('.').next()?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 || parts[1].is_empty() {
        return None;
    }
    let peptide_length = parts[2].parse().ok()?;
    let contig_file = parts[3].parse().ok()?;
    Some((parts[1].to_string(), peptide_length, contig_file))
}

/// ルート以下を再帰的に探索し、スコアファイルごとの作業単位を作る
///
/// キーはスコアファイル名。ファイル名を解釈できないものは警告して除外する。
pub fn find_score_files(root_dir: &Path, species: &str) -> PipelineResult<Vec<WorkItem<ScoreFile>>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(root_dir).sort_by_file_name() {
        let entry = entry
            .map_err(|e| PipelineError::task_source(root_dir.display().to_string(), e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !file_name.ends_with(SCORE_SUFFIX) {
            continue;
        }

        match parse_score_file_name(&file_name) {
            Some((hla, peptide_length, contig_file)) => {
                let peptides =
                    root_dir.join(peptide_reference_name(peptide_length, contig_file, species));
                items.push(WorkItem::new(
                    file_name.to_string(),
                    ScoreFile {
                        hla,
                        peptide_length,
                        contig_file,
                        scores: entry.path().to_path_buf(),
                        peptides,
                    },
                ));
            }
            None => warn!(file = %entry.path().display(), "スコアファイル名を解釈できないためスキップします"),
        }
    }
    Ok(items)
}

/// `binders` へ挿入する1行
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinderRow {
    pub hla_id: i64,
    pub pep_id: i64,
    pub ic50: f64,
}

impl BinderRow {
    pub fn row(&self) -> String {
        format!("{}\t{}\t{}", self.hla_id, self.pep_id, self.ic50)
    }
}

/// スコア列とペプチド列を行ごとに対応させ、IC50が閾値以下の組を返す
///
/// 短い方のファイルの行数までを対象とする。
pub fn select_binders(
    scores: &str,
    peptides: &str,
    hla_id: i64,
    ids: &BinderIds,
    threshold: f64,
) -> Result<Vec<BinderRow>, LookupError> {
    let mut binders = Vec::new();
    for (line_index, (score, peptide)) in scores.lines().zip(peptides.lines()).enumerate() {
        let score = score.trim();
        if score.is_empty() {
            continue;
        }
        let ic50: f64 = score.parse().map_err(|_| {
            LookupError::fatal(anyhow!(
                "IC50を解釈できません: {}行目 {score:?}",
                line_index + 1
            ))
        })?;
        if ic50 > threshold {
            continue;
        }
        let sequence = peptide.trim();
        let pep_id = ids
            .peptide(sequence)
            .ok_or_else(|| LookupError::unknown_key(sequence))?;
        binders.push(BinderRow {
            hla_id,
            pep_id,
            ic50,
        });
    }
    Ok(binders)
}

/// スコアファイル1つ分の結合ペプチドを求めるルックアップ
pub struct BinderScoreLookup {
    ids: Arc<BinderIds>,
    threshold: f64,
}

#[async_trait]
impl Lookup for BinderScoreLookup {
    type Payload = ScoreFile;
    type Value = Vec<BinderRow>;

    async fn lookup(&mut self, file: &ScoreFile) -> Result<Vec<BinderRow>, LookupError> {
        let hla_id = self
            .ids
            .allele(&file.hla)
            .ok_or_else(|| LookupError::unknown_key(file.hla.as_str()))?;

        let scores = tokio::fs::read_to_string(&file.scores)
            .await
            .with_context(|| format!("スコアファイルを読めません: {}", file.scores.display()))
            .map_err(LookupError::fatal)?;
        let peptides = tokio::fs::read_to_string(&file.peptides)
            .await
            .with_context(|| format!("ペプチド参照ファイルを読めません: {}", file.peptides.display()))
            .map_err(LookupError::fatal)?;

        select_binders(&scores, &peptides, hla_id, &self.ids, self.threshold)
    }
}

/// 全ワーカーで同じ対応表を共有するファクトリ
pub struct BinderScoreLookupFactory {
    ids: Arc<BinderIds>,
    threshold: f64,
}

impl BinderScoreLookupFactory {
    pub fn new(ids: Arc<BinderIds>) -> Self {
        Self {
            ids,
            threshold: IC50_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl LookupFactory for BinderScoreLookupFactory {
    type Lookup = BinderScoreLookup;

    async fn open(&self, _worker_id: usize) -> Result<BinderScoreLookup> {
        Ok(BinderScoreLookup {
            ids: Arc::clone(&self.ids),
            threshold: self.threshold,
        })
    }
}

/// スコアファイルごとの結合ペプチドを `binders` の行として出力する集約
#[derive(Debug, Default)]
pub struct BinderAggregate {
    binders: usize,
}

impl BinderAggregate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregate<Vec<BinderRow>> for BinderAggregate {
    /// 登録した結合ペプチドの件数
    type Output = usize;

    fn header(&self) -> &str {
        BINDERS_HEADER
    }

    fn merge(&mut self, _score_file: &str, rows: Vec<BinderRow>) -> Vec<String> {
        self.binders += rows.len();
        rows.iter().map(BinderRow::row).collect()
    }

    fn finish(self) -> usize {
        self.binders
    }
}
