// HLA遺伝子型ルックアップ
// 6つのアレルからHLA idの集合を求め、結合するペプチドの種類数を数える

use crate::core::{
    Aggregate, Lookup, LookupError, LookupFactory, PipelineError, PipelineResult, WorkItem,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// 1つの遺伝子型に含まれるアレル数（A, A, B, B, C, C）
pub const ALLELES_PER_GENOTYPE: usize = 6;

/// 非発現アレルを示す末尾文字
pub const NON_EXPRESSED_SUFFIX: char = 'N';

/// 出力ファイルのヘッダー
pub const GENOTYPE_HEADER: &str = "sample\tnumBinders";

/// アレル名 → HLA id の対応表
///
/// 起動時に一度だけ読み込み、Arcで各ワーカーへ渡す。
#[derive(Debug, Clone, Default)]
pub struct AlleleIndex {
    ids: HashMap<String, i64>,
}

impl AlleleIndex {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            ids: pairs.into_iter().map(|(a, id)| (a.into(), id)).collect(),
        }
    }

    /// `hla` テーブルから対応表を読み込む
    pub async fn load(database: &Path) -> Result<Self> {
        let mut connection = open_read_only(database).await?;
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, allele FROM hla")
            .fetch_all(&mut connection)
            .await
            .context("hlaテーブルの読み込みに失敗しました")?;
        connection
            .close()
            .await
            .context("データベース接続のクローズに失敗しました")?;

        debug!(alleles = rows.len(), "アレル対応表を読み込みました");
        Ok(Self::from_pairs(rows.into_iter().map(|(id, allele)| (allele, id))))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, allele: &str) -> Option<i64> {
        self.ids.get(allele).copied()
    }

    pub fn is_non_expressed(allele: &str) -> bool {
        allele.ends_with(NON_EXPRESSED_SUFFIX)
    }

    /// 対応表にない発現アレル
    pub fn unknown_alleles<'a>(&self, alleles: &'a [String]) -> Vec<&'a str> {
        alleles
            .iter()
            .map(String::as_str)
            .filter(|a| !Self::is_non_expressed(a) && !self.ids.contains_key(*a))
            .collect()
    }

    /// アレル名の集合をHLA idの集合に変換する
    ///
    /// 末尾が `N` のアレルは対応表の有無に関わらず除外される。
    pub fn resolve(&self, alleles: &[String]) -> Result<BTreeSet<i64>, LookupError> {
        let mut ids = BTreeSet::new();
        for allele in alleles {
            if Self::is_non_expressed(allele) {
                continue;
            }
            let id = self
                .get(allele)
                .ok_or_else(|| LookupError::unknown_key(allele.clone()))?;
            ids.insert(id);
        }
        Ok(ids)
    }
}

/// 1被験者の遺伝子型
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genotype {
    pub alleles: Vec<String>,
}

/// `sample_id<TAB>A1_A2_B1_B2_C1_C2` 形式の1行を解析
pub fn parse_genotype_line(line: &str) -> std::result::Result<(String, Genotype), String> {
    let mut fields = line.split('\t');
    let (Some(sample), Some(genotype), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err("2列のタブ区切りである必要があります".to_string());
    };
    if sample.is_empty() {
        return Err("サンプルIDが空です".to_string());
    }

    let alleles: Vec<String> = genotype.split('_').map(str::to_string).collect();
    if alleles.len() != ALLELES_PER_GENOTYPE || alleles.iter().any(String::is_empty) {
        return Err(format!(
            "アレルは{ALLELES_PER_GENOTYPE}個必要です: {genotype}"
        ));
    }

    Ok((sample.to_string(), Genotype { alleles }))
}

/// 遺伝子型リストを読み込む
///
/// 不正な行と、対応表にない発現アレルを含む被験者は警告を出して除外する。
pub fn read_genotypes(path: &Path, index: &AlleleIndex) -> PipelineResult<Vec<WorkItem<Genotype>>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::task_source(path.display().to_string(), e.into()))?;

    let mut items = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match parse_genotype_line(line) {
            Ok((sample, genotype)) => {
                let unknown = index.unknown_alleles(&genotype.alleles);
                if unknown.is_empty() {
                    items.push(WorkItem::new(sample, genotype));
                } else {
                    warn!(sample = %sample, alleles = ?unknown, "未知のアレルを含む被験者を除外します");
                }
            }
            Err(reason) => {
                let error = PipelineError::malformed_input(line_index + 1, reason);
                warn!(
                    error = %error,
                    severity = error.severity().as_str(),
                    "不正な行をスキップします"
                );
            }
        }
    }
    Ok(items)
}

/// 読み取り専用でSQLiteデータベースを開く
pub async fn open_read_only(database: &Path) -> Result<SqliteConnection> {
    SqliteConnectOptions::new()
        .filename(database)
        .read_only(true)
        .connect()
        .await
        .with_context(|| format!("データベースを開けません: {}", database.display()))
}

/// ワーカーごとのHLA遺伝子型ルックアップ
pub struct GenotypeLookup {
    index: Arc<AlleleIndex>,
    connection: Option<SqliteConnection>,
}

impl GenotypeLookup {
    pub fn new(index: Arc<AlleleIndex>, connection: SqliteConnection) -> Self {
        Self {
            index,
            connection: Some(connection),
        }
    }
}

#[async_trait]
impl Lookup for GenotypeLookup {
    type Payload = Genotype;
    type Value = i64;

    async fn lookup(&mut self, genotype: &Genotype) -> Result<i64, LookupError> {
        let ids = self.index.resolve(&genotype.alleles)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| LookupError::fatal(anyhow::anyhow!("データベース接続は既に閉じられています")))?;

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT COUNT(DISTINCT pep_id) FROM binders WHERE hla_id IN ({placeholders})"
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in &ids {
            query = query.bind(*id);
        }

        query
            .fetch_one(&mut *connection)
            .await
            .map_err(|e| LookupError::fatal(e.into()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .await
                .context("データベース接続のクローズに失敗しました")?;
        }
        Ok(())
    }
}

/// ワーカーごとに読み取り専用接続を開くファクトリ
pub struct GenotypeLookupFactory {
    database: PathBuf,
    index: Arc<AlleleIndex>,
}

impl GenotypeLookupFactory {
    pub fn new(database: impl Into<PathBuf>, index: Arc<AlleleIndex>) -> Self {
        Self {
            database: database.into(),
            index,
        }
    }
}

#[async_trait]
impl LookupFactory for GenotypeLookupFactory {
    type Lookup = GenotypeLookup;

    async fn open(&self, worker_id: usize) -> Result<GenotypeLookup> {
        let connection = open_read_only(&self.database).await?;
        debug!(worker_id, "データベース接続を開きました");
        Ok(GenotypeLookup::new(Arc::clone(&self.index), connection))
    }
}

/// 被験者ごとに `sample\tnumBinders` 行を出力する集約
#[derive(Debug, Default)]
pub struct GenotypeAggregate {
    subjects: usize,
}

impl GenotypeAggregate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregate<i64> for GenotypeAggregate {
    type Output = usize;

    fn header(&self) -> &str {
        GENOTYPE_HEADER
    }

    fn merge(&mut self, sample: &str, binders: i64) -> Vec<String> {
        self.subjects += 1;
        vec![format!("{sample}\t{binders}")]
    }

    fn finish(self) -> usize {
        self.subjects
    }
}
