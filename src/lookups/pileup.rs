// 変異リードサポートのルックアップ
// samtools互換ツールで1塩基位置のパイルアップを取得し、塩基ごとのリード数を数える

use super::command::{CommandOutput, CommandRunner};
use crate::core::{
    Aggregate, Lookup, LookupError, LookupFactory, PipelineError, PipelineResult, WorkItem,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// 出力ファイルのヘッダー
pub const READ_SUPPORT_HEADER: &str =
    "barcode\tchrom\tpos\twild\tmut\twildCount\tmutCount\totherCount";

/// 染色体名の接頭辞
pub const CHROMOSOME_PREFIX: &str = "chr";

// 入力ファイルの列位置（0始まり）
const BARCODE_COLUMN: usize = 1;
const CHROMOSOME_COLUMN: usize = 3;
const POSITION_COLUMN: usize = 4;
const STRAND_COLUMN: usize = 6;
const HGVSC_COLUMN: usize = 7;
const BAM_COLUMN: usize = 8;

/// パイルアップ出力で読み塩基が入っている列（0始まり）
const PILEUP_BASES_COLUMN: usize = 4;

/// 相補塩基（A/C/G/T以外は `X`）
pub fn complement(base: char) -> char {
    match base {
        'A' => 'T',
        'T' => 'A',
        'G' => 'C',
        'C' => 'G',
        _ => 'X',
    }
}

/// 検証対象の1変異
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSite {
    pub barcode: String,
    pub chromosome: String,
    pub position: u64,
    pub wild: char,
    pub mutant: char,
    pub bam: PathBuf,
}

/// 変異リストの1行を解析
pub fn parse_mutation_line(line: &str) -> std::result::Result<MutationSite, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() <= BAM_COLUMN {
        return Err(format!(
            "列数が不足しています（{}列、{}列以上が必要）",
            fields.len(),
            BAM_COLUMN + 1
        ));
    }

    let position: u64 = fields[POSITION_COLUMN]
        .parse()
        .map_err(|_| format!("位置が数値ではありません: {}", fields[POSITION_COLUMN]))?;

    let hgvsc = fields[HGVSC_COLUMN];
    let (reference, alternate) = hgvsc
        .split_once('>')
        .ok_or_else(|| format!("変異表記に '>' がありません: {hgvsc}"))?;
    let wild = reference
        .chars()
        .last()
        .ok_or_else(|| format!("野生型塩基がありません: {hgvsc}"))?;
    let mut alternate_chars = alternate.chars();
    let (Some(mutant), None) = (alternate_chars.next(), alternate_chars.next()) else {
        return Err(format!("変異塩基は1文字である必要があります: {hgvsc}"));
    };

    let (wild, mutant) = if fields[STRAND_COLUMN] == "-1" {
        (complement(wild), complement(mutant))
    } else {
        (wild, mutant)
    };

    Ok(MutationSite {
        barcode: fields[BARCODE_COLUMN].to_string(),
        chromosome: fields[CHROMOSOME_COLUMN].to_string(),
        position,
        wild,
        mutant,
        bam: PathBuf::from(fields[BAM_COLUMN]),
    })
}

/// 変異リストを読み込む（1行目はヘッダー）
pub fn read_mutation_sites(path: &Path) -> PipelineResult<Vec<WorkItem<MutationSite>>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::task_source(path.display().to_string(), e.into()))?;

    let mut items = Vec::new();
    for (line_index, line) in content.lines().enumerate().skip(1) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        match parse_mutation_line(line) {
            Ok(site) => items.push(WorkItem::new(site.barcode.clone(), site)),
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

/// 1位置の塩基別リード数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCounts {
    a: usize,
    c: usize,
    g: usize,
    t: usize,
}

impl BaseCounts {
    /// 読み塩基の列から集計（大文字小文字を区別しない、A/C/G/T以外は無視）
    pub fn from_bases(bases: &str) -> Self {
        let mut counts = Self::default();
        for base in bases.chars() {
            match base.to_ascii_uppercase() {
                'A' => counts.a += 1,
                'C' => counts.c += 1,
                'G' => counts.g += 1,
                'T' => counts.t += 1,
                _ => {}
            }
        }
        counts
    }

    pub fn count(&self, base: char) -> usize {
        match base.to_ascii_uppercase() {
            'A' => self.a,
            'C' => self.c,
            'G' => self.g,
            'T' => self.t,
            _ => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.c + self.g + self.t
    }
}

/// 野生型・変異型・その他のリード数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSupport {
    pub wild: usize,
    pub mutant: usize,
    pub other: usize,
}

impl ReadSupport {
    pub fn from_counts(counts: &BaseCounts, wild: char, mutant: char) -> Self {
        let wild_count = counts.count(wild);
        let mutant_count = counts.count(mutant);
        Self {
            wild: wild_count,
            mutant: mutant_count,
            other: counts.total().saturating_sub(wild_count + mutant_count),
        }
    }

    pub fn add(&mut self, other: &ReadSupport) {
        self.wild += other.wild;
        self.mutant += other.mutant;
        self.other += other.other;
    }
}

/// 集約キー（同じサンプルの複数レーンは合算される）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationKey {
    pub barcode: String,
    pub chromosome: String,
    pub position: u64,
    pub wild: char,
    pub mutant: char,
}

impl From<&MutationSite> for MutationKey {
    fn from(site: &MutationSite) -> Self {
        Self {
            barcode: site.barcode.clone(),
            chromosome: site.chromosome.clone(),
            position: site.position,
            wild: site.wild,
            mutant: site.mutant,
        }
    }
}

/// ワーカーが返す1変異分の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSupportRecord {
    pub key: MutationKey,
    pub support: ReadSupport,
}

/// パイルアップ出力から読み塩基の列を連結して取り出す
fn pileup_bases(stdout: &str) -> String {
    stdout
        .lines()
        .filter_map(|line| line.split('\t').nth(PILEUP_BASES_COLUMN))
        .collect::<Vec<_>>()
        .concat()
}

/// ワーカーごとのパイルアップルックアップ
pub struct PileupLookup<C: ?Sized> {
    runner: Arc<C>,
    samtools: String,
}

impl<C: CommandRunner + ?Sized> PileupLookup<C> {
    pub fn new(runner: Arc<C>, samtools: impl Into<String>) -> Self {
        Self {
            runner,
            samtools: samtools.into(),
        }
    }

    /// コマンドを実行し、標準エラー出力が空でなければ再試行可能なエラーとする
    async fn run_checked(
        &self,
        args: Vec<String>,
        max_lines: Option<usize>,
    ) -> std::result::Result<CommandOutput, LookupError> {
        let command_line = format!("{} {}", self.samtools, args.join(" "));
        let output = self
            .runner
            .run(&self.samtools, &args, max_lines)
            .await
            .map_err(LookupError::fatal)?;

        if !output.is_clean() {
            return Err(LookupError::external_command(
                command_line,
                output.stderr.trim_end(),
            ));
        }
        Ok(output)
    }

    /// アラインメントファイルの染色体名に `chr` 接頭辞が付いているかを判定
    async fn chromosome_prefix(&self, bam: &Path) -> std::result::Result<&'static str, LookupError> {
        let output = self
            .run_checked(
                vec!["view".to_string(), bam.display().to_string()],
                Some(1),
            )
            .await?;

        let reference = output
            .stdout
            .lines()
            .next()
            .and_then(|record| record.split('\t').nth(2));
        match reference {
            Some(name) if name.starts_with(CHROMOSOME_PREFIX) => Ok(CHROMOSOME_PREFIX),
            Some(_) => Ok(""),
            None => {
                debug!(bam = %bam.display(), "アラインメントレコードがないため接頭辞なしとみなします");
                Ok("")
            }
        }
    }
}

#[async_trait]
impl<C: CommandRunner + ?Sized + 'static> Lookup for PileupLookup<C> {
    type Payload = MutationSite;
    type Value = ReadSupportRecord;

    async fn lookup(&mut self, site: &MutationSite) -> std::result::Result<ReadSupportRecord, LookupError> {
        let prefix = self.chromosome_prefix(&site.bam).await?;
        let region = format!(
            "{prefix}{}:{}-{}",
            site.chromosome, site.position, site.position
        );

        let output = self
            .run_checked(
                vec![
                    "mpileup".to_string(),
                    "-r".to_string(),
                    region,
                    site.bam.display().to_string(),
                ],
                None,
            )
            .await?;

        let counts = BaseCounts::from_bases(&pileup_bases(&output.stdout));
        Ok(ReadSupportRecord {
            key: MutationKey::from(site),
            support: ReadSupport::from_counts(&counts, site.wild, site.mutant),
        })
    }
}

/// ワーカーごとにルックアップを生成するファクトリ
///
/// コマンド実行は共有の `CommandRunner` を通すが、プロセスは呼び出しごとに独立している。
pub struct PileupLookupFactory<C: ?Sized> {
    runner: Arc<C>,
    samtools: String,
}

impl<C: CommandRunner + ?Sized> PileupLookupFactory<C> {
    pub fn new(runner: Arc<C>, samtools: impl Into<String>) -> Self {
        Self {
            runner,
            samtools: samtools.into(),
        }
    }
}

#[async_trait]
impl<C: CommandRunner + ?Sized + 'static> LookupFactory for PileupLookupFactory<C> {
    type Lookup = PileupLookup<C>;

    async fn open(&self, _worker_id: usize) -> Result<PileupLookup<C>> {
        Ok(PileupLookup::new(Arc::clone(&self.runner), self.samtools.clone()))
    }
}

/// 変異ごとにリード数を合算する集約
///
/// 行は全ワーカー完了後、最初に観測された順で書き出される。
#[derive(Debug, Default)]
pub struct ReadSupportAggregate {
    order: Vec<MutationKey>,
    totals: HashMap<MutationKey, ReadSupport>,
}

impl ReadSupportAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MutationKey) -> Option<&ReadSupport> {
        self.totals.get(key)
    }
}

impl Aggregate<ReadSupportRecord> for ReadSupportAggregate {
    type Output = usize;

    fn header(&self) -> &str {
        READ_SUPPORT_HEADER
    }

    fn merge(&mut self, _barcode: &str, record: ReadSupportRecord) -> Vec<String> {
        match self.totals.get_mut(&record.key) {
            Some(total) => total.add(&record.support),
            None => {
                self.order.push(record.key.clone());
                self.totals.insert(record.key, record.support);
            }
        }
        Vec::new()
    }

    fn drain_rows(&mut self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|key| {
                self.totals.get(key).map(|support| {
                    format!(
                        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                        key.barcode,
                        key.chromosome,
                        key.position,
                        key.wild,
                        key.mutant,
                        support.wild,
                        support.mutant,
                        support.other
                    )
                })
            })
            .collect()
    }

    fn finish(self) -> usize {
        self.order.len()
    }
}
