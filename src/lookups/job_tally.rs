// ジョブ結果の集計ルックアップ
// ジョブディレクトリを検査し、実行時間と結合ペプチド数を取り出す

use crate::core::{
    Aggregate, Lookup, LookupError, LookupFactory, PipelineError, PipelineResult, WorkItem,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// 実行時間ファイルのヘッダー
pub const TIMING_HEADER: &str = "jobname\thla\tpepLen\tdate\tdatetime\tduration";

/// IC50の閾値（nM）
pub const CUTOFFS: [u32; 3] = [50, 100, 500];

/// 集計対象のペプチド長
pub const MIN_PEPTIDE_LENGTH: usize = 8;
pub const MAX_PEPTIDE_LENGTH: usize = 11;
const LENGTH_COUNT: usize = MAX_PEPTIDE_LENGTH - MIN_PEPTIDE_LENGTH + 1;

const STDERR_MARKER: &str = ".sh.e";
const STDOUT_MARKER: &str = ".sh.o";
const PARSED_MARKER: &str = ".parsed";

/// `date` コマンド形式（タイムゾーン名は除去してから解析する）
const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// 集計対象のジョブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    pub name: String,
    pub directory: PathBuf,
}

/// ジョブ参照ファイルからジョブ一覧を読み込む（1列目、重複除去・順序保持）
pub fn read_job_list(
    script_reference: &Path,
    results_dir: &Path,
) -> PipelineResult<Vec<WorkItem<JobPayload>>> {
    let content = std::fs::read_to_string(script_reference).map_err(|e| {
        PipelineError::task_source(script_reference.display().to_string(), e.into())
    })?;

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for line in content.lines() {
        let name = line.split('\t').next().unwrap_or_default().trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        items.push(WorkItem::new(
            name,
            JobPayload {
                name: name.to_string(),
                directory: results_dir.join(name),
            },
        ));
    }
    debug!(jobs = items.len(), "ジョブ一覧を読み込みました");
    Ok(items)
}

/// タイムゾーン名を含む `date` 出力を解析
///
/// 例: `Mon Jan 16 10:00:00 EST 2017`
pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() == 6 {
        tokens.remove(4);
    }
    NaiveDateTime::parse_from_str(&tokens.join(" "), TIMESTAMP_FORMAT).ok()
}

/// 閾値×ペプチド長ごとの結合ペプチド数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderTally {
    counts: [[usize; LENGTH_COUNT]; CUTOFFS.len()],
}

impl BinderTally {
    /// IC50値を1件記録（値以上の全閾値に数える）
    pub fn record(&mut self, peptide_length: usize, ic50: f64) {
        let Some(column) = peptide_length.checked_sub(MIN_PEPTIDE_LENGTH) else {
            return;
        };
        if column >= LENGTH_COUNT {
            return;
        }
        for (row, cutoff) in CUTOFFS.iter().enumerate() {
            if ic50 <= f64::from(*cutoff) {
                self.counts[row][column] += 1;
            }
        }
    }

    pub fn count(&self, cutoff: u32, peptide_length: usize) -> usize {
        let row = CUTOFFS.iter().position(|c| *c == cutoff);
        let column = peptide_length.checked_sub(MIN_PEPTIDE_LENGTH);
        match (row, column) {
            (Some(row), Some(column)) if column < LENGTH_COUNT => self.counts[row][column],
            _ => 0,
        }
    }

    pub fn add(&mut self, other: &BinderTally) {
        for (row, other_row) in self.counts.iter_mut().zip(other.counts.iter()) {
            for (count, other_count) in row.iter_mut().zip(other_row.iter()) {
                *count += other_count;
            }
        }
    }

    /// 閾値順・長さ順に並べた12値
    pub fn values(&self) -> impl Iterator<Item = usize> + '_ {
        self.counts.iter().flatten().copied()
    }
}

/// HLA集計ファイルのヘッダー
pub fn hla_summary_header() -> String {
    let mut columns = vec!["hla".to_string()];
    for cutoff in CUTOFFS {
        for length in MIN_PEPTIDE_LENGTH..=MAX_PEPTIDE_LENGTH {
            columns.push(format!("co{cutoff}_{length}mer"));
        }
    }
    columns.join("\t")
}

/// ジョブの実行時間
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTiming {
    pub job_name: String,
    pub hla: String,
    pub peptide_length: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl JobTiming {
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    pub fn row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{:.1}",
            self.job_name,
            self.hla,
            self.peptide_length,
            self.start.format("%Y-%m-%d"),
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.duration_secs()
        )
    }
}

/// ジョブの検査結果
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Clean {
        timing: JobTiming,
        hla: String,
        tally: BinderTally,
    },
    Incomplete {
        reason: String,
    },
}

impl JobStatus {
    fn incomplete(reason: impl Into<String>) -> Self {
        Self::Incomplete {
            reason: reason.into(),
        }
    }
}

/// ジョブディレクトリ内の対象ファイル
#[derive(Debug, Default)]
struct JobFiles {
    stderr: Option<PathBuf>,
    stdout: Option<PathBuf>,
    parsed: Option<PathBuf>,
}

/// ジョブディレクトリを検査するルックアップ
#[derive(Debug, Default)]
pub struct JobTallyLookup;

impl JobTallyLookup {
    pub fn new() -> Self {
        Self
    }

    async fn scan_directory(directory: &Path) -> Option<JobFiles> {
        let mut entries = tokio::fs::read_dir(directory).await.ok()?;
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut files = JobFiles::default();
        for name in names {
            let path = directory.join(&name);
            if name.contains(STDERR_MARKER) {
                files.stderr.get_or_insert(path);
            } else if name.contains(STDOUT_MARKER) {
                files.stdout.get_or_insert(path);
            } else if name.contains(PARSED_MARKER) {
                files.parsed.get_or_insert(path);
            }
        }
        Some(files)
    }

    async fn inspect(job: &JobPayload) -> JobStatus {
        let Some(files) = Self::scan_directory(&job.directory).await else {
            return JobStatus::incomplete("ジョブディレクトリがありません");
        };

        let Some(stderr_path) = files.stderr else {
            return JobStatus::incomplete("標準エラー出力ファイルがありません");
        };
        match tokio::fs::metadata(&stderr_path).await {
            Ok(metadata) if metadata.len() == 0 => {}
            Ok(_) => return JobStatus::incomplete("標準エラー出力が空ではありません"),
            Err(e) => return JobStatus::incomplete(format!("標準エラー出力を読めません: {e}")),
        }

        let Some(stdout_path) = files.stdout else {
            return JobStatus::incomplete("標準出力ファイルがありません");
        };
        let timing = match Self::read_timing(job, &stdout_path).await {
            Ok(timing) => timing,
            Err(reason) => return JobStatus::incomplete(reason),
        };

        let Some(parsed_path) = files.parsed else {
            return JobStatus::incomplete("解析結果ファイルがありません");
        };
        match Self::read_tally(&parsed_path).await {
            Ok((hla, tally)) => JobStatus::Clean { timing, hla, tally },
            Err(reason) => JobStatus::incomplete(reason),
        }
    }

    async fn read_timing(job: &JobPayload, path: &Path) -> std::result::Result<JobTiming, String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("標準出力を読めません: {e}"))?;

        let mut timestamps = content.lines().filter(|l| !l.trim().is_empty());
        let (Some(first), Some(second)) = (timestamps.next(), timestamps.next()) else {
            return Err("開始・終了時刻が揃っていません".to_string());
        };
        let start = parse_timestamp(first).ok_or_else(|| format!("時刻を解析できません: {first}"))?;
        let end = parse_timestamp(second).ok_or_else(|| format!("時刻を解析できません: {second}"))?;

        let mut parts = job.name.split('_');
        let (Some(_species), Some(hla), Some(peptide_length)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("ジョブ名の形式が不正です: {}", job.name));
        };

        Ok(JobTiming {
            job_name: job.name.clone(),
            hla: hla.to_string(),
            peptide_length: peptide_length.to_string(),
            start,
            end,
        })
    }

    /// 解析結果ファイル名（`<species>_<hla>_<pepLen>_<n>.…parsed`）とIC50値を読む
    async fn read_tally(path: &Path) -> std::result::Result<(String, BinderTally), String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file_name.split('.').next().unwrap_or_default();
        let parts: Vec<&str> = stem.split('_').collect();
        let [_species, hla, peptide_length, _number] = parts.as_slice() else {
            return Err(format!("解析結果ファイル名の形式が不正です: {file_name}"));
        };
        let peptide_length: usize = peptide_length
            .parse()
            .map_err(|_| format!("ペプチド長が数値ではありません: {file_name}"))?;
        if !(MIN_PEPTIDE_LENGTH..=MAX_PEPTIDE_LENGTH).contains(&peptide_length) {
            return Err(format!("ペプチド長が範囲外です: {peptide_length}"));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("解析結果を読めません: {e}"))?;
        let mut tally = BinderTally::default();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let ic50: f64 = line
                .trim()
                .parse()
                .map_err(|_| format!("IC50値を解析できません: {line}"))?;
            tally.record(peptide_length, ic50);
        }
        Ok((hla.to_string(), tally))
    }
}

#[async_trait]
impl Lookup for JobTallyLookup {
    type Payload = JobPayload;
    type Value = JobStatus;

    async fn lookup(&mut self, job: &JobPayload) -> std::result::Result<JobStatus, LookupError> {
        let status = Self::inspect(job).await;
        if let JobStatus::Incomplete { reason } = &status {
            trace!(job = %job.name, reason = %reason, "未完了のジョブ");
        }
        Ok(status)
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobTallyLookupFactory;

#[async_trait]
impl LookupFactory for JobTallyLookupFactory {
    type Lookup = JobTallyLookup;

    async fn open(&self, _worker_id: usize) -> Result<JobTallyLookup> {
        Ok(JobTallyLookup::new())
    }
}

/// 集計結果
#[derive(Debug, Default, PartialEq)]
pub struct TallySummary {
    pub per_hla: BTreeMap<String, BinderTally>,
    pub incomplete: Vec<String>,
}

impl TallySummary {
    /// HLAごとの集計行（HLA名順）
    pub fn hla_rows(&self) -> Vec<String> {
        self.per_hla
            .iter()
            .map(|(hla, tally)| {
                let values: Vec<String> = tally.values().map(|v| v.to_string()).collect();
                format!("{hla}\t{}", values.join("\t"))
            })
            .collect()
    }
}

/// 実行時間行をストリームし、HLA集計と未完了ジョブを保持する集約
#[derive(Debug, Default)]
pub struct TallyAggregate {
    summary: TallySummary,
}

impl TallyAggregate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregate<JobStatus> for TallyAggregate {
    type Output = TallySummary;

    fn header(&self) -> &str {
        TIMING_HEADER
    }

    fn merge(&mut self, job_name: &str, status: JobStatus) -> Vec<String> {
        match status {
            JobStatus::Clean { timing, hla, tally } => {
                self.summary.per_hla.entry(hla).or_default().add(&tally);
                vec![timing.row()]
            }
            JobStatus::Incomplete { .. } => {
                self.summary.incomplete.push(job_name.to_string());
                Vec::new()
            }
        }
    }

    fn finish(mut self) -> TallySummary {
        self.summary.incomplete.sort();
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const JOB: &str = "CHLTR_HLA-A01-01_9_1";

    fn write_job(root: &Path, name: &str, stderr: &str, stdout: &str, values: &[&str]) -> JobPayload {
        let directory = root.join(name);
        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join(format!("{name}.sh.e123")), stderr).unwrap();
        fs::write(directory.join(format!("{name}.sh.o123")), stdout).unwrap();
        fs::write(
            directory.join(format!("{name}.pMHC.parsed")),
            values.join("\n"),
        )
        .unwrap();
        JobPayload {
            name: name.to_string(),
            directory,
        }
    }

    const TIMES: &str = "Mon Jan 16 10:00:00 EST 2017\nMon Jan 16 11:00:30 EST 2017\n";

    #[test]
    fn test_parse_timestamp_strips_timezone() {
        let parsed = parse_timestamp("Mon Jan 16 10:00:00 EST 2017").unwrap();

        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2017-01-16 10:00:00");
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn test_binder_tally_counts_every_matching_cutoff() {
        let mut tally = BinderTally::default();
        tally.record(9, 10.0);
        tally.record(9, 75.0);
        tally.record(9, 400.0);
        tally.record(9, 5000.0);
        tally.record(12, 1.0);

        assert_eq!(tally.count(50, 9), 1);
        assert_eq!(tally.count(100, 9), 2);
        assert_eq!(tally.count(500, 9), 3);
        assert_eq!(tally.values().sum::<usize>(), 6);
    }

    #[test]
    fn test_hla_summary_header() {
        let header = hla_summary_header();

        assert!(header.starts_with("hla\tco50_8mer\tco50_9mer"));
        assert!(header.ends_with("co500_10mer\tco500_11mer"));
        assert_eq!(header.split('\t').count(), 13);
    }

    #[test]
    fn test_read_job_list_dedupes_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let reference = temp_dir.path().join("jobs.sh");
        fs::write(&reference, "job_b\tcmd\njob_a\tcmd\njob_b\tcmd\n\n").unwrap();

        let items = read_job_list(&reference, Path::new("/results")).unwrap();

        let names: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(names, vec!["job_b", "job_a"]);
        assert_eq!(items[1].payload.directory, Path::new("/results/job_a"));
    }

    #[tokio::test]
    async fn test_lookup_clean_job() {
        let temp_dir = TempDir::new().unwrap();
        let job = write_job(temp_dir.path(), JOB, "", TIMES, &["12.5", "80", "900"]);

        let status = JobTallyLookup::new().lookup(&job).await.unwrap();

        match status {
            JobStatus::Clean { timing, hla, tally } => {
                assert_eq!(hla, "HLA-A01-01");
                assert_eq!(
                    timing.row(),
                    format!("{JOB}\tHLA-A01-01\t9\t2017-01-16\t2017-01-16 10:00:00\t3630.0")
                );
                assert_eq!(tally.count(50, 9), 1);
                assert_eq!(tally.count(500, 9), 2);
            }
            other => panic!("Expected Clean, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_non_empty_stderr_is_incomplete() {
        let temp_dir = TempDir::new().unwrap();
        let job = write_job(temp_dir.path(), JOB, "Killed\n", TIMES, &["1"]);

        let status = JobTallyLookup::new().lookup(&job).await.unwrap();

        assert!(matches!(status, JobStatus::Incomplete { .. }));
    }

    #[tokio::test]
    async fn test_lookup_missing_end_time_is_incomplete() {
        let temp_dir = TempDir::new().unwrap();
        let job = write_job(temp_dir.path(), JOB, "", "Mon Jan 16 10:00:00 EST 2017\n", &["1"]);

        let status = JobTallyLookup::new().lookup(&job).await.unwrap();

        assert!(matches!(status, JobStatus::Incomplete { .. }));
    }

    #[tokio::test]
    async fn test_lookup_missing_directory_is_incomplete() {
        let job = JobPayload {
            name: JOB.to_string(),
            directory: PathBuf::from("/nonexistent/job/dir"),
        };

        let status = JobTallyLookup::new().lookup(&job).await.unwrap();

        assert!(matches!(status, JobStatus::Incomplete { .. }));
    }

    #[test]
    fn test_aggregate_merges_per_hla_and_sorts_incomplete() {
        let timing = JobTiming {
            job_name: JOB.to_string(),
            hla: "HLA-A01-01".to_string(),
            peptide_length: "9".to_string(),
            start: parse_timestamp("Mon Jan 16 10:00:00 EST 2017").unwrap(),
            end: parse_timestamp("Mon Jan 16 10:00:10 EST 2017").unwrap(),
        };
        let mut tally = BinderTally::default();
        tally.record(9, 1.0);

        let mut aggregate = TallyAggregate::new();
        for _ in 0..2 {
            let row = aggregate.merge(
                JOB,
                JobStatus::Clean {
                    timing: timing.clone(),
                    hla: "HLA-A01-01".to_string(),
                    tally,
                },
            );
            assert_eq!(row.len(), 1);
            assert!(row[0].ends_with("\t10.0"));
        }
        assert!(aggregate
            .merge("job_z", JobStatus::incomplete("x"))
            .is_empty());
        assert!(aggregate
            .merge("job_a", JobStatus::incomplete("x"))
            .is_empty());

        let summary = aggregate.finish();
        assert_eq!(summary.incomplete, vec!["job_a", "job_z"]);
        assert_eq!(summary.per_hla["HLA-A01-01"].count(50, 9), 2);
        assert_eq!(
            summary.hla_rows(),
            vec!["HLA-A01-01\t0\t2\t0\t0\t0\t2\t0\t0\t0\t2\t0\t0".to_string()]
        );
    }
}
