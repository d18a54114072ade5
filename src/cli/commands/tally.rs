use super::{pipeline_config, run_to_tsv, write_summary, CommandStatus};
use crate::cli::args::EngineArgs;
use crate::lookups::job_tally::hla_summary_header;
use crate::lookups::{read_job_list, JobTallyLookupFactory, TallyAggregate, TallySummary};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Configuration struct for the tally command
pub struct TallyConfig {
    pub script_reference: PathBuf,
    pub results_dir: PathBuf,
    pub results_output: PathBuf,
    pub time_output: PathBuf,
    pub incomplete_output: PathBuf,
    pub engine: EngineArgs,
}

/// HLA集計と未完了ジョブ一覧を書き出す
pub async fn write_tally_outputs(
    summary: &TallySummary,
    results_output: &Path,
    incomplete_output: &Path,
) -> Result<()> {
    let mut results = hla_summary_header();
    results.push('\n');
    for row in summary.hla_rows() {
        results.push_str(&row);
        results.push('\n');
    }
    tokio::fs::write(results_output, results)
        .await
        .with_context(|| format!("HLA集計を書き込めません: {}", results_output.display()))?;

    let incomplete: String = summary
        .incomplete
        .iter()
        .map(|name| format!("{name}\n"))
        .collect();
    tokio::fs::write(incomplete_output, incomplete)
        .await
        .with_context(|| {
            format!(
                "未完了ジョブ一覧を書き込めません: {}",
                incomplete_output.display()
            )
        })?;
    Ok(())
}

/// Tally binder counts and run times of cluster jobs
pub async fn execute_tally(config: TallyConfig) -> Result<CommandStatus> {
    if !config.results_dir.is_dir() {
        anyhow::bail!(
            "Results directory does not exist: {}",
            config.results_dir.display()
        );
    }

    println!("📋 ジョブ結果の集計開始");
    println!("   - ジョブ参照ファイル: {}", config.script_reference.display());
    println!("   - 結果ディレクトリ: {}", config.results_dir.display());

    let items = read_job_list(&config.script_reference, &config.results_dir)?;
    println!("   - ジョブ数: {}", items.len());

    let outcome = run_to_tsv(
        pipeline_config(&config.engine),
        &config.time_output,
        items,
        JobTallyLookupFactory,
        TallyAggregate::new(),
    )
    .await?;

    if let Some(summary) = &outcome.output {
        write_tally_outputs(summary, &config.results_output, &config.incomplete_output).await?;
        println!("   - HLA数: {}", summary.per_hla.len());
        println!("   - 未完了ジョブ数: {}", summary.incomplete.len());
        println!("📄 HLA集計は {} に保存されました", config.results_output.display());
    }
    write_summary(config.engine.summary.as_deref(), &outcome.summary).await?;
    Ok(CommandStatus::from_summary(&outcome.summary))
}
