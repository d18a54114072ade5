use super::{pipeline_config, run_to_tsv, write_summary, CommandStatus};
use crate::cli::args::EngineArgs;
use crate::core::{Backoff, RetryPolicy};
use crate::lookups::{
    read_mutation_sites, PileupLookupFactory, ReadSupportAggregate, TokioCommandRunner,
};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration struct for the read-support command
pub struct ReadSupportConfig {
    pub mutations: PathBuf,
    pub output: PathBuf,
    pub samtools: String,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub doubling: bool,
    pub engine: EngineArgs,
}

impl ReadSupportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = if self.doubling {
            Backoff::Doubling
        } else {
            Backoff::Fixed
        };
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_secs))
            .with_backoff(backoff)
    }
}

/// Count wild-type and mutant reads for every mutation site
pub async fn execute_read_support(config: ReadSupportConfig) -> Result<CommandStatus> {
    println!("🔬 変異リードサポート集計開始");
    println!("   - 変異リスト: {}", config.mutations.display());
    println!("   - 外部ツール: {}", config.samtools);

    let items = read_mutation_sites(&config.mutations)?;
    println!("   - 変異数: {}", items.len());

    let runner = Arc::new(TokioCommandRunner::new());
    let factory = PileupLookupFactory::new(runner, config.samtools.clone());
    let pipeline = pipeline_config(&config.engine).with_retry_policy(config.retry_policy());

    let outcome = run_to_tsv(
        pipeline,
        &config.output,
        items,
        factory,
        ReadSupportAggregate::new(),
    )
    .await?;

    if let Some(sites) = outcome.output {
        println!("   - 出力変異数: {sites}");
    }
    write_summary(config.engine.summary.as_deref(), &outcome.summary).await?;
    Ok(CommandStatus::from_summary(&outcome.summary))
}
