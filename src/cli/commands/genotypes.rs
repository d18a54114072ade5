use super::{pipeline_config, run_to_tsv, write_summary, CommandStatus};
use crate::cli::args::EngineArgs;
use crate::lookups::{read_genotypes, AlleleIndex, GenotypeAggregate, GenotypeLookupFactory};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration struct for the genotypes command
pub struct GenotypesConfig {
    pub genotype_list: PathBuf,
    pub database: PathBuf,
    pub output: PathBuf,
    pub engine: EngineArgs,
}

/// Count distinct binders per subject genotype
pub async fn execute_genotypes(config: GenotypesConfig) -> Result<CommandStatus> {
    if !config.database.is_file() {
        anyhow::bail!("Database does not exist: {}", config.database.display());
    }

    println!("🧬 HLA遺伝子型ルックアップ開始");
    println!("   - 遺伝子型リスト: {}", config.genotype_list.display());
    println!("   - データベース: {}", config.database.display());

    let index = Arc::new(AlleleIndex::load(&config.database).await?);
    println!("   - 登録アレル数: {}", index.len());

    let items = read_genotypes(&config.genotype_list, &index)?;
    let factory = GenotypeLookupFactory::new(config.database.clone(), index);

    let outcome = run_to_tsv(
        pipeline_config(&config.engine),
        &config.output,
        items,
        factory,
        GenotypeAggregate::new(),
    )
    .await?;

    if let Some(subjects) = outcome.output {
        println!("   - 出力被験者数: {subjects}");
    }
    write_summary(config.engine.summary.as_deref(), &outcome.summary).await?;
    Ok(CommandStatus::from_summary(&outcome.summary))
}
