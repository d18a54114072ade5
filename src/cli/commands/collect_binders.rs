use super::{pipeline_config, run_with_sink, write_summary, CommandStatus};
use crate::cli::args::EngineArgs;
use crate::lookups::{
    create_binder_indexes, create_reference_tables, find_score_files, BinderAggregate,
    BinderScoreLookupFactory, BINDERS_TABLE,
};
use crate::services::SqliteTableSink;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration struct for the collect-binders command
pub struct CollectBindersConfig {
    pub species_code: String,
    pub root_dir: PathBuf,
    pub hla_list: PathBuf,
    pub database: PathBuf,
    pub engine: EngineArgs,
}

/// Build the binder database from NetMHCpan score files
///
/// The reference tables are written first; the workers then stream binders into
/// the `binders` table block by block. Indexes are created only for completed runs.
pub async fn execute_collect_binders(config: CollectBindersConfig) -> Result<CommandStatus> {
    if !config.root_dir.is_dir() {
        anyhow::bail!(
            "Root directory does not exist: {}",
            config.root_dir.display()
        );
    }

    println!("🧬 結合ペプチドデータベース作成開始");
    println!("   - 生物種コード: {}", config.species_code);
    println!("   - ルートディレクトリ: {}", config.root_dir.display());
    println!("   - アレルリスト: {}", config.hla_list.display());

    let ids = Arc::new(
        create_reference_tables(&config.database, &config.root_dir, &config.hla_list).await?,
    );
    println!(
        "   - ペプチド数: {} / アレル数: {}",
        ids.peptide_count(),
        ids.allele_count()
    );

    let items = find_score_files(&config.root_dir, &config.species_code)?;
    println!("📁 {} 個のスコアファイルが見つかりました", items.len());

    let outcome = run_with_sink(
        pipeline_config(&config.engine),
        SqliteTableSink::new(&config.database, BINDERS_TABLE),
        &config.database,
        items,
        BinderScoreLookupFactory::new(ids),
        BinderAggregate::new(),
    )
    .await?;

    if let Some(binders) = outcome.output {
        create_binder_indexes(&config.database).await?;
        println!("   - 登録した結合ペプチド数: {binders}");
    }
    write_summary(config.engine.summary.as_deref(), &outcome.summary).await?;
    Ok(CommandStatus::from_summary(&outcome.summary))
}
