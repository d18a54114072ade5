use crate::transforms::{
    assemble_contigs, build_binder_database, extract_unique_kmers, parse_netmhc_file,
};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Extract unique n-mers from FASTA files
pub async fn execute_kmers(fasta: Vec<PathBuf>, n: usize, output: PathBuf) -> Result<()> {
    println!("✂️  {n}-merの抽出開始 ({}ファイル)", fasta.len());

    let stats =
        tokio::task::spawn_blocking(move || extract_unique_kmers(&fasta, n, &output)).await??;

    println!("✅ 抽出完了!");
    println!("   - 総{n}-mer数: {}", stats.total);
    println!("   - ユニーク数: {}", stats.unique);
    Ok(())
}

/// Join unique n-mers into contigs
pub async fn execute_contigs(input: PathBuf, n: usize, output: PathBuf) -> Result<()> {
    println!("🔗 コンティグ作成開始: {}", input.display());

    let stats = tokio::task::spawn_blocking(move || assemble_contigs(&input, n, &output)).await??;

    println!("✅ 連結完了!");
    println!("   - ユニーク{n}-mer数: {}", stats.nmers);
    println!("   - 連結後の配列数: {}", stats.contigs);
    println!(
        "   - 平均長: {:.2} (最小 {}, 最大 {})",
        stats.mean_length, stats.min_length, stats.max_length
    );
    Ok(())
}

/// Extract IC50 values from a NetMHCpan output file
pub async fn execute_parse_netmhc(input: PathBuf, output: PathBuf) -> Result<()> {
    let values = tokio::task::spawn_blocking(move || parse_netmhc_file(&input, &output)).await??;

    println!("✅ {values}件のIC50値を書き出しました");
    Ok(())
}

/// Build the binder database from flat files
pub async fn execute_build_db(flat_dir: &Path, database: &Path) -> Result<()> {
    if !flat_dir.is_dir() {
        anyhow::bail!("Flat file directory does not exist: {}", flat_dir.display());
    }

    println!("🗄️  データベース作成開始: {}", database.display());
    let stats = build_binder_database(flat_dir, database).await?;

    println!("✅ 作成完了!");
    println!("   - アレル数: {}", stats.alleles);
    println!("   - ペプチド数: {}", stats.peptides);
    println!("   - 結合数: {}", stats.binders);
    Ok(())
}
