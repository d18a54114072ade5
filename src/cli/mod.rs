// CLI層 - コマンドライン引数の定義と処理
// ユーザーインターフェースとアプリケーションロジックの橋渡し

pub mod args;
pub mod commands;

// 公開API
pub use args::*;
pub use commands::*;

use crate::core::PipelineError;
use anyhow::Result;
use tracing::error;

/// サブコマンドを実行
pub async fn run(command: Commands) -> Result<CommandStatus> {
    match command {
        Commands::Genotypes {
            genotype_list,
            database,
            output,
            engine,
        } => {
            execute_genotypes(GenotypesConfig {
                genotype_list,
                database,
                output,
                engine,
            })
            .await
        }
        Commands::ReadSupport {
            mutations,
            output,
            samtools,
            max_attempts,
            retry_delay_secs,
            doubling,
            engine,
        } => {
            execute_read_support(ReadSupportConfig {
                mutations,
                output,
                samtools,
                max_attempts,
                retry_delay_secs,
                doubling,
                engine,
            })
            .await
        }
        Commands::Tally {
            script_reference,
            results_dir,
            results_output,
            time_output,
            incomplete_output,
            engine,
        } => {
            execute_tally(TallyConfig {
                script_reference,
                results_dir,
                results_output,
                time_output,
                incomplete_output,
                engine,
            })
            .await
        }
        Commands::CollectBinders {
            species_code,
            root_dir,
            hla_list,
            database,
            engine,
        } => {
            execute_collect_binders(CollectBindersConfig {
                species_code,
                root_dir,
                hla_list,
                database,
                engine,
            })
            .await
        }
        Commands::Kmers { fasta, n, output } => {
            execute_kmers(fasta, n, output).await?;
            Ok(CommandStatus::Completed)
        }
        Commands::Contigs { input, n, output } => {
            execute_contigs(input, n, output).await?;
            Ok(CommandStatus::Completed)
        }
        Commands::ParseNetmhc { input, output } => {
            execute_parse_netmhc(input, output).await?;
            Ok(CommandStatus::Completed)
        }
        Commands::BuildDb { flat_dir, database } => {
            execute_build_db(&flat_dir, &database).await?;
            Ok(CommandStatus::Completed)
        }
    }
}

/// 失敗時にユーザーへ表示するメッセージ
///
/// パイプラインのエラーであれば対象リソースと対処方法を添える。
pub fn failure_message(error: &anyhow::Error) -> String {
    let mut message = format!("❌ エラー: {error:#}");
    if let Some(pipeline_error) = error.downcast_ref::<PipelineError>() {
        let context = pipeline_error.context();
        if let Some(resource) = &context.resource {
            message.push_str(&format!("\n   対象: {resource}"));
        }
        if let Some(suggestion) = &context.suggestion {
            message.push_str(&format!("\n💡 {suggestion}"));
        }
    }
    message
}

/// コマンドの失敗を報告し、プロセスの終了コードを返す
pub fn report_failure(failure: &anyhow::Error) -> i32 {
    match failure.downcast_ref::<PipelineError>() {
        Some(pipeline_error) => error!(
            severity = pipeline_error.severity().as_str(),
            recoverable = pipeline_error.is_recoverable(),
            operation = %pipeline_error.context().operation,
            "{pipeline_error}"
        ),
        None => error!("{failure:#}"),
    }
    eprintln!("{}", failure_message(failure));
    1
}
