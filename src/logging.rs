// ログ出力の初期化

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// フラグから既定のログレベルを決める（`-d` が `-v` より優先）
pub fn default_level(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// tracing-subscriberを初期化
///
/// `RUST_LOG` が設定されていればフラグより優先する。ログは標準エラー出力へ書く。
pub fn init_logging(verbose: bool, debug: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, debug)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("ログの初期化に失敗しました: {e}"))?;

    tracing::debug!("ログを初期化しました");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(false, false), "info");
        assert_eq!(default_level(true, false), "debug");
        assert_eq!(default_level(true, true), "trace");
        assert_eq!(default_level(false, true), "trace");
    }
}
