use anyhow::Result;
use clap::Parser;
use immunopep::cli::{self, Cli};
use immunopep::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose, args.debug)?;

    let status = match cli::run(args.command).await {
        Ok(status) => status,
        Err(error) => std::process::exit(cli::report_failure(&error)),
    };
    let code = status.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
