use clap::Parser;
use perfwatch::logging::init_logging;
use perfwatch::Result;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.load_config()?;
    init_logging(&config.logging)?;

    let ctx = cli::build_context(&cli, config)?;
    cli::run(&cli, &ctx).await
}
