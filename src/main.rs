use anyhow::Result;
use clap::Parser;

use workspace_sync::cli::{execute, init_tracing, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);

    let output = execute(cli.command, &config).await?;
    println!("{}", output);
    Ok(())
}
