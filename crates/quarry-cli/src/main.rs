use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::generate::GenerateArgs;
use commands::serve::ServeArgs;
use commands::tools::ToolsArgs;

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Expose SQL tables as MCP tools")]
struct Cli {
    /// Configuration file. Missing files fall back to defaults.
    #[arg(short, long, global = true, default_value = "quarry.yaml", env = "QUARRY_CONFIG")]
    config: PathBuf,

    /// Store snapshot file. Overrides `store.path`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MCP server on the configured carrier.
    Serve(ServeArgs),

    /// Generate a server's tools and resources from sample rows.
    Generate(GenerateArgs),

    /// List stored tools by qualified name.
    Tools(ToolsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the stdio carrier.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(&cli.config, cli.store.as_deref())?;

    match cli.cmd {
        Command::Serve(args) => commands::serve::execute(config, args).await?,
        Command::Generate(args) => commands::generate::execute(config, args).await?,
        Command::Tools(args) => commands::tools::execute(config, args).await?,
    }

    Ok(())
}
