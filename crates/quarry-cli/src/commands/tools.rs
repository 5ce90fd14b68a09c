//! `quarry tools` - list stored tools by qualified name.

use anyhow::{Context, Result};
use clap::Args;
use quarry_core::{DataStore, QuarryConfig, ServerConfig, ToolDefinition, qualify};

#[derive(Debug, Args)]
pub struct ToolsArgs {
    /// Only this server id.
    #[arg(long)]
    pub server: Option<String>,

    /// Show descriptions and input schemas.
    #[arg(short, long)]
    pub verbose: bool,
}

fn render(server: &ServerConfig, tools: &[ToolDefinition], verbose: bool) -> Result<String> {
    let mut out = format!(
        "{} ({}, {} tools)\n",
        server.id,
        server.source_config.db_type,
        tools.len()
    );
    for tool in tools {
        out.push_str(&format!(
            "  {:<8} {}\n",
            tool.operation.as_str(),
            qualify(&server.id, &tool.name)
        ));
        if verbose {
            out.push_str(&format!("           {}\n", tool.description));
            for line in serde_json::to_string_pretty(&tool.input_schema)?.lines() {
                out.push_str(&format!("           {line}\n"));
            }
        }
    }
    Ok(out)
}

pub async fn execute(config: QuarryConfig, args: ToolsArgs) -> Result<()> {
    let store = super::open_store(&config)?;
    let servers = store.get_all_servers().await.context("Failed to list servers")?;

    let mut shown = 0;
    for server in servers
        .iter()
        .filter(|s| args.server.as_deref().is_none_or(|id| id == s.id))
    {
        let tools = store
            .get_tools_for_server(&server.id)
            .await
            .with_context(|| format!("Failed to list tools for {}", server.id))?;
        print!("{}", render(server, &tools, args.verbose)?);
        shown += 1;
    }

    if shown == 0 {
        println!("No servers found in {}", config.store.path.display());
    }
    Ok(())
}
