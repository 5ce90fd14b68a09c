//! `quarry generate` - build a server's tools from sample rows.
//!
//! The source file is a YAML connection block (`type`, `host`, `database`,
//! ...). The samples file is a JSON object mapping table names to arrays of
//! row objects:
//!
//! ```json
//! { "people": [ { "id": 1, "name": "Ada" } ] }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use quarry_core::{IdentifierQuoting, QuarryConfig, SourceConfig};
use quarry_mcp::{GenerateRequest, TableSample, ToolDefinitionGenerator};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum QuotingArg {
    /// `[name]` for every dialect.
    #[default]
    Bracket,
    /// Each dialect's own quoting.
    Native,
}

impl From<QuotingArg> for IdentifierQuoting {
    fn from(arg: QuotingArg) -> Self {
        match arg {
            QuotingArg::Bracket => IdentifierQuoting::Bracket,
            QuotingArg::Native => IdentifierQuoting::Native,
        }
    }
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Server name.
    #[arg(long)]
    pub server: String,

    /// Owning workspace; prefixes the server id.
    #[arg(long, default_value = "")]
    pub owner: String,

    /// YAML connection settings for the server's database.
    #[arg(long)]
    pub source: PathBuf,

    /// JSON sample rows keyed by table name.
    #[arg(long)]
    pub samples: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    pub quoting: QuotingArg,

    /// Skip min/max/sum/avg tools.
    #[arg(long)]
    pub no_aggregates: bool,
}

fn read_source(path: &Path) -> Result<SourceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse source file: {}", path.display()))
}

fn read_samples(path: &Path) -> Result<Vec<TableSample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    let tables: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse samples file: {}", path.display()))?;

    tables
        .into_iter()
        .map(|(table, rows)| {
            let Value::Array(rows) = rows else {
                bail!("Samples for table '{table}' must be an array of rows");
            };
            let rows = rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(row) => Ok(row),
                    _ => bail!("Every sample row for table '{table}' must be an object"),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(TableSample::new(table, rows))
        })
        .collect()
}

pub async fn execute(config: QuarryConfig, args: GenerateArgs) -> Result<()> {
    let source = read_source(&args.source)?;
    let mut tables = read_samples(&args.samples)?;
    if args.no_aggregates {
        for table in &mut tables {
            table.toggles.aggregates = false;
        }
    }

    let store = super::open_store(&config)?;
    let generator = ToolDefinitionGenerator::new(store).with_quoting(args.quoting.into());
    let outcome = generator
        .generate_server(GenerateRequest {
            name: args.server,
            owner_workspace: args.owner,
            source,
            tables,
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        bail!(outcome.message);
    }
    Ok(())
}
