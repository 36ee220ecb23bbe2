//! rowfile CLI - inspect and edit JSON Lines tables

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use store::Registry;

mod commands;
mod logging;

use commands::{
  cmd_check, cmd_config_init, cmd_config_show, cmd_delete, cmd_get, cmd_insert, cmd_next_id, cmd_select, cmd_set,
  load_config,
};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "rowfile")]
#[command(about = "Inspect and edit JSON Lines tables")]
#[command(after_help = "\
QUICK START:
  rowfile insert Users '{\"name\":\"a\"}'   # Append a row, prints its id
  rowfile select Users                   # Print every row
  rowfile set Users 1 name b             # Change one field
  rowfile check Users                    # Look for corruption

Tables live in <data_dir>/<Table>.bson, one JSON object per line.")]
struct Cli {
  /// Storage root (overrides [store] data_dir)
  #[arg(long, global = true, value_name = "DIR")]
  data_dir: Option<PathBuf>,

  /// Config file to use instead of the project/user lookup
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `rowfile config`
#[derive(Subcommand)]
enum ConfigCommand {
  /// Show effective configuration
  Show,
  /// Create .rowfile.toml in the current directory
  Init,
}

#[derive(Subcommand)]
enum Commands {
  /// Print every row of a table
  Select {
    table: String,
    /// Pretty-print rows
    #[arg(long)]
    pretty: bool,
  },
  /// Print one row by id
  Get {
    table: String,
    id: i64,
    /// Pretty-print the row
    #[arg(long)]
    pretty: bool,
  },
  /// Append a JSON object with the next free id
  Insert {
    table: String,
    /// Row data as a JSON object
    data: String,
  },
  /// Set one field of a row
  Set {
    table: String,
    id: i64,
    field: String,
    /// JSON value, or plain text stored as a string
    value: String,
  },
  /// Delete a row by id
  Delete { table: String, id: i64 },
  /// Print the id the next insert would get
  NextId { table: String },
  /// Scan a table for malformed lines, duplicate ids and leftover temp files
  Check {
    table: String,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATIONS:
  Project: .rowfile.toml
  User:    ~/.config/rowfile/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let config = load_config(cli.config.as_deref(), cli.data_dir.clone())?;
  init_cli_logging(&config.log.level);

  if let Commands::Config { command } = &cli.command {
    return match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()).await,
      ConfigCommand::Init => cmd_config_init().await,
    };
  }

  let registry = Registry::new(config.store);
  let result = match cli.command {
    Commands::Select { table, pretty } => cmd_select(&registry, &table, pretty).await,
    Commands::Get { table, id, pretty } => cmd_get(&registry, &table, id, pretty).await,
    Commands::Insert { table, data } => cmd_insert(&registry, &table, &data).await,
    Commands::Set {
      table,
      id,
      field,
      value,
    } => cmd_set(&registry, &table, id, &field, &value).await,
    Commands::Delete { table, id } => cmd_delete(&registry, &table, id).await,
    Commands::NextId { table } => cmd_next_id(&registry, &table).await,
    Commands::Check { table, json } => cmd_check(&registry, &table, json).await,
    Commands::Config { .. } => Ok(()),
  };

  registry.idle().await;
  result
}
