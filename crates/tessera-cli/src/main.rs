use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_clusterer::{Clusterer, TreeClusterer};
use tessera_core::{init_tracing, system_clock, ConfigManager, TesseraConfig};
use tessera_options::defaults::{register_defaults, MERGE_THRESHOLD};
use tessera_options::{
    JsonFileDatabase, MemoryCache, OptionFlags, OptionKey, OptionValue, OptionsManager,
    StaticConfig, TieredStore, UpdateChannel,
};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera CLI - runtime options and transaction name clustering", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file (defaults to ./.tessera.toml or ~/.tessera/config.toml)
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the options database
    #[arg(long, global = true, env = "TESSERA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and change runtime options
    #[command(subcommand)]
    Options(OptionsCommands),

    /// Infer replacement rules from transaction names, one per line
    Cluster {
        /// File with transaction names (stdin when omitted)
        file: Option<PathBuf>,

        /// Fan-out at which path segments collapse into a wildcard
        #[arg(short, long)]
        merge_threshold: Option<usize>,
    },
}

#[derive(Subcommand)]
enum OptionsCommands {
    /// List registered options
    List {
        /// Only options carrying this flag, e.g. "admin-modifiable"
        #[arg(short, long)]
        flag: Option<String>,
    },

    /// Show the current value of an option
    Get {
        /// Option name
        name: String,
    },

    /// Store a new value for an option
    Set {
        /// Option name
        name: String,

        /// New value; YAML syntax for sequences and dicts
        value: String,

        /// Update channel recorded with the change
        #[arg(short, long, default_value = "cli")]
        channel: UpdateChannel,

        /// Require the value to already have the option's type
        #[arg(long)]
        no_coerce: bool,
    },

    /// Remove the stored value of an option
    Delete {
        /// Option name
        name: String,
    },

    /// Check a static options file against the registry
    Validate {
        /// YAML, TOML or JSON file
        file: PathBuf,

        /// Report unknown options instead of failing
        #[arg(short, long)]
        warn: bool,
    },
}

#[derive(Serialize)]
struct OptionResult {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    flags: Vec<&'static str>,
    value: serde_json::Value,
}

#[derive(Serialize)]
struct ClusterResult {
    merge_threshold: usize,
    names: usize,
    rules: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            if let Err(e) = print_output(&cli.output, &output) {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<serde_json::Value> {
    let config_manager = match &cli.config {
        Some(path) => ConfigManager::from_path(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;

    let mut config = config_manager.config().clone();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    let manager = build_manager(&config, cli.data_dir.as_deref())?;

    match &cli.command {
        Commands::Options(cmd) => execute_options_command(cmd, &manager),
        Commands::Cluster {
            file,
            merge_threshold,
        } => execute_cluster_command(file.as_deref(), *merge_threshold, &config, &manager),
    }
}

fn build_manager(config: &TesseraConfig, data_dir: Option<&Path>) -> Result<OptionsManager> {
    let static_config = match &config.options.static_config_path {
        Some(path) => StaticConfig::load(path)
            .with_context(|| format!("Failed to load static options from {}", path.display()))?,
        None => StaticConfig::new(),
    };

    let database_path = match (data_dir, &config.options.database_path) {
        (Some(dir), _) => dir.join("options.json"),
        (None, Some(path)) => path.clone(),
        (None, None) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tessera")
            .join("options.json"),
    };
    debug!("Using options database {}", database_path.display());

    let clock = system_clock();
    let database = JsonFileDatabase::open(&database_path).context("Failed to open options database")?;
    let store = TieredStore::new(
        Some(Arc::new(MemoryCache::new(clock.clone()))),
        Arc::new(database),
        clock,
    );

    let manager = OptionsManager::with_config(Arc::new(store), Arc::new(static_config), &config.options);
    register_defaults(&manager).context("Failed to register built-in options")?;
    Ok(manager)
}

fn display_value(key: &OptionKey, value: &OptionValue) -> Result<serde_json::Value> {
    if key.has_flag(OptionFlags::CREDENTIAL) && !value.is_empty() {
        return Ok(serde_json::Value::String("********".to_string()));
    }
    Ok(serde_json::to_value(value)?)
}

fn execute_options_command(
    cmd: &OptionsCommands,
    manager: &OptionsManager,
) -> Result<serde_json::Value> {
    match cmd {
        OptionsCommands::List { flag } => {
            let flag = match flag {
                Some(name) => match OptionFlags::from_name(name) {
                    Some(flag) => Some(flag),
                    None => bail!("Unknown flag: {}", name),
                },
                None => None,
            };

            for name in manager.unconfigured_required() {
                warn!("Required option {} is not configured", name);
            }

            let mut results = Vec::new();
            for key in manager.filter(flag) {
                let value = manager.get_with(&key.name, true)?;
                results.push(OptionResult {
                    name: key.name.clone(),
                    ty: key.ty.to_string(),
                    flags: key.flags.names(),
                    value: display_value(&key, &value)?,
                });
            }
            Ok(serde_json::to_value(results)?)
        }

        OptionsCommands::Get { name } => {
            let key = manager.lookup_key(name)?;
            let value = manager.get(name)?;

            Ok(serde_json::json!({
                "name": name,
                "value": display_value(&key, &value)?,
                "isset": manager.isset(name)?,
                "last_update_channel": manager.get_last_update_channel(name)?.map(|c| c.to_string()),
            }))
        }

        OptionsCommands::Set {
            name,
            value,
            channel,
            no_coerce,
        } => {
            let parsed = if *no_coerce {
                serde_yaml::from_str::<OptionValue>(value)
                    .with_context(|| format!("Invalid value: {}", value))?
            } else {
                OptionValue::String(value.clone())
            };

            manager
                .set_with(name, parsed, !no_coerce, *channel)
                .with_context(|| format!("Failed to set {}", name))?;

            let key = manager.lookup_key(name)?;
            Ok(serde_json::json!({
                "name": name,
                "value": display_value(&key, &manager.get(name)?)?,
                "channel": channel.to_string(),
            }))
        }

        OptionsCommands::Delete { name } => {
            manager
                .delete(name)
                .with_context(|| format!("Failed to delete {}", name))?;

            Ok(serde_json::json!({
                "name": name,
                "deleted": true,
            }))
        }

        OptionsCommands::Validate { file, warn } => {
            let static_config = StaticConfig::load(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let values = static_config.values();
            manager.validate(&values, *warn)?;

            Ok(serde_json::json!({
                "file": file.display().to_string(),
                "options": values.len(),
                "valid": true,
            }))
        }
    }
}

fn execute_cluster_command(
    file: Option<&Path>,
    merge_threshold: Option<usize>,
    config: &TesseraConfig,
    manager: &OptionsManager,
) -> Result<serde_json::Value> {
    let names = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>(),
        None => io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read transaction names from stdin")?,
    };

    // An explicitly stored option beats the config file
    let merge_threshold = match merge_threshold {
        Some(threshold) => threshold,
        None if manager.isset(MERGE_THRESHOLD)? => manager
            .get(MERGE_THRESHOLD)?
            .as_i64()
            .and_then(|threshold| usize::try_from(threshold).ok())
            .unwrap_or(config.clusterer.merge_threshold),
        None => config.clusterer.merge_threshold,
    };

    let mut clusterer = TreeClusterer::new(merge_threshold);
    clusterer.add_input(&names);

    let result = ClusterResult {
        merge_threshold: clusterer.merge_threshold(),
        names: names.len(),
        rules: clusterer
            .get_rules()
            .iter()
            .map(|rule| rule.to_string())
            .collect(),
    };
    Ok(serde_json::to_value(result)?)
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Pretty => print_pretty(value, 0),
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                match val {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{}{}:", pad, key.cyan().bold());
                        print_pretty(val, indent + 1);
                    }
                    _ => println!("{}{}: {}", pad, key.cyan().bold(), format_scalar(val)),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                match item {
                    serde_json::Value::Object(map) if map.contains_key("name") => {
                        let name = map.get("name").and_then(|n| n.as_str()).unwrap_or_default();
                        let value = map.get("value").map(format_scalar).unwrap_or_default();
                        let ty = map.get("type").and_then(|t| t.as_str()).unwrap_or_default();
                        println!("{}{} = {} {}", pad, name.cyan().bold(), value, format!("({})", ty).dimmed());
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        print_pretty(item, indent + 1)
                    }
                    _ => println!("{}- {}", pad, format_scalar(item)),
                }
            }
        }
        _ => println!("{}{}", pad, format_scalar(value)),
    }
}

fn format_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.green().to_string(),
        serde_json::Value::Number(n) => n.to_string().yellow().to_string(),
        serde_json::Value::Bool(true) => "true".green().to_string(),
        serde_json::Value::Bool(false) => "false".red().to_string(),
        serde_json::Value::Null => "null".dimmed().to_string(),
        other => other.to_string(),
    }
}
