use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use microsearch::{Config, FeatureStoreWriter, SearchService, StoreLayout};

/// microsearch - visual similarity search over precomputed image features
#[derive(Parser, Debug)]
#[command(name = "microsearch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "MICROSEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding feature containers
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Feature container file name inside the data directory
    #[arg(long, global = true)]
    pub feature_file: Option<String>,

    /// Read items from the `perplexity-N` group of a multi-embedding container
    #[arg(long, global = true)]
    pub perplexity: Option<u32>,

    /// Number of principal components to keep
    #[arg(long, global = true)]
    pub components: Option<usize>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Build the index and serve the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Build the index and print the items most similar to one item
    Query {
        id: i64,
        /// Number of results
        #[arg(short, long)]
        n: Option<usize>,
    },
    /// Build the index and query it interactively
    Repl,
    /// Print the shape of the configured feature container
    Info,
    /// Convert a JSON export or an HDF5 file into a feature container
    Pack {
        input: PathBuf,
        output: PathBuf,
    },
}

impl Cli {
    /// Merges defaults, config file, environment and command-line flags.
    pub fn resolve_config(&self) -> microsearch::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(file) = &self.feature_file {
            config.feature_file = file.clone();
        }
        if self.perplexity.is_some() {
            config = config.with_perplexity(self.perplexity);
        }
        if let Some(k) = self.components {
            config.n_components = k;
        }
        if let CliCommand::Serve { host, port } = &self.command {
            if let Some(host) = host {
                config.host = host.clone();
            }
            if let Some(port) = port {
                config.port = *port;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

/// Converts `input` into a container at `output` and returns the item count.
///
/// `input` is either a JSON object `{"<id>": [v1, v2, ...], ...}` (`.json`)
/// or any readable container, HDF5 included. An `.h5`/`.hdf5` output is
/// written as HDF5, anything else as a native container.
pub fn pack(input: &Path, output: &Path, layout: StoreLayout) -> anyhow::Result<usize> {
    let mut writer = FeatureStoreWriter::new(layout);

    if has_extension(input, &["json"]) {
        let text = std::fs::read_to_string(input)?;
        let records: std::collections::BTreeMap<String, Vec<f32>> = serde_json::from_str(&text)?;
        for (key, values) in records {
            let id: i64 = key
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("key '{}' is not an integer id", key))?;
            writer.insert(id, values);
        }
    } else {
        let collection = microsearch::store::load(input, layout)?;
        for (i, &id) in collection.ids().iter().enumerate() {
            writer.insert(id, collection.row(i).to_vec());
        }
    }

    if has_extension(output, &["h5", "hdf5"]) {
        save_hdf5(&writer, output)?;
    } else {
        writer.save(output)?;
    }

    Ok(writer.len())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

#[cfg(feature = "hdf5")]
fn save_hdf5(writer: &FeatureStoreWriter, output: &Path) -> anyhow::Result<()> {
    Ok(writer.save_hdf5(output)?)
}

#[cfg(not(feature = "hdf5"))]
fn save_hdf5(_writer: &FeatureStoreWriter, output: &Path) -> anyhow::Result<()> {
    anyhow::bail!("cannot write '{}': built without the `hdf5` feature", output.display())
}

pub enum Command {
    Query { id: i64, n: usize },
    Count,
    Ids,
    Info,
    Rebuild,
}

/// Parse a REPL command from a provided argument vector
/// args[0] is the program name, args[1] the command
pub fn parse_command_from_args(args: &[String], default_n: usize) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command provided. Use: query, count, ids, info, rebuild".to_string());
    }

    let command = &args[1];

    match command.as_str() {
        "query" => parse_query(args, default_n),
        "count" => Ok(Command::Count),
        "ids" => Ok(Command::Ids),
        "info" => Ok(Command::Info),
        "rebuild" => Ok(Command::Rebuild),
        _ => Err(format!("Unknown command: {}. Available: query, count, ids, info, rebuild", command)),
    }
}

/// Parse the 'query' command
/// Usage: query <id> [--n <number>]
fn parse_query(args: &[String], default_n: usize) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("'query' command requires an item id. Usage: query <id> [--n <number>]".to_string());
    }

    let id = args[2]
        .parse::<i64>()
        .map_err(|_| format!("Invalid item id: '{}'. Must be an integer.", args[2]))?;

    let mut n = default_n;
    if args.len() >= 5 && args[3] == "--n" {
        n = args[4]
            .parse::<usize>()
            .map_err(|_| format!("Invalid --n value: '{}'. Must be a positive integer.", args[4]))?;
    } else if args.len() > 3 {
        return Err("Usage: query <id> [--n <number>]".to_string());
    }

    Ok(Command::Query { id, n })
}

/// REPL mode - interactive session over the active index
pub fn run_repl(service: &SearchService, config: &Config) {
    println!("microsearch - visual similarity search");
    println!("Type 'help' for commands, 'exit' or 'quit' to quit\n");

    loop {
        print!("microsearch> ");
        if let Err(error) = io::stdout().flush() {
            eprintln!("Error flushing output: {}", error);
        }

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                continue;
            }
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input == "exit" || input == "quit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_help();
            continue;
        }

        let mut args: Vec<String> = vec!["microsearch".to_string()];
        args.extend(input.split_whitespace().map(|s| s.to_string()));

        let command = match parse_command_from_args(&args, config.default_results) {
            Ok(cmd) => cmd,
            Err(error) => {
                eprintln!("Error: {}", error);
                continue;
            }
        };

        execute_command(service, config, command);
    }
}

pub fn execute_command(service: &SearchService, config: &Config, command: Command) {
    match command {
        Command::Query { id, n } => print_query(service, id, n),

        Command::Count => match service.snapshot() {
            Ok(snapshot) => println!("{}", snapshot.index.len()),
            Err(error) => eprintln!("Error: {}", error),
        },

        Command::Ids => match service.snapshot() {
            Ok(snapshot) => {
                let ids: Vec<String> = snapshot.index.ids().iter().map(|id| id.to_string()).collect();
                println!("{}", ids.join(" "));
            }
            Err(error) => eprintln!("Error: {}", error),
        },

        Command::Info => match service.snapshot() {
            Ok(snapshot) => {
                let projection = snapshot.index.projection();
                let retained: f32 = projection.explained_variance_ratio().iter().sum();
                println!("Index version {}", snapshot.version);
                println!("  items:      {}", snapshot.index.len());
                println!("  raw dims:   {}", projection.input_dimension());
                println!("  components: {}", projection.output_dimension());
                println!("  variance:   {:.2}%", retained * 100.0);
            }
            Err(error) => eprintln!("Error: {}", error),
        },

        Command::Rebuild => match service.rebuild(&config.build_spec()) {
            Ok(version) => println!("Index rebuilt (version {})", version),
            Err(error) => eprintln!("Error: {}", error),
        },
    }
}

pub fn print_query(service: &SearchService, id: i64, n: usize) {
    match service.query(id, n) {
        Ok(results) => {
            if results.is_empty() {
                println!("No results found");
            } else {
                println!("Top {} results for item {}:", results.len(), id);
                for (rank, hit) in results.iter().enumerate() {
                    println!("{}. ID: {}, Score: {}", rank + 1, hit.id, hit.score);
                }
            }
        }
        Err(error) => eprintln!("Error: {}", error),
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  query <id> [--n N]  - Items most similar to <id> (default N from config)");
    println!("  count               - Number of indexed items");
    println!("  ids                 - List indexed item ids");
    println!("  info                - Index version and projection summary");
    println!("  rebuild             - Rebuild the index from the feature container");
    println!("  help                - Show this help");
    println!("  exit, quit          - Exit the program");
}
