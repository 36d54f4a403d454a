use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use tobsdb::schema::{compile_schema, parse_schema};
use tobsdb::{handle_message, Store, StoreConfig};

/// TobsDB CLI: check schemas and run requests against a snapshot file
#[derive(Parser)]
#[command(name = "tobsdb", version, about)]
struct Cli {
    /// Snapshot file holding every database
    #[arg(long, env = "TOBSDB_DATA_PATH", default_value = "db.tdb.json")]
    data: PathBuf,

    /// Keep everything in memory; nothing is read or written
    #[arg(long)]
    in_memory: bool,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Disable logging
    #[arg(long, conflicts_with = "debug")]
    quiet: bool,

    /// Log every request
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Check a schema file
    Validate {
        /// Schema file (YAML or JSON)
        schema: PathBuf,
    },

    /// Run requests against a database and flush the snapshot afterwards
    Exec {
        /// Schema file declaring the session's tables
        #[arg(long)]
        schema: PathBuf,
        /// Database name
        #[arg(long)]
        db: String,
        /// JSON requests; read one per line from stdin when none are given
        requests: Vec<String>,
    },

    /// Print the stored rows of a database
    Dump {
        /// Database name
        #[arg(long)]
        db: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Off);
    } else if cli.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = if cli.in_memory {
        StoreConfig::in_memory()
    } else {
        StoreConfig::with_snapshot(&cli.data)
    };

    match cli.command {
        Command::Validate { schema } => {
            let checked = parse_schema(&schema).and_then(|definition| compile_schema(&definition));
            match checked {
                Ok(_) => println!("Schema checks successful: Schema is valid"),
                Err(e) => {
                    println!("Invalid schema; {e}");
                    process::exit(1);
                }
            }
        }

        Command::Exec {
            schema,
            db,
            requests,
        } => {
            let definition = parse_schema(&schema)?;
            let store = Store::open(config)?;
            let session = store.session(&db, &definition)?;

            let requests = if requests.is_empty() {
                read_stdin_lines()?
            } else {
                requests
            };
            for request in &requests {
                let response = handle_message(&session, request);
                if !response.is_success() {
                    log::error!("{} {}", response.status, response.message);
                }
                print_output(&response, &cli.format)?;
            }

            store.flush()?;
        }

        Command::Dump { db } => {
            let store = Store::open(config)?;
            let snapshot = store.snapshot();
            let dataset = snapshot
                .get(&db)
                .ok_or_else(|| format!("Database {db} not found"))?;
            print_output(dataset, &cli.format)?;
        }
    }

    Ok(())
}

fn read_stdin_lines() -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut lines = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn print_output<T: Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            println!("---");
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
