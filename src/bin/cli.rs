//! CaskKV CLI
//!
//! Command-line interface operating directly on a local data directory.

use std::process;

use caskkv::config::mib_to_bytes;
use caskkv::{CaskError, Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// CaskKV CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv-cli")]
#[command(about = "CLI for the CaskKV key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./caskkv_data")]
    data_dir: String,

    /// Maximum data file size in MB before rotation
    #[arg(short = 'm', long, default_value = "2048")]
    max_file_mb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Put a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List every live key
    Keys,

    /// Merge sealed data files
    Compact,

    /// Show directory statistics
    Stats,
}

fn main() {
    // Logs go to stderr; stdout carries command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let max_file_size = match mib_to_bytes(args.max_file_mb) {
        Ok(size) => size,
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    };
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .max_file_size(max_file_size)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", args.data_dir, e);
            process::exit(1);
        }
    };

    let result = run(&engine, args.command).and_then(|_| engine.close());
    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> Result<(), CaskError> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.remove(key.as_bytes())?;
            println!("OK");
        }
        Commands::Keys => {
            let mut keys = engine.list_keys();
            keys.sort();
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Commands::Compact => {
            let stats = engine.compact()?;
            println!(
                "compacted {} files into {} ({} -> {} bytes, {} keys moved)",
                stats.files_compacted,
                stats.files_written,
                stats.bytes_before,
                stats.bytes_after,
                stats.keys_repointed
            );
        }
        Commands::Stats => {
            let recovery = engine.recovery_stats();
            println!("caskkv {}", caskkv::VERSION);
            println!("keys:            {}", engine.key_count());
            println!("data files:      {}", engine.file_count());
            println!("disk bytes:      {}", engine.disk_size());
            println!("hint files used: {}", recovery.hint_files_used);
            println!("files scanned:   {}", recovery.data_files_scanned);
            println!("corrupt hints:   {}", recovery.corrupt_hint_files);
            println!("truncated files: {}", recovery.truncated_files);
        }
    }
    Ok(())
}
