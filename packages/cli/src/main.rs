use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use enclosure_cli::{load_config, run, Manifest};

/// Run sandboxed dependency code in enclosure VMs
#[derive(Parser, Debug)]
#[command(name = "enclosure")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a manifest and print the entry's result as JSON
    Run {
        /// Manifest file
        manifest: PathBuf,

        /// VM configuration file (JSON, durations in milliseconds)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the result on a single line
        #[arg(long)]
        compact: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            manifest,
            config,
            compact,
        } => {
            let outcome = async {
                let manifest = Manifest::load(&manifest)?;
                let config = load_config(config.as_deref())?;
                run(manifest, config).await
            }
            .await;

            match outcome {
                Ok(value) => {
                    let printed = if compact {
                        serde_json::to_string(&value)
                    } else {
                        serde_json::to_string_pretty(&value)
                    };
                    match printed {
                        Ok(text) => println!("{text}"),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            return ExitCode::FAILURE;
                        }
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
