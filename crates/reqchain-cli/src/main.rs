mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::scaffold::ScaffoldType;

#[derive(Parser)]
#[command(
    name = "reqchain",
    version,
    about = "Execute chained HTTP/gRPC request documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every request in a chain document and record the responses in place
    Run {
        /// Path to the chain document
        chain: PathBuf,
        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        /// Flush the rewritten document every N records
        #[arg(long, default_value_t = 5)]
        flush_every: usize,
        /// Accept invalid TLS certificates
        #[arg(long, visible_alias = "ic")]
        insecure: bool,
        /// Also print the run summary as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Write a template chain document
    Scaffold {
        /// Kind of template
        #[arg(long = "type", value_enum, default_value_t = ScaffoldType::Mixed)]
        kind: ScaffoldType,
        /// Output file or directory (default: `./<type>_config.chain`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            chain,
            timeout_ms,
            flush_every,
            insecure,
            json,
        } => {
            let args = commands::run::RunArgs {
                timeout_ms,
                flush_every,
                insecure,
                json,
            };
            commands::run::execute(&chain, &args).await
        }
        Commands::Scaffold { kind, output } => {
            commands::scaffold::run(kind, output.as_deref())?;
            Ok(())
        }
    }
}
