mod progress;
mod table;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use partdump_core::{CancelToken, DumperConfig, PartitionDumper};
use tracing::{error, info, warn};

use progress::ProgressObserver;
use table::format_partition_table;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump raw partitions from a bootloader-mode USB device",
    long_about = None,
    after_help = "Examples:\n  partdump recovery recovery.img\n  partdump boot boot.img\n  partdump --list"
)]
struct Args {
    /// Partition name to dump
    partition: Option<String>,

    /// Output file path
    output: Option<PathBuf>,

    /// List all available partitions
    #[arg(short, long)]
    list: bool,

    /// Load settings from a TOML file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Give up if no device shows up within this many seconds
    #[arg(short, long, value_name = "SECS")]
    wait: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

enum Action {
    List,
    Dump { partition: String, output: PathBuf },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let action = match (args.list, args.partition.clone(), args.output.clone()) {
        (true, _, _) => Action::List,
        (false, Some(partition), Some(output)) => Action::Dump { partition, output },
        _ => {
            let _ = Args::command().print_help();
            std::process::exit(1);
        }
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    if let Err(e) = run(&args, action, cancel.clone()) {
        if cancel.is_cancelled() {
            eprintln!("\nOperation cancelled");
        } else {
            error!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn run(args: &Args, action: Action, cancel: CancelToken) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DumperConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => DumperConfig::default(),
    };
    if let Some(secs) = args.wait {
        config.device_timeout_secs = Some(secs);
    }

    info!("Starting partdump (nusb backend)...");

    let observer = Arc::new(ProgressObserver::new());
    let mut dumper = PartitionDumper::connect(&config, observer, cancel)
        .context("Could not find bootloader device")?;

    match action {
        Action::List => {
            let catalog = dumper
                .list_partitions()
                .context("Failed to get partition list")?;
            print!("{}", format_partition_table(&catalog));
        }
        Action::Dump { partition, output } => {
            let report = dumper
                .dump_partition(&partition, &output)
                .with_context(|| {
                    format!("Failed to dump '{}' to '{}'", partition, output.display())
                })?;
            println!(
                "Success: {} dumped ({} bytes)",
                report.partition, report.bytes_written
            );
        }
    }

    Ok(())
}
