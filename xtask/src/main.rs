use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the unit tests (no hardware needed)
    Test,
    /// Run the partdump CLI, forwarding any extra arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"])?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::Run { args } => {
            println!("Running partdump...");
            let mut full = vec!["run", "-p", "partdump-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full)?;
        }
    }

    Ok(())
}
