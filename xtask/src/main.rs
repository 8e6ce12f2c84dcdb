use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;
use v2midi_core::FirmwareImage;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build {
        /// Include the native MIDI backend
        #[arg(long)]
        midir: bool,
    },
    /// Run all tests
    Test,
    /// Run the CLI with the native MIDI backend
    Run {
        /// Arguments passed to the CLI
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Print the metadata and hash of a firmware image
    CheckImage { file: PathBuf },
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
        Commands::Build { midir } => {
            println!("Building project...");
            if *midir {
                cargo(&["build", "--workspace", "--features", "v2midi-cli/midir"])?;
            } else {
                cargo(&["build", "--workspace"])?;
            }
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let mut cmd = vec!["run", "-p", "v2midi-cli", "--features", "midir", "--"];
            cmd.extend(args.iter().map(String::as_str));
            cargo(&cmd)?;
        }
        Commands::CheckImage { file } => {
            let image = FirmwareImage::load(file)
                .with_context(|| format!("Unable to load {}", file.display()))?;
            let metadata = image.metadata();
            println!("{} version {} ({} bytes)", metadata.id, metadata.version, image.len());
            if let Some(board) = &metadata.board {
                println!("board {}", board);
            }
            println!("SHA-1 {}", image.hash());
        }
    }

    Ok(())
}
