//! Saverforge CLI - Command-line interface
//!
//! Provides command-line access to Saverforge functionality.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "saverforge")]
#[command(about = "Package a video as a macOS screen-saver bundle")]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    commands::handle_command(cli.command).await?;

    Ok(())
}
