use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use crate::args::Args;
use crate::args::GlobalArgs;
use crate::commands::Command;
use crate::commands::CuelsCommand;
use crate::exit::Exit;

/// Language tooling for CUE.
#[derive(Parser)]
#[command(name = "cuels")]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CuelsCommand,

    #[command(flatten)]
    pub args: Args,
}

/// Parse CLI arguments and execute the chosen command.
pub async fn run(args: Vec<String>) -> Result<Exit> {
    let cli = Cli::try_parse_from(args).unwrap_or_else(|e| e.exit());
    init_tracing(&cli.args.global);
    cli.command.execute(&cli.args).await
}

/// Log to stderr: warnings by default, more with each `-v`, nothing with `-q`.
fn init_tracing(global: &GlobalArgs) {
    let level = if global.quiet {
        LevelFilter::OFF
    } else {
        match global.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();
}
