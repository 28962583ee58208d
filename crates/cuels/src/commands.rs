mod check;

use anyhow::Result;
use clap::Subcommand;

use crate::args::Args;
use crate::exit::Exit;

pub trait Command {
    async fn execute(&self, args: &Args) -> Result<Exit>;
}

#[derive(Debug, Subcommand)]
pub enum CuelsCommand {
    /// Load CUE files the way the editor would and report their diagnostics
    Check(self::check::Check),
}

impl Command for CuelsCommand {
    async fn execute(&self, args: &Args) -> Result<Exit> {
        match self {
            CuelsCommand::Check(check) => check.execute(args).await,
        }
    }
}
