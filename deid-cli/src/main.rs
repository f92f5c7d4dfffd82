//! deid 命令行入口

use clap::Parser;
use deid_cli::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    deid_cli::run(cli)
}
