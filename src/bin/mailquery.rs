//! mailquery CLI binary.

use std::io::Write;
use std::process;

use anyhow::Context;
use clap::Parser;
use mailquery::cli::{args::*, commands::*};

fn main() {
    // Parse command line arguments using clap
    let args = MailQueryArgs::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(args: MailQueryArgs) -> anyhow::Result<()> {
    let name = match &args.command {
        Command::Plan(_) => "plan",
        Command::Search(_) => "search",
    };
    execute_command(args).with_context(|| format!("{name} failed"))
}
