use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cache;
mod cli;
mod contract;
mod error;
mod integrity;
mod location;
mod process;
mod profile;
mod repository;
mod signing;
mod template;
mod util;
mod workflow;

use cli::{Command, RootArgs};

const LOG_ENV: &str = "THEMIS_LOG";

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    let global = args.global;
    match args.command {
        Command::ParseLocation(args) => workflow::run_parse_location(args),
        Command::Hash(args) => workflow::run_hash(args),
        Command::Fetch(args) => workflow::run_fetch(&global, args),
        Command::Vars(args) => workflow::run_vars(&global, args),
        Command::New(args) => workflow::run_new(&global, args),
        Command::Check(args) => workflow::run_check(&global, args),
        Command::Sign(args) => workflow::run_sign(&global, args),
        Command::Verify(args) => workflow::run_verify(&global, args),
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
