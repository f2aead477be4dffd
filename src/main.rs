/*!
 * pmkforge command-line interface
 *
 * Thin front end over the library:
 * - storage maintenance (ESSIDs, passwords, exports)
 * - capture analysis and stripping
 * - passthrough, database and batch attacks
 * - backend listing, self-test, benchmark and the delegate server
 */

mod cli;
mod handlers;

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use pmkforge::{Config, StopToken};

use cli::Args;
use handlers::Context;

const LOG_ENV: &str = "PMKFORGE_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("pmkforge=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(storage) = &args.storage {
        config.storage = storage.clone();
    }
    if let Some(threads) = args.threads {
        config.cpu_threads = threads;
    }
    config.delegates.extend(args.delegates.iter().copied());
    if args.no_gpu {
        config.gpu = false;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    let stop = StopToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n{}", "Stopping after the current batches...".yellow());
        handler_stop.stop();
    })
    .context("Failed to install Ctrl-C handler")?;

    let ctx = Context {
        config,
        stop,
        json: args.json,
    };
    handlers::run(args.command, &ctx)
}

fn main() {
    init_logging();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
