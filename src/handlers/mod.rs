/*!
 * Command handlers
 *
 * One module per domain; each handler opens what it needs from the
 * shared `Context`, calls into the library and prints the outcome.
 */

mod attack;
mod capture;
mod cores;
mod storage;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use pmkforge::backend;
use pmkforge::dispatch::{Dispatcher, StopToken};
use pmkforge::source::{self, NumericRange, PasswordSource};
use pmkforge::{Config, Essid, StorageEngine};

use crate::cli::Command;

pub struct Context {
    pub config: Config,
    pub stop: StopToken,
    pub json: bool,
}

impl Context {
    pub fn storage(&self) -> Result<StorageEngine> {
        let storage = StorageEngine::open(&self.config.storage)
            .with_context(|| format!("Failed to open storage at {}", self.config.storage.display()))?;
        Ok(storage.with_import_chunk(self.config.import_chunk))
    }

    /// Detect, self-test and benchmark the configured backends.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        let backends = backend::detect(&self.config).context("Failed to initialize backends")?;
        let dispatcher = Dispatcher::probe(backends, self.config.dispatch.clone())
            .context("No usable compute backend")?;
        if !self.json {
            println!(
                "🧵 {} core(s) ready, {:.0} PMKs/s combined",
                dispatcher.live_count(),
                dispatcher.capability()
            );
        }
        Ok(dispatcher)
    }

    /// Print `value` as JSON when requested; otherwise run `text`.
    pub fn report<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

pub fn run(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::CreateEssid { essid } => storage::create_essid(ctx, &essid),
        Command::DeleteEssid { essid, yes } => storage::delete_essid(ctx, &essid, yes),
        Command::ListEssids => storage::list_essids(ctx),
        Command::ImportPasswords { file } => storage::import_passwords(ctx, &file),
        Command::ExportPasswords { file } => storage::export_passwords(ctx, &file),
        Command::ExportCowpatty { essid, file } => storage::export_cowpatty(ctx, &essid, &file),
        Command::ExportHashdb { essid, file } => storage::export_hashdb(ctx, essid.as_deref(), &file),
        Command::Analyze { capture } => capture::analyze(ctx, &capture),
        Command::Strip { capture, output } => capture::strip(ctx, &capture, &output),
        Command::AttackPassthrough { target, source } => attack::passthrough(ctx, &target, &source),
        Command::AttackDb { target } => attack::database(ctx, &target),
        Command::AttackBatch { target, source } => attack::batch_attack(ctx, &target, &source),
        Command::Batch { essid, source } => attack::batch(ctx, essid.as_deref(), &source),
        Command::Verify { essid, all } => attack::verify(ctx, &essid, all),
        Command::Eval { essid } => attack::eval(ctx, essid.as_deref()),
        Command::ListCores => cores::list(ctx),
        Command::Selftest => cores::selftest(ctx),
        Command::Benchmark { seconds } => cores::benchmark(ctx, seconds),
        Command::Serve { listen } => cores::serve(ctx, listen),
    }
}

pub fn parse_essid(s: &str) -> Result<Essid> {
    s.parse::<Essid>().with_context(|| format!("Invalid ESSID '{}'", s))
}

/// Parse `MIN-MAX` (or a single length) for the numeric generator.
pub fn parse_numeric(range: &str) -> Result<(usize, usize)> {
    let (min, max) = match range.split_once('-') {
        Some((min, max)) => (min.trim(), max.trim()),
        None => (range.trim(), range.trim()),
    };
    let min: usize = min.parse().with_context(|| format!("Invalid length '{}'", min))?;
    let max: usize = max.parse().with_context(|| format!("Invalid length '{}'", max))?;
    if min > max {
        bail!("Numeric range {}-{} is empty", min, max);
    }
    Ok((min, max))
}

/// A candidate source plus its size when known up front.
pub fn open_source(wordlist: Option<&Path>, numeric: Option<&str>) -> Result<Option<(PasswordSource, Option<u64>)>> {
    if let Some(path) = wordlist {
        let source = source::wordlist(path)
            .with_context(|| format!("Failed to open wordlist: {}", path.display()))?;
        return Ok(Some((source, None)));
    }
    if let Some(range) = numeric {
        let (min, max) = parse_numeric(range)?;
        let source = source::numeric(min, max)?;
        return Ok(Some((source, Some(NumericRange::total_combinations(min, max)))));
    }
    Ok(None)
}

fn progress_bar(len: Option<u64>) -> ProgressBar {
    match len {
        Some(len) => {
            let pb = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {eta} {msg}")
            {
                pb.set_style(style.progress_chars("█▓▒░-"));
            }
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} ({per_sec}) {msg}")
            {
                pb.set_style(style);
            }
            pb
        }
    }
}

/// Run `work` while a progress bar follows `counter`.
pub fn with_progress<R>(
    ctx: &Context,
    len: Option<u64>,
    counter: &(dyn Fn() -> u64 + Sync),
    work: impl FnOnce() -> R,
) -> R {
    if ctx.json {
        return work();
    }
    let pb = progress_bar(len);
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                pb.set_position(counter());
                std::thread::sleep(Duration::from_millis(200));
            }
        });
        let result = work();
        done.store(true, Ordering::Release);
        pb.set_position(counter());
        if ctx.stop.is_stopped() {
            pb.abandon_with_message("Interrupted".yellow().to_string());
        } else {
            pb.finish_with_message("Done");
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("8-10").unwrap(), (8, 10));
        assert_eq!(parse_numeric("8").unwrap(), (8, 8));
        assert!(parse_numeric("10-8").is_err());
        assert!(parse_numeric("eight").is_err());
    }
}
