/*!
 * Runtime configuration
 *
 * Loaded from an optional JSON file, then overridden by environment
 * variables (`PMKFORGE_STORAGE`, `PMKFORGE_THREADS`, `PMKFORGE_DELEGATES`)
 * and finally by command-line flags. Every field has a default so an
 * empty file (or no file at all) is a valid configuration.
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_STORAGE: &str = "PMKFORGE_STORAGE";
pub const ENV_THREADS: &str = "PMKFORGE_THREADS";
pub const ENV_DELEGATES: &str = "PMKFORGE_DELEGATES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the storage engine
    pub storage: PathBuf,

    /// CPU worker threads; 0 means one per logical core
    pub cpu_threads: usize,

    /// Probe for a GPU adapter (only with the `gpu` feature)
    pub gpu: bool,

    /// Remote delegate workers
    pub delegates: Vec<SocketAddr>,

    /// Connect timeout for delegates, in milliseconds
    pub delegate_connect_timeout_ms: u64,

    /// Read/write timeout for one delegate batch, in milliseconds
    pub delegate_io_timeout_ms: u64,

    pub dispatch: DispatchConfig,

    /// Passwords buffered per import chunk
    pub import_chunk: usize,

    /// Passwords per work unit in passthrough mode
    pub passthrough_unit: usize,

    /// Fraction of stored PMKs recomputed by a sampled verify
    pub verify_sample_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("pmkforge-db"),
            cpu_threads: 0,
            gpu: true,
            delegates: Vec::new(),
            delegate_connect_timeout_ms: 3_000,
            delegate_io_timeout_ms: 120_000,
            dispatch: DispatchConfig::default(),
            import_chunk: 100_000,
            passthrough_unit: 20_000,
            verify_sample_ratio: 0.1,
        }
    }
}

/// Tuning knobs of the core dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Wall-clock time one batch should take on its backend
    pub target_batch_secs: f64,
    pub min_batch: usize,
    pub max_batch: usize,
    /// Batches kept in flight per backend
    pub queue_depth: usize,
    /// Consecutive failures before a backend is retired
    pub max_failures: u32,
    /// Length of each backend benchmark during probing, in milliseconds
    pub benchmark_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            target_batch_secs: 3.0,
            min_batch: 64,
            max_batch: 100_000,
            queue_depth: 2,
            max_failures: 3,
            benchmark_ms: 1_000,
        }
    }
}

impl DispatchConfig {
    pub fn benchmark_duration(&self) -> Duration {
        Duration::from_millis(self.benchmark_ms)
    }

    /// Batch size for a backend of the given capability (PMKs/second).
    pub fn batch_size(&self, capability: f64) -> usize {
        let ideal = (capability * self.target_batch_secs).round();
        let ideal = if ideal.is_finite() && ideal > 0.0 {
            ideal as usize
        } else {
            self.min_batch
        };
        ideal.clamp(self.min_batch.max(1), self.max_batch.max(self.min_batch.max(1)))
    }
}

impl Config {
    /// Load configuration from a JSON file and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
                serde_json::from_str(&json)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = PathBuf::from(storage);
        }
        if let Some(threads) = lookup(ENV_THREADS) {
            self.cpu_threads = threads
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", ENV_THREADS, threads)))?;
        }
        if let Some(delegates) = lookup(ENV_DELEGATES) {
            self.delegates = delegates
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .map_err(|_| Error::Config(format!("invalid delegate address '{}'", s)))
                })
                .collect::<Result<_>>()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.dispatch;
        if d.queue_depth == 0 {
            return Err(Error::Config("dispatch.queue_depth must be at least 1".into()));
        }
        if d.max_failures == 0 {
            return Err(Error::Config("dispatch.max_failures must be at least 1".into()));
        }
        if d.min_batch == 0 || d.min_batch > d.max_batch {
            return Err(Error::Config(
                "dispatch.min_batch must be positive and not exceed max_batch".into(),
            ));
        }
        if !(d.target_batch_secs > 0.0) {
            return Err(Error::Config("dispatch.target_batch_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.verify_sample_ratio) {
            return Err(Error::Config("verify_sample_ratio must be within 0..=1".into()));
        }
        if self.import_chunk == 0 || self.passthrough_unit == 0 {
            return Err(Error::Config("chunk sizes must be positive".into()));
        }
        Ok(())
    }

    pub fn effective_cpu_threads(&self) -> usize {
        if self.cpu_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.cpu_threads
        }
    }

    pub fn delegate_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.delegate_connect_timeout_ms)
    }

    pub fn delegate_io_timeout(&self) -> Duration {
        Duration::from_millis(self.delegate_io_timeout_ms)
    }
}
