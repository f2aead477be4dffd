/*!
 * Compute backends
 *
 * A backend turns a batch of candidates into PMKs for one ESSID:
 * - `CpuBackend`: a dedicated rayon thread pool
 * - `GpuBackend`: a wgpu compute pipeline (feature `gpu`)
 * - `RemoteBackend`: a delegate worker reached over TCP
 *
 * All of them share the known-answer self-test and the benchmark loop
 * defined on the trait, so the dispatcher treats them uniformly.
 */

mod cpu;
#[cfg(feature = "gpu")]
mod gpu;
pub mod remote;

pub use cpu::CpuBackend;
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;
pub use remote::{serve_delegate, RemoteBackend};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::crypto::{self, KNOWN_ANSWER_ESSID, KNOWN_ANSWER_PASSWORD, KNOWN_ANSWER_PMK};
use crate::error::BackendError;
use crate::model::{Essid, Password, Pmk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Gpu,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Cpu => "CPU",
            BackendKind::Gpu => "GPU",
            BackendKind::Remote => "Network",
        };
        f.write_str(s)
    }
}

/// One compute resource behind the batch-execution contract.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Derive the PMK of every password for `essid`, in input order.
    fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError>;

    /// Batch size used before a benchmark has measured the backend.
    fn preferred_batch(&self) -> usize {
        1024
    }

    /// Check the backend against the IEEE 802.11i test vector and a second
    /// candidate derived locally.
    fn self_test(&self) -> Result<(), BackendError> {
        let essid = Essid::new(KNOWN_ANSWER_ESSID.to_vec())
            .map_err(|e| BackendError::SelfTest(e.to_string()))?;
        let passwords = [
            Password::new(KNOWN_ANSWER_PASSWORD.to_vec())
                .map_err(|e| BackendError::SelfTest(e.to_string()))?,
            Password::new(b"self-test-candidate".to_vec())
                .map_err(|e| BackendError::SelfTest(e.to_string()))?,
        ];
        let expected = [
            KNOWN_ANSWER_PMK,
            crypto::derive_pmk(passwords[1].as_bytes(), essid.as_bytes()),
        ];

        let got = self.submit(&essid, &passwords)?;
        if got.len() != expected.len() {
            return Err(BackendError::LengthMismatch {
                expected: expected.len(),
                got: got.len(),
            });
        }
        if got[..] != expected[..] {
            return Err(BackendError::SelfTest(format!(
                "{} returned a wrong PMK for the known-answer vector",
                self.name()
            )));
        }
        Ok(())
    }

    /// Run synthetic batches for `duration` and return PMKs per second.
    /// At least one batch always runs.
    fn benchmark(&self, duration: Duration) -> Result<f64, BackendError> {
        let essid = Essid::new(b"pmkforge-benchmark".to_vec())
            .map_err(|e| BackendError::SelfTest(e.to_string()))?;
        let batch = synthetic_batch(self.preferred_batch().max(1));

        let start = Instant::now();
        let mut computed = 0u64;
        loop {
            let pmks = self.submit(&essid, &batch)?;
            computed += pmks.len() as u64;
            if start.elapsed() >= duration {
                break;
            }
        }
        let secs = start.elapsed().as_secs_f64().max(1e-6);
        let rate = computed as f64 / secs;
        debug!(backend = self.name(), rate, "benchmark finished");
        Ok(rate)
    }
}

fn synthetic_batch(n: usize) -> Vec<Password> {
    (0..n)
        .filter_map(|i| Password::new(format!("benchmark{:08}", i).into_bytes()).ok())
        .collect()
}

/// Backends available for this configuration: the local CPU pool, a GPU
/// when one is found, and every configured delegate.
pub fn detect(config: &Config) -> Result<Vec<Arc<dyn Backend>>, BackendError> {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

    let threads = config.effective_cpu_threads();
    backends.push(Arc::new(CpuBackend::new(threads)?));
    info!(threads, "CPU backend ready");

    #[cfg(feature = "gpu")]
    if config.gpu {
        match GpuBackend::new() {
            Ok(gpu) => {
                info!(device = gpu.name(), "GPU backend ready");
                backends.push(Arc::new(gpu));
            }
            Err(e) => tracing::warn!(error = %e, "no usable GPU"),
        }
    }
    #[cfg(not(feature = "gpu"))]
    if config.gpu {
        debug!("built without the gpu feature");
    }

    for addr in &config.delegates {
        backends.push(Arc::new(RemoteBackend::new(
            *addr,
            config.delegate_connect_timeout(),
            config.delegate_io_timeout(),
        )));
    }
    if backends.len() == 1 {
        debug!("running on the CPU only");
    } else {
        info!(count = backends.len(), "backends detected");
    }

    Ok(backends)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends for dispatcher and attack tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Computes correct PMKs on the calling thread.
    pub struct ReferenceBackend {
        pub name: String,
        pub batches: AtomicUsize,
    }

    impl ReferenceBackend {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                batches: AtomicUsize::new(0),
            }
        }
    }

    impl Backend for ReferenceBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Cpu
        }

        fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
            self.batches.fetch_add(1, Ordering::Relaxed);
            Ok(passwords
                .iter()
                .map(|pw| crypto::derive_pmk(pw.as_bytes(), essid.as_bytes()))
                .collect())
        }

        fn preferred_batch(&self) -> usize {
            4
        }

        fn benchmark(&self, _duration: Duration) -> Result<f64, BackendError> {
            Ok(100.0)
        }
    }

    /// Fails every batch after passing `healthy` of them (self-test included).
    pub struct FlakyBackend {
        pub healthy: usize,
        pub calls: AtomicUsize,
        pub panic: bool,
    }

    impl Backend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Remote
        }

        fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.healthy {
                return Ok(passwords
                    .iter()
                    .map(|pw| crypto::derive_pmk(pw.as_bytes(), essid.as_bytes()))
                    .collect());
            }
            if self.panic {
                panic!("flaky backend exploded");
            }
            Err(BackendError::Remote("connection reset".into()))
        }

        fn preferred_batch(&self) -> usize {
            4
        }

        fn benchmark(&self, _duration: Duration) -> Result<f64, BackendError> {
            Ok(1000.0)
        }
    }

    /// Returns garbage, so its self-test fails.
    pub struct BrokenBackend;

    impl Backend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Gpu
        }

        fn submit(&self, _essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
            Ok(vec![[0u8; 32]; passwords.len()])
        }
    }
}
