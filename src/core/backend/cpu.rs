//! CPU backend: PBKDF2 on a dedicated rayon pool.

use rayon::prelude::*;

use super::{Backend, BackendKind};
use crate::crypto;
use crate::error::BackendError;
use crate::model::{Essid, Password, Pmk};

/// Passwords per pool thread in a preferred batch.
const PER_THREAD_BATCH: usize = 256;

pub struct CpuBackend {
    name: String,
    threads: usize,
    pool: rayon::ThreadPool,
}

impl CpuBackend {
    pub fn new(threads: usize) -> Result<Self, BackendError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pmkforge-cpu-{}", i))
            .stack_size(4 * 1024 * 1024)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("cannot start CPU pool: {}", e)))?;

        Ok(Self {
            name: format!("CPU ({} threads)", threads),
            threads,
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn submit(&self, essid: &Essid, passwords: &[Password]) -> Result<Vec<Pmk>, BackendError> {
        let salt = essid.as_bytes();
        Ok(self.pool.install(|| {
            passwords
                .par_iter()
                .with_min_len(8)
                .map(|pw| crypto::derive_pmk(pw.as_bytes(), salt))
                .collect()
        }))
    }

    fn preferred_batch(&self) -> usize {
        self.threads * PER_THREAD_BATCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_self_test() {
        let cpu = CpuBackend::new(2).unwrap();
        assert_eq!(cpu.kind(), BackendKind::Cpu);
        assert!(cpu.self_test().is_ok());
    }

    #[test]
    fn test_cpu_backend_preserves_order() {
        let cpu = CpuBackend::new(3).unwrap();
        let essid: Essid = "linksys".parse().unwrap();
        let passwords: Vec<Password> = (0..20)
            .map(|i| Password::new(format!("password{:02}", i).into_bytes()).unwrap())
            .collect();

        let pmks = cpu.submit(&essid, &passwords).unwrap();
        assert_eq!(pmks.len(), passwords.len());
        for (pw, pmk) in passwords.iter().zip(&pmks) {
            assert_eq!(*pmk, crypto::derive_pmk(pw.as_bytes(), essid.as_bytes()));
        }
    }

    #[test]
    fn test_empty_batch() {
        let cpu = CpuBackend::new(1).unwrap();
        let essid: Essid = "linksys".parse().unwrap();
        assert!(cpu.submit(&essid, &[]).unwrap().is_empty());
    }
}
