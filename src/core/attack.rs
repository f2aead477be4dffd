/*!
 * Attack engine
 *
 * Every attack ends in the same step: derive the MIC from a candidate PMK
 * and compare it with the handshake's recorded MIC. The modes differ in
 * where PMKs come from:
 * - passthrough: computed on the fly from a password source, never stored
 * - database: read from stored result shards, never recomputed
 * - batch: stored results first, then the missing shards computed,
 *   persisted and tested as they arrive
 *
 * Candidate checks run in parallel with rayon and stop at the first match.
 */

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto;
use crate::dispatch::{Dispatcher, StopToken, WorkUnit};
use crate::error::{Error, Result, StorageError, ValidationError};
use crate::handshake::Handshake;
use crate::model::{Essid, Password, Pmk};
use crate::shard::{Fingerprint, ShardKey};
use crate::source::PasswordSource;
use crate::storage::{ResultShard, StorageEngine};

#[derive(Debug, Clone, Copy)]
pub struct AttackOptions {
    /// Candidates per work unit in passthrough mode
    pub passthrough_unit: usize,
    /// Share of stored PMKs recomputed by a sampled verify
    pub verify_sample_ratio: f64,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            passthrough_unit: 20_000,
            verify_sample_ratio: 0.1,
        }
    }
}

impl From<&Config> for AttackOptions {
    fn from(config: &Config) -> Self {
        Self {
            passthrough_unit: config.passthrough_unit.max(1),
            verify_sample_ratio: config.verify_sample_ratio,
        }
    }
}

/// Result of one attack.
#[derive(Debug, Clone)]
pub struct AttackOutcome {
    pub password: Option<Password>,
    /// PMKs tested against the handshake
    pub tested: u64,
    pub elapsed: Duration,
    /// The caller's stop token ended the attack early
    pub interrupted: bool,
}

impl AttackOutcome {
    pub fn rate(&self) -> f64 {
        self.tested as f64 / self.elapsed.as_secs_f64().max(1e-6)
    }
}

/// What a batch pass did for one ESSID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EssidBatch {
    pub essid: Essid,
    /// Result shards already matching their password shard
    pub current: u64,
    /// Result shards written by this pass
    pub computed: u64,
    pub pmks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub essids: Vec<EssidBatch>,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn shards_computed(&self) -> u64 {
        self.essids.iter().map(|e| e.computed).sum()
    }

    pub fn pmks_computed(&self) -> u64 {
        self.essids.iter().map(|e| e.pmks).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerifyScope {
    All,
    /// Recompute roughly this share of each shard (at least one entry)
    Sample(f64),
}

/// A stored PMK that recomputation disagrees with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub shard: String,
    pub password: Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub essid: Essid,
    pub shards: u64,
    pub checked: u64,
    pub mismatches: Vec<Mismatch>,
    pub interrupted: bool,
}

/// Coverage of stored results for one ESSID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub essid: Essid,
    pub passwords: u64,
    pub pmks: u64,
    pub current_shards: u64,
    pub stale_shards: u64,
    pub missing_shards: u64,
}

impl Coverage {
    /// Share of stored passwords with a stored PMK.
    pub fn ratio(&self) -> f64 {
        if self.passwords == 0 {
            return 1.0;
        }
        self.pmks.min(self.passwords) as f64 / self.passwords as f64
    }

    pub fn is_complete(&self) -> bool {
        self.stale_shards == 0 && self.missing_shards == 0
    }
}

/// Tag carried through the dispatcher for one password shard.
struct ShardJob {
    key: ShardKey,
    source: Fingerprint,
    existing: Vec<(Password, Pmk)>,
}

pub struct AttackEngine<'a> {
    dispatcher: &'a Dispatcher,
    options: AttackOptions,
    tested: AtomicU64,
    computed: AtomicU64,
}

impl<'a> AttackEngine<'a> {
    pub fn new(dispatcher: &'a Dispatcher, options: AttackOptions) -> Self {
        Self {
            dispatcher,
            options,
            tested: AtomicU64::new(0),
            computed: AtomicU64::new(0),
        }
    }

    /// PMKs tested against a handshake so far, across all attacks.
    pub fn tested(&self) -> u64 {
        self.tested.load(Ordering::Relaxed)
    }

    /// PMKs derived through the dispatcher so far.
    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    /// Test every PMK of `pmks` (paired with `passwords` by index).
    fn find_match(&self, handshake: &Handshake, passwords: &[Password], pmks: &[Pmk]) -> Option<Password> {
        let found = (0..pmks.len().min(passwords.len()))
            .into_par_iter()
            .find_any(|&i| crypto::verify_pmk(&pmks[i], handshake))
            .map(|i| passwords[i].clone());
        self.tested.fetch_add(pmks.len() as u64, Ordering::Relaxed);
        found
    }

    fn find_entry(&self, handshake: &Handshake, entries: &[(Password, Pmk)]) -> Option<Password> {
        let found = entries
            .par_iter()
            .find_any(|(_, pmk)| crypto::verify_pmk(pmk, handshake))
            .map(|(pw, _)| pw.clone());
        self.tested.fetch_add(entries.len() as u64, Ordering::Relaxed);
        found
    }

    fn outcome(&self, password: Option<Password>, started: Instant, tested_before: u64, stop: &StopToken) -> AttackOutcome {
        let outcome = AttackOutcome {
            interrupted: password.is_none() && stop.is_stopped(),
            password,
            tested: self.tested() - tested_before,
            elapsed: started.elapsed(),
        };
        match &outcome.password {
            Some(pw) => info!(password = %pw, tested = outcome.tested, "password found"),
            None => info!(tested = outcome.tested, interrupted = outcome.interrupted, "password not found"),
        }
        outcome
    }

    /// Stream `source` through the dispatcher against one handshake.
    pub fn passthrough(&self, handshake: &Handshake, source: PasswordSource, stop: &StopToken) -> Result<AttackOutcome> {
        let started = Instant::now();
        let tested_before = self.tested();
        info!(essid = %handshake.essid, ap = %handshake.ap_mac, "passthrough attack started");

        let run_stop = stop.child();
        let mut found = None;
        let mut source_error = None;
        let units = chunk_source(source, self.options.passthrough_unit, &mut source_error);

        self.dispatcher.run(&handshake.essid, units, &run_stop, |unit| {
            self.computed.fetch_add(unit.pmks.len() as u64, Ordering::Relaxed);
            if found.is_none() {
                if let Some(pw) = self.find_match(handshake, &unit.passwords, &unit.pmks) {
                    found = Some(pw);
                    run_stop.stop();
                }
            }
            Ok(())
        })?;

        if found.is_none() {
            if let Some(e) = source_error {
                return Err(e.into());
            }
        }
        Ok(self.outcome(found, started, tested_before, stop))
    }

    /// Test the stored PMKs of the handshake's ESSID. Nothing is computed.
    pub fn database(&self, storage: &StorageEngine, handshake: &Handshake, stop: &StopToken) -> Result<AttackOutcome> {
        let started = Instant::now();
        let tested_before = self.tested();
        info!(essid = %handshake.essid, ap = %handshake.ap_mac, "database attack started");

        let mut found = None;
        for shard in storage.iter_results(&handshake.essid, false)? {
            if stop.is_stopped() {
                break;
            }
            if let Some(pw) = self.find_entry(handshake, shard.entries()) {
                found = Some(pw);
                break;
            }
        }
        Ok(self.outcome(found, started, tested_before, stop))
    }

    /// Database attack, then compute and persist whatever the ESSID still
    /// lacks, testing new PMKs as they arrive. `source` is imported first.
    pub fn batch(
        &self,
        storage: &StorageEngine,
        handshake: &Handshake,
        source: Option<PasswordSource>,
        stop: &StopToken,
    ) -> Result<AttackOutcome> {
        let started = Instant::now();
        let tested_before = self.tested();

        if let Some(source) = source {
            storage.import_source(source)?;
        }
        ensure_essid(storage, &handshake.essid)?;

        let stored = self.database(storage, handshake, stop)?;
        if stored.password.is_some() || stored.interrupted {
            return Ok(self.outcome(stored.password, started, tested_before, stop));
        }

        info!(essid = %handshake.essid, "computing missing results");
        let mut found = None;
        self.batch_essid(storage, &handshake.essid, stop, |passwords, pmks| {
            if let Some(pw) = self.find_match(handshake, passwords, pmks) {
                found = Some(pw);
                return true;
            }
            false
        })?;
        Ok(self.outcome(found, started, tested_before, stop))
    }

    /// Bring the results of one ESSID (or all of them) up to date with the
    /// password shards. `source` is imported first.
    pub fn batch_process(
        &self,
        storage: &StorageEngine,
        essid: Option<&Essid>,
        source: Option<PasswordSource>,
        stop: &StopToken,
    ) -> Result<BatchReport> {
        if let Some(source) = source {
            storage.import_source(source)?;
        }

        let essids = match essid {
            Some(essid) => {
                if !storage.essid_exists(essid) {
                    return Err(ValidationError::EssidNotFound(essid.to_string()).into());
                }
                vec![essid.clone()]
            }
            None => storage.list_essids()?.into_iter().map(|info| info.essid).collect(),
        };

        let mut report = BatchReport::default();
        for essid in essids {
            if stop.is_stopped() {
                break;
            }
            let done = self.batch_essid(storage, &essid, stop, |_, _| false)?;
            report.essids.push(done);
        }
        report.interrupted = stop.is_stopped();
        info!(
            shards = report.shards_computed(),
            pmks = report.pmks_computed(),
            interrupted = report.interrupted,
            "batch finished"
        );
        Ok(report)
    }

    /// One batch pass over `essid`. `on_new` sees every freshly computed
    /// (passwords, PMKs) unit after it is persisted; returning true ends
    /// the pass early.
    fn batch_essid<F>(&self, storage: &StorageEngine, essid: &Essid, stop: &StopToken, mut on_new: F) -> Result<EssidBatch>
    where
        F: FnMut(&[Password], &[Pmk]) -> bool,
    {
        let run_stop = stop.child();
        let mut current = 0u64;
        let mut report = EssidBatch {
            essid: essid.clone(),
            current: 0,
            computed: 0,
            pmks: 0,
        };

        let units = storage.iter_password_shards().filter_map(|shard| {
            let existing = match storage.load_result_shard(essid, shard.key) {
                Ok(Some(results)) if results.covers(&shard) => {
                    current += 1;
                    return None;
                }
                Ok(Some(results)) => results.into_entries(),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(%essid, shard = %shard.key, error = %e, "recomputing unreadable result shard");
                    Vec::new()
                }
            };
            let key = shard.key;
            let source = shard.fingerprint();
            let passwords = shard.into_passwords();

            let existing: Vec<(Password, Pmk)> = existing
                .into_iter()
                .filter(|(pw, _)| passwords.binary_search(pw).is_ok())
                .collect();
            let missing: Vec<Password> = passwords
                .into_iter()
                .filter(|pw| existing.binary_search_by(|(e, _)| e.cmp(pw)).is_err())
                .collect();
            debug!(%essid, shard = %key, missing = missing.len(), kept = existing.len(), "shard queued");

            Some(WorkUnit {
                tag: ShardJob { key, source, existing },
                passwords: missing,
            })
        });

        self.dispatcher.run(essid, units, &run_stop, |unit| {
            self.computed.fetch_add(unit.pmks.len() as u64, Ordering::Relaxed);
            let job = unit.tag;
            let mut entries = job.existing;
            entries.extend(unit.passwords.iter().cloned().zip(unit.pmks.iter().copied()));
            let shard = ResultShard::new(essid.clone(), job.key, job.source, entries);
            match storage.write_result_shard(&shard) {
                Ok(()) => {}
                // the ESSID was deleted mid-run
                Err(StorageError::Validation(ValidationError::EssidNotFound(_))) => {
                    warn!(%essid, "ESSID deleted during batch, stopping");
                    run_stop.stop();
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
            report.computed += 1;
            report.pmks += unit.pmks.len() as u64;

            if on_new(&unit.passwords, &unit.pmks) {
                run_stop.stop();
            }
            Ok(())
        })?;

        report.current = current;
        info!(
            %essid,
            computed = report.computed,
            current = report.current,
            pmks = report.pmks,
            "ESSID batch pass finished"
        );
        Ok(report)
    }

    /// Recompute stored PMKs and report every disagreement.
    pub fn verify(&self, storage: &StorageEngine, essid: &Essid, scope: VerifyScope, stop: &StopToken) -> Result<VerifyReport> {
        let mut rng = rand::thread_rng();
        let mut shards = 0u64;

        let units = storage.iter_results(essid, false)?.map(|shard| {
            shards += 1;
            let key = shard.key;
            let entries = shard.into_entries();
            let picked = match scope {
                VerifyScope::All => entries,
                VerifyScope::Sample(ratio) => {
                    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
                    let mut picked: Vec<(Password, Pmk)> =
                        entries.iter().filter(|_| rng.gen_bool(ratio)).cloned().collect();
                    if picked.is_empty() {
                        picked.extend(entries.choose(&mut rng).cloned());
                    }
                    picked
                }
            };
            let (passwords, expected): (Vec<Password>, Vec<Pmk>) = picked.into_iter().unzip();
            WorkUnit {
                tag: (key, expected),
                passwords,
            }
        });

        let mut report = VerifyReport {
            essid: essid.clone(),
            shards: 0,
            checked: 0,
            mismatches: Vec::new(),
            interrupted: false,
        };
        self.dispatcher.run(essid, units, stop, |unit| {
            let (key, expected) = unit.tag;
            report.checked += unit.pmks.len() as u64;
            for ((pw, got), want) in unit.passwords.iter().zip(&unit.pmks).zip(&expected) {
                if got != want {
                    warn!(%essid, shard = %key, password = %pw, "stored PMK does not match recomputation");
                    report.mismatches.push(Mismatch {
                        shard: key.to_hex(),
                        password: pw.clone(),
                    });
                }
            }
            Ok(())
        })?;

        report.shards = shards;
        report.interrupted = stop.is_stopped();
        info!(%essid, checked = report.checked, mismatches = report.mismatches.len(), "verify finished");
        Ok(report)
    }
}

fn ensure_essid(storage: &StorageEngine, essid: &Essid) -> Result<()> {
    if storage.essid_exists(essid) {
        return Ok(());
    }
    match storage.create_essid(essid) {
        Ok(()) | Err(StorageError::Validation(ValidationError::EssidExists(_))) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Split a password source into work units of `size` candidates. A read
/// error ends the stream and is left in `error`.
fn chunk_source(
    mut source: PasswordSource,
    size: usize,
    error: &mut Option<io::Error>,
) -> impl Iterator<Item = WorkUnit<()>> + '_ {
    let size = size.max(1);
    std::iter::from_fn(move || {
        if error.is_some() {
            return None;
        }
        let mut passwords = Vec::with_capacity(size);
        while passwords.len() < size {
            match source.next() {
                Some(Ok(pw)) => passwords.push(pw),
                Some(Err(e)) => {
                    *error = Some(e);
                    break;
                }
                None => break,
            }
        }
        if passwords.is_empty() {
            None
        } else {
            Some(WorkUnit { tag: (), passwords })
        }
    })
}

/// Coverage statistics for one ESSID or all of them; nothing is modified.
pub fn eval_results(storage: &StorageEngine, essid: Option<&Essid>) -> Result<Vec<Coverage>> {
    let essids = match essid {
        Some(essid) => {
            if !storage.essid_exists(essid) {
                return Err(Error::Validation(ValidationError::EssidNotFound(essid.to_string())));
            }
            vec![essid.clone()]
        }
        None => storage.list_essids()?.into_iter().map(|info| info.essid).collect(),
    };

    let password_shards: Vec<(ShardKey, Fingerprint, u64)> = storage
        .iter_password_shards()
        .map(|shard| (shard.key, shard.fingerprint(), shard.len() as u64))
        .collect();
    let passwords: u64 = password_shards.iter().map(|(_, _, n)| n).sum();

    let mut out = Vec::with_capacity(essids.len());
    for essid in essids {
        let mut coverage = Coverage {
            essid: essid.clone(),
            passwords,
            pmks: 0,
            current_shards: 0,
            stale_shards: 0,
            missing_shards: 0,
        };
        for (key, fingerprint, _) in &password_shards {
            match storage.result_header(&essid, *key) {
                Ok(Some(header)) => {
                    coverage.pmks += header.count as u64;
                    if header.source == *fingerprint {
                        coverage.current_shards += 1;
                    } else {
                        coverage.stale_shards += 1;
                    }
                }
                Ok(None) => coverage.missing_shards += 1,
                Err(e) if e.is_corrupt() => {
                    warn!(%essid, shard = %key, error = %e, "unreadable result shard");
                    coverage.stale_shards += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        out.push(coverage);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ReferenceBackend;
    use crate::backend::Backend;
    use crate::config::DispatchConfig;
    use crate::handshake::Pairing;
    use crate::model::MacAddr;
    use crate::source;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let config = DispatchConfig {
            min_batch: 16,
            max_batch: 64,
            benchmark_ms: 1,
            ..DispatchConfig::default()
        };
        let backends: Vec<Arc<dyn Backend>> = vec![
            Arc::new(ReferenceBackend::new("a")),
            Arc::new(ReferenceBackend::new("b")),
        ];
        Dispatcher::probe(backends, config).unwrap()
    }

    /// A key-version 2 handshake for `password` on `essid`, MIC computed
    /// with the crypto kernel.
    fn handshake(essid: &str, password: &str) -> Handshake {
        let mut frame = vec![0u8; 121];
        frame[0] = 1;
        frame[1] = 3;
        frame[2..4].copy_from_slice(&117u16.to_be_bytes());
        frame[5..7].copy_from_slice(&0x010au16.to_be_bytes());
        let mut hs = Handshake {
            essid: essid.parse().unwrap(),
            ap_mac: MacAddr([0x00, 0x0b, 0x86, 0xc2, 0xa4, 0x85]),
            station_mac: MacAddr([0x00, 0x13, 0xce, 0x55, 0x98, 0xef]),
            anonce: [0x3c; 32],
            snonce: [0x5a; 32],
            mic: [0; 16],
            eapol_frame: frame,
            key_version: 2,
            replay_counter: 1,
            pairing: Pairing::Challenge,
        };
        let pmk = crypto::derive_pmk(password.as_bytes(), essid.as_bytes());
        hs.mic = crypto::derive_mic(&pmk, &hs);
        hs
    }

    fn candidates(n: usize, answer: &str) -> Vec<Password> {
        let mut v: Vec<Password> = (0..n)
            .map(|i| Password::new(format!("test123{}", i).into_bytes()).unwrap())
            .collect();
        v.push(Password::new(answer.as_bytes().to_vec()).unwrap());
        v
    }

    fn storage_with(passwords: &[Password]) -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(dir.path()).unwrap();
        let mut text = Vec::new();
        for pw in passwords {
            text.extend_from_slice(pw.as_bytes());
            text.push(b'\n');
        }
        storage.import_passwords(&text[..]).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_passthrough_finds_password() {
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions { passthrough_unit: 25, verify_sample_ratio: 0.1 });
        let hs = handshake("linksys", "dictionary");

        let outcome = engine
            .passthrough(&hs, source::memory(candidates(60, "dictionary")), &StopToken::new())
            .unwrap();
        assert_eq!(outcome.password.unwrap().as_bytes(), b"dictionary");
        assert!(!outcome.interrupted);
    }

    #[test]
    fn test_passthrough_not_found() {
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        let hs = handshake("linksys", "not-in-the-list");
        let outcome = engine
            .passthrough(&hs, source::memory(candidates(30, "dictionary")), &StopToken::new())
            .unwrap();
        assert!(outcome.password.is_none());
        assert_eq!(outcome.tested, 31);
    }

    #[test]
    fn test_passthrough_respects_stop() {
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        let hs = handshake("linksys", "dictionary");
        let stop = StopToken::new();
        stop.stop();
        let outcome = engine
            .passthrough(&hs, source::memory(candidates(30, "dictionary")), &stop)
            .unwrap();
        assert!(outcome.password.is_none());
        assert!(outcome.interrupted);
        assert_eq!(outcome.tested, 0);
    }

    #[test]
    fn test_batch_process_then_database() {
        let pws = candidates(120, "dictionary");
        let (_dir, storage) = storage_with(&pws);
        let essid: Essid = "linksys".parse().unwrap();
        storage.create_essid(&essid).unwrap();

        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        let report = engine.batch_process(&storage, Some(&essid), None, &StopToken::new()).unwrap();
        assert_eq!(report.pmks_computed(), 121);
        assert_eq!(
            storage.result_shard_keys(&essid).unwrap(),
            storage.password_shard_keys().unwrap()
        );

        // a second pass has nothing to do
        let again = engine.batch_process(&storage, None, None, &StopToken::new()).unwrap();
        assert_eq!(again.shards_computed(), 0);

        let hs = handshake("linksys", "dictionary");
        let outcome = engine.database(&storage, &hs, &StopToken::new()).unwrap();
        assert_eq!(outcome.password.unwrap().as_bytes(), b"dictionary");
    }

    #[test]
    fn test_stale_shard_recomputes_missing_only() {
        let (_dir, storage) = storage_with(&candidates(40, "dictionary"));
        let essid: Essid = "linksys".parse().unwrap();
        storage.create_essid(&essid).unwrap();
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        engine.batch_process(&storage, None, None, &StopToken::new()).unwrap();
        let before = engine.computed();

        storage.import_passwords(&b"brand-new-password\n"[..]).unwrap();
        let coverage = eval_results(&storage, Some(&essid)).unwrap();
        assert_eq!(coverage[0].stale_shards + coverage[0].missing_shards, 1);

        let report = engine.batch_process(&storage, Some(&essid), None, &StopToken::new()).unwrap();
        assert_eq!(report.shards_computed(), 1);
        assert_eq!(engine.computed() - before, 1);
        assert!(eval_results(&storage, None).unwrap()[0].is_complete());
    }

    #[test]
    fn test_batch_attack_computes_and_finds() {
        let (_dir, storage) = storage_with(&candidates(50, "dictionary"));
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        let hs = handshake("linksys", "dictionary");

        // ESSID does not exist yet: the attack creates it
        let outcome = engine.batch(&storage, &hs, None, &StopToken::new()).unwrap();
        assert_eq!(outcome.password.unwrap().as_bytes(), b"dictionary");
        assert!(storage.essid_exists(&hs.essid));

        let extra = source::memory(vec!["another-candidate".parse().unwrap()]);
        let outcome = engine.batch(&storage, &hs, Some(extra), &StopToken::new()).unwrap();
        assert!(outcome.password.is_some());
        assert_eq!(storage.password_count().unwrap(), 52);
    }

    #[test]
    fn test_verify_reports_mismatch() {
        let (_dir, storage) = storage_with(&candidates(20, "dictionary"));
        let essid: Essid = "linksys".parse().unwrap();
        storage.create_essid(&essid).unwrap();
        let d = dispatcher();
        let engine = AttackEngine::new(&d, AttackOptions::default());
        engine.batch_process(&storage, None, None, &StopToken::new()).unwrap();

        let clean = engine.verify(&storage, &essid, VerifyScope::All, &StopToken::new()).unwrap();
        assert_eq!(clean.checked, 21);
        assert!(clean.mismatches.is_empty());

        // plant a wrong PMK
        let key = storage.result_shard_keys(&essid).unwrap()[0];
        let shard = storage.load_result_shard(&essid, key).unwrap().unwrap();
        let (essid_c, source) = (shard.essid.clone(), shard.source);
        let mut entries = shard.into_entries();
        let victim = entries[0].0.clone();
        entries[0].1 = [0xff; 32];
        storage
            .write_result_shard(&ResultShard::new(essid_c, key, source, entries))
            .unwrap();

        let report = engine.verify(&storage, &essid, VerifyScope::All, &StopToken::new()).unwrap();
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].password, victim);

        let sampled = engine
            .verify(&storage, &essid, VerifyScope::Sample(0.0), &StopToken::new())
            .unwrap();
        assert_eq!(sampled.checked, sampled.shards);
    }

    #[test]
    fn test_eval_without_results() {
        let (_dir, storage) = storage_with(&candidates(10, "dictionary"));
        let essid: Essid = "linksys".parse().unwrap();
        storage.create_essid(&essid).unwrap();
        let coverage = eval_results(&storage, None).unwrap();
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].passwords, 11);
        assert_eq!(coverage[0].pmks, 0);
        assert_eq!(coverage[0].current_shards, 0);
        assert!(!coverage[0].is_complete());
        assert!(eval_results(&storage, Some(&"missing".parse().unwrap())).is_err());
    }
}
