/*!
 * Core dispatcher
 *
 * Drives every live backend at once:
 * - one worker thread per backend, fed through a bounded job channel
 * - a single coordinator loop that pulls work units lazily, carves them
 *   into batches sized for each backend, and scatters results back
 * - failed batches are requeued on another backend; repeat offenders are
 *   retired
 *
 * Within a unit the PMKs always line up with the passwords. Units may
 * complete in any order.
 */

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendKind};
use crate::config::DispatchConfig;
use crate::error::{BackendError, Error, Result};
use crate::model::{Essid, Password, Pmk};

/// Cooperative cancellation flag shared by the caller and long operations.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<StopInner>);

#[derive(Debug, Default)]
struct StopInner {
    flag: AtomicBool,
    parent: Option<StopToken>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is stopped when either it or `self` is.
    pub fn child(&self) -> Self {
        StopToken(Arc::new(StopInner {
            flag: AtomicBool::new(false),
            parent: Some(self.clone()),
        }))
    }

    pub fn stop(&self) {
        self.0.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.flag.load(Ordering::Acquire)
            || self.0.parent.as_ref().is_some_and(StopToken::is_stopped)
    }
}

/// Ordered candidates plus caller metadata.
#[derive(Debug, Clone)]
pub struct WorkUnit<T> {
    pub tag: T,
    pub passwords: Vec<Password>,
}

/// A completed unit: `pmks[i]` belongs to `passwords[i]`.
#[derive(Debug, Clone)]
pub struct UnitResult<T> {
    pub tag: T,
    pub passwords: Vec<Password>,
    pub pmks: Vec<Pmk>,
}

impl<T> UnitResult<T> {
    pub fn pairs(&self) -> impl Iterator<Item = (&Password, &Pmk)> {
        self.passwords.iter().zip(&self.pmks)
    }

    pub fn into_pairs(self) -> impl Iterator<Item = (Password, Pmk)> {
        self.passwords.into_iter().zip(self.pmks)
    }
}

/// What the dispatcher knows about one backend.
#[derive(Debug, Clone, Serialize)]
pub struct CoreDescriptor {
    pub name: String,
    pub kind: BackendKind,
    /// Measured PMKs per second
    pub capability: f64,
    pub alive: bool,
    pub batches: u64,
    pub pmks: u64,
    pub failures: u64,
    pub busy_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    pub units_completed: u64,
    /// Partially computed units discarded after a stop
    pub units_dropped: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub pmks: u64,
    pub elapsed: Duration,
}

struct Core {
    backend: Arc<dyn Backend>,
    descriptor: Mutex<CoreDescriptor>,
}

pub struct Dispatcher {
    cores: Vec<Core>,
    config: DispatchConfig,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    unit: u64,
    offset: usize,
    len: usize,
}

struct Batch {
    passwords: Vec<Password>,
    segments: Vec<Segment>,
    /// Cores that already failed this batch
    failed_on: Vec<usize>,
}

struct Done {
    core: usize,
    batch: Batch,
    result: Result<Vec<Pmk>, BackendError>,
    elapsed: Duration,
}

struct Pending<T> {
    tag: T,
    passwords: Vec<Password>,
    pmks: Vec<Pmk>,
    dispatched: usize,
    filled: usize,
}

/// Coordinator-side bookkeeping of one run.
struct RunState<T, I> {
    input: I,
    exhausted: bool,
    next_id: u64,
    units: HashMap<u64, Pending<T>>,
    /// Units with passwords not yet placed in a batch, oldest first
    cursor: VecDeque<u64>,
    retry: VecDeque<Batch>,
    ready: Vec<UnitResult<T>>,
}

impl<T, I: Iterator<Item = WorkUnit<T>>> RunState<T, I> {
    fn new(input: I) -> Self {
        Self {
            input,
            exhausted: false,
            next_id: 0,
            units: HashMap::new(),
            cursor: VecDeque::new(),
            retry: VecDeque::new(),
            ready: Vec::new(),
        }
    }

    /// Pull the next unit from the caller. Returns false when nothing more
    /// may be pulled.
    fn pull_unit(&mut self, stop: &StopToken) -> bool {
        if self.exhausted || stop.is_stopped() {
            return false;
        }
        let Some(unit) = self.input.next() else {
            self.exhausted = true;
            return false;
        };
        if unit.passwords.is_empty() {
            self.ready.push(UnitResult {
                tag: unit.tag,
                passwords: Vec::new(),
                pmks: Vec::new(),
            });
            return true;
        }
        let id = self.next_id;
        self.next_id += 1;
        let len = unit.passwords.len();
        self.units.insert(
            id,
            Pending {
                tag: unit.tag,
                passwords: unit.passwords,
                pmks: vec![[0u8; 32]; len],
                dispatched: 0,
                filled: 0,
            },
        );
        self.cursor.push_back(id);
        true
    }

    /// A failed batch `core` has not failed yet.
    fn take_retry(&mut self, core: usize) -> Option<Batch> {
        let pos = self.retry.iter().position(|b| !b.failed_on.contains(&core))?;
        self.retry.remove(pos)
    }

    /// Carve a new batch of up to `size` passwords, spanning units.
    fn carve(&mut self, size: usize, stop: &StopToken) -> Option<Batch> {
        let mut passwords = Vec::with_capacity(size);
        let mut segments = Vec::new();

        while passwords.len() < size {
            let Some(&id) = self.cursor.front() else {
                if self.pull_unit(stop) {
                    continue;
                }
                break;
            };
            let Some(unit) = self.units.get_mut(&id) else {
                self.cursor.pop_front();
                continue;
            };
            let take = (size - passwords.len()).min(unit.passwords.len() - unit.dispatched);
            passwords.extend_from_slice(&unit.passwords[unit.dispatched..unit.dispatched + take]);
            segments.push(Segment {
                unit: id,
                offset: unit.dispatched,
                len: take,
            });
            unit.dispatched += take;
            if unit.dispatched == unit.passwords.len() {
                self.cursor.pop_front();
            }
        }

        if passwords.is_empty() {
            None
        } else {
            Some(Batch {
                passwords,
                segments,
                failed_on: Vec::new(),
            })
        }
    }

    /// Copy batch results into their units; finished units become ready.
    fn scatter(&mut self, batch: &Batch, pmks: &[Pmk]) {
        let mut pos = 0;
        for seg in &batch.segments {
            let src = &pmks[pos..pos + seg.len];
            pos += seg.len;
            let Some(unit) = self.units.get_mut(&seg.unit) else {
                continue;
            };
            unit.pmks[seg.offset..seg.offset + seg.len].copy_from_slice(src);
            unit.filled += seg.len;
            if unit.filled == unit.passwords.len() {
                if let Some(unit) = self.units.remove(&seg.unit) {
                    self.ready.push(UnitResult {
                        tag: unit.tag,
                        passwords: unit.passwords,
                        pmks: unit.pmks,
                    });
                }
            }
        }
    }

    fn has_work(&self) -> bool {
        !self.exhausted || !self.units.is_empty() || !self.retry.is_empty()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Run `backend.submit` with panics and wrong-length results turned into
/// backend errors.
fn guarded_submit(
    backend: &dyn Backend,
    essid: &Essid,
    passwords: &[Password],
) -> Result<Vec<Pmk>, BackendError> {
    let pmks = catch_unwind(AssertUnwindSafe(|| backend.submit(essid, passwords)))
        .unwrap_or_else(|panic| Err(BackendError::Panicked(panic_message(panic.as_ref()))))?;
    if pmks.len() != passwords.len() {
        return Err(BackendError::LengthMismatch {
            expected: passwords.len(),
            got: pmks.len(),
        });
    }
    Ok(pmks)
}

fn worker(core: usize, backend: &dyn Backend, essid: &Essid, jobs: Receiver<Batch>, done: Sender<Done>) {
    for batch in jobs {
        let started = Instant::now();
        let result = guarded_submit(backend, essid, &batch.passwords);
        let done_msg = Done {
            core,
            batch,
            result,
            elapsed: started.elapsed(),
        };
        if done.send(done_msg).is_err() {
            break;
        }
    }
}

impl Dispatcher {
    /// Self-test and benchmark every backend; keep the ones that pass.
    pub fn probe(backends: Vec<Arc<dyn Backend>>, config: DispatchConfig) -> Result<Self> {
        let mut cores = Vec::new();
        for backend in backends {
            let name = backend.name().to_string();

            let tested = catch_unwind(AssertUnwindSafe(|| backend.self_test()))
                .unwrap_or_else(|panic| Err(BackendError::Panicked(panic_message(panic.as_ref()))));
            if let Err(e) = tested {
                warn!(backend = %name, error = %e, "backend failed self-test, excluded");
                continue;
            }

            let measured = catch_unwind(AssertUnwindSafe(|| {
                backend.benchmark(config.benchmark_duration())
            }))
            .unwrap_or_else(|panic| Err(BackendError::Panicked(panic_message(panic.as_ref()))));
            let capability = match measured {
                Ok(rate) => rate,
                Err(e) => {
                    warn!(backend = %name, error = %e, "backend failed benchmark, excluded");
                    continue;
                }
            };

            info!(backend = %name, capability = format!("{:.0} PMKs/s", capability), "backend ready");
            cores.push(Self::core(backend, capability));
        }

        if cores.is_empty() {
            return Err(Error::NoBackends);
        }
        Ok(Self { cores, config })
    }

    /// Use backends with known capabilities, skipping self-test and benchmark.
    pub fn with_capabilities(backends: Vec<(Arc<dyn Backend>, f64)>, config: DispatchConfig) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::NoBackends);
        }
        let cores = backends
            .into_iter()
            .map(|(backend, capability)| Self::core(backend, capability))
            .collect();
        Ok(Self { cores, config })
    }

    fn core(backend: Arc<dyn Backend>, capability: f64) -> Core {
        let descriptor = CoreDescriptor {
            name: backend.name().to_string(),
            kind: backend.kind(),
            capability,
            alive: true,
            batches: 0,
            pmks: 0,
            failures: 0,
            busy_secs: 0.0,
        };
        Core {
            backend,
            descriptor: Mutex::new(descriptor),
        }
    }

    pub fn descriptors(&self) -> Vec<CoreDescriptor> {
        self.cores.iter().map(|c| c.descriptor.lock().clone()).collect()
    }

    pub fn live_count(&self) -> usize {
        self.cores.iter().filter(|c| c.descriptor.lock().alive).count()
    }

    /// Sum of the capabilities of the live backends.
    pub fn capability(&self) -> f64 {
        self.cores
            .iter()
            .map(|c| c.descriptor.lock())
            .filter(|d| d.alive)
            .map(|d| d.capability)
            .sum()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Derive the PMKs of one ordered batch.
    pub fn compute(&self, essid: &Essid, passwords: Vec<Password>) -> Result<Vec<Pmk>> {
        let expected = passwords.len();
        let mut out = None;
        self.run(
            essid,
            std::iter::once(WorkUnit {
                tag: (),
                passwords,
            }),
            &StopToken::new(),
            |result| {
                out = Some(result.pmks);
                Ok(())
            },
        )?;
        out.ok_or_else(|| Error::BackendsExhausted {
            batch_len: expected,
            last_error: "no result produced".into(),
        })
    }

    /// Compute every unit from `units`, handing each finished unit to
    /// `on_result` as soon as its last PMK arrives.
    ///
    /// Stops pulling and dispatching once `stop` is raised; batches already
    /// in flight drain and finished units are still delivered.
    pub fn run<T, I, F>(
        &self,
        essid: &Essid,
        units: I,
        stop: &StopToken,
        mut on_result: F,
    ) -> Result<DispatchStats>
    where
        I: IntoIterator<Item = WorkUnit<T>>,
        F: FnMut(UnitResult<T>) -> Result<()>,
    {
        let started = Instant::now();
        let mut alive: Vec<bool> = self.cores.iter().map(|c| c.descriptor.lock().alive).collect();
        if !alive.iter().any(|&a| a) {
            return Err(Error::NoBackends);
        }
        let batch_sizes: Vec<usize> = self
            .cores
            .iter()
            .map(|c| self.config.batch_size(c.descriptor.lock().capability))
            .collect();
        let depth = self.config.queue_depth.max(1);

        let mut stats = std::thread::scope(|scope| {
            let (done_tx, done_rx) = crossbeam::channel::unbounded::<Done>();
            let mut job_txs: Vec<Option<Sender<Batch>>> = Vec::with_capacity(self.cores.len());
            for (i, core) in self.cores.iter().enumerate() {
                if !alive[i] {
                    job_txs.push(None);
                    continue;
                }
                let (tx, rx) = crossbeam::channel::bounded::<Batch>(depth);
                let backend = core.backend.as_ref();
                let done_tx = done_tx.clone();
                scope.spawn(move || worker(i, backend, essid, rx, done_tx));
                job_txs.push(Some(tx));
            }
            drop(done_tx);

            let mut state = RunState::new(units.into_iter());
            let mut stats = DispatchStats::default();
            let mut in_flight = vec![0usize; self.cores.len()];
            let mut consecutive = vec![0u32; self.cores.len()];
            let mut last_error = String::new();

            loop {
                for result in std::mem::take(&mut state.ready) {
                    on_result(result)?;
                    stats.units_completed += 1;
                }

                let stopped = stop.is_stopped();
                if !stopped {
                    for core in 0..self.cores.len() {
                        while alive[core] && in_flight[core] < depth {
                            let batch = match state.take_retry(core) {
                                Some(batch) => batch,
                                None => match state.carve(batch_sizes[core], stop) {
                                    Some(batch) => batch,
                                    None => break,
                                },
                            };
                            let Some(tx) = &job_txs[core] else {
                                state.retry.push_front(batch);
                                break;
                            };
                            debug!(core, size = batch.passwords.len(), "dispatching batch");
                            if let Err(e) = tx.send(batch) {
                                state.retry.push_front(e.into_inner());
                                alive[core] = false;
                                break;
                            }
                            in_flight[core] += 1;
                            stats.batches += 1;
                        }
                    }
                    if !state.ready.is_empty() {
                        continue;
                    }

                    let stranded = state.retry.iter().find(|b| {
                        !(0..self.cores.len()).any(|c| alive[c] && !b.failed_on.contains(&c))
                    });
                    if let Some(batch) = stranded {
                        return Err(Error::BackendsExhausted {
                            batch_len: batch.passwords.len(),
                            last_error,
                        });
                    }
                }

                if in_flight.iter().all(|&n| n == 0) {
                    if !stopped && state.has_work() && !alive.iter().any(|&a| a) {
                        return Err(Error::BackendsExhausted {
                            batch_len: 0,
                            last_error,
                        });
                    }
                    break;
                }

                let Ok(done) = done_rx.recv() else {
                    return Err(Error::BackendsExhausted {
                        batch_len: 0,
                        last_error: "all workers exited".into(),
                    });
                };
                in_flight[done.core] -= 1;
                let core = &self.cores[done.core];

                match done.result {
                    Ok(pmks) => {
                        consecutive[done.core] = 0;
                        stats.pmks += pmks.len() as u64;
                        {
                            let mut d = core.descriptor.lock();
                            d.batches += 1;
                            d.pmks += pmks.len() as u64;
                            d.busy_secs += done.elapsed.as_secs_f64();
                        }
                        state.scatter(&done.batch, &pmks);
                    }
                    Err(e) => {
                        stats.failed_batches += 1;
                        consecutive[done.core] += 1;
                        let name = core.backend.name();
                        warn!(backend = name, error = %e, size = done.batch.passwords.len(), "batch failed, requeueing");
                        last_error = format!("{}: {}", name, e);

                        let mut d = core.descriptor.lock();
                        d.failures += 1;
                        if consecutive[done.core] >= self.config.max_failures {
                            warn!(backend = name, failures = consecutive[done.core], "backend retired");
                            d.alive = false;
                            alive[done.core] = false;
                            job_txs[done.core] = None;
                        }
                        drop(d);

                        let mut batch = done.batch;
                        batch.failed_on.push(done.core);
                        state.retry.push_front(batch);
                    }
                }
            }

            stats.units_dropped = state.units.len() as u64;
            Ok(stats)
        })?;

        stats.elapsed = started.elapsed();
        debug!(
            units = stats.units_completed,
            dropped = stats.units_dropped,
            pmks = stats.pmks,
            "dispatch finished"
        );
        Ok(stats)
    }
}
