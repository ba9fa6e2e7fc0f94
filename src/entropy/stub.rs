//! In-memory entropy sources for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::error::Error;

use super::{EntropyHandle, EntropySource, RawSample};

/// Counters shared between a stub source, its handles and the test.
#[derive(Default)]
pub struct StubStats {
    opens: AtomicUsize,
    reads: AtomicUsize,
    rejected: AtomicUsize,
    offline: AtomicBool,
    in_flight: AtomicUsize,
    overlapping_opens: AtomicUsize,
}

impl StubStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Pulls the source flagged as unusable.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Opens that happened while a read was in progress.
    pub fn overlapping_opens(&self) -> usize {
        self.overlapping_opens.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable("stub offline".into()));
        }
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            self.overlapping_opens.fetch_add(1, Ordering::SeqCst);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_read(&self) -> Result<(), Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::DeviceReadFailure("stub went away".into()));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn record(&self, sample: Option<u32>) -> Option<RawSample> {
        if sample.is_none() {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
        sample.map(RawSample)
    }
}

struct Script {
    samples: Vec<Option<u32>>,
    pos: AtomicUsize,
    cycle: bool,
    read_delay: Duration,
    stats: Arc<StubStats>,
}

/// Replays a fixed list of pulls (`None` = unusable pull). The position is
/// shared across reopens. Once exhausted, reads fail unless cycling.
pub struct ScriptedSource {
    script: Arc<Script>,
}

impl ScriptedSource {
    pub fn new(samples: Vec<Option<u32>>) -> Self {
        Self::build(samples, false, Duration::ZERO)
    }

    pub fn cycling(samples: Vec<Option<u32>>) -> Self {
        Self::build(samples, true, Duration::ZERO)
    }

    /// Cycling script whose reads each take `delay`.
    pub fn slow_cycling(samples: Vec<Option<u32>>, delay: Duration) -> Self {
        Self::build(samples, true, delay)
    }

    fn build(samples: Vec<Option<u32>>, cycle: bool, read_delay: Duration) -> Self {
        Self {
            script: Arc::new(Script {
                samples,
                pos: AtomicUsize::new(0),
                cycle,
                read_delay,
                stats: Arc::new(StubStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<StubStats> {
        Arc::clone(&self.script.stats)
    }
}

impl EntropySource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        self.script.stats.check_open()?;
        Ok(Box::new(ScriptedHandle {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedHandle {
    script: Arc<Script>,
}

impl EntropyHandle for ScriptedHandle {
    fn label(&self) -> &'static str {
        "scripted"
    }

    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        let script = &self.script;
        script.stats.check_read()?;
        script.stats.in_flight.fetch_add(1, Ordering::SeqCst);
        if !script.read_delay.is_zero() {
            thread::sleep(script.read_delay);
        }
        script.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        let pos = script.pos.fetch_add(1, Ordering::SeqCst);
        let len = script.samples.len();
        let index = if script.cycle && len > 0 { pos % len } else { pos };
        match script.samples.get(index) {
            Some(&sample) => Ok(script.stats.record(sample)),
            None => Err(Error::DeviceReadFailure("script exhausted".into())),
        }
    }
}

struct Biased {
    rng: Mutex<ChaCha20Rng>,
    // probability of a 1 bit, scaled to u32
    threshold: u32,
    reject_every: Option<usize>,
    stats: Arc<StubStats>,
}

/// Independent bits with `P(1) = p_one`, drawn from a seeded ChaCha20Rng.
/// Optionally flags every `n`-th pull as unusable.
pub struct BiasedSource {
    inner: Arc<Biased>,
}

impl BiasedSource {
    pub fn new(seed: u64, p_one: f64, reject_every: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Biased {
                rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
                threshold: (p_one.clamp(0.0, 1.0) * u32::MAX as f64) as u32,
                reject_every,
                stats: Arc::new(StubStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<StubStats> {
        Arc::clone(&self.inner.stats)
    }
}

impl EntropySource for BiasedSource {
    fn name(&self) -> &'static str {
        "biased"
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        self.inner.stats.check_open()?;
        Ok(Box::new(BiasedHandle {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct BiasedHandle {
    inner: Arc<Biased>,
}

impl EntropyHandle for BiasedHandle {
    fn label(&self) -> &'static str {
        "biased"
    }

    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        let inner = &self.inner;
        inner.stats.check_read()?;
        if let Some(n) = inner.reject_every {
            if inner.stats.reads() % n == 0 {
                return Ok(inner.stats.record(None));
            }
        }
        let mut rng = inner.rng.lock().unwrap();
        let mut word = 0u32;
        for bit in 0..32 {
            if rng.next_u32() < inner.threshold {
                word |= 1 << bit;
            }
        }
        Ok(inner.stats.record(Some(word)))
    }
}

/// Fails either on open or on every read.
pub struct FailingSource {
    fail_open: bool,
    stats: Arc<StubStats>,
}

impl FailingSource {
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            stats: Arc::new(StubStats::default()),
        }
    }

    pub fn broken_reads() -> Self {
        Self {
            fail_open: false,
            stats: Arc::new(StubStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<StubStats> {
        Arc::clone(&self.stats)
    }
}

impl EntropySource for FailingSource {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        if self.fail_open {
            return Err(Error::DeviceUnavailable("failing stub".into()));
        }
        self.stats.check_open()?;
        Ok(Box::new(FailingHandle {
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct FailingHandle {
    stats: Arc<StubStats>,
}

impl EntropyHandle for FailingHandle {
    fn label(&self) -> &'static str {
        "failing"
    }

    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        self.stats.check_read()?;
        Err(Error::DeviceReadFailure("failing stub".into()))
    }
}
