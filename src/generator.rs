use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand_core::TryRngCore;

use crate::config::Config;
use crate::debias::{Corrections, Engine};
use crate::diagnostics::{Diagnostics, VERSION};
use crate::dispatch::Dispatcher;
use crate::entropy::{self, EntropySource};
use crate::error::Error;
use crate::pending::{self, Completer, Pending};
use crate::range;

struct Shared {
    source: Arc<dyn EntropySource>,
    engine: Mutex<Engine>,
    corrections: Arc<Corrections>,
}

impl Shared {
    // A panic inside a draw leaves the engine usable: at worst the handle is
    // still open, and the next failing read tears it down.
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn random(&self) -> Result<u32, Error> {
        self.engine().next_u32()
    }

    fn random_range(&self, lower: i32, upper: i32) -> Result<i32, Error> {
        range::Span::new(lower, upper)?;
        range::sample_range(&mut self.engine(), lower, upper)
    }
}

/// Hardware random number generator with synchronous and asynchronous access.
///
/// All requests, sync or async, share one engine: device reads are
/// serialized and the correction counter is common to every caller.
pub struct Generator {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl Generator {
    /// Out-of-range settings are clamped the same way as a loaded config.
    pub fn new(source: Box<dyn EntropySource>, config: &Config) -> Self {
        let mut config = config.clone();
        config.validate();
        let source: Arc<dyn EntropySource> = Arc::from(source);
        let corrections = Arc::new(Corrections::default());
        let engine = Engine::new(Arc::clone(&source), &config.debias, Arc::clone(&corrections));
        Self {
            shared: Arc::new(Shared {
                source,
                engine: Mutex::new(engine),
                corrections,
            }),
            dispatcher: Dispatcher::new(config.dispatch.workers),
        }
    }

    /// Builds the source named in `config.source`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(entropy::build_source(&config.source), config)
    }

    /// Whether the source can be opened right now. Probes under the engine
    /// lock so it never opens the device while a draw is reading from it.
    pub fn is_available(&self) -> bool {
        let _engine = self.shared.engine();
        self.shared.source.is_available()
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Samples discarded so far, including range rejections.
    pub fn corrections(&self) -> u64 {
        self.shared.corrections.total()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let (backend, debias) = {
            let engine = self.shared.engine();
            (engine.active_label(), engine.method())
        };
        let debias_corrections = self.shared.corrections.debias();
        let range_corrections = self.shared.corrections.range();
        Diagnostics {
            available: self.is_available(),
            version: VERSION,
            source: self.shared.source.name(),
            backend,
            debias,
            corrections: debias_corrections.saturating_add(range_corrections),
            debias_corrections,
            range_corrections,
        }
    }

    /// Draws an unbiased `u32`, blocking for device I/O and retries.
    pub fn random(&self) -> Result<u32, Error> {
        self.shared.random()
    }

    /// Draws uniformly from `[lower, upper]` (inclusive).
    pub fn random_range(&self, lower: i32, upper: i32) -> Result<i32, Error> {
        self.shared.random_range(lower, upper)
    }

    /// Queues a draw; `on_complete` runs once on a worker thread.
    pub fn random_async<F>(&self, on_complete: F)
    where
        F: FnOnce(Result<u32, Error>) + Send + 'static,
    {
        self.submit_random(Completer::new(on_complete));
    }

    /// Queues a ranged draw; `on_complete` runs once on a worker thread.
    pub fn random_range_async<F>(&self, lower: i32, upper: i32, on_complete: F)
    where
        F: FnOnce(Result<i32, Error>) + Send + 'static,
    {
        self.submit_range(lower, upper, Completer::new(on_complete));
    }

    /// Queues a draw and returns a handle to await or wait on.
    pub fn random_pending(&self) -> Pending<u32> {
        let (completer, pending) = pending::channel();
        self.submit_random(completer);
        pending
    }

    /// Queues a ranged draw and returns a handle to await or wait on.
    pub fn random_range_pending(&self, lower: i32, upper: i32) -> Pending<i32> {
        let (completer, pending) = pending::channel();
        self.submit_range(lower, upper, completer);
        pending
    }

    /// Fills `dest` with unbiased bytes under a single engine lock.
    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut engine = self.shared.engine();
        for chunk in dest.chunks_mut(4) {
            let word = engine.next_u32()?.to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    fn submit_random(&self, completer: Completer<u32>) {
        let shared = Arc::clone(&self.shared);
        self.dispatcher.submit(move || shared.random(), completer);
    }

    fn submit_range(&self, lower: i32, upper: i32, completer: Completer<i32>) {
        let shared = Arc::clone(&self.shared);
        self.dispatcher
            .submit(move || shared.random_range(lower, upper), completer);
    }
}

impl TryRngCore for Generator {
    type Error = Error;

    fn try_next_u32(&mut self) -> Result<u32, Error> {
        self.random()
    }

    fn try_next_u64(&mut self) -> Result<u64, Error> {
        let mut engine = self.shared.engine();
        let low = engine.next_u32()?;
        let high = engine.next_u32()?;
        Ok(u64::from(high) << 32 | u64::from(low))
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest)
    }
}
