//! Debiasing engine: turns raw samples into uniform 32-bit values.
//!
//! Two methods are supported. `VonNeumann` pairs consecutive samples and keeps
//! the bit of the first sample at every position where the two differ; this is
//! unbiased for any per-position bias as long as samples are independent.
//! `None` trusts the source's own conditioning and only drops pulls the source
//! itself flagged as unusable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{DebiasConfig, DebiasMethod};
use crate::entropy::{EntropyHandle, EntropySource};
use crate::error::Error;

/// Cumulative count of discarded samples. Never reset.
#[derive(Debug, Default)]
pub struct Corrections {
    debias: AtomicU64,
    range: AtomicU64,
}

impl Corrections {
    /// Raw samples dropped by the bias test or flagged unusable by the source.
    pub fn debias(&self) -> u64 {
        self.debias.load(Ordering::SeqCst)
    }

    /// Values rejected by the range sampler to avoid modulo bias.
    pub fn range(&self) -> u64 {
        self.range.load(Ordering::SeqCst)
    }

    /// What callers see as "the" correction count.
    pub fn total(&self) -> u64 {
        self.debias().saturating_add(self.range())
    }

    pub(crate) fn add_debias(&self, n: u64) {
        self.debias.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn add_range(&self, n: u64) {
        self.range.fetch_add(n, Ordering::SeqCst);
    }
}

/// Extracted bits waiting to be emitted, least significant first.
#[derive(Debug, Default)]
struct BitPool {
    bits: u64,
    len: u32,
}

impl BitPool {
    // Pushes the bits of `x` at every position set in `mask`.
    fn extend_masked(&mut self, x: u32, mut mask: u32) {
        while mask != 0 && self.len < 64 {
            let pos = mask.trailing_zeros();
            self.bits |= u64::from((x >> pos) & 1) << self.len;
            self.len += 1;
            mask &= mask - 1;
        }
    }

    fn take_u32(&mut self) -> Option<u32> {
        if self.len < 32 {
            return None;
        }
        let out = self.bits as u32;
        self.bits >>= 32;
        self.len -= 32;
        Some(out)
    }

    fn clear(&mut self) {
        self.bits = 0;
        self.len = 0;
    }
}

/// Owns the (lazily opened) device handle and the extraction state.
///
/// Callers serialize access with a lock around the whole engine, so a draw
/// never interleaves with another draw's reads.
pub struct Engine {
    source: Arc<dyn EntropySource>,
    handle: Option<Box<dyn EntropyHandle>>,
    method: DebiasMethod,
    max_discards: u64,
    pool: BitPool,
    corrections: Arc<Corrections>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn EntropySource>,
        config: &DebiasConfig,
        corrections: Arc<Corrections>,
    ) -> Self {
        Self {
            source,
            handle: None,
            method: config.method,
            max_discards: u64::from(config.max_consecutive_discards.max(1)),
            pool: BitPool::default(),
            corrections,
        }
    }

    pub fn method(&self) -> DebiasMethod {
        self.method
    }

    pub fn corrections(&self) -> &Corrections {
        &self.corrections
    }

    /// Label of the backend behind the open handle, if any.
    pub fn active_label(&self) -> Option<&'static str> {
        self.handle.as_ref().map(|h| h.label())
    }

    /// Drops the device handle and any extracted-but-unused bits.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            log::debug!("closed {} handle", self.source.name());
        }
        self.pool.clear();
    }

    /// Draws one unbiased 32-bit value.
    pub fn next_u32(&mut self) -> Result<u32, Error> {
        match self.method {
            DebiasMethod::VonNeumann => self.next_von_neumann(),
            DebiasMethod::None => self.next_passthrough(),
        }
    }

    fn next_passthrough(&mut self) -> Result<u32, Error> {
        let mut streak = 0;
        loop {
            match self.pull()? {
                Some(value) => return Ok(value),
                None => self.discard(1, &mut streak)?,
            }
        }
    }

    fn next_von_neumann(&mut self) -> Result<u32, Error> {
        let mut streak = 0;
        loop {
            if let Some(value) = self.pool.take_u32() {
                return Ok(value);
            }

            let x = self.pull_usable(&mut streak)?;
            let y = self.pull_usable(&mut streak)?;
            let differing = x ^ y;
            if differing == 0 {
                self.discard(2, &mut streak)?;
                continue;
            }
            streak = 0;
            self.pool.extend_masked(x, differing);
        }
    }

    // Pulls until the source hands back a usable sample.
    fn pull_usable(&mut self, streak: &mut u64) -> Result<u32, Error> {
        loop {
            match self.pull()? {
                Some(value) => return Ok(value),
                None => self.discard(1, streak)?,
            }
        }
    }

    fn discard(&mut self, count: u64, streak: &mut u64) -> Result<(), Error> {
        self.corrections.add_debias(count);
        *streak += count;
        log::trace!("discarded {} sample(s), streak {}", count, streak);
        if *streak >= self.max_discards {
            log::warn!(
                "{} discarded {} samples in a row, giving up on this draw",
                self.source.name(),
                streak
            );
            self.close();
            return Err(Error::DeviceReadFailure(format!(
                "source appears stuck: {} consecutive samples discarded",
                streak
            )));
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<u32>, Error> {
        if self.handle.is_none() {
            let handle = self.source.open()?;
            log::debug!("opened {} via {}", self.source.name(), handle.label());
            self.handle = Some(handle);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(Error::DeviceUnavailable(format!(
                "{} handle missing",
                self.source.name()
            )));
        };
        match handle.read_raw() {
            Ok(sample) => Ok(sample.map(|s| s.0)),
            Err(e) => {
                log::debug!("{} read failed, tearing down handle: {}", self.source.name(), e);
                self.close();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::stub::{BiasedSource, FailingSource, ScriptedSource};
    use crate::stats;

    fn engine(source: Arc<dyn EntropySource>, method: DebiasMethod, max: u32) -> Engine {
        let config = DebiasConfig {
            method,
            max_consecutive_discards: max,
        };
        Engine::new(source, &config, Arc::new(Corrections::default()))
    }

    #[test]
    fn test_von_neumann_keeps_first_bit_of_differing_pairs() {
        let source = ScriptedSource::new(vec![Some(0x0000_FFFF), Some(0xFFFF_0000)]);
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert_eq!(engine.next_u32().unwrap(), 0x0000_FFFF);
        assert_eq!(engine.corrections().total(), 0);
    }

    #[test]
    fn test_von_neumann_equal_pair_is_two_corrections() {
        let source = ScriptedSource::new(vec![
            Some(0xAAAA_AAAA),
            Some(0xAAAA_AAAA),
            Some(0xFFFF_FFFF),
            Some(0x0000_0000),
        ]);
        let stats = source.stats();
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert_eq!(engine.next_u32().unwrap(), 0xFFFF_FFFF);
        assert_eq!(engine.corrections().debias(), 2);
        assert_eq!(engine.corrections().range(), 0);
        assert_eq!(stats.reads(), 4);
    }

    #[test]
    fn test_surplus_bits_carry_into_next_draw() {
        let source = ScriptedSource::new(vec![
            // 8 ones
            Some(0x0000_00FF),
            Some(0x0000_0000),
            // 32 ones -> pool holds 40
            Some(0xFFFF_FFFF),
            Some(0x0000_0000),
            // 24 zeros
            Some(0x0000_0000),
            Some(0x00FF_FFFF),
        ]);
        let stats = source.stats();
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert_eq!(engine.next_u32().unwrap(), 0xFFFF_FFFF);
        assert_eq!(stats.reads(), 4);
        assert_eq!(engine.next_u32().unwrap(), 0x0000_00FF);
        assert_eq!(stats.reads(), 6);
    }

    #[test]
    fn test_unusable_pulls_are_counted() {
        let source = ScriptedSource::new(vec![None, Some(0xFFFF_FFFF), None, Some(0x0000_0000)]);
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert_eq!(engine.next_u32().unwrap(), 0xFFFF_FFFF);
        assert_eq!(engine.corrections().total(), 2);
    }

    #[test]
    fn test_passthrough() {
        let source = ScriptedSource::new(vec![None, Some(42), Some(7)]);
        let mut engine = engine(Arc::new(source), DebiasMethod::None, 16);
        assert_eq!(engine.next_u32().unwrap(), 42);
        assert_eq!(engine.next_u32().unwrap(), 7);
        assert_eq!(engine.corrections().total(), 1);
    }

    #[test]
    fn test_stuck_source_fails_instead_of_spinning() {
        let source = ScriptedSource::cycling(vec![Some(5)]);
        let mut stuck = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        match stuck.next_u32() {
            Err(Error::DeviceReadFailure(msg)) => assert!(msg.contains("stuck")),
            other => panic!("expected stuck failure, got {:?}", other),
        }
        assert_eq!(stuck.corrections().total(), 16);
        assert!(stuck.active_label().is_none());

        let source = ScriptedSource::cycling(vec![None]);
        let mut flagged = engine(Arc::new(source), DebiasMethod::None, 10);
        assert!(matches!(flagged.next_u32(), Err(Error::DeviceReadFailure(_))));
        assert_eq!(flagged.corrections().total(), 10);
    }

    #[test]
    fn test_streak_resets_after_productive_pair() {
        // Two equal pairs, one good pair, two equal pairs: never 6 in a row.
        let source = ScriptedSource::new(vec![
            Some(1),
            Some(1),
            Some(2),
            Some(2),
            Some(0xFFFF_FFFF),
            Some(0),
            Some(3),
            Some(3),
            Some(4),
            Some(4),
            Some(0),
            Some(0xFFFF_FFFF),
        ]);
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 6);
        assert_eq!(engine.next_u32().unwrap(), 0xFFFF_FFFF);
        assert_eq!(engine.next_u32().unwrap(), 0);
        assert_eq!(engine.corrections().total(), 8);
    }

    #[test]
    fn test_read_errors_propagate_and_reopen() {
        let source = FailingSource::broken_reads();
        let stats = source.stats();
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert!(matches!(engine.next_u32(), Err(Error::DeviceReadFailure(_))));
        assert_eq!(stats.opens(), 1);
        assert!(engine.active_label().is_none());
        assert!(matches!(engine.next_u32(), Err(Error::DeviceReadFailure(_))));
        assert_eq!(stats.opens(), 2);
        assert_eq!(engine.corrections().total(), 0);
    }

    #[test]
    fn test_unavailable_source() {
        let mut engine = engine(
            Arc::new(FailingSource::unavailable()),
            DebiasMethod::VonNeumann,
            16,
        );
        assert!(matches!(engine.next_u32(), Err(Error::DeviceUnavailable(_))));
    }

    #[test]
    fn test_device_disappearing_mid_session() {
        let source = ScriptedSource::cycling(vec![Some(0xFFFF_FFFF), Some(0)]);
        let stats = source.stats();
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 16);
        assert_eq!(engine.next_u32().unwrap(), 0xFFFF_FFFF);
        assert_eq!(engine.active_label(), Some("scripted"));

        stats.set_offline(true);
        assert!(matches!(engine.next_u32(), Err(Error::DeviceReadFailure(_))));
        assert!(matches!(engine.next_u32(), Err(Error::DeviceUnavailable(_))));

        stats.set_offline(false);
        assert!(engine.next_u32().is_ok());
        assert_eq!(stats.opens(), 2);
    }

    #[test]
    fn test_biased_source_output_is_uniform() {
        let source = BiasedSource::new(0x5eed, 0.8, Some(7));
        let stats = source.stats();
        let mut engine = engine(Arc::new(source), DebiasMethod::VonNeumann, 1024);

        let draws = 10_000;
        let mut nibbles = [0u64; 16];
        let mut ones_per_bit = [0u64; 32];
        let mut last_corrections = 0;
        let mut last_rejected = 0;

        for _ in 0..draws {
            let value = engine.next_u32().unwrap();
            nibbles[(value >> 28) as usize] += 1;
            for (bit, ones) in ones_per_bit.iter_mut().enumerate() {
                *ones += u64::from((value >> bit) & 1);
            }

            let corrections = engine.corrections().total();
            let rejected = stats.rejected() as u64;
            assert!(corrections >= last_corrections);
            if rejected > last_rejected {
                assert!(corrections - last_corrections >= rejected - last_rejected);
            }
            last_corrections = corrections;
            last_rejected = rejected;
        }

        let chi = stats::chi_square_counts(&nibbles);
        assert!(chi < 48.0, "top-nibble chi-square too large: {:.2}", chi);
        for (bit, &ones) in ones_per_bit.iter().enumerate() {
            let fraction = ones as f64 / draws as f64;
            assert!(
                (fraction - 0.5).abs() < 0.03,
                "bit {} is biased: {:.3}",
                bit,
                fraction
            );
        }
        assert!(stats.rejected() > 0);
        assert!(engine.corrections().total() >= stats.rejected() as u64);
    }

    #[test]
    fn test_passthrough_keeps_source_bias() {
        let source = BiasedSource::new(0x5eed, 0.8, None);
        let mut engine = engine(Arc::new(source), DebiasMethod::None, 16);
        let draws = 2_000;
        let ones: u64 = (0..draws)
            .map(|_| u64::from(engine.next_u32().unwrap().count_ones()))
            .sum();
        let fraction = ones as f64 / (draws * 32) as f64;
        assert!(fraction > 0.75, "expected biased output, got {:.3}", fraction);
    }
}
