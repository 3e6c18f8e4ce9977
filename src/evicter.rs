//! Evicter: the timing oracle that answers "does this candidate set evict
//! this witness address from the last-level cache?"

use serde_derive::{Deserialize, Serialize};

use crate::backend::{Address, AddressBackend};
use crate::barrier::Chain;
use crate::error::{Error, Result};
use crate::sampler;
use crate::timer::{CalibratedTimer, CycleTimer};

/// Something that can answer the eviction question, independent of how it
/// measures. The eviction-set builder is written against this trait, not
/// against `Evicter` directly, so it can be driven by a fake oracle in
/// tests.
pub trait Oracle {
    fn evicts(&self, witness: Address, set: &[Address], chain: &mut Chain) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvicterConfig {
    /// Number of `evict_and_time` repetitions kept down to one sample.
    pub sample_count: usize,
    /// Percentile kept from those repetitions (median by default --
    /// robust to the occasional context-switch outlier without the cost
    /// of a trimmed mean).
    pub sample_point: f32,
    /// Fraction of the hit-miss gap added to the hit measurement to land
    /// the threshold away from both clusters.
    pub calibration_separation: f32,
    /// Repetitions used while calibrating the hit and miss timings
    /// themselves.
    pub calibration_samples: usize,
}

impl Default for EvicterConfig {
    fn default() -> Self {
        EvicterConfig {
            sample_count: 5,
            sample_point: 0.5,
            calibration_separation: 0.2,
            calibration_samples: 50,
        }
    }
}

/// Times set-eviction attempts against a calibrated hit/miss threshold.
pub struct Evicter<'a, B, T> {
    backend: &'a B,
    timer: &'a CalibratedTimer<T>,
    config: EvicterConfig,
    threshold: u64,
}

impl<'a, B: AddressBackend, T: CycleTimer> Evicter<'a, B, T> {
    /// Calibrates a threshold from the backend's own addresses before
    /// constructing the evicter. Fails if calibration could not find a
    /// clean hit/miss separation -- see `calibrate_threshold`.
    pub fn new(
        backend: &'a B,
        timer: &'a CalibratedTimer<T>,
        config: EvicterConfig,
        chain: &mut Chain,
    ) -> Result<Self> {
        let threshold = calibrate_threshold(backend, timer, &config, chain)?;
        Ok(Evicter {
            backend,
            timer,
            config,
            threshold,
        })
    }

    /// Builds an evicter from an already-known threshold, bypassing
    /// calibration entirely. Exists for callers who have their own
    /// threshold (from a previous run, or from experimentation) and for
    /// callers who want to proceed with a zero threshold when calibration
    /// fails, instead of treating that as fatal.
    pub fn with_raw_threshold(
        backend: &'a B,
        timer: &'a CalibratedTimer<T>,
        config: EvicterConfig,
        threshold: u64,
    ) -> Self {
        Evicter {
            backend,
            timer,
            config,
            threshold,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Primes `witness`, fills `set` twice to maximize contention pressure
    /// on whatever cache way `witness` lives in, then times one final
    /// access to `witness`. Repeated `sample_count` times and reduced to
    /// the `sample_point` percentile.
    pub fn evict_and_time(&self, witness: Address, set: &[Address], chain: &mut Chain) -> u64 {
        sampler::sample(self.config.sample_point, self.config.sample_count, || {
            self.backend.access(witness, chain);
            for &addr in set {
                self.backend.access(addr, chain);
            }
            for &addr in set {
                self.backend.access(addr, chain);
            }

            let start: u64 = self.timer.get_ticks(chain).into();
            self.backend.access(witness, chain);
            let end: u64 = self.timer.get_ticks(chain).into();
            end - start
        })
    }
}

impl<'a, B: AddressBackend, T: CycleTimer> Oracle for Evicter<'a, B, T> {
    fn evicts(&self, witness: Address, set: &[Address], chain: &mut Chain) -> bool {
        self.evict_and_time(witness, set, chain) >= self.threshold
    }
}

/// Runs the full candidate set `C` through `evict_and_time` twice: once
/// against `C`'s own last element (which should still be cache-resident --
/// it was the most recently accessed thing) and once against `C`'s first
/// element (which the rest of `C` should have evicted by the time it is
/// re-read). `hit` is the high percentile of the first distribution, `miss`
/// the low percentile of the second, so the two samples are pushed apart
/// rather than toward each other before the threshold is set halfway
/// between them.
///
/// Returns `Err(Error::Calibration)` if the hit measurement is not
/// strictly below the miss measurement -- on this hardware the two
/// distributions overlap too much for set-eviction timing to work at all,
/// and proceeding with an arbitrary threshold would silently produce
/// garbage eviction sets rather than a clear failure.
pub fn calibrate_threshold<B: AddressBackend, T: CycleTimer>(
    backend: &B,
    timer: &CalibratedTimer<T>,
    config: &EvicterConfig,
    chain: &mut Chain,
) -> Result<u64> {
    let candidates = backend.addresses().to_vec();
    let evicter = Evicter::with_raw_threshold(backend, timer, *config, 0);

    let last = *candidates.last().expect("backend must have at least one address");
    let first = *candidates.first().expect("backend must have at least one address");

    let hit = sampler::sample(1.0 - config.calibration_separation, config.calibration_samples, || {
        evicter.evict_and_time(last, &candidates, chain)
    });
    let miss = sampler::sample(config.calibration_separation, config.calibration_samples, || {
        evicter.evict_and_time(first, &candidates, chain)
    });

    if hit >= miss {
        log::warn!(
            "eviction threshold calibration failed: hit={} miss={}",
            hit,
            miss
        );
        return Err(Error::Calibration { hit, miss });
    }

    let threshold = hit + (miss - hit) / 2;
    log::debug!(
        "eviction threshold calibrated: hit={} miss={} threshold={}",
        hit,
        miss,
        threshold
    );
    Ok(threshold)
}
