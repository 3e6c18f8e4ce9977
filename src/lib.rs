//! User-space Prime+Probe last-level-cache covert-channel receiver.
//!
//! Given a co-resident process that modulates its own memory-access
//! pattern, this crate discovers the last-level cache's eviction sets,
//! continuously probes them on a fixed cadence, and decodes the resulting
//! per-channel sample streams into bits given a known preamble.
//!
//! The pipeline runs in five stages: [`barrier`] supplies the ordering
//! primitive every timed access is threaded through, [`timer`] supplies a
//! calibrated cycle counter, [`backend`] owns the addressable memory the
//! rest of the crate evicts and times, [`evicter`] answers whether a
//! candidate set evicts a witness, and [`builder`] uses that oracle to
//! discover eviction sets. [`probe`] turns a discovered set into a
//! timeslotted sample stream, [`signal`] packages that into consumer-facing
//! [`signal::Source`]/[`signal::SourceGroup`] handles and decodes the
//! resulting stream. [`constant`] is a standalone branch-free comparison
//! library used elsewhere in the codebase this crate was extracted from.
//!
//! ```no_run
//! let mut group = llc_probe::create().expect("eviction-set discovery failed");
//! let first_channel = group.channels()[0];
//! let samples = group.read_channel(first_channel);
//! ```

pub mod backend;
pub mod barrier;
pub mod builder;
pub mod constant;
pub mod error;
pub mod evicter;
pub mod probe;
pub mod sampler;
pub mod signal;
pub mod timer;

use serde_derive::{Deserialize, Serialize};

use crate::backend::{BackendConfig, Cache};
use crate::barrier::Chain;
use crate::builder::BuilderConfig;
use crate::error::{Error, Result};
use crate::evicter::{Evicter, EvicterConfig};
use crate::probe::{EvictionCountReader, ReaderConfig, State};
use crate::signal::SourceGroup;
use crate::timer::{CalibratedTimer, Tick32};

/// Every knob `create_with_config` exposes, bundled into one struct with
/// a `Default` impl and per-component sub-configs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CrateConfig {
    pub backend: BackendConfig,
    pub evicter: EvicterConfig,
    pub builder: BuilderConfig,
    pub reader: ReaderConfig,
}

/// Builds a `SourceGroup` against a default 16 MiB backend, a default
/// 32-bit serializing cycle counter, and default evicter/builder/reader
/// configuration: calibrates a hit/miss threshold, discovers every usable
/// eviction set, and returns a handle ready to read any of them.
///
/// Fails if threshold calibration cannot find a clean hit/miss separation,
/// or if the builder discovers zero usable eviction sets (a `SourceGroup`
/// with no channels is not useful to a caller, even though
/// `build_eviction_sets` itself treats that as a legal, non-erroring
/// outcome -- see `error::Error::NoEvictionSets`).
pub fn create() -> Result<SourceGroup<Cache, Tick32>> {
    create_with_config(CrateConfig::default())
}

/// `create`, with every component's configuration overridable.
pub fn create_with_config(config: CrateConfig) -> Result<SourceGroup<Cache, Tick32>> {
    let mut chain = Chain::new();

    let backend = Cache::new(config.backend);
    let timer = CalibratedTimer::new(Tick32);
    // Force calibration now, before any reader is spawned, so the
    // process-wide `OnceLock` is written exactly once and every later
    // `get_ticks` call sees an already-calibrated timer.
    let _ = timer.settings(&mut chain);

    let evicter = Evicter::new(&backend, &timer, config.evicter, &mut chain)?;

    let start = std::time::Instant::now();
    let sets = builder::build_eviction_sets(&backend, &evicter, &config.builder, &mut chain);
    log::info!(
        "llc_probe::create: {} channels discovered in {:?}",
        sets.len(),
        start.elapsed()
    );

    if sets.is_empty() {
        return Err(Error::NoEvictionSets);
    }

    let state = std::sync::Arc::new(State::new(backend, timer, sets));
    let reader = EvictionCountReader::new(config.reader);
    Ok(SourceGroup::new(state, reader))
}
