//! Cycle timer: a monotonic, cycle-resolution tick counter, serialized
//! against prior loads, plus a lazily-calibrated ticks<->nanoseconds ratio.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::barrier::Chain;
use crate::sampler;

/// A monotonic tick counter with cycle-level resolution.
///
/// `get_ticks` must serialize against prior loads -- the measurement
/// primitive depends on this to bound the witness access it just timed.
pub trait CycleTimer {
    type Ticks: Copy + Ord + Into<u64>;

    fn get_ticks(&self, chain: &mut Chain) -> Self::Ticks;
}

/// 32-bit `rdtscp` reader.
///
/// `rdtscp` is used rather than plain `rdtsc` because it is a serializing
/// read: it cannot be reordered ahead of prior loads, which `rdtsc` alone
/// does not guarantee. Only the low 32 bits of the counter are kept; since
/// every interval this crate measures is a few thousand ticks at most,
/// unsigned subtraction on the truncated counter is correct regardless of
/// wraparound (`Tick32::delta`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Tick32;

impl CycleTimer for Tick32 {
    type Ticks = u32;

    #[inline]
    fn get_ticks(&self, _chain: &mut Chain) -> u32 {
        read_tscp().0 as u32
    }
}

/// 64-bit `rdtscp` reader. See `Tick32` for why `rdtscp` specifically.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tick64;

impl CycleTimer for Tick64 {
    type Ticks = u64;

    #[inline]
    fn get_ticks(&self, _chain: &mut Chain) -> u64 {
        read_tscp().0
    }
}

/// Reads the TSC via `RDTSCP`, returning `(timestamp, IA32_TSC_AUX)`. The
/// second value (logical processor id) is not needed here but is exposed
/// because discarding it inside the `asm!` block would require a dummy
/// output register anyway.
#[cfg(target_arch = "x86_64")]
#[inline]
fn read_tscp() -> (u64, u32) {
    let lo: u32;
    let hi: u32;
    let aux: u32;
    // SAFETY: rdtscp is available on all x86_64 CPUs targeted by this crate
    // and has no side effects observable to safe code.
    unsafe {
        std::arch::asm!(
            "rdtscp",
            out("eax") lo,
            out("edx") hi,
            out("ecx") aux,
            options(nomem, nostack, preserves_flags),
        );
    }
    ((u64::from(hi) << 32) | u64::from(lo), aux)
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn read_tscp() -> (u64, u32) {
    compile_error!("llc_probe's cycle timer requires x86_64 (rdtscp)");
}

/// Result of calibrating a `CycleTimer` against wall-clock time. `ticks` is
/// the tick delta observed over `realtime` in the sample that was kept --
/// widened to `u64` regardless of `T::Ticks`, since it is a diagnostic
/// quantity, not something fed back into the timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub ratio: f32,
    pub realtime: Duration,
    pub ticks: u64,
}

/// Wraps a `CycleTimer` with a process-wide, lazily-computed, one-shot
/// ticks<->nanoseconds calibration.
///
/// Calibration spins for `calibration_length` wall-clock time, counting
/// ticks elapsed, repeats that `sample_count` times, and keeps the
/// `sample_point` percentile -- noise reduction, not statistical rigor, per
/// `sampler`'s contract.
pub struct CalibratedTimer<T: CycleTimer> {
    timer: T,
    settings: OnceLock<Settings>,
}

impl<T: CycleTimer + Default> Default for CalibratedTimer<T> {
    fn default() -> Self {
        CalibratedTimer::new(T::default())
    }
}

impl<T: CycleTimer> CalibratedTimer<T> {
    pub fn new(timer: T) -> Self {
        CalibratedTimer {
            timer,
            settings: OnceLock::new(),
        }
    }

    pub fn get_ticks(&self, chain: &mut Chain) -> T::Ticks {
        self.timer.get_ticks(chain)
    }

    /// Returns the cached calibration, computing it on first use with the
    /// default budget (1ms wall-clock, 5 samples, median).
    pub fn settings(&self, chain: &mut Chain) -> Settings {
        *self
            .settings
            .get_or_init(|| calibrate(&self.timer, Duration::from_millis(1), 0.5, 5, chain))
    }

    /// Forces (re-)calibration with explicit parameters, overwriting any
    /// cached settings. Exposed for callers who need a different budget
    /// than the lazy default; harmless to call more than once since
    /// `Settings` is `Copy` and calibration is idempotent noise-reduction,
    /// not a stateful handshake.
    pub fn calibrate(
        &self,
        calibration_length: Duration,
        sample_point: f32,
        sample_count: usize,
        chain: &mut Chain,
    ) -> Settings {
        let settings = calibrate(
            &self.timer,
            calibration_length,
            sample_point,
            sample_count,
            chain,
        );
        let _ = self.settings.set(settings);
        settings
    }
}

fn calibrate<T: CycleTimer>(
    timer: &T,
    calibration_length: Duration,
    sample_point: f32,
    sample_count: usize,
    chain: &mut Chain,
) -> Settings {
    // `sample` needs a `FnMut` closure; `&mut chain` is re-borrowed each call.
    let result = sampler::sample(sample_point, sample_count, || {
        let clock_start = Instant::now();
        let timer_start = timer.get_ticks(chain);

        let mut clock_end = clock_start;
        let mut timer_end = timer_start;

        while clock_end.duration_since(clock_start) < calibration_length {
            clock_end = Instant::now();
            timer_end = timer.get_ticks(chain);
        }

        let realtime = clock_end.duration_since(clock_start);
        let ticks = timer_end.into() - timer_start.into();
        let ratio = realtime.as_nanos() as f32 / ticks.max(1) as f32;

        CalibrationSample {
            ratio,
            realtime,
            ticks,
        }
    });

    log::debug!(
        "timer calibration: {} ns/tick over {:?} ({} ticks)",
        result.ratio,
        result.realtime,
        result.ticks
    );

    Settings {
        ratio: result.ratio,
        realtime: result.realtime,
        ticks: result.ticks,
    }
}

#[derive(Clone, Copy, PartialEq, PartialOrd)]
struct CalibrationSample {
    ratio: f32,
    realtime: Duration,
    ticks: u64,
}

/// Converts a wall-clock duration into ticks of `T`, using the calibrated
/// ratio.
pub fn realtime_to_ticks<T: CycleTimer>(
    timer: &CalibratedTimer<T>,
    realtime: Duration,
    chain: &mut Chain,
) -> u64 {
    let settings = timer.settings(chain);
    (realtime.as_nanos() as f32 / settings.ratio) as u64
}

/// Converts a tick duration into a wall-clock duration, using the
/// calibrated ratio.
pub fn ticks_to_realtime<T: CycleTimer>(
    timer: &CalibratedTimer<T>,
    ticks: u64,
    chain: &mut Chain,
) -> Duration {
    let settings = timer.settings(chain);
    Duration::from_nanos((ticks as f32 * settings.ratio) as u64)
}
