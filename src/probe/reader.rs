//! Eviction-count reader: walks a channel's eviction set once per timeslot
//! and counts how many elements came back slower than `threshold` ticks.

use serde_derive::{Deserialize, Serialize};

use crate::backend::AddressBackend;
use crate::barrier::Chain;
use crate::probe::state::{Channel, State};
use crate::timer::CycleTimer;

/// One timeslot's measurement: the count of eviction-set elements whose
/// access crossed `threshold` ticks, or `MISSED_TIMESLOT` if the slot's
/// timing budget was blown before the walk could complete.
pub type Sample = i16;

pub const MISSED_TIMESLOT: Sample = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Number of timeslots to sample per `read_channel` call.
    pub sample_count: usize,
    /// Ticks allotted to a single timeslot.
    pub slot_length: u64,
    /// Per-element access-time threshold, in ticks, above which an
    /// element counts as evicted for this slot.
    pub threshold: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            sample_count: 10_000,
            slot_length: 3_000,
            threshold: 130,
        }
    }
}

/// Reads one or more channels by walking their eviction sets on a fixed
/// timeslot cadence.
#[derive(Clone)]
pub struct EvictionCountReader {
    config: ReaderConfig,
}

impl EvictionCountReader {
    pub fn new(config: ReaderConfig) -> Self {
        EvictionCountReader { config }
    }

    pub fn config(&self) -> ReaderConfig {
        self.config
    }

    /// Samples `channel` `sample_count` times, alternating the walk
    /// direction every other slot so a directional prefetcher cannot bias
    /// the measurement one way. An odd final slot, if any, walks forward.
    pub fn read_channel<B: AddressBackend, T: CycleTimer>(
        &self,
        state: &State<B, T>,
        channel: Channel,
        chain: &mut Chain,
    ) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(self.config.sample_count);
        let mut remaining = self.config.sample_count;

        while remaining >= 2 {
            samples.push(self.probe(state, channel, Direction::Forward, chain));
            samples.push(self.probe(state, channel, Direction::Reverse, chain));
            remaining -= 2;
        }
        if remaining == 1 {
            samples.push(self.probe(state, channel, Direction::Forward, chain));
        }

        samples
    }

    /// Reads every channel in `channels`, in order, concatenating each
    /// channel's samples. `state` is passed through explicitly to every
    /// `read_channel` call -- earlier drafts of this reader fell back to
    /// whatever `state` the reader itself happened to hold, which meant a
    /// reader reused across two different `State`s silently read the
    /// wrong one; passing it explicitly here closes that off.
    pub fn read_channels<B: AddressBackend, T: CycleTimer>(
        &self,
        state: &State<B, T>,
        channels: &[Channel],
        chain: &mut Chain,
    ) -> Vec<Vec<Sample>> {
        channels
            .iter()
            .map(|&channel| self.read_channel(state, channel, chain))
            .collect()
    }

    fn probe<B: AddressBackend, T: CycleTimer>(
        &self,
        state: &State<B, T>,
        channel: Channel,
        direction: Direction,
        chain: &mut Chain,
    ) -> Sample {
        let timer = state.timer();
        let backend = state.backend();
        let set = state.set(channel);

        let slot_start: u64 = timer.get_ticks(chain).into();

        let elapsed: u64 = timer.get_ticks(chain).into();
        if elapsed.saturating_sub(slot_start) >= self.config.slot_length {
            log::warn!(
                "probe: missed timeslot on channel {} before the walk started",
                channel.index()
            );
            self.spin_to_slot_end(timer, slot_start, chain);
            return MISSED_TIMESLOT;
        }

        let len = set.len();
        let mut count: i16 = 0;
        for step in 0..len {
            let index = match direction {
                Direction::Forward => step,
                Direction::Reverse => len - 1 - step,
            };
            let address = set[index];

            let start: u64 = timer.get_ticks(chain).into();
            backend.access(address, chain);
            let end: u64 = timer.get_ticks(chain).into();

            if end.saturating_sub(start) >= self.config.threshold {
                count = count.saturating_add(1);
            }
        }

        let elapsed: u64 = timer.get_ticks(chain).into();
        if elapsed.saturating_sub(slot_start) >= self.config.slot_length {
            log::warn!(
                "probe: missed timeslot on channel {} during the walk",
                channel.index()
            );
            return MISSED_TIMESLOT;
        }

        self.spin_to_slot_end(timer, slot_start, chain);
        count
    }

    fn spin_to_slot_end<T: CycleTimer>(
        &self,
        timer: &crate::timer::CalibratedTimer<T>,
        slot_start: u64,
        chain: &mut Chain,
    ) {
        loop {
            let now: u64 = timer.get_ticks(chain).into();
            if now.saturating_sub(slot_start) >= self.config.slot_length {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Address, BackendConfig, Cache};
    use crate::timer::{CalibratedTimer, Tick64};

    #[test]
    fn read_channel_alternates_direction_and_returns_sample_count_slots() {
        let backend = Cache::new(BackendConfig::default());
        let timer = CalibratedTimer::new(Tick64);
        let sets = vec![vec![Address::from_index(0), Address::from_index(1)]];
        let state = State::new(backend, timer, sets);

        let reader = EvictionCountReader::new(ReaderConfig {
            sample_count: 5,
            slot_length: 1_000_000,
            threshold: u64::MAX, // nothing crosses it -- every sample is 0
        });
        let mut chain = Chain::new();

        let samples = reader.read_channel(&state, Channel::from_index(0), &mut chain);
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn read_channels_preserves_channel_order() {
        let backend = Cache::new(BackendConfig::default());
        let timer = CalibratedTimer::new(Tick64);
        let sets = vec![
            vec![Address::from_index(0)],
            vec![Address::from_index(1)],
        ];
        let state = State::new(backend, timer, sets);

        let reader = EvictionCountReader::new(ReaderConfig {
            sample_count: 1,
            slot_length: 1_000_000,
            threshold: u64::MAX,
        });
        let mut chain = Chain::new();

        let channels = state.channels();
        let results = reader.read_channels(&state, &channels, &mut chain);
        assert_eq!(results.len(), 2);
    }
}
