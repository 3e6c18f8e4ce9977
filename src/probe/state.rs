//! Bundles a backend, a calibrated timer, and the eviction sets discovered
//! against them -- everything a reader needs to probe a channel.

use crate::backend::{Address, AddressBackend};
use crate::timer::{CalibratedTimer, CycleTimer};

/// Identifies one of `State`'s discovered eviction sets. Opaque for the
/// same reason `Address` is: a `Channel` is only ever meaningful relative
/// to the `State` that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(usize);

impl Channel {
    pub(crate) fn from_index(index: usize) -> Self {
        Channel(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Everything a `Source`/`SourceGroup` needs to read a channel: the
/// backend to access through, the timer to measure with, and the eviction
/// sets the builder discovered, one per channel.
pub struct State<B, T> {
    backend: B,
    timer: CalibratedTimer<T>,
    sets: Vec<Vec<Address>>,
}

impl<B: AddressBackend, T: CycleTimer> State<B, T> {
    pub fn new(backend: B, timer: CalibratedTimer<T>, sets: Vec<Vec<Address>>) -> Self {
        State {
            backend,
            timer,
            sets,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn timer(&self) -> &CalibratedTimer<T> {
        &self.timer
    }

    pub fn channel_count(&self) -> usize {
        self.sets.len()
    }

    pub fn channels(&self) -> Vec<Channel> {
        (0..self.sets.len()).map(Channel::from_index).collect()
    }

    pub fn set(&self, channel: Channel) -> &[Address] {
        &self.sets[channel.0]
    }
}
