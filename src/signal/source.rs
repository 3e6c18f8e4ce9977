//! Per-channel and whole-group reader handles built on top of `probe::State`.

use std::sync::Arc;

use crate::backend::AddressBackend;
use crate::barrier::Chain;
use crate::probe::{Channel, EvictionCountReader, Sample, State};
use crate::timer::CycleTimer;

/// One channel's reader, with its own private `Chain` so concurrent
/// `Source`s (were this crate ever made multi-threaded) would never share
/// an ordering-barrier accumulator.
pub struct Source<B, T> {
    state: Arc<State<B, T>>,
    reader: EvictionCountReader,
    channel: Channel,
    chain: Chain,
}

impl<B: AddressBackend, T: CycleTimer> Source<B, T> {
    pub fn new(state: Arc<State<B, T>>, reader: EvictionCountReader, channel: Channel) -> Self {
        Source {
            state,
            reader,
            channel,
            chain: Chain::new(),
        }
    }

    pub fn read(&mut self) -> Vec<Sample> {
        self.reader.read_channel(&self.state, self.channel, &mut self.chain)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

/// Every channel a `State` discovered, read together in channel order.
pub struct SourceGroup<B, T> {
    state: Arc<State<B, T>>,
    reader: EvictionCountReader,
    channels: Vec<Channel>,
    chain: Chain,
}

impl<B: AddressBackend, T: CycleTimer> SourceGroup<B, T> {
    pub fn new(state: Arc<State<B, T>>, reader: EvictionCountReader) -> Self {
        let channels = state.channels();
        SourceGroup {
            state,
            reader,
            channels,
            chain: Chain::new(),
        }
    }

    pub fn read(&mut self) -> Vec<Vec<Sample>> {
        let channels = self.channels.clone();
        self.reader.read_channels(&self.state, &channels, &mut self.chain)
    }

    pub fn read_channel(&mut self, channel: Channel) -> Vec<Sample> {
        self.reader.read_channel(&self.state, channel, &mut self.chain)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_to_source(&self, channel: Channel) -> Source<B, T> {
        Source::new(Arc::clone(&self.state), self.reader.clone(), channel)
    }

    pub fn sources(&self) -> Vec<Source<B, T>> {
        self.channels
            .iter()
            .map(|&channel| self.channel_to_source(channel))
            .collect()
    }
}
