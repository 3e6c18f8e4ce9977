//! Continuous probing: the timeslotted measurement loop that turns an
//! eviction set into a stream of per-channel occupancy samples.

mod reader;
mod state;

pub use reader::{Direction, EvictionCountReader, ReaderConfig, Sample, MISSED_TIMESLOT};
pub use state::{Channel, State};
