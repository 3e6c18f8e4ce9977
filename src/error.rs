use failure::Fail;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Setup-time failures. Nothing on the measurement path (`evict_and_time`,
/// `probe`, `read_channel`, ...) returns `Error` -- those failures are
/// in-band values (`MISSED_TIMESLOT`, empty eviction-set lists, `None`
/// signals).
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(
        display = "could not calibrate an eviction threshold: hit measurement {} >= miss measurement {}",
        hit, miss
    )]
    Calibration { hit: u64, miss: u64 },

    #[fail(display = "eviction-set builder discovered no usable eviction sets")]
    NoEvictionSets,
}
