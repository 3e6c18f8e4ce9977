//! Signal source handles (`Source`/`SourceGroup`) and the decoder pipeline
//! that turns a raw per-channel sample stream into bits: run-length
//! encoding, low-pass filtering, thresholding, preamble search, and binary
//! decode.

mod decode;
mod source;

pub use decode::{
    decode_binary, find_first, lengths_to_samples, low_pass, repeat, samples_to_lengths,
    threshold_samples, RunLength, Signal,
};
pub use source::{Source, SourceGroup};
