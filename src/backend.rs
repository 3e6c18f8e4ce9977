//! Address backend: the pool of addressable cache lines the rest of this
//! crate evicts, times, and probes, behind a trait so the eviction-set
//! builder, evicter, and probe reader never depend on how the memory behind
//! an address is actually organized.

use serde_derive::{Deserialize, Serialize};

use crate::barrier::Chain;

/// Cache-line size in bytes on the targeted microarchitecture.
pub const CACHELINE_SIZE: usize = 64;

/// Page size in bytes; candidate addresses are spread one per page so that
/// a single eviction set cannot trivially collapse onto one cache set via
/// physical-address aliasing within a page.
pub const PAGE_SIZE: usize = 4096;

/// Default backing-store size: large enough to comfortably outsize a
/// last-level cache on commodity hardware.
pub const DEFAULT_CACHE_SIZE: usize = 16 * 1024 * 1024;

/// Default number of addresses an eviction set is expected to need on a
/// typical n-way last-level cache slice.
pub const DEFAULT_EVICTION_SET_SIZE: usize = 16;

/// Opaque handle to one addressable, cache-line-sized element.
///
/// Deliberately not a pointer: callers never see or dereference backing
/// memory directly, so there is no way to alias an `Address` against
/// anything outside the backend that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(usize);

impl Address {
    /// Exposed crate-wide (not publicly) so other backends and tests can
    /// mint addresses without reaching into this field directly.
    pub(crate) fn from_index(index: usize) -> Self {
        Address(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Configuration for the default `Cache` backend. Mirrors the role
/// `SamplingConfig`/`CountConfig` play in describing a measurement setup
/// before it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Total bytes to allocate as candidate addresses.
    pub cache_size: usize,
    /// Stride, in bytes, between consecutive candidate addresses. Defaults
    /// to `PAGE_SIZE` so addresses land on distinct pages.
    pub stride: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            cache_size: DEFAULT_CACHE_SIZE,
            stride: PAGE_SIZE,
        }
    }
}

/// A pool of addressable memory the rest of the crate can access and grow.
pub trait AddressBackend {
    /// All addresses currently known to the backend.
    fn addresses(&self) -> &[Address];

    /// Reads through `address`, folding the result into `chain` so the read
    /// cannot be reordered away from whatever the caller measures around
    /// it. Returns the word read (unused by callers beyond keeping the
    /// read live).
    fn access(&self, address: Address, chain: &mut Chain) -> u32;

    /// Grows the backing store by `count` elements and returns their
    /// addresses, appended to `addresses()`. The eviction-set builder calls
    /// this when its initial candidate pool turns out to be too small for
    /// the measured associativity.
    fn extend(&mut self, count: usize) -> Vec<Address>;

    /// Expands one discovered eviction set into every sibling set reachable
    /// by shifting each member through the cache-line offsets of its page.
    ///
    /// The LLC's set-index bits span both the page-coloring bits (which
    /// `minimal_set`'s addresses already differ by, one per page) and the
    /// cache-line bits within a page. Having found one conflicting set at
    /// page offset zero, every other cache-line offset in the same page is
    /// a working eviction set too -- this is what turns one discovered
    /// group into `PAGE_SIZE / CACHELINE_SIZE` usable channels instead of
    /// one.
    fn extend_elements(&self, minimal_set: &[Address]) -> Vec<Vec<Address>>;
}

/// Default `AddressBackend`: a flat, page-strided buffer of cache-line-sized
/// elements.
///
/// Internally the buffer is laid out at full cache-line granularity --
/// `lines_per_page` lines per `config.stride` bytes -- even though
/// `addresses()` only ever surfaces the first line of each page as a
/// candidate. The rest become reachable through `extend_elements`, which is
/// the only way this backend's cache-line-offset siblings are exposed.
///
/// Each element is independently cache-line aligned so that accessing one
/// cannot incidentally pull a neighbor into the same line; the `data` word
/// is mutated on every access specifically so the compiler cannot constant
/// fold the read into a value known ahead of time.
pub struct Cache {
    config: BackendConfig,
    lines_per_page: usize,
    lines: Vec<Line>,
    addrs: Vec<Address>,
}

#[repr(align(64))]
struct Line {
    data: std::cell::Cell<u32>,
}

impl Line {
    fn new(seed: u32) -> Self {
        Line {
            data: std::cell::Cell::new(seed),
        }
    }
}

impl Cache {
    pub fn new(config: BackendConfig) -> Self {
        let lines_per_page = (config.stride / CACHELINE_SIZE).max(1);
        let pages = config.cache_size / config.stride.max(1);
        let lines: Vec<Line> = (0..pages * lines_per_page).map(|i| Line::new(i as u32 + 1)).collect();
        let addrs = (0..pages).map(|page| Address(page * lines_per_page)).collect();
        Cache {
            config,
            lines_per_page,
            lines,
            addrs,
        }
    }

    pub fn config(&self) -> BackendConfig {
        self.config
    }
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new(BackendConfig::default())
    }
}

impl AddressBackend for Cache {
    fn addresses(&self) -> &[Address] {
        &self.addrs
    }

    fn access(&self, address: Address, chain: &mut Chain) -> u32 {
        let line = &self.lines[address.0];
        let value = line.data.get();
        let read = chain.read(&value);
        line.data.set(read.wrapping_add(1));
        read
    }

    fn extend(&mut self, count: usize) -> Vec<Address> {
        let pages = (count + self.lines_per_page - 1) / self.lines_per_page;
        let start_page = self.lines.len() / self.lines_per_page;
        let base = self.lines.len();
        self.lines
            .extend((0..pages * self.lines_per_page).map(|i| Line::new((base + i) as u32 + 1)));
        let new_addrs: Vec<Address> = (start_page..start_page + pages)
            .map(|page| Address(page * self.lines_per_page))
            .collect();
        self.addrs.extend_from_slice(&new_addrs);
        new_addrs
    }

    fn extend_elements(&self, minimal_set: &[Address]) -> Vec<Vec<Address>> {
        (0..self.lines_per_page)
            .map(|offset| {
                minimal_set
                    .iter()
                    .map(|addr| Address(addr.0 - (addr.0 % self.lines_per_page) + offset))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cache_has_cache_size_over_stride_elements() {
        let config = BackendConfig {
            cache_size: 4096 * 10,
            stride: 4096,
        };
        let cache = Cache::new(config);
        assert_eq!(cache.addresses().len(), 10);
    }

    #[test]
    fn extend_appends_addresses_without_disturbing_existing_ones() {
        let mut cache = Cache::new(BackendConfig {
            cache_size: 4096 * 4,
            stride: 4096,
        });
        let before = cache.addresses().to_vec();
        let added = cache.extend(3);
        assert_eq!(added.len(), 3);
        assert_eq!(cache.addresses().len(), before.len() + 3);
        assert_eq!(&cache.addresses()[..before.len()], before.as_slice());
    }

    #[test]
    fn access_mutates_state_so_reads_cannot_be_constant_folded() {
        let cache = Cache::new(BackendConfig {
            cache_size: 4096 * 2,
            stride: 4096,
        });
        let mut chain = Chain::new();
        let addr = cache.addresses()[0];
        let first = cache.access(addr, &mut chain);
        let second = cache.access(addr, &mut chain);
        assert_ne!(first, second);
    }

    #[test]
    fn extend_elements_yields_one_sibling_set_per_cacheline_offset() {
        let cache = Cache::new(BackendConfig {
            cache_size: 4096 * 4,
            stride: 4096,
        });
        let minimal_set = vec![cache.addresses()[0], cache.addresses()[1]];

        let extended = cache.extend_elements(&minimal_set);

        assert_eq!(extended.len(), PAGE_SIZE / CACHELINE_SIZE);
        // offset zero reproduces the original minimal set
        assert_eq!(extended[0], minimal_set);
        // every sibling set still has one address per page, distinct per offset
        for (offset, set) in extended.iter().enumerate() {
            assert_eq!(set.len(), minimal_set.len());
            for (original, shifted) in minimal_set.iter().zip(set.iter()) {
                assert_eq!(shifted.0, original.0 + offset);
            }
        }
    }

    #[test]
    fn extend_elements_sets_never_collide_with_each_other() {
        let cache = Cache::new(BackendConfig {
            cache_size: 4096 * 2,
            stride: 4096,
        });
        let minimal_set = vec![cache.addresses()[0]];
        let extended = cache.extend_elements(&minimal_set);

        let mut seen = std::collections::HashSet::new();
        for set in &extended {
            for addr in set {
                assert!(seen.insert(*addr), "duplicate address across extended sets");
            }
        }
    }
}
