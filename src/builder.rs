//! Eviction-set builder: discovers groups of addresses that, together,
//! evict any one of their own members from the last-level cache.

use rand::seq::SliceRandom;
use serde_derive::{Deserialize, Serialize};

use crate::backend::{Address, AddressBackend};
use crate::barrier::Chain;
use crate::evicter::Oracle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Target eviction-set size (an n-way last-level cache slice's
    /// associativity).
    pub target_size: usize,
    /// Smallest contracted size still accepted as a usable set.
    pub size_lower: usize,
    /// Largest contracted size still accepted as a usable set.
    pub size_upper: usize,
    /// Contraction passes attempted per discovered candidate group.
    pub contract_count: usize,
    /// Consecutive failed attempts tolerated before giving up.
    pub attempt_count: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let target_size = 16;
        BuilderConfig {
            target_size,
            size_lower: target_size - 1,
            size_upper: target_size + 4,
            contract_count: 10,
            attempt_count: 20,
        }
    }
}

/// Repeatedly expands, contracts, and collects candidate groups out of
/// `backend.addresses()` until the pool is exhausted or `attempt_count`
/// consecutive attempts fail to land a set in `[size_lower, size_upper]`.
///
/// Each minimal group discovered this way is then handed to
/// `backend.extend_elements` to produce every cache-line-offset sibling of
/// that group -- the caller-visible channels are these extended sets, not
/// the raw minimal groups, since one discovered group at page offset zero
/// implies a working eviction set at every other offset in the same page.
pub fn build_eviction_sets<B: AddressBackend, O: Oracle>(
    backend: &B,
    oracle: &O,
    config: &BuilderConfig,
    chain: &mut Chain,
) -> Vec<Vec<Address>> {
    let mut candidates: Vec<Address> = backend.addresses().to_vec();
    let mut minimal_sets = Vec::new();
    let mut failures = 0usize;
    let mut rng = rand::thread_rng();

    // Reshuffling every outer iteration (rather than once, up front) keeps
    // a single pathological subsequence of candidates from deadlocking
    // every subsequent attempt on the same doomed ordering.
    while candidates.len() > config.target_size && failures < config.attempt_count {
        candidates.shuffle(&mut rng);

        let (mut working, witness) = match phase_expand(&mut candidates, oracle, config, chain) {
            Some(ExpandOutcome::Succeeded { working, witness }) => (working, witness),
            Some(ExpandOutcome::Failed { working, witness }) => {
                candidates.extend(working);
                candidates.extend(witness);
                failures += 1;
                continue;
            }
            None => {
                failures += 1;
                continue;
            }
        };

        for _ in 0..config.contract_count {
            if working.len() <= config.size_upper {
                break;
            }
            phase_contract(&mut working, witness, &mut candidates, oracle, chain);
        }

        if working.len() >= config.size_lower && working.len() <= config.size_upper {
            let _congruent = phase_collect(&working, &mut candidates, oracle, chain);
            minimal_sets.push(working);
            failures = 0;
        } else {
            candidates.extend(working);
            candidates.push(witness);
            failures += 1;
        }
    }

    log::info!(
        "eviction-set builder: {} minimal sets constructed from {} remaining candidates",
        minimal_sets.len(),
        candidates.len()
    );

    let sets: Vec<Vec<Address>> = minimal_sets
        .iter()
        .flat_map(|minimal| backend.extend_elements(minimal))
        .collect();

    log::info!(
        "eviction-set builder: {} channels after cache-line-offset extension",
        sets.len()
    );
    sets
}

/// `build_eviction_sets`, but first grows the backend by `extend_count`
/// fresh addresses and folds them into the candidate pool -- for callers
/// who know the initial backend allocation undershot what this cache's
/// associativity needs.
pub fn build_eviction_sets_extended<B: AddressBackend, O: Oracle>(
    backend: &mut B,
    oracle: &O,
    config: &BuilderConfig,
    extend_count: usize,
    chain: &mut Chain,
) -> Vec<Vec<Address>> {
    backend.extend(extend_count);
    build_eviction_sets(backend, oracle, config, chain)
}

/// Outcome of a `phase_expand` attempt. The failure variant still carries
/// back everything popped from `candidates` so the caller can restore the
/// pool instead of leaking addresses out of it on a failed attempt.
enum ExpandOutcome {
    Succeeded { working: Vec<Address>, witness: Address },
    Failed { working: Vec<Address>, witness: Option<Address> },
}

/// Grows a working set one candidate at a time, folding in every witness
/// that fails to be evicted, until a witness succeeds or the bailout
/// budget (`|candidates| / 2`, or all of `|candidates|` when the pool is
/// small) is spent.
fn phase_expand<O: Oracle>(
    candidates: &mut Vec<Address>,
    oracle: &O,
    config: &BuilderConfig,
    chain: &mut Chain,
) -> Option<ExpandOutcome> {
    if candidates.len() < config.target_size {
        return None;
    }

    let mut working = Vec::with_capacity(config.target_size);
    for _ in 0..(config.target_size - 1) {
        working.push(candidates.pop().expect("candidates.len() >= target_size checked above"));
    }
    let mut witness = candidates.pop().expect("candidates.len() >= target_size checked above");

    let bailout = if candidates.len() < 10 * config.target_size {
        candidates.len()
    } else {
        candidates.len() / 2
    };

    for _ in 0..bailout {
        working.push(witness);
        witness = match candidates.pop() {
            Some(addr) => addr,
            None => return Some(ExpandOutcome::Failed { working, witness: None }),
        };
        if oracle.evicts(witness, &working, chain) {
            return Some(ExpandOutcome::Succeeded { working, witness });
        }
    }

    Some(ExpandOutcome::Failed { working, witness: Some(witness) })
}

/// One back-to-front pass over `working`: pop the last element, test
/// whether the remaining set still evicts `witness` without it. If so the
/// element was redundant and moves back to `candidates`; if not it is
/// load-bearing and gets rotated back in at `index`, which then advances.
/// Returns whether anything was shed.
fn phase_contract<O: Oracle>(
    working: &mut Vec<Address>,
    witness: Address,
    candidates: &mut Vec<Address>,
    oracle: &O,
    chain: &mut Chain,
) -> bool {
    let mut shed = false;
    let mut index = 0;

    while index < working.len() {
        let element = working.pop().expect("index < working.len()");
        if oracle.evicts(witness, working, chain) {
            candidates.push(element);
            shed = true;
        } else {
            working.push(element);
            let last = working.len() - 1;
            working.swap(index, last);
            index += 1;
        }
    }

    shed
}

/// Scans `candidates` for addresses `working` also evicts -- other
/// members of the same congruence class -- and swap-removes them so they
/// are not wasted as witnesses in a later, doomed attempt against an
/// already-discovered group. Returns the addresses removed this way.
fn phase_collect<O: Oracle>(
    working: &[Address],
    candidates: &mut Vec<Address>,
    oracle: &O,
    chain: &mut Chain,
) -> Vec<Address> {
    let mut collected = Vec::new();
    let mut i = 0;
    while i < candidates.len() {
        if oracle.evicts(candidates[i], working, chain) {
            collected.push(candidates.swap_remove(i));
        } else {
            i += 1;
        }
    }
    collected
}
