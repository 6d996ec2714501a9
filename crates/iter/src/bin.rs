//! Octet bin-range iterator: walks the bins
//! that cover a `[lo, hi]` string range one at a time, emitting each bin's
//! own posting iterator as a sub-source rather than pre-merging them.
//!
//! Mapping a string value to its bin, and a bin to its posting iterator, is
//! store index machinery (the on-disk primitive
//! store internals are out of scope); this module only owns the bin-walking
//! state machine and takes bin lookup as a pluggable `BinSource`.

use crate::{charge, Direction, PrimitiveIter, Step, Stats, PDB_COST_ITERATOR};
use graphd_guid::Pid;

/// Supplies bin identity and per-bin posting iterators to a [`VRangeIter`].
/// `bin_end` is the total number of distinct bins the store currently
/// knows about, used by `statistics`' density estimate.
pub trait BinSource {
    fn bin_of(&self, value: &str) -> u32;
    fn bin_to_iterator(&self, bin: u32, direction: Direction) -> Box<dyn PrimitiveIter>;
    fn bin_end(&self) -> u32;
    fn primitives_n(&self) -> u64;
}

pub struct VRangeIter<S: BinSource> {
    source: S,
    lo_bin: u32,
    hi_bin: u32,
    cur_bin: u32,
    direction: Direction,
    current: Option<Box<dyn PrimitiveIter>>,
    /// Set once `cur_bin` has walked past `hi_bin` (forward) or below
    /// `lo_bin` (backward); further `next` calls are `No` without charging.
    done: bool,
}

impl<S: BinSource> VRangeIter<S> {
    pub fn new(source: S, lo: &str, hi: &str, direction: Direction) -> Self {
        let lo_bin = source.bin_of(lo);
        let hi_bin = source.bin_of(hi);
        let cur_bin = match direction {
            Direction::Forward => lo_bin,
            Direction::Backward => hi_bin,
        };
        let done = lo_bin > hi_bin;
        Self { source, lo_bin, hi_bin, cur_bin, direction, current: None, done }
    }

    fn advance_bin(&mut self) {
        match self.direction {
            Direction::Forward => {
                if self.cur_bin == self.hi_bin {
                    self.done = true;
                } else {
                    self.cur_bin += 1;
                }
            }
            Direction::Backward => {
                if self.cur_bin == self.lo_bin {
                    self.done = true;
                } else {
                    self.cur_bin -= 1;
                }
            }
        }
    }
}

impl<S: BinSource> PrimitiveIter for VRangeIter<S> {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn next(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Step<Pid> {
        loop {
            if self.done {
                return Step::No;
            }

            if self.current.is_none() {
                if !charge(budget, PDB_COST_ITERATOR) {
                    return Step::More;
                }
                self.current = Some(self.source.bin_to_iterator(self.cur_bin, self.direction));
            }

            let sub = self.current.as_mut().unwrap();
            match sub.next(low, high, budget) {
                Step::Value(id) => return Step::Value(id),
                Step::No => {
                    self.current = None;
                    self.advance_bin();
                }
                Step::More => return Step::More,
            }
        }
    }

    fn find(&mut self, low: Pid, high: Pid, target: Pid, budget: &mut i64) -> Step<Pid> {
        loop {
            match self.next(low, high, budget) {
                Step::Value(id) => {
                    let reached = match self.direction {
                        Direction::Forward => id >= target,
                        Direction::Backward => id <= target,
                    };
                    if reached {
                        return Step::Value(id);
                    }
                }
                other => return other,
            }
        }
    }

    fn statistics(&mut self, budget: &mut i64) -> Step<Stats> {
        if !charge(budget, PDB_COST_ITERATOR) {
            return Step::More;
        }
        let bin_end = self.source.bin_end();
        debug_assert!(bin_end != 0, "statistics requires a non-empty bin set");
        let span = (self.hi_bin - self.lo_bin + 1) as u64;
        let total_n = span * (self.source.primitives_n() / (bin_end as u64 * 2));
        Step::Value(Stats { total_n, next_cost: PDB_COST_ITERATOR as u64 })
    }

    fn freeze(&self, out: &mut String) {
        out.push_str(&format!("{}", self.cur_bin));
    }
}

/// Parses a frozen `cur_bin` and restores a [`VRangeIter`] positioned there,
/// rejecting values outside `[lo_bin - 1, hi_bin + 1]`: the
/// rehydrated cursor may legitimately sit one bin past either edge, having
/// just finished or not yet started that edge bin, but nothing further.
pub fn thaw<S: BinSource>(
    source: S,
    lo: &str,
    hi: &str,
    direction: Direction,
    frozen: &str,
) -> Result<VRangeIter<S>, ThawError> {
    let cur_bin: u32 = frozen.parse().map_err(|_| ThawError::Malformed)?;
    let lo_bin = source.bin_of(lo);
    let hi_bin = source.bin_of(hi);
    let allowed_lo = lo_bin.saturating_sub(1);
    let allowed_hi = hi_bin.saturating_add(1);
    if cur_bin < allowed_lo || cur_bin > allowed_hi {
        return Err(ThawError::OutOfRange);
    }
    let done = cur_bin < lo_bin || cur_bin > hi_bin;
    Ok(VRangeIter { source, lo_bin, hi_bin, cur_bin, direction, current: None, done })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ThawError {
    #[error("frozen bin-range cursor is not a valid integer")]
    Malformed,
    #[error("frozen bin is outside the rehydration range")]
    OutOfRange,
}
