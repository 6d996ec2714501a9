//! The iterator framework.
//!
//! Iterators are a polymorphic sequence of primitive IDs with budgeted
//! `next`/`find`/`statistics` and `freeze`/`thaw`. Dynamic
//! dispatch is modeled as a tagged trait object rather
//! than a C-style vtable struct; the budget is threaded as `&mut i64` on
//! every call, the same way a `Suspend` handle threads through
//! `gazette::journal::read`'s budgeted read loop.

use graphd_guid::Pid;

pub mod glob;
pub mod bin;
pub mod compose;

/// Cost charged for producing one sub-iterator / one step of work, used
/// throughout this crate's composers and the bin-range iterator.
pub const PDB_COST_ITERATOR: i64 = 10;

/// The result of a budgeted iterator operation: a value, a definite
/// negative answer, or "come back with more budget". `NO` and
/// `MORE` are control-flow, not errors, kept out of `Result` so the hot
/// matcher/iterator path stays branch-predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    Value(T),
    No,
    More,
}

impl<T> Step<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Value(v) => Step::Value(f(v)),
            Step::No => Step::No,
            Step::More => Step::More,
        }
    }

    pub fn is_more(&self) -> bool {
        matches!(self, Step::More)
    }
}

/// The natural enumeration order of an iterator. `find`'s "smallest /
/// largest" contract is direction-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Cardinality and per-call cost estimate, used by the AND composer to
/// order subconditions cheapest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_n: u64,
    pub next_cost: u64,
}

/// Charges `cost` against `*budget`, returning `true` if the caller should
/// proceed, or `false` if the budget is already exhausted (the caller must
/// then return `Step::More` without doing the work).
pub fn charge(budget: &mut i64, cost: i64) -> bool {
    if *budget <= 0 {
        return false;
    }
    *budget -= cost;
    true
}

/// Common behavior of every primitive source / composer.
pub trait PrimitiveIter {
    fn direction(&self) -> Direction;

    /// Next PID in `[low, high]` following `direction`, or `No` once
    /// exhausted, or `More` if `budget` ran out first.
    fn next(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Step<Pid>;

    /// Smallest PID `>= target` in `[low, high]` (forward direction), or
    /// the largest PID `<= target` (backward direction). `No` if none.
    fn find(&mut self, low: Pid, high: Pid, target: Pid, budget: &mut i64) -> Step<Pid>;

    /// Estimated cardinality and per-`next` cost.
    fn statistics(&mut self, budget: &mut i64) -> Step<Stats>;

    /// Whether this iterator knows its exact remaining cardinality, and if
    /// so what it is — the "fast count" path.
    fn n_valid(&self) -> bool {
        false
    }

    fn n(&self) -> Option<u64> {
        None
    }

    /// Serializes this iterator's position to escape-safe bytes, appended
    /// to `out`. Large state is expected to be routed through cursor
    /// freeze/thaw and the resource cache by the
    /// caller, not by this method.
    fn freeze(&self, out: &mut String);
}

/// A leaf iterator over an explicit, sorted posting list. Word, prefix, and
/// VIP sources are all iteration over a
/// sorted list of PIDs produced by an index the store maintains; the index
/// itself (tokenization, fan-in thresholds) is out of scope as on-disk
/// primitive store internals, so this single leaf type stands in
/// for all three at this boundary.
pub struct PostingIter {
    ids: Vec<Pid>,
    direction: Direction,
    pos: usize,
}

impl PostingIter {
    /// `ids` must be sorted ascending; `direction` determines whether this
    /// iterator walks it front-to-back or back-to-front.
    pub fn new(mut ids: Vec<Pid>, direction: Direction) -> Self {
        ids.sort_unstable();
        ids.dedup();
        if direction == Direction::Backward {
            ids.reverse();
        }
        Self { ids, direction, pos: 0 }
    }
}

impl PrimitiveIter for PostingIter {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn next(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Step<Pid> {
        while self.pos < self.ids.len() {
            if !charge(budget, 1) {
                return Step::More;
            }
            let id = self.ids[self.pos];
            self.pos += 1;
            if id >= low && id <= high {
                return Step::Value(id);
            }
        }
        Step::No
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

    fn statistics(&mut self, _budget: &mut i64) -> Step<Stats> {
        Step::Value(Stats {
            total_n: (self.ids.len() - self.pos) as u64,
            next_cost: 1,
        })
    }

    fn n_valid(&self) -> bool {
        true
    }

    fn n(&self) -> Option<u64> {
        Some((self.ids.len() - self.pos) as u64)
    }

    fn freeze(&self, out: &mut String) {
        out.push_str(&format!("{}", self.pos));
    }
}

/// An iterator that never yields anything.
pub struct NullIter {
    direction: Direction,
}

impl NullIter {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }
}

impl PrimitiveIter for NullIter {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn next(&mut self, _low: Pid, _high: Pid, _budget: &mut i64) -> Step<Pid> {
        Step::No
    }

    fn find(&mut self, _low: Pid, _high: Pid, _target: Pid, _budget: &mut i64) -> Step<Pid> {
        Step::No
    }

    fn statistics(&mut self, _budget: &mut i64) -> Step<Stats> {
        Step::Value(Stats { total_n: 0, next_cost: 0 })
    }

    fn n_valid(&self) -> bool {
        true
    }

    fn n(&self) -> Option<u64> {
        Some(0)
    }

    fn freeze(&self, _out: &mut String) {}
}
