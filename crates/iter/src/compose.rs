//! AND/OR composers over boxed sub-iterators. Styled after
//! `doc::combine`'s composable-stage shape: each
//! composer owns its subs and implements the full `PrimitiveIter` contract
//! rather than leaking its internals.

use crate::{charge, Direction, PrimitiveIter, Step, Stats};
use graphd_guid::Pid;

/// Intersection of its subs. Advances via leapfrog: take a candidate from
/// the first sub, `find` it in every other sub, and if any sub reports a
/// different (larger, in forward direction) PID, retry with that PID as
/// the new candidate. Short-circuits to `No` the moment any sub is
/// exhausted (short-circuits on empty).
pub struct AndIter {
    subs: Vec<Box<dyn PrimitiveIter>>,
    direction: Direction,
    exhausted: bool,
}

impl AndIter {
    pub fn new(subs: Vec<Box<dyn PrimitiveIter>>) -> Self {
        let direction = subs.first().map(|s| s.direction()).unwrap_or(Direction::Forward);
        assert!(
            subs.iter().all(|s| s.direction() == direction),
            "AND composer requires all subs to share a direction"
        );
        let exhausted = subs.is_empty();
        Self { subs, direction, exhausted }
    }
}

impl PrimitiveIter for AndIter {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn next(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Step<Pid> {
        if self.exhausted {
            return Step::No;
        }
        let Some((first, rest)) = self.subs.split_first_mut() else {
            return Step::No;
        };
        let mut candidate = match first.next(low, high, budget) {
            Step::Value(id) => id,
            Step::No => {
                self.exhausted = true;
                return Step::No;
            }
            Step::More => return Step::More,
        };

        'outer: loop {
            for sub in rest.iter_mut() {
                match sub.find(low, high, candidate, budget) {
                    Step::Value(id) if id == candidate => continue,
                    Step::Value(id) => {
                        // This sub jumped past candidate; restart the
                        // leapfrog from the new position via `first`.
                        candidate = match first.find(low, high, id, budget) {
                            Step::Value(id) => id,
                            Step::No => {
                                self.exhausted = true;
                                return Step::No;
                            }
                            Step::More => return Step::More,
                        };
                        continue 'outer;
                    }
                    Step::No => {
                        self.exhausted = true;
                        return Step::No;
                    }
                    Step::More => return Step::More,
                }
            }
            return Step::Value(candidate);
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
        if !charge(budget, PDB_ESTIMATE_COST) {
            return Step::More;
        }
        let mut total_n = u64::MAX;
        let mut next_cost = 0u64;
        for sub in self.subs.iter_mut() {
            match sub.statistics(budget) {
                Step::Value(s) => {
                    total_n = total_n.min(s.total_n);
                    next_cost += s.next_cost;
                }
                Step::No => return Step::No,
                Step::More => return Step::More,
            }
        }
        if self.subs.is_empty() {
            total_n = 0;
        }
        Step::Value(Stats { total_n, next_cost })
    }

    fn freeze(&self, out: &mut String) {
        out.push_str("and(");
        for (i, sub) in self.subs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            sub.freeze(out);
        }
        out.push(')');
    }
}

const PDB_ESTIMATE_COST: i64 = 1;

/// Union of its subs, deduplicating PIDs that multiple subs produce.
pub struct OrIter {
    subs: Vec<Box<dyn PrimitiveIter>>,
    direction: Direction,
    /// Each sub's next un-consumed candidate, fetched lazily.
    pending: Vec<Option<Pid>>,
}

impl OrIter {
    pub fn new(subs: Vec<Box<dyn PrimitiveIter>>) -> Self {
        let direction = subs.first().map(|s| s.direction()).unwrap_or(Direction::Forward);
        assert!(
            subs.iter().all(|s| s.direction() == direction),
            "OR composer requires all subs to share a direction"
        );
        let pending = vec![None; subs.len()];
        Self { subs, direction, pending }
    }

    fn fill_pending(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Option<Step<()>> {
        for (sub, slot) in self.subs.iter_mut().zip(self.pending.iter_mut()) {
            if slot.is_none() {
                match sub.next(low, high, budget) {
                    Step::Value(id) => *slot = Some(id),
                    Step::No => {}
                    Step::More => return Some(Step::More),
                }
            }
        }
        None
    }
}

impl PrimitiveIter for OrIter {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn next(&mut self, low: Pid, high: Pid, budget: &mut i64) -> Step<Pid> {
        if let Some(Step::More) = self.fill_pending(low, high, budget) {
            return Step::More;
        }

        let best = self
            .pending
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|id| (i, id)))
            .min_by_key(|(_, id)| match self.direction {
                Direction::Forward => id.0,
                Direction::Backward => u64::MAX - id.0,
            });

        let Some((_, best_id)) = best else {
            return Step::No;
        };

        // Consume `best_id` from every sub that is currently offering it
        // (collapsing duplicates across subs).
        for slot in self.pending.iter_mut() {
            if *slot == Some(best_id) {
                *slot = None;
            }
        }
        Step::Value(best_id)
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
        if !charge(budget, PDB_ESTIMATE_COST) {
            return Step::More;
        }
        let mut total_n = 0u64;
        let mut next_cost = 0u64;
        for sub in self.subs.iter_mut() {
            match sub.statistics(budget) {
                Step::Value(s) => {
                    total_n += s.total_n;
                    next_cost += s.next_cost;
                }
                Step::No => {}
                Step::More => return Step::More,
            }
        }
        Step::Value(Stats { total_n, next_cost })
    }

    fn freeze(&self, out: &mut String) {
        out.push_str("or(");
        for (i, sub) in self.subs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            sub.freeze(out);
        }
        out.push(')');
    }
}
