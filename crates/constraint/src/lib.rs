//! The constraint node type and the constraint matcher.
//!
//! `match_intrinsics`/`match_structure`/`match_` walk a single constraint
//! node against one candidate primitive, the way `doc::validation` walks a
//! schema node against one JSON value: a tree-shaped predicate evaluator
//! with an explicit, branch-predictable control-flow result (`Answer`)
//! kept separate from `thiserror`-based faults.

use graphd_guid::{DatelineRange, Guid, GuidSet, Linkage};
use graphd_iter::glob;
use graphd_store::{Primitive, ValueType};

/// The hot-path control-flow result of matching: a positive
/// match, a negative match (`No`, never a user-visible error), or a system
/// fault. Kept as a plain enum rather than routed through `thiserror` so
/// the matcher's dominant path stays a cheap `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Ok,
    No,
}

/// A string predicate evaluated against `name` or `value`, in the
/// configured comparator. Only the octet glob comparator is in scope here
/// (other comparator/lexical helpers are external collaborators); `Exact`
/// is provided for predicates that don't want glob semantics.
#[derive(Debug, Clone)]
pub enum StringPredicate {
    Exact(Vec<u8>),
    Glob(String),
}

impl StringPredicate {
    fn matches(&self, target: &[u8]) -> bool {
        match self {
            StringPredicate::Exact(bytes) => bytes == target,
            StringPredicate::Glob(pattern) => {
                let Ok(target) = std::str::from_utf8(target) else { return false };
                glob::glob_match(pattern, target)
            }
        }
    }
}

/// An inclusive range, used for generation and timestamp predicates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Range<T> {
    pub fn contains(&self, v: T) -> bool {
        self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max)
    }
}

/// Include/exclude/match predicate over one linkage slot.
#[derive(Debug, Clone, Default)]
pub struct LinkageConstraint {
    pub include: GuidSet,
    pub exclude: GuidSet,
}

impl LinkageConstraint {
    fn matches(&self, guid: Option<Guid>) -> bool {
        match guid {
            None => self.include.is_empty(),
            Some(guid) => {
                if !self.include.is_empty() && !self.include.contains(&guid) {
                    return false;
                }
                !self.exclude.contains(&guid)
            }
        }
    }
}

/// How a constraint relates to its parent along one linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLinkage {
    /// This constraint's primitive is the parent's `L`.
    IsParentsLinkage(Linkage),
    /// This constraint's own `L` must equal the parent's primitive.
    OwnLinkageIsParent(Linkage),
}

/// Identifies one OR-group branch, used as a key into the OR-map's dense
/// bitset keyed by `(group_id, branch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrBranchKey {
    pub group_id: u32,
    pub branch: OrBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrBranch {
    Head,
    Tail,
}

/// One OR-group: two alternative subconstraints, at most one of which must
/// match for the group to pass.
#[derive(Debug, Clone)]
pub struct OrGroup {
    pub group_id: u32,
    pub head: Box<Constraint>,
    pub tail: Box<Constraint>,
}

/// The constraint node. Only the fields this crate needs are modeled
/// here; pattern/sort/cursor fields live in `graphd-pattern` and attach to
/// this type from there rather than bloating it (kept `pub` so sibling
/// crates can read/write them without a dependency cycle).
#[derive(Debug, Clone)]
pub struct Constraint {
    pub linkage_to_parent: Option<ParentLinkage>,
    pub name: Option<StringPredicate>,
    pub value: Option<StringPredicate>,
    pub value_type: Option<ValueType>,
    pub generation: Range<u32>,
    pub timestamp: Range<i64>,
    pub dateline: DatelineRange,
    pub archival: Option<bool>,
    pub live: Option<bool>,
    pub guid_include: GuidSet,
    pub guid_exclude: GuidSet,
    pub linkages: [LinkageConstraint; 4],
    pub or_groups: Vec<OrGroup>,
    pub children: Vec<Constraint>,

    /// Memoized "this node is known-true/known-false" bits: at most one is
    /// set; `con_true` requires a singleton `guid_include` that has
    /// already matched intrinsics.
    pub con_true: bool,
    pub con_false: bool,
}

impl Default for Constraint {
    fn default() -> Self {
        Self {
            linkage_to_parent: None,
            name: None,
            value: None,
            value_type: None,
            generation: Range::default(),
            timestamp: Range::default(),
            dateline: DatelineRange::default(),
            archival: None,
            live: None,
            guid_include: GuidSet::new(),
            guid_exclude: GuidSet::new(),
            linkages: [
                LinkageConstraint::default(),
                LinkageConstraint::default(),
                LinkageConstraint::default(),
                LinkageConstraint::default(),
            ],
            or_groups: Vec::new(),
            children: Vec::new(),
            con_true: false,
            con_false: false,
        }
    }
}

impl Constraint {
    pub fn new() -> Self {
        Self::default()
    }

    fn value_type_matches(&self, pr: &Primitive) -> bool {
        match &self.value_type {
            None => true,
            Some(ValueType::Unspecified) => true,
            Some(want) => std::mem::discriminant(want) == std::mem::discriminant(&pr.value_type),
        }
    }

    /// Sets the `con_true` memo bit. Only valid to
    /// call once the node has actually matched with a singleton include
    /// set.
    fn memoize_true(&mut self) {
        if self.guid_include.as_singleton().is_some() {
            self.con_true = true;
        }
    }
}

/// Tests `pr` against `con`'s intrinsic predicates only — no structural or
/// OR-group concerns.
///
/// `con` is `&mut` solely to let step 7 memoize `con_true`; a second call
/// on an already-memoized node short-circuits without re-examining `pr`.
pub fn match_intrinsics(con: &mut Constraint, pr: &Primitive) -> Answer {
    if con.con_false {
        return Answer::No;
    }
    if con.con_true {
        return match con.guid_include.as_singleton() {
            Some(guid) if *guid == pr.guid => Answer::Ok,
            _ => Answer::No,
        };
    }

    if let Some(pred) = &con.name {
        if !pred.matches(&pr.name) {
            return Answer::No;
        }
    }
    if let Some(pred) = &con.value {
        if !pred.matches(&pr.value) {
            return Answer::No;
        }
    }

    if !con.timestamp.contains(pr.timestamp) {
        return Answer::No;
    }
    if let Some(want) = con.archival {
        if want != pr.archival {
            return Answer::No;
        }
    }
    if let Some(want) = con.live {
        if want != pr.live {
            return Answer::No;
        }
    }
    if !con.value_type_matches(pr) {
        return Answer::No;
    }

    for (slot, linkage) in con.linkages.iter().zip(Linkage::ALL) {
        if !slot.matches(pr.linkage(linkage)) {
            return Answer::No;
        }
    }

    if !con.dateline.contains(&pr.guid) {
        return Answer::No;
    }
    if !con.guid_include.is_empty() && !con.guid_include.contains(&pr.guid) {
        return Answer::No;
    }
    if con.guid_exclude.contains(&pr.guid) {
        return Answer::No;
    }
    if !con.generation.contains(pr.generation) {
        return Answer::No;
    }

    con.memoize_true();
    Answer::Ok
}

/// Enforces the parent-edge relationship:
/// if `con` claims to *be* its parent's linkage `L`, the caller must already
/// have followed that edge to arrive at `pr` (checked by the caller, not
/// here); if `con`'s own linkage `L` names a child slot, `pr`'s `L` must
/// equal `parent_guid`.
pub fn match_structure(con: &Constraint, pr: &Primitive, parent_guid: Guid) -> Answer {
    match con.linkage_to_parent {
        None => Answer::Ok,
        Some(ParentLinkage::IsParentsLinkage(_)) => Answer::Ok,
        Some(ParentLinkage::OwnLinkageIsParent(l)) => {
            if pr.linkage(l) == Some(parent_guid) {
                Answer::Ok
            } else {
                Answer::No
            }
        }
    }
}

/// Dense bitset of live OR-group branches, keyed by `(group_id, branch)`.
/// `true` means the branch is still a live
/// candidate; `read_or_fail` (called on any intrinsic/structural `No`
/// during later phases) clears the branches that depend on the failing
/// subconstraint.
#[derive(Debug, Clone, Default)]
pub struct OrMap {
    live: fxhash::FxHashMap<OrBranchKey, bool>,
}

impl OrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self, key: OrBranchKey) -> bool {
        *self.live.get(&key).unwrap_or(&true)
    }

    /// Deactivates one branch after it produced `No`, the same way
    /// `read_or_fail` deactivates dependent subconstraints.
    pub fn deactivate(&mut self, key: OrBranchKey) {
        self.live.insert(key, false);
    }
}

/// Composes intrinsic + structural + OR-group matching for `con` and its
/// direct children.
///
/// For every OR-group, both `head` and `tail` are evaluated against `pr`
/// regardless of whether one already matched: the other
/// alternative must still be tried so that fall-through bookkeeping in later
/// phases (the OR-map) reflects both branches, not just the first hit.
pub fn match_(con: &mut Constraint, or_map: &mut OrMap, pr: &Primitive, parent_guid: Option<Guid>) -> Answer {
    if match_intrinsics(con, pr) == Answer::No {
        return Answer::No;
    }
    if let Some(parent_guid) = parent_guid {
        if match_structure(con, pr, parent_guid) == Answer::No {
            return Answer::No;
        }
    }

    for group in &mut con.or_groups {
        let head_key = OrBranchKey { group_id: group.group_id, branch: OrBranch::Head };
        let tail_key = OrBranchKey { group_id: group.group_id, branch: OrBranch::Tail };

        let head_ok = match_(&mut group.head, or_map, pr, Some(pr.guid)) == Answer::Ok;
        if !head_ok {
            or_map.deactivate(head_key);
        }
        let tail_ok = match_(&mut group.tail, or_map, pr, Some(pr.guid)) == Answer::Ok;
        if !tail_ok {
            or_map.deactivate(tail_key);
        }

        if !head_ok && !tail_ok {
            return Answer::No;
        }
    }

    Answer::Ok
}

#[cfg(test)]
mod test {
    use super::*;

    fn primitive(guid: Guid, name: &str) -> Primitive {
        Primitive {
            guid,
            linkages: [None, None, None, None],
            generation: 1,
            timestamp: 100,
            value_type: ValueType::String,
            name: name.as_bytes().to_vec(),
            value: Vec::new(),
            archival: false,
            live: true,
        }
    }

    #[test]
    fn con_false_always_no() {
        let mut con = Constraint { con_false: true, ..Default::default() };
        assert_eq!(match_intrinsics(&mut con, &primitive(Guid::new(1, 1), "x")), Answer::No);
    }

    #[test]
    fn singleton_include_memoizes_con_true_and_skips_reexamination() {
        let mut con = Constraint {
            guid_include: GuidSet::from_iter([Guid::new(1, 1)]),
            ..Default::default()
        };
        let pr = primitive(Guid::new(1, 1), "x");
        assert_eq!(match_intrinsics(&mut con, &pr), Answer::Ok);
        assert!(con.con_true);

        // Mutate the predicate post-memoization; a second call must not
        // re-examine it, it should just compare the cached GUID.
        con.name = Some(StringPredicate::Exact(b"definitely not x".to_vec()));
        assert_eq!(match_intrinsics(&mut con, &pr), Answer::Ok);
    }

    #[test]
    fn non_singleton_include_does_not_memoize() {
        let mut con = Constraint {
            guid_include: GuidSet::from_iter([Guid::new(1, 1), Guid::new(1, 2)]),
            ..Default::default()
        };
        let pr = primitive(Guid::new(1, 1), "x");
        assert_eq!(match_intrinsics(&mut con, &pr), Answer::Ok);
        assert!(!con.con_true);
    }

    #[test]
    fn glob_name_predicate_short_circuits() {
        let mut con = Constraint {
            name: Some(StringPredicate::Glob("alice".to_string())),
            ..Default::default()
        };
        assert_eq!(match_intrinsics(&mut con, &primitive(Guid::new(1, 1), "bob")), Answer::No);
        assert_eq!(match_intrinsics(&mut con, &primitive(Guid::new(1, 1), "alice")), Answer::Ok);
    }

    #[test]
    fn structure_checks_own_linkage_against_parent() {
        let con = Constraint {
            linkage_to_parent: Some(ParentLinkage::OwnLinkageIsParent(Linkage::Scope)),
            ..Default::default()
        };
        let mut pr = primitive(Guid::new(1, 1), "x");
        pr.linkages[3] = Some(Guid::new(9, 9));
        assert_eq!(match_structure(&con, &pr, Guid::new(9, 9)), Answer::Ok);
        assert_eq!(match_structure(&con, &pr, Guid::new(1, 1)), Answer::No);
    }

    #[test]
    fn or_group_passes_if_either_branch_matches_and_evaluates_both() {
        let mut con = Constraint {
            or_groups: vec![OrGroup {
                group_id: 0,
                head: Box::new(Constraint {
                    name: Some(StringPredicate::Exact(b"nope".to_vec())),
                    ..Default::default()
                }),
                tail: Box::new(Constraint::new()),
            }],
            ..Default::default()
        };
        let mut or_map = OrMap::new();
        let pr = primitive(Guid::new(1, 1), "whatever");
        assert_eq!(match_(&mut con, &mut or_map, &pr, None), Answer::Ok);

        let head_key = OrBranchKey { group_id: 0, branch: OrBranch::Head };
        let tail_key = OrBranchKey { group_id: 0, branch: OrBranch::Tail };
        assert!(!or_map.is_live(head_key));
        assert!(or_map.is_live(tail_key));
    }

    #[test]
    fn or_group_fails_when_both_branches_fail() {
        let mut con = Constraint {
            or_groups: vec![OrGroup {
                group_id: 0,
                head: Box::new(Constraint {
                    name: Some(StringPredicate::Exact(b"a".to_vec())),
                    ..Default::default()
                }),
                tail: Box::new(Constraint {
                    name: Some(StringPredicate::Exact(b"b".to_vec())),
                    ..Default::default()
                }),
            }],
            ..Default::default()
        };
        let mut or_map = OrMap::new();
        let pr = primitive(Guid::new(1, 1), "c");
        assert_eq!(match_(&mut con, &mut or_map, &pr, None), Answer::No);
    }

    #[test]
    fn generation_range_gates_match() {
        let mut con = Constraint {
            generation: Range { min: Some(2), max: Some(4) },
            ..Default::default()
        };
        let mut too_young = primitive(Guid::new(1, 1), "x");
        too_young.generation = 1;
        assert_eq!(match_intrinsics(&mut con, &too_young), Answer::No);

        let mut in_range = primitive(Guid::new(1, 1), "x");
        in_range.generation = 3;
        assert_eq!(match_intrinsics(&mut con, &in_range), Answer::Ok);
    }

    #[test]
    fn dateline_range_gates_match() {
        let con = Constraint {
            dateline: DatelineRange { min: Some(Guid::new(5, 0)), max: Some(Guid::new(10, 0)) },
            ..Default::default()
        };
        let mut con = con;
        assert_eq!(match_intrinsics(&mut con, &primitive(Guid::new(3, 0), "x")), Answer::No);
        assert_eq!(match_intrinsics(&mut con, &primitive(Guid::new(7, 0), "x")), Answer::Ok);
    }
}
