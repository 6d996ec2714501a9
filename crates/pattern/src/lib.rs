//! The pattern-frame compiler.
//!
//! Lowers a user-visible result/sort/assignment pattern tree into a
//! `(pf_set, pf_one)` pair per assignment, and plans resampling of
//! primitive-dependent atoms, styled after `doc::shape`'s tree-lowering
//! compiler passes: walk a user-facing tree once, produce a compiled
//! intermediate form carrying back-references into the structures it was
//! built from.

use graphd_sort::Criterion;

/// A node in a user-visible pattern tree. `Atom::Guid`,
/// `Name`, `Value`, `Timestamp` are *primitive-dependent*: a value that
/// differs per matched primitive and must be harvested during the
/// per-primitive pump. `Count`/`Cursor` are set-level: they describe the
/// whole matched set, not one primitive, and are never harvested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Unspecified,
    List(Vec<Pattern>),
    Atom(Atom),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Atom {
    Guid,
    Name,
    Value,
    Timestamp,
    Count,
    Cursor,
}

impl Atom {
    pub fn is_primitive_dependent(&self) -> bool {
        matches!(self, Atom::Guid | Atom::Name | Atom::Value | Atom::Timestamp)
    }
}

/// Where a harvested atom's per-primitive value actually lives: an index
/// into `frames`, and the position within that frame's `pf_one` list
/// (recording `(result_offset, element_offset)` in the
/// atom).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Harvest {
    pub frame: usize,
    pub element_offset: usize,
}

/// One compiled pattern frame.
#[derive(Debug, Clone, Default)]
pub struct PatternFrame {
    pub pf_set: Option<Pattern>,
    pub pf_one: Option<Pattern>,
    /// Where `pf_one` sits nested inside `pf_set`, if `pf_set` is a list
    /// (`pf_one_offset` records where the per-primitive list
    /// is nested inside `pf_set`).
    pub pf_one_offset: Option<usize>,
    /// For every primitive-dependent atom at top-level index `i` of this
    /// frame's `pf_set` (when it is a list), where its value is harvested
    /// from.
    pub harvest: fxhash::FxHashMap<usize, Harvest>,
    /// Set for frames compiled purely to support the sort order, with no
    /// non-sort use (a list whose every member is sort-only
    /// becomes sort-only itself).
    pub sort_only: bool,
}

pub struct CompiledPattern {
    /// One entry per assignment, then `result`, then the temporary frame,
    /// in that order (allocate an array of pattern frames of
    /// size `assignment_n + 2`).
    pub frames: Vec<PatternFrame>,
    pub temporary_frame: usize,
    pub want_data: bool,
    pub want_cursor: bool,
    pub want_count: bool,
}

/// Lowers one pattern tree to its `(pf_set, pf_one, pf_one_offset)` triple
///: `pf_one` is the first nested list found directly inside
/// a top-level list; `pf_set` is the whole tree unless it's `Unspecified`.
fn split_set_and_one(pattern: &Pattern) -> (Option<Pattern>, Option<Pattern>, Option<usize>) {
    match pattern {
        Pattern::Unspecified => (None, None, None),
        Pattern::List(elems) => {
            let pf_one_offset = elems.iter().position(|e| matches!(e, Pattern::List(_)));
            let pf_one = pf_one_offset.map(|i| elems[i].clone());
            (Some(pattern.clone()), pf_one, pf_one_offset)
        }
        atom => (Some(atom.clone()), None, None),
    }
}

/// Compiles `assignments` (named sub-patterns), an optional `result`
/// pattern, and an optional `sort` specification into a [`CompiledPattern`]
///.
///
/// `sort` is accepted so its criteria can be harvested exactly like result
/// atoms would be — a sort-by-`value` criterion needs the same
/// per-primitive `value` that a `result=(value)` pattern would — without
/// actually allocating a frame slot for the sort pattern itself (the sort
/// order is consumed by the sort compiler, not by this one).
pub fn compile(
    assignments: &[Pattern],
    result: Option<&Pattern>,
    sort: &[Criterion],
) -> CompiledPattern {
    let assignment_n = assignments.len();
    let result_slot = assignment_n;
    let temporary_frame = assignment_n + 1;

    let mut frames: Vec<PatternFrame> = Vec::with_capacity(assignment_n + 2);
    for pattern in assignments {
        let (pf_set, pf_one, pf_one_offset) = split_set_and_one(pattern);
        frames.push(PatternFrame { pf_set, pf_one, pf_one_offset, harvest: Default::default(), sort_only: false });
    }
    let (result_set, result_one, result_offset) = match result {
        Some(pattern) => split_set_and_one(pattern),
        None => (None, None, None),
    };
    frames.push(PatternFrame {
        pf_set: result_set,
        pf_one: result_one,
        pf_one_offset: result_offset,
        harvest: Default::default(),
        sort_only: false,
    });
    // Temporary frame: a bare per-primitive list, created empty and filled
    // on demand by sample relocation below (a
    // 'temporary' frame is materialized only on demand).
    frames.push(PatternFrame {
        pf_set: None,
        pf_one: Some(Pattern::List(Vec::new())),
        pf_one_offset: None,
        harvest: Default::default(),
        sort_only: false,
    });

    relocate_samples(&mut frames, temporary_frame);

    if !sort.is_empty() {
        relocate_sort_criteria(&mut frames, temporary_frame, sort);
    }

    let want_data = frames.iter().any(|f| f.pf_one.is_some() && f.pf_set.is_some());
    let want_cursor = frames.iter().any(|f| contains_atom(f.pf_set.as_ref(), Atom::Cursor));
    let want_count = frames.iter().any(|f| contains_atom(f.pf_set.as_ref(), Atom::Count));

    CompiledPattern { frames, temporary_frame, want_data, want_cursor, want_count }
}

fn contains_atom(pattern: Option<&Pattern>, target: Atom) -> bool {
    match pattern {
        Some(Pattern::Atom(a)) => *a == target,
        Some(Pattern::List(elems)) => elems.iter().any(|e| contains_atom(Some(e), target)),
        _ => false,
    }
}

/// For every primitive-dependent atom sitting directly inside a frame's
/// `pf_set` list, either links it to an equivalent atom already present in
/// some frame's `pf_one` list, or appends a fresh copy to the temporary
/// frame (Sample relocation).
fn relocate_samples(frames: &mut [PatternFrame], temporary_frame: usize) {
    // Collect (frame_index, pf_set_elem_index, atom) triples first so we
    // don't hold a borrow of `frames` while mutating it.
    let mut to_harvest = Vec::new();
    for (frame_idx, frame) in frames.iter().enumerate() {
        if let Some(Pattern::List(elems)) = &frame.pf_set {
            for (elem_idx, elem) in elems.iter().enumerate() {
                if let Pattern::Atom(a) = elem {
                    if a.is_primitive_dependent() {
                        to_harvest.push((frame_idx, elem_idx, *a));
                    }
                }
            }
        }
    }

    for (frame_idx, elem_idx, atom) in to_harvest {
        let existing = find_existing_atom(frames, atom, temporary_frame);
        let harvest = match existing {
            Some(found) => {
                tracing::trace!(?atom, frame = found.frame, "sample relocation reused existing pf_one slot");
                found
            }
            None => {
                let fresh = append_to_temporary(frames, temporary_frame, atom);
                tracing::trace!(?atom, "sample relocation appended to temporary frame");
                fresh
            }
        };
        frames[frame_idx].harvest.insert(elem_idx, harvest);
    }
}

/// Searches every frame's `pf_one` (skipping the temporary frame, which is
/// filled only as a last resort) for an atom equal to `atom`.
fn find_existing_atom(frames: &[PatternFrame], atom: Atom, temporary_frame: usize) -> Option<Harvest> {
    for (frame_idx, frame) in frames.iter().enumerate() {
        if frame_idx == temporary_frame {
            continue;
        }
        if let Some(Pattern::List(elems)) = &frame.pf_one {
            if let Some(pos) = elems.iter().position(|e| *e == Pattern::Atom(atom)) {
                return Some(Harvest { frame: frame_idx, element_offset: pos });
            }
        }
    }
    None
}

fn append_to_temporary(frames: &mut [PatternFrame], temporary_frame: usize, atom: Atom) -> Harvest {
    let Pattern::List(elems) = frames[temporary_frame].pf_one.get_or_insert_with(|| Pattern::List(Vec::new())) else {
        unreachable!("temporary frame's pf_one is always a list");
    };
    elems.push(Pattern::Atom(atom));
    Harvest { frame: temporary_frame, element_offset: elems.len() - 1 }
}

/// Harvests the atoms a sort criterion needs (`Name`/`Value`/`Timestamp`),
/// marking any *newly* appended temporary-frame atom `sort_only`; an atom
/// that was already harvested for a non-sort use keeps its existing,
/// non-sort status (Sort-only atoms that find an existing
/// non-sort home drop the sort-only flag).
fn relocate_sort_criteria(frames: &mut [PatternFrame], temporary_frame: usize, sort: &[Criterion]) {
    for criterion in sort {
        let Some(atom) = criterion_to_atom(*criterion) else { continue };
        if find_existing_atom(frames, atom, temporary_frame).is_some() {
            continue;
        }
        append_to_temporary(frames, temporary_frame, atom);
    }
    // A temporary-frame atom is sort_only iff it was appended only for
    // sort criteria and never referenced by a non-sort harvest.
    let referenced: std::collections::HashSet<usize> = frames
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != temporary_frame)
        .flat_map(|(_, f)| f.harvest.values().filter(|h| h.frame == temporary_frame).map(|h| h.element_offset))
        .collect();
    if let Some(Pattern::List(elems)) = &frames[temporary_frame].pf_one {
        let all_unreferenced = !elems.is_empty() && (0..elems.len()).all(|i| !referenced.contains(&i));
        frames[temporary_frame].sort_only = all_unreferenced;
    }
}

fn criterion_to_atom(criterion: Criterion) -> Option<Atom> {
    match criterion {
        Criterion::Name => Some(Atom::Name),
        Criterion::Value => Some(Atom::Value),
        Criterion::Timestamp => Some(Atom::Timestamp),
        Criterion::Generation | Criterion::Guid => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unspecified_pattern_compiles_to_no_frame_content() {
        let compiled = compile(&[], Some(&Pattern::Unspecified), &[]);
        let result = &compiled.frames[compiled.frames.len() - 2];
        assert!(result.pf_set.is_none());
        assert!(result.pf_one.is_none());
    }

    #[test]
    fn list_with_nested_list_extracts_pf_one_and_offset() {
        let pattern = Pattern::List(vec![
            Pattern::Atom(Atom::Count),
            Pattern::List(vec![Pattern::Atom(Atom::Name)]),
        ]);
        let compiled = compile(&[], Some(&pattern), &[]);
        let result_idx = compiled.frames.len() - 2;
        let result = &compiled.frames[result_idx];
        assert_eq!(result.pf_one_offset, Some(1));
        assert_eq!(result.pf_one, Some(Pattern::List(vec![Pattern::Atom(Atom::Name)])));
    }

    #[test]
    fn primitive_dependent_atom_in_pf_set_without_existing_one_goes_to_temporary() {
        // result=(name) -- no nested list, so `name` sits directly in pf_set
        // with nowhere existing to live; it must be harvested into the
        // temporary frame.
        let pattern = Pattern::List(vec![Pattern::Atom(Atom::Name)]);
        let compiled = compile(&[], Some(&pattern), &[]);
        let result_idx = compiled.frames.len() - 2;
        let harvest = compiled.frames[result_idx].harvest[&0];
        assert_eq!(harvest.frame, compiled.temporary_frame);

        let Pattern::List(elems) = compiled.frames[compiled.temporary_frame].pf_one.as_ref().unwrap() else {
            panic!("temporary frame's pf_one must be a list");
        };
        assert_eq!(elems[harvest.element_offset], Pattern::Atom(Atom::Name));
    }

    #[test]
    fn primitive_dependent_atom_reuses_an_existing_pf_one_slot() {
        // assignment 0 has a per-primitive list containing `name`;
        // the result pattern also samples `name` at the set level, and
        // should be linked to assignment 0's existing slot rather than
        // duplicating into the temporary frame.
        let assignment = Pattern::List(vec![
            Pattern::Atom(Atom::Count),
            Pattern::List(vec![Pattern::Atom(Atom::Name)]),
        ]);
        let result = Pattern::List(vec![Pattern::Atom(Atom::Name)]);
        let compiled = compile(&[assignment], Some(&result), &[]);

        let result_idx = compiled.frames.len() - 2;
        let harvest = compiled.frames[result_idx].harvest[&0];
        assert_eq!(harvest.frame, 0, "should reuse assignment 0's pf_one, not the temporary frame");
        assert_eq!(harvest.element_offset, 0);
    }

    #[test]
    fn want_data_cursor_count_flags() {
        let result = Pattern::List(vec![
            Pattern::Atom(Atom::Count),
            Pattern::Atom(Atom::Cursor),
            Pattern::List(vec![Pattern::Atom(Atom::Name)]),
        ]);
        let compiled = compile(&[], Some(&result), &[]);
        assert!(compiled.want_data, "has both pf_one and pf_set");
        assert!(compiled.want_cursor);
        assert!(compiled.want_count);
    }

    #[test]
    fn no_cursor_or_count_when_absent() {
        let result = Pattern::List(vec![Pattern::List(vec![Pattern::Atom(Atom::Name)])]);
        let compiled = compile(&[], Some(&result), &[]);
        assert!(!compiled.want_cursor);
        assert!(!compiled.want_count);
    }

    #[test]
    fn sort_only_atom_dropped_when_also_used_non_sort() {
        // result=(value) harvests `value` into the temporary frame first;
        // sorting by `value` afterward must reuse that same slot rather
        // than re-harvesting, and the slot must not be marked sort_only
        // since it already has a non-sort use.
        let result = Pattern::List(vec![Pattern::Atom(Atom::Value)]);
        let compiled = compile(&[], Some(&result), &[Criterion::Value]);
        assert!(!compiled.frames[compiled.temporary_frame].sort_only);
    }

    #[test]
    fn sort_only_frame_when_nothing_else_uses_it() {
        let compiled = compile(&[], None, &[Criterion::Value]);
        assert!(compiled.frames[compiled.temporary_frame].sort_only);
    }
}
