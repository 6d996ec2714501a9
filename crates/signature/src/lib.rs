//! Constraint subtree signature hashing.
//!
//! A stable textual fingerprint of a constraint subtree, used to key
//! plan/result caches the way `doc`'s shape hashing keys schema caches.
//! Two sources of incidental variation are stripped before hashing:
//! dateline/timestamp bounds collapse to "is it bounded" rather than their
//! actual values, and GUIDs without enough linkage fan-in to be worth
//! naming individually are redacted to `#...`: two
//! constraints differing only by a low-fan-in GUID must hash identically.

use fxhash::FxHashMap;
use graphd_constraint::{Constraint, OrGroup, ParentLinkage, Range, StringPredicate};
use graphd_guid::{Guid, Linkage};
use sha2::{Digest, Sha256};

/// Per-linkage fan-in counts, used to decide whether a GUID is named
/// verbatim or redacted (GUIDs with VIP-or-greater fan-in on
/// any linkage are emitted verbatim).
#[derive(Debug, Clone, Default)]
pub struct VipIndex {
    threshold: u32,
    fan_in: FxHashMap<(Guid, Linkage), u32>,
}

impl VipIndex {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, fan_in: FxHashMap::default() }
    }

    pub fn record(&mut self, guid: Guid, linkage: Linkage, count: u32) {
        self.fan_in.insert((guid, linkage), count);
    }

    pub fn is_vip(&self, guid: Guid) -> bool {
        Linkage::ALL
            .iter()
            .any(|&l| self.fan_in.get(&(guid, l)).copied().unwrap_or(0) >= self.threshold)
    }
}

/// Query-level bookkeeping that sits above a [`Constraint`] tree but still
/// feeds into its signature (pagination, sort/result presence, cursor
/// presence): fields the constraint matcher has no use for, so they live here rather
/// than bloating `graphd_constraint::Constraint`.
#[derive(Debug, Clone, Default)]
pub struct SignatureNode {
    pub con: Constraint,
    pub key: bool,
    pub unique: bool,
    pub has_result: bool,
    pub has_sort: bool,
    pub countlimit: Option<u32>,
    pub resultpagesize: Option<u32>,
    pub pagesize: Option<u32>,
    pub start: Option<u32>,
    pub has_cursor: bool,
    pub count: Range<u64>,
    pub has_assignments: bool,
}

impl SignatureNode {
    pub fn new(con: Constraint) -> Self {
        Self { con, ..Default::default() }
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends `token`, inserting a separating space first unless the
    /// buffer is empty or its last byte is `(`, `=`, space, or tab.
    fn token(&mut self, token: &str) {
        if let Some(&last) = self.buf.last() {
            if !matches!(last, b'(' | b'=' | b' ' | b'\t') {
                self.buf.push(b' ');
            }
        }
        self.buf.extend_from_slice(token.as_bytes());
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn linkage_name(l: Linkage) -> &'static str {
    match l {
        Linkage::Left => "left",
        Linkage::Right => "right",
        Linkage::TypeGuid => "type",
        Linkage::Scope => "scope",
    }
}

fn emit_guid(w: &mut Writer, label: &str, guid: Guid, vip: &VipIndex) {
    if vip.is_vip(guid) {
        w.token(&format!("{label}={guid}"));
    } else {
        w.token(&format!("{label}=#..."));
    }
}

fn emit_string_predicate(w: &mut Writer, label: &str, pred: &Option<StringPredicate>) {
    match pred {
        None => {}
        Some(StringPredicate::Exact(bytes)) => {
            w.token(&format!("{label}=\"{}\"", String::from_utf8_lossy(bytes)));
        }
        Some(StringPredicate::Glob(pattern)) => {
            w.token(&format!("{label}~\"{pattern}\""));
        }
    }
}

fn emit_bounded(w: &mut Writer, label: &str, has_min: bool, has_max: bool) {
    if has_min || has_max {
        w.token(&format!("{label}=bounded"));
    }
}

fn emit_range<T: std::fmt::Display + Copy>(w: &mut Writer, label: &str, range: Range<T>) {
    match (range.min, range.max) {
        (None, None) => {}
        (Some(lo), None) => w.token(&format!("{label}>={lo}")),
        (None, Some(hi)) => w.token(&format!("{label}<={hi}")),
        (Some(lo), Some(hi)) => w.token(&format!("{label}={lo}..{hi}")),
    }
}

/// `countlimit/resultpagesize/pagesize/start` category; these are simple
/// `u32` scalars with no redaction concerns.
fn emit_scalar(w: &mut Writer, label: &str, value: Option<u32>) {
    if let Some(v) = value {
        w.token(&format!("{label}={v}"));
    }
}

fn emit_flag(w: &mut Writer, label: &str, value: bool) {
    if value {
        w.token(label);
    }
}

/// string-constraints(name/value) → datatype → flags category, the part of
/// the canonical order that precedes the root-only key/unique/result/sort
/// fields; this crate has no separate "type" string predicate distinct
/// from `name`/`value`.
fn emit_constraint_head(w: &mut Writer, con: &Constraint) {
    emit_string_predicate(w, "name", &con.name);
    emit_string_predicate(w, "value", &con.value);

    if let Some(vt) = &con.value_type {
        w.token(&format!("datatype={vt:?}"));
    }

    emit_flag(w, "archival", con.archival.unwrap_or(false));
    emit_flag(w, "live", con.live.unwrap_or(false));
}

/// generation → GUID/next/previous → linkages, the part of the canonical
/// order that precedes the root-only cursor-presence field; this crate has
/// no separate next/previous GUID fields distinct from `guid_include`.
fn emit_constraint_guids(w: &mut Writer, con: &Constraint, vip: &VipIndex) {
    emit_range(w, "generation", con.generation);

    for guid in con.guid_include.iter() {
        emit_guid(w, "guid", *guid, vip);
    }
    for guid in con.guid_exclude.iter() {
        emit_guid(w, "!guid", *guid, vip);
    }

    for (slot, linkage) in con.linkages.iter().zip(Linkage::ALL) {
        let name = linkage_name(linkage);
        for guid in slot.include.iter() {
            emit_guid(w, name, *guid, vip);
        }
        for guid in slot.exclude.iter() {
            emit_guid(w, &format!("!{name}"), *guid, vip);
        }
    }
}

fn emit_timestamp_bounded(w: &mut Writer, con: &Constraint) {
    emit_bounded(w, "timestamp", con.timestamp.min.is_some(), con.timestamp.max.is_some());
}

fn emit_dateline_bounded(w: &mut Writer, con: &Constraint) {
    emit_bounded(w, "dateline", con.dateline.min.is_some(), con.dateline.max.is_some());
}

/// Emits the full per-node category sequence, for nested subconstraints:
/// head → generation/GUID/linkages → timestamp(bounded) → dateline(bounded).
/// The root-only categories interleaved between these at the top level
/// (key/unique/result/sort, pagination, cursor presence, count,
/// assignments) don't exist on a bare `Constraint`, so a nested node's
/// canonical order is this sequence with those categories simply absent.
fn emit_constraint_body(w: &mut Writer, con: &Constraint, vip: &VipIndex) {
    emit_constraint_head(w, con);
    emit_constraint_guids(w, con, vip);
    emit_timestamp_bounded(w, con);
    emit_dateline_bounded(w, con);
}

fn wrap_open(w: &mut Writer, linkage_to_parent: Option<ParentLinkage>) {
    match linkage_to_parent {
        None => w.token("("),
        Some(ParentLinkage::IsParentsLinkage(l)) => w.token(&format!("{}->(", linkage_name(l))),
        Some(ParentLinkage::OwnLinkageIsParent(l)) => w.token(&format!("(<-{}", linkage_name(l))),
    }
}

fn emit_or_group(w: &mut Writer, group: &OrGroup, vip: &VipIndex) {
    w.token(&format!("or{}(", group.group_id));
    emit_node(w, &group.head, vip);
    emit_node(w, &group.tail, vip);
    w.token(")");
}

fn emit_node(w: &mut Writer, con: &Constraint, vip: &VipIndex) {
    wrap_open(w, con.linkage_to_parent);
    emit_constraint_body(w, con, vip);
    for child in &con.children {
        emit_node(w, child, vip);
    }
    for group in &con.or_groups {
        emit_or_group(w, group, vip);
    }
    w.token(")");
}

/// Emits `root`'s canonical token stream, in the order mandated by the
/// constraint language's signature format: string-constraints → datatype →
/// flags → key/unique/result/sort → countlimit/resultpagesize/pagesize/
/// start → generation → GUID → linkages → cursor presence → timestamp →
/// count → dateline → assignments → recursive subconstraints. The
/// root-only categories (`key/unique/result/sort`, pagination, cursor
/// presence, `count`, `assignments`) only make sense once per query, so
/// they're interleaved here rather than in [`emit_node`], which recurses
/// over nested subconstraints using the reduced per-node sequence in
/// [`emit_constraint_body`].
pub fn signature_bytes(root: &SignatureNode, vip: &VipIndex) -> Vec<u8> {
    let mut w = Writer::new();
    w.token("(");
    emit_constraint_head(&mut w, &root.con);

    emit_flag(&mut w, "key", root.key);
    emit_flag(&mut w, "unique", root.unique);
    emit_flag(&mut w, "result", root.has_result);
    emit_flag(&mut w, "sort", root.has_sort);

    emit_scalar(&mut w, "countlimit", root.countlimit);
    emit_scalar(&mut w, "resultpagesize", root.resultpagesize);
    emit_scalar(&mut w, "pagesize", root.pagesize);
    emit_scalar(&mut w, "start", root.start);

    emit_constraint_guids(&mut w, &root.con, vip);

    emit_flag(&mut w, "cursor", root.has_cursor);

    emit_timestamp_bounded(&mut w, &root.con);
    // An earlier formatter printed the lower bound twice in the
    // "both bounds" path; this one emits `lo..hi` once and deliberately
    // does not reproduce that bug.
    emit_range(&mut w, "count", root.count);
    emit_dateline_bounded(&mut w, &root.con);

    emit_flag(&mut w, "assignments", root.has_assignments);

    for child in &root.con.children {
        emit_node(&mut w, child, vip);
    }
    for group in &root.con.or_groups {
        emit_or_group(&mut w, group, vip);
    }
    w.token(")");
    w.into_bytes()
}

/// SHA-256 of [`signature_bytes`]; the stable fingerprint actually used to
/// key plan/result caches.
pub fn signature_hash(root: &SignatureNode, vip: &VipIndex) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signature_bytes(root, vip));
    hasher.finalize().into()
}

#[cfg(test)]
mod test {
    use super::*;
    use graphd_guid::GuidSet;
    use pretty_assertions::assert_eq;

    fn node_with_guid(guid: Guid) -> SignatureNode {
        SignatureNode::new(Constraint { guid_include: GuidSet::from_iter([guid]), ..Default::default() })
    }

    #[test]
    fn separator_rule_skips_space_after_open_paren_equals_space_tab() {
        let mut w = Writer::new();
        w.token("(");
        w.token("a=1");
        w.token("b");
        assert_eq!(String::from_utf8(w.into_bytes()).unwrap(), "(a=1 b");
    }

    #[test]
    fn low_fan_in_guids_are_redacted_identically() {
        let vip = VipIndex::new(10);
        let a = node_with_guid(Guid::new(1, 1));
        let b = node_with_guid(Guid::new(2, 2));
        assert_eq!(signature_bytes(&a, &vip), signature_bytes(&b, &vip));
    }

    #[test]
    fn vip_guids_are_named_and_differ() {
        let mut vip = VipIndex::new(10);
        let guid_a = Guid::new(1, 1);
        let guid_b = Guid::new(2, 2);
        vip.record(guid_a, Linkage::Left, 50);
        vip.record(guid_b, Linkage::Left, 50);

        let a = node_with_guid(guid_a);
        let b = node_with_guid(guid_b);
        assert_ne!(signature_bytes(&a, &vip), signature_bytes(&b, &vip));
        assert_ne!(signature_hash(&a, &vip), signature_hash(&b, &vip));
    }

    #[test]
    fn timestamp_and_dateline_values_are_never_leaked_only_boundedness() {
        let vip = VipIndex::default();
        let con = Constraint {
            timestamp: Range { min: Some(123), max: Some(456) },
            ..Default::default()
        };
        let bytes = signature_bytes(&SignatureNode::new(con), &vip);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("timestamp=bounded"));
        assert!(!text.contains("123"));
        assert!(!text.contains("456"));
    }

    #[test]
    fn count_range_emits_lower_and_upper_bound_once_each() {
        let vip = VipIndex::default();
        let mut node = SignatureNode::new(Constraint::new());
        node.count = Range { min: Some(2), max: Some(9) };
        let text = String::from_utf8(signature_bytes(&node, &vip)).unwrap();
        assert_eq!(text.matches("count=2..9").count(), 1);
    }

    #[test]
    fn linkage_direction_wraps_differently_forward_vs_reverse() {
        let vip = VipIndex::default();
        let forward = Constraint {
            linkage_to_parent: Some(ParentLinkage::IsParentsLinkage(Linkage::Left)),
            ..Default::default()
        };
        let reverse = Constraint {
            linkage_to_parent: Some(ParentLinkage::OwnLinkageIsParent(Linkage::Left)),
            ..Default::default()
        };
        let mut root = SignatureNode::new(Constraint::new());
        root.con.children.push(forward);
        let forward_text = String::from_utf8(signature_bytes(&root, &vip)).unwrap();

        let mut root = SignatureNode::new(Constraint::new());
        root.con.children.push(reverse);
        let reverse_text = String::from_utf8(signature_bytes(&root, &vip)).unwrap();

        assert!(forward_text.contains("left->("));
        assert!(reverse_text.contains("(<-left"));
        assert_ne!(forward_text, reverse_text);
    }

    #[test]
    fn identical_structure_produces_identical_signature() {
        let vip = VipIndex::default();
        let a = SignatureNode::new(Constraint::new());
        let b = SignatureNode::new(Constraint::new());
        assert_eq!(signature_hash(&a, &vip), signature_hash(&b, &vip));
    }

    #[test]
    fn canonical_token_order_for_a_nested_constraint() {
        let mut vip = VipIndex::new(10);
        let vip_guid = Guid::new(1, 1);
        vip.record(vip_guid, Linkage::Left, 50);

        let child = Constraint {
            linkage_to_parent: Some(ParentLinkage::OwnLinkageIsParent(Linkage::Scope)),
            name: Some(StringPredicate::Exact(b"alice".to_vec())),
            generation: Range { min: Some(1), max: Some(5) },
            guid_include: GuidSet::from_iter([vip_guid]),
            ..Default::default()
        };
        let mut root = SignatureNode::new(Constraint {
            generation: Range { min: Some(2), max: Some(3) },
            guid_include: GuidSet::from_iter([vip_guid]),
            ..Default::default()
        });
        root.has_result = true;
        root.countlimit = Some(10);
        root.con.children.push(child);

        // key/unique/result/sort and countlimit/resultpagesize/pagesize/start
        // are root-only categories that sit *between* the leading
        // string-constraint/datatype/flags and the generation/GUID/linkages
        // categories, per the canonical signature order — so the root's own
        // `generation=2..3 guid=1.1` must appear after `countlimit=10`, not
        // folded into one constraint-body block ahead of it.
        let text = String::from_utf8(signature_bytes(&root, &vip)).unwrap();
        insta::assert_snapshot!(
            text,
            @r###"(result countlimit=10 generation=2..3 guid=1.1 (<-scope name="alice" generation=1..5 guid=1.1 ) )"###
        );
    }
}
