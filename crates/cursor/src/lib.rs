//! Cursor freeze and thaw.
//!
//! A cursor is a printable-ASCII snapshot of where a paused read left off.
//! Long fragments are swapped out for an `@<ticket>` reference into the
//! resource cache rather than carried inline, the same tradeoff
//! `graphd-cache` itself makes between a record and its ticket. Bytes that
//! would otherwise break the cursor grammar — control characters, anything
//! non-ASCII, and the structural characters `( ) : % " \` — are `%HH`
//! escaped, the way a URL path component is percent-encoded.
//!
//! Thawing must never surface an error to the caller for data it can't find:
//! a missing ticket means "start this fragment over", not a failure.

use std::any::Any;

use graphd_cache::{Cache, StampSource, StorableRef, StorableValue};
use percent_encoding::{percent_encode, AsciiSet, CONTROLS};

const RESERVED: &AsciiSet = &CONTROLS
    .add(b'(')
    .add(b')')
    .add(b':')
    .add(b'%')
    .add(b'"')
    .add(b'\\')
    .add(0x7F);

pub const CURSOR_FRAGMENT_TYPE: &str = "cursor-fragment";

/// Width, in hex digits, of a ticket's fixed process-id/clock prefix
/// (`"%04x%08x"`); the variable-length counter suffix is
/// ignored, so this is a conservative lower bound used only to decide
/// whether swapping a fragment for `@<ticket>` is worth it at all.
pub const STAMP_SIZE: usize = 12;

/// Escapes `bytes` so the result is safe to embed inline in a cursor: no
/// control characters, no non-ASCII bytes, and none of the structural
/// characters `( ) : % " \`.
pub fn escape(bytes: &[u8]) -> String {
    percent_encode(bytes, RESERVED).to_string()
}

/// Inverse of [`escape`]. Returns `None` on a malformed `%` escape (one not
/// followed by exactly two hex digits) rather than guessing at recovery.
pub fn unescape(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return None;
            }
            let hi = (bytes[i + 1] as char).to_digit(16)?;
            let lo = (bytes[i + 2] as char).to_digit(16)?;
            out.push(((hi << 4) | lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

/// A raw byte fragment held in the resource cache under an `@<ticket>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorFragment(pub Vec<u8>);

impl StorableValue for CursorFragment {
    fn resource_size(&self) -> usize {
        self.0.len()
    }

    fn content_hash(&self) -> u64 {
        fxhash::hash64(&self.0)
    }

    fn content_eq(&self, other: &dyn StorableValue) -> bool {
        other.as_any().downcast_ref::<CursorFragment>() == Some(self)
    }

    fn type_tag(&self) -> &'static str {
        CURSOR_FRAGMENT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Appends `fragment` to `buf`, either inline (escaped) or as `@<ticket>` if
/// the escaped form would be longer than `1 + STAMP_SIZE` bytes — the point
/// past which a ticket reference is the shorter encoding.
pub fn freeze<S: StampSource>(buf: &mut String, fragment: &[u8], cache: &mut Cache<S>) {
    let escaped = escape(fragment);
    if escaped.len() > 1 + STAMP_SIZE {
        match cache.store(CursorFragment(fragment.to_vec())) {
            Ok(ticket) => {
                buf.push('@');
                buf.push_str(&ticket);
                return;
            }
            Err(_) => {
                tracing::debug!("fragment cache store failed; falling back to inline encoding");
            }
        }
    }
    buf.push_str(&escaped);
}

/// Result of thawing one fragment from the front of a cursor's remaining
/// text.
#[derive(Debug)]
pub enum Thawed<'a> {
    /// Recovered bytes, plus whatever of `input` followed this fragment.
    Resumed { bytes: Vec<u8>, rest: &'a str },
    /// A leading `@<ticket>` didn't resolve. This is not an
    /// error: the caller should restart the fragment from scratch.
    Missed,
    /// A malformed inline `%` escape.
    Malformed,
}

/// Recovers one fragment from the front of `input`: a
/// leading `@` consumes a ticket lexeme via the cache and returns the
/// recovered bytes plus the unconsumed remainder of `input`; otherwise the
/// whole of `input` is treated as one inline, escaped fragment.
pub fn thaw<'a, S: StampSource>(input: &'a str, cache: &mut Cache<S>) -> Thawed<'a> {
    if let Some(rest) = input.strip_prefix('@') {
        return match cache.thaw(rest, Some(CURSOR_FRAGMENT_TYPE)) {
            Some((storable, rest)) => {
                let bytes = fragment_bytes(&storable);
                Thawed::Resumed { bytes, rest }
            }
            None => {
                tracing::info!("cursor ticket missing; restarting fragment from scratch");
                Thawed::Missed
            }
        };
    }
    match unescape(input) {
        Some(bytes) => Thawed::Resumed { bytes, rest: "" },
        None => Thawed::Malformed,
    }
}

fn fragment_bytes(storable: &StorableRef) -> Vec<u8> {
    storable
        .as_any()
        .downcast_ref::<CursorFragment>()
        .expect("thaw checked the type tag")
        .0
        .clone()
}

#[cfg(test)]
mod test {
    use super::*;
    use graphd_cache::DeterministicStampSource;
    use pretty_assertions::assert_eq;

    fn cache() -> Cache<DeterministicStampSource> {
        Cache::with_stamp_source(100_000, DeterministicStampSource::default())
    }

    #[test]
    fn escape_leaves_plain_ascii_untouched() {
        assert_eq!(escape(b"hello world"), "hello world");
    }

    #[test]
    fn escape_covers_structural_and_control_and_nonascii_bytes() {
        let escaped = escape(b"(a:b)\"c\\\x01\xff");
        assert!(!escaped.contains('('));
        assert!(!escaped.contains(')'));
        assert!(!escaped.contains(':'));
        assert!(!escaped.contains('"'));
        assert!(!escaped.contains('\\'));
        assert_eq!(unescape(&escaped).unwrap(), b"(a:b)\"c\\\x01\xff");
    }

    #[test]
    fn unescape_rejects_truncated_percent_escape() {
        assert_eq!(unescape("abc%2"), None);
        assert_eq!(unescape("abc%"), None);
    }

    #[test]
    fn unescape_rejects_non_hex_digits() {
        assert_eq!(unescape("%zz"), None);
    }

    #[quickcheck_macros::quickcheck]
    fn escape_unescape_round_trips(bytes: Vec<u8>) -> bool {
        unescape(&escape(&bytes)).as_deref() == Some(bytes.as_slice())
    }

    #[test]
    fn short_fragment_stays_inline() {
        let mut cache = cache();
        let mut buf = String::new();
        freeze(&mut buf, b"short", &mut cache);
        assert_eq!(buf, "short");
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn long_fragment_is_swapped_for_a_ticket() {
        let mut cache = cache();
        let mut buf = String::new();
        let long = vec![b'x'; 64];
        freeze(&mut buf, &long, &mut cache);
        assert!(buf.starts_with('@'), "long fragment should swap to a ticket: {buf}");
        assert!(cache.total_bytes() > 0);
    }

    #[test]
    fn thaw_recovers_a_ticketed_fragment_and_leaves_the_remainder() {
        let mut cache = cache();
        let mut buf = String::new();
        let long = vec![b'y'; 64];
        freeze(&mut buf, &long, &mut cache);
        buf.push_str(") tail");

        match thaw(&buf, &mut cache) {
            Thawed::Resumed { bytes, rest } => {
                assert_eq!(bytes, long);
                assert_eq!(rest, ") tail");
            }
            other => panic!("expected Resumed, got {other:?}"),
        }
    }

    #[test]
    fn thaw_recovers_an_inline_fragment() {
        let mut cache = cache();
        match thaw("hello%20world", &mut cache) {
            Thawed::Resumed { bytes, rest } => {
                assert_eq!(bytes, b"hello world");
                assert_eq!(rest, "");
            }
            other => panic!("expected Resumed, got {other:?}"),
        }
    }

    #[test]
    fn thaw_of_missing_ticket_is_a_miss_not_an_error() {
        let mut cache = cache();
        match thaw("@deadbeef0000000000", &mut cache) {
            Thawed::Missed => {}
            other => panic!("expected Missed, got {other:?}"),
        }
    }

    #[test]
    fn thaw_of_malformed_inline_escape_is_reported_distinctly_from_a_miss() {
        let mut cache = cache();
        match thaw("abc%zz", &mut cache) {
            Thawed::Malformed => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn flushed_ticket_degrades_to_a_miss() {
        let mut cache = cache();
        let mut buf = String::new();
        let long = vec![b'z'; 64];
        freeze(&mut buf, &long, &mut cache);
        let ticket = buf.trim_start_matches('@').to_string();
        assert!(cache.flush(&ticket));

        match thaw(&buf, &mut cache) {
            Thawed::Missed => {}
            other => panic!("expected Missed after flush, got {other:?}"),
        }
    }
}
