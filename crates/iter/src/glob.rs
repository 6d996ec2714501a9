//! The octet glob matcher: a case-sensitive, byte-oriented
//! pattern language with word-boundary semantics, used by string
//! constraints. Unlike general shell globbing, matching is anchored
//! to *word* boundaries rather than arbitrary positions: a bare `foo` must
//! match a whole target word, while `foo*` may match any word starting
//! with `foo`.
//!
//! A byte is a "word byte" if it's ASCII alphanumeric or `_`; everything
//! else (whitespace and punctuation) is separator-class. This is the one
//! simplification from whatever the original comparator did with escaped
//! punctuation mid-word: an escaped literal can only ever land inside a
//! word-byte run of the target, so a pattern built entirely from escaped
//! punctuation (like `\(\-\:`) can never match a target that is itself
//! pure punctuation — worth flagging as a simplification since there's no
//! independent reference implementation to check it against.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomPart {
    Literal(u8),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A run of non-word pattern bytes. `mandatory` is set if any byte in
    /// the run was whitespace: whitespace is a required
    /// separator, punctuation alone is optional.
    Separator { mandatory: bool },
    /// A maximal run of pattern bytes that must match one whole target
    /// word: word atoms, possibly containing `*` fragment
    /// wildcards.
    Word(Vec<AtomPart>),
    /// A lone `*`, flanked by separators/anchors, matching one whole
    /// target word of any content (`*` alone skips an
    /// entire word).
    WordSkip,
}

/// A compiled glob pattern, ready to test against any number of targets.
pub struct Pattern {
    anchored_start: bool,
    anchored_end: bool,
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn compile(pattern: &str) -> Pattern {
        let bytes = pattern.as_bytes();
        let mut idx = 0;
        let mut anchored_start = false;
        if bytes.first() == Some(&b'^') {
            anchored_start = true;
            idx = 1;
        }

        let mut limit = bytes.len();
        let mut anchored_end = false;
        if limit > idx && bytes[limit - 1] == b'$' {
            let mut backslashes = 0;
            let mut j = limit - 1;
            while j > idx && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                anchored_end = true;
                limit -= 1;
            }
        }

        let mut tokens = Vec::new();
        let mut current: Vec<AtomPart> = Vec::new();

        while idx < limit {
            let b = bytes[idx];
            if b == b'\\' && idx + 1 < limit {
                current.push(AtomPart::Literal(bytes[idx + 1]));
                idx += 2;
            } else if b == b'*' {
                current.push(AtomPart::Wildcard);
                idx += 1;
            } else if is_word_byte(b) {
                current.push(AtomPart::Literal(b));
                idx += 1;
            } else {
                flush_word(&mut tokens, &mut current);
                let start = idx;
                let mut mandatory = false;
                while idx < limit && bytes[idx] != b'\\' && bytes[idx] != b'*' && !is_word_byte(bytes[idx]) {
                    if is_ws(bytes[idx]) {
                        mandatory = true;
                    }
                    idx += 1;
                }
                debug_assert!(idx > start);
                tokens.push(Token::Separator { mandatory });
            }
        }
        flush_word(&mut tokens, &mut current);

        Pattern { anchored_start, anchored_end, tokens }
    }

    pub fn matches(&self, target: &str) -> bool {
        let target = target.as_bytes();
        if self.anchored_start {
            return self.try_match(target, 0);
        }
        boundaries(target).into_iter().any(|start| self.try_match(target, start))
    }

    fn try_match(&self, target: &[u8], mut pos: usize) -> bool {
        for token in &self.tokens {
            match token {
                Token::Separator { mandatory } => {
                    let run = separator_run_len(target, pos);
                    if *mandatory && run == 0 {
                        return false;
                    }
                    pos += run;
                }
                Token::Word(parts) => {
                    let run = word_run_len(target, pos);
                    if run == 0 || !glob_full_match(parts, &target[pos..pos + run]) {
                        return false;
                    }
                    pos += run;
                }
                Token::WordSkip => {
                    let run = word_run_len(target, pos);
                    if run == 0 {
                        return false;
                    }
                    pos += run;
                }
            }
        }
        !self.anchored_end || pos == target.len()
    }
}

/// Convenience one-shot match, for call sites that don't reuse a pattern.
pub fn glob_match(pattern: &str, target: &str) -> bool {
    Pattern::compile(pattern).matches(target)
}

fn flush_word(tokens: &mut Vec<Token>, current: &mut Vec<AtomPart>) {
    if current.is_empty() {
        return;
    }
    if current.len() == 1 && current[0] == AtomPart::Wildcard {
        tokens.push(Token::WordSkip);
    } else {
        tokens.push(Token::Word(std::mem::take(current)));
    }
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_run_len(target: &[u8], pos: usize) -> usize {
    target[pos..].iter().take_while(|&&b| is_word_byte(b)).count()
}

fn separator_run_len(target: &[u8], pos: usize) -> usize {
    target[pos..].iter().take_while(|&&b| !is_word_byte(b)).count()
}

/// Positions in `target` that are word boundaries: the start, the end, and
/// every transition between a word byte and a non-word byte.
fn boundaries(target: &[u8]) -> Vec<usize> {
    let mut out = vec![0, target.len()];
    for p in 1..target.len() {
        if is_word_byte(target[p - 1]) != is_word_byte(target[p]) {
            out.push(p);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Classic wildcard string matching (literal bytes plus `*`), requiring
/// `parts` to match the whole of `slice` start to end.
fn glob_full_match(parts: &[AtomPart], slice: &[u8]) -> bool {
    let (mut p, mut s) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None; // (part index after star, slice index star matched up to)

    while s < slice.len() {
        if let Some(&AtomPart::Literal(lit)) = parts.get(p) {
            if slice[s] == lit {
                p += 1;
                s += 1;
                continue;
            }
        } else if let Some(AtomPart::Wildcard) = parts.get(p) {
            star = Some((p + 1, s));
            p += 1;
            continue;
        }

        if let Some((star_p, star_s)) = star {
            p = star_p;
            s = star_s + 1;
            star = Some((star_p, s));
        } else {
            return false;
        }
    }

    while matches!(parts.get(p), Some(AtomPart::Wildcard)) {
        p += 1;
    }
    p == parts.len()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_word_requires_exact_word_match() {
        assert!(glob_match("foo", "foo"));
        assert!(!glob_match("foo", "foot"), r#""foo" must not match "foot""#);
    }

    #[test]
    fn trailing_wildcard_matches_word_prefix() {
        assert!(glob_match("foo*", "foot"));
        assert!(!glob_match("foo*", "pfoo"));
    }

    #[test]
    fn lone_star_skips_exactly_one_word() {
        assert!(glob_match("foo * baz", "foo bar baz"));
        assert!(!glob_match("foo * baz", "foo baz"));
    }

    #[test]
    fn mid_word_wildcard_stays_within_one_word() {
        assert!(glob_match("foo*baz", "foonitzbaz"));
        assert!(!glob_match("foo*baz", "foo/baz"));
    }

    #[test]
    fn escaped_punctuation_requires_exact_adjacency() {
        assert!(!glob_match(r#"\(\-\:"#, "(--:"));
    }

    #[test]
    fn anchors_pin_start_and_end() {
        assert!(glob_match("^foo", "foo bar"));
        assert!(!glob_match("^foo", "xfoo bar"));
        assert!(glob_match("bar$", "foo bar"));
        assert!(!glob_match("bar$", "foo barx"));
    }

    #[test]
    fn punctuation_separator_is_optional() {
        // A literal colon in the pattern is an optional separator, so it
        // tolerates a target that has no punctuation there at all.
        assert!(glob_match("foo:bar", "foo bar"));
        assert!(glob_match("foo:bar", "foobar"));
    }

    #[test]
    fn whitespace_separator_is_mandatory() {
        assert!(glob_match("foo bar", "foo bar"));
        assert!(!glob_match("foo bar", "foobar"));
    }
}
