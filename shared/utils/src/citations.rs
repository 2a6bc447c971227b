//! Citation marker normalization.
//!
//! Generated answers cite sources with markers like `[[citation:3]]`, but
//! models emit every malformed variant of that form: doubled brackets,
//! single brackets, mixed case, or a missing closing bracket at a chunk
//! boundary. Normalization runs four ordered passes, each collapsing one
//! malformed variant, before the final canonical substitution into the
//! renderable `[citation](N)` link form.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static DOUBLED_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([cC])itation").unwrap());
static DOUBLED_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([cC])itation:(\d+)\]\]").unwrap());
static DOUBLED_WRAPPED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([cC]itation:\d+)\]\]").unwrap());
static CANONICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[cC]itation:(\d+)\]").unwrap());

/// Rewrites citation markers in `text` into `[citation](N)` links.
///
/// Markers whose index falls outside `1..=source_count` are left in their
/// normalized single-bracket text form so the renderer shows them inert
/// instead of linking to a source that does not exist.
///
/// Idempotent: the canonical output contains no substring any pass matches,
/// so callers may safely re-apply the rewrite to a cumulative buffer on
/// every flush.
pub fn rewrite_citations(text: &str, source_count: usize) -> String {
    let pass1 = DOUBLED_OPEN.replace_all(text, "[${1}itation");
    let pass2 = DOUBLED_CLOSE.replace_all(&pass1, "${1}itation:${2}]");
    let pass3 = DOUBLED_WRAPPED.replace_all(&pass2, "[${1}]");
    CANONICAL
        .replace_all(&pass3, |caps: &Captures| {
            let index: usize = caps[1].parse().unwrap_or(0);
            if (1..=source_count).contains(&index) {
                format!("[citation]({index})")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Length in bytes of a trailing partial citation marker in `text`, or 0.
///
/// A streaming consumer must not rewrite or emit a buffer whose tail could
/// still grow into a complete marker (`[`, `[[cit`, `[citation:1`,
/// `[[citation:12]`, ...); the suffix this reports should be withheld until
/// the next chunk resolves it.
pub fn partial_marker_suffix(text: &str) -> usize {
    // A complete marker is at most "[[citation:NNNN]]"; anything further
    // back can no longer be partial.
    let mut tail_start = text.len().saturating_sub(24);
    while !text.is_char_boundary(tail_start) {
        tail_start -= 1;
    }
    let Some(rel) = text[tail_start..].rfind('[') else {
        return 0;
    };
    let mut pos = tail_start + rel;
    if pos > 0 && text.as_bytes()[pos - 1] == b'[' {
        pos -= 1;
    }
    if is_marker_prefix(&text[pos..]) {
        text.len() - pos
    } else {
        0
    }
}

fn is_marker_prefix(candidate: &str) -> bool {
    let doubled = candidate.starts_with("[[");
    let rest = candidate.trim_start_matches('[');
    if candidate.len() - rest.len() > 2 {
        return false;
    }

    const TOKEN: &str = "citation:";
    let lower = rest.to_ascii_lowercase();
    if lower.len() < TOKEN.len() {
        return TOKEN.starts_with(lower.as_str());
    }
    if !lower.starts_with(TOKEN) {
        return false;
    }

    let tail = &rest[TOKEN.len()..];
    let digits = tail.bytes().take_while(|b| b.is_ascii_digit()).count();
    match &tail[digits..] {
        // Still reading the index.
        "" => true,
        // One closing bracket down, one to go; only partial for the
        // doubled form, a single-bracket marker is already complete.
        "]" => doubled,
        _ => false,
    }
}
