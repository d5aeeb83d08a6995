//! Escape-quoting for TEXT tokens ("fossilized" strings).
//!
//! TEXT tokens travel as a single whitespace-free token: spaces and the
//! control characters that would break the line grammar are backslash
//! escaped. Emitters must escape, parsers must unescape.

/// Escape a string for use as a single card token.
pub fn fossilize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`fossilize`]. Unrecognized escapes drop the backslash and keep
/// the following character; a trailing backslash is dropped.
pub fn defossilize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_common_text() {
        let original = "pull only - not authorized to push";
        let encoded = fossilize(original);
        assert!(!encoded.contains(' '));
        assert_eq!(defossilize(&encoded), original);
    }

    #[test]
    fn escapes_every_metacharacter() {
        let original = "a b\tc\nd\re\\f";
        assert_eq!(fossilize(original), "a\\sb\\tc\\nd\\re\\\\f");
        assert_eq!(defossilize(&fossilize(original)), original);
    }

    #[test]
    fn tolerates_unknown_escapes() {
        assert_eq!(defossilize("a\\qb"), "aqb");
        assert_eq!(defossilize("trailing\\"), "trailing");
    }
}
