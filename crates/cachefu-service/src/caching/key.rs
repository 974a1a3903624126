//! Deterministic mapping from cache keys (typically URLs) to file names.
//!
//! The mapping must be stable across processes: the same key always maps to
//! the same file name, and prefix relationships between keys survive the
//! mapping so that bulk eviction can match on mapped prefixes.

/// Characters that are not safe in a file name and get folded into `+`.
const FOLDED: &[char] = &['.', ':', '/', ',', '%', '?', '&', '='];

/// Maps a cache key to the file name used for its on-disk entry.
///
/// Each of `.` `:` `/` `,` `%` `?` `&` `=` is replaced by `+`, and any run
/// of two or more consecutive `+` collapses into a single `+`. Literal `+`
/// characters in the key participate in the collapse.
pub fn filename_for_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        let mapped = if FOLDED.contains(&c) { '+' } else { c };
        if mapped == '+' && out.ends_with('+') {
            continue;
        }
        out.push(mapped);
    }
    out
}

/// Maps a raw key prefix to the corresponding file-name prefix.
///
/// Files whose name starts with the result belong to keys starting with
/// `prefix`. This is the same fold as [`filename_for_key`]; it exists as a
/// separate name because matching a mapped prefix against mapped file names
/// is only sound when both sides went through the identical transformation.
pub fn filename_prefix(prefix: &str) -> String {
    filename_for_key(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_deterministic() {
        let key = "http://example.com/images/a%20b.png?size=64&fmt=webp";
        assert_eq!(filename_for_key(key), filename_for_key(key));
    }

    #[test]
    fn test_mapping_folds_and_collapses() {
        // `://` is a run of three folded characters and collapses to one `+`.
        assert_eq!(filename_for_key("http://a.com/x.png"), "http+a+com+x+png");
        assert_eq!(
            filename_for_key("http://example.com/a%20b.png?x=1&y=2"),
            "http+example+com+a+20b+png+x+1+y+2"
        );
    }

    #[test]
    fn test_literal_plus_collapses() {
        assert_eq!(filename_for_key("a++b"), "a+b");
        assert_eq!(filename_for_key("a+.b"), "a+b");
    }

    #[test]
    fn test_prefix_matches_full_mapping() {
        let prefix = "http://example.com/";
        let key = "http://example.com/x.png";
        assert!(filename_for_key(key).starts_with(&filename_prefix(prefix)));
    }
}
