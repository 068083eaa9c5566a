//! Error message fingerprinting.
//!
//! Two tool invocations rarely produce byte-identical diagnostics: paths,
//! timestamps, and whitespace drift between runs. The fingerprint collapses
//! that noise so the failure tracker can ask "is this the same error as
//! last time" without string-distance heuristics.
//!
//! The key is deliberately coarse: the first 50 characters of the
//! normalized message plus its normalized length. Messages differing only
//! in case or whitespace collide on purpose; two semantically different
//! errors sharing a 50-char prefix and length also collide. That is a
//! known limitation of the scheme, and the meta-correction cadence depends
//! on it, so it must not be swapped for a content hash.

/// Length of the message prefix kept in the fingerprint.
const PREFIX_LEN: usize = 50;

/// Normalize an error message: lower-case, collapse whitespace runs to a
/// single space, trim.
#[must_use]
pub fn normalize(message: &str) -> String {
    message
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compute the stable short key for an error message.
///
/// # Example
///
/// ```
/// use packsmith::fingerprint::fingerprint;
///
/// let a = fingerprint("Type  Error: x is not defined");
/// let b = fingerprint("type error: x is not defined");
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn fingerprint(message: &str) -> String {
    let normalized = normalize(message);
    let prefix: String = normalized.chars().take(PREFIX_LEN).collect();
    format!("{}_{}", prefix, normalized.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("a  b\t\nc"), "a b c");
        assert_eq!(normalize("  leading and trailing  "), "leading and trailing");
    }

    #[test]
    fn test_normalize_lowercases() {
        assert_eq!(normalize("Cannot Find Module"), "cannot find module");
    }

    #[test]
    fn test_fingerprint_equal_for_normalization_equal_messages() {
        let m1 = "error TS2304:   Cannot find name 'foo'.";
        let m2 = "ERROR ts2304: cannot find name 'foo'.";
        assert_eq!(normalize(m1), normalize(m2));
        assert_eq!(fingerprint(m1), fingerprint(m2));
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint("short error");
        assert_eq!(fp, "short error_11");
    }

    #[test]
    fn test_fingerprint_truncates_long_messages() {
        let long = "x".repeat(200);
        let fp = fingerprint(&long);
        assert_eq!(fp, format!("{}_200", "x".repeat(50)));
    }

    #[test]
    fn test_fingerprint_distinguishes_by_length() {
        let base = "a".repeat(60);
        let longer = "a".repeat(61);
        // Same 50-char prefix, different normalized length.
        assert_ne!(fingerprint(&base), fingerprint(&longer));
    }

    #[test]
    fn test_fingerprint_known_collision() {
        // Same prefix, same length, different tails: collides. This is the
        // documented coarse-grained behavior, not a bug.
        let m1 = format!("{}tail-one", "p".repeat(50));
        let m2 = format!("{}one-tail", "p".repeat(50));
        assert_eq!(fingerprint(&m1), fingerprint(&m2));
    }

    #[test]
    fn test_fingerprint_empty_message() {
        assert_eq!(fingerprint(""), "_0");
        assert_eq!(fingerprint("   \t\n"), "_0");
    }
}
