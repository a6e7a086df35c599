//! Pure normalize/tokenize/score functions for the code similarity kernel.
//!
//! Nothing in this crate touches I/O, the bus, or the store — it is safe to
//! call from any worker role, and its behavior must stay byte-for-byte
//! reproducible across runs given the same input text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches identifiers, integer literals, common multi-char operators and
/// single-char punctuation. Works tolerably across many C-family languages
/// and Python alike; it is intentionally not a full lexer for any one of
/// them.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[A-Za-z_][A-Za-z0-9_]*|\d+|==|!=|<=|>=|->|\+\+|--|&&|\|\||[{}()\[\];,.:+\-*/%<>=]",
    )
    .expect("token regex is a constant and must compile")
});

/// Strip trailing whitespace from every line and drop fully blank leading
/// and trailing lines. Interior blank lines are preserved.
pub fn normalize_code(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().map(|line| line.trim_end()).collect();

    while lines.first().is_some_and(|line| line.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Split normalized text into a flat token stream.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard similarity over the unique token sets, scaled to `[0, 100]`.
///
/// Two empty token sets are defined as fully similar (100.0); an empty set
/// compared against a non-empty one is defined as fully dissimilar (0.0).
pub fn jaccard_percent(tokens_a: &[String], tokens_b: &[String]) -> f64 {
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 100.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let set_a: std::collections::HashSet<&str> = tokens_a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> = tokens_b.iter().map(String::as_str).collect();

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    if union == 0 {
        return 0.0;
    }

    (intersection as f64 / union as f64) * 100.0
}

/// Normalize, tokenize and return the token stream in one call — the shape
/// the normalizer role uses before caching the result.
pub fn normalize_and_tokenize(text: &str) -> (String, Vec<String>) {
    let normalized = normalize_code(text);
    let tokens = tokenize(&normalized);
    (normalized, tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_whitespace() {
        assert_eq!(normalize_code("foo   \nbar\t\n"), "foo\nbar");
    }

    #[test]
    fn normalize_drops_blank_leading_and_trailing_lines() {
        assert_eq!(normalize_code("\n\nfoo\nbar\n\n\n"), "foo\nbar");
    }

    #[test]
    fn normalize_keeps_interior_blank_lines() {
        assert_eq!(normalize_code("foo\n\nbar"), "foo\n\nbar");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_code("  foo  \n\n bar \n\n");
        let twice = normalize_code(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn tokenize_splits_identifiers_numbers_and_operators() {
        let tokens = tokenize("if (x >= 10) { y += 1; }");
        assert_eq!(
            tokens,
            vec![
                "if", "(", "x", ">=", "10", ")", "{", "y", "+", "=", "1", ";", "}"
            ]
        );
    }

    #[test]
    fn tokenize_recognizes_multichar_operators() {
        let tokens = tokenize("a == b && c != d -> e");
        assert!(tokens.contains(&"==".to_string()));
        assert!(tokens.contains(&"&&".to_string()));
        assert!(tokens.contains(&"!=".to_string()));
        assert!(tokens.contains(&"->".to_string()));
    }

    #[test]
    fn jaccard_both_empty_is_fully_similar() {
        assert_eq!(jaccard_percent(&[], &[]), 100.0);
    }

    #[test]
    fn jaccard_one_empty_is_fully_dissimilar() {
        let a = vec!["x".to_string()];
        assert_eq!(jaccard_percent(&a, &[]), 0.0);
        assert_eq!(jaccard_percent(&[], &a), 0.0);
    }

    #[test]
    fn jaccard_identical_token_sets_is_100() {
        let a = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(jaccard_percent(&a, &a), 100.0);
    }

    #[test]
    fn jaccard_disjoint_token_sets_is_zero() {
        let a = vec!["a".to_string(), "b".to_string()];
        let b = vec!["c".to_string(), "d".to_string()];
        assert_eq!(jaccard_percent(&a, &b), 0.0);
    }

    #[test]
    fn jaccard_partial_overlap_matches_expected_ratio() {
        let a = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let b = vec!["b".to_string(), "c".to_string(), "d".to_string()];
        // intersection {b, c} = 2, union {a,b,c,d} = 4 -> 50.0
        assert_eq!(jaccard_percent(&a, &b), 50.0);
    }

    #[test]
    fn jaccard_ignores_duplicate_tokens_within_a_set() {
        let a = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let b = vec!["a".to_string(), "b".to_string()];
        assert_eq!(jaccard_percent(&a, &b), 100.0);
    }
}
