//! `LIKE` pattern matching.
//!
//! `%` matches any run of zero or more characters, `_` exactly one.
//! Matching is case-sensitive and works on Unicode scalar values.

/// Returns true if `value` matches `pattern`.
pub(crate) fn like(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();

    // Greedy matching with a single backtrack point at the last `%`.
    let (mut vi, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while vi < v.len() {
        match p.get(pi) {
            Some('%') => {
                star = Some((pi, vi));
                pi += 1;
            }
            Some('_') => {
                vi += 1;
                pi += 1;
            }
            Some(c) if *c == v[vi] => {
                vi += 1;
                pi += 1;
            }
            _ => match star {
                Some((star_pi, star_vi)) => {
                    pi = star_pi + 1;
                    vi = star_vi + 1;
                    star = Some((star_pi, star_vi + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wildcards() {
        assert!(like("hello", "h%o"));
        assert!(like("hello", "_ello"));
        assert!(like("hello", "%"));
        assert!(like("", "%"));
        assert!(like("hello", "%l%"));
        assert!(!like("hello", "world"));
        assert!(!like("hello", "h_o"));
        assert!(!like("", "_"));
    }

    #[test]
    fn case_sensitive() {
        assert!(!like("Hello", "hello"));
        assert!(like("Hello", "H%"));
    }

    #[test]
    fn backtracks_over_percent() {
        assert!(like("abcabcabd", "%abd"));
        assert!(like("aaa", "%a%a%a%"));
        assert!(!like("aa", "%a%a%a%"));
        assert!(like("ünïcødé", "ü_ï%é"));
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_itself(s in "[a-z0-9 ]{0,16}") {
            prop_assert!(like(&s, &s));
        }

        #[test]
        fn prefix_pattern_matches_extensions(prefix in "[a-z]{0,6}", rest in "\\PC{0,8}") {
            let value = format!("{prefix}{rest}");
            let pattern = format!("{prefix}%");
            prop_assert!(like(&value, &pattern));
        }

        #[test]
        fn underscores_match_exact_length(s in "\\PC{0,10}", n in 0..12_usize) {
            let pattern = "_".repeat(n);
            prop_assert_eq!(like(&s, &pattern), s.chars().count() == n);
        }
    }
}
