//! Identifier similarity scoring for fuzzy concept lookup.
//!
//! Bounded edit distance over lowercased identifiers (3 edits for names up
//! to 8 chars, scaling linearly) combined with a camel-case token overlap.
//! Exact match scores 1.0, case-only difference 0.95, fuzzy matches land in
//! `[threshold, 0.9]`, everything else 0.

/// Levenshtein distance with an early-exit bound.
pub fn edit_distance_bounded(a: &str, b: &str, bound: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > bound {
        return None;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > bound {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    if prev[b.len()] <= bound {
        Some(prev[b.len()])
    } else {
        None
    }
}

/// Split an identifier into lowercase tokens at camel humps, digits, and
/// separators: `getUserById` -> `["get", "user", "by", "id"]`.
pub fn split_tokens(name: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == '$' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            if (prev_lower || (i > 0 && next_lower)) && !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Maximum edits allowed for a name of `len` chars: 3 up to 8 chars, then
/// scaling linearly.
fn edit_cap(len: usize) -> usize {
    if len <= 8 {
        3
    } else {
        (len * 3).div_ceil(8)
    }
}

/// Composite similarity in `[0, 1]`. See module docs for the bands.
pub fn name_similarity(query: &str, candidate: &str, fuzzy_threshold: f64) -> f64 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if query == candidate {
        return 1.0;
    }
    let query_lower = query.to_lowercase();
    let candidate_lower = candidate.to_lowercase();
    if query_lower == candidate_lower {
        return 0.95;
    }

    let cap = edit_cap(query.chars().count().max(candidate.chars().count()));
    let edit_score = edit_distance_bounded(&query_lower, &candidate_lower, cap)
        .map(|dist| {
            // dist in [1, cap] maps onto (threshold, 0.9]
            let span = 0.9 - fuzzy_threshold;
            0.9 - span * (dist as f64 - 1.0) / cap as f64
        })
        .unwrap_or(0.0);

    // Token overlap: shared camel tokens relative to the query's tokens,
    // with a prefix bonus.
    let q_tokens = split_tokens(query);
    let c_tokens = split_tokens(candidate);
    let token_score = if q_tokens.is_empty() || c_tokens.is_empty() {
        0.0
    } else {
        let shared = q_tokens.iter().filter(|t| c_tokens.contains(t)).count();
        let overlap = shared as f64 / q_tokens.len().max(c_tokens.len()) as f64;
        let prefix_bonus =
            if candidate_lower.starts_with(&query_lower) || query_lower.starts_with(&candidate_lower) {
                0.1
            } else {
                0.0
            };
        (overlap * 0.8 + prefix_bonus).min(0.9)
    };

    let score = edit_score.max(token_score);
    if score >= fuzzy_threshold {
        score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_is_one() {
        assert_eq!(name_similarity("getUser", "getUser", 0.6), 1.0);
    }

    #[test]
    fn case_only_is_095() {
        assert_eq!(name_similarity("getuser", "getUser", 0.6), 0.95);
    }

    #[test]
    fn near_miss_lands_in_fuzzy_band() {
        let s = name_similarity("getUser", "getUsers", 0.6);
        assert!((0.6..=0.9).contains(&s), "score {s}");
    }

    #[test]
    fn unrelated_is_zero() {
        assert_eq!(name_similarity("getUser", "Quaternion", 0.6), 0.0);
    }

    #[test]
    fn shared_tokens_score() {
        let s = name_similarity("getUserById", "fetchUserById", 0.6);
        assert!(s > 0.0, "token overlap should pass the threshold, got {s}");
    }

    #[test]
    fn split_camel_and_snake() {
        assert_eq!(split_tokens("getUserById"), vec!["get", "user", "by", "id"]);
        assert_eq!(split_tokens("get_user_by_id"), vec!["get", "user", "by", "id"]);
        assert_eq!(split_tokens("HTTPServer"), vec!["http", "server"]);
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance_bounded("abc", "abc", 3), Some(0));
        assert_eq!(edit_distance_bounded("abc", "abd", 3), Some(1));
        assert_eq!(edit_distance_bounded("abc", "xyz", 2), None);
        assert_eq!(edit_distance_bounded("", "ab", 3), Some(2));
    }

    #[test]
    fn cap_scales_with_length() {
        assert_eq!(super::edit_cap(8), 3);
        assert_eq!(super::edit_cap(16), 6);
    }
}
