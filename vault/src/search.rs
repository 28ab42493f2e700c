//! Nickname search: case-insensitive prefix match, with a fuzzy fallback for
//! near misses. Results keep vault order.

use std::cmp;

use crate::model::AccountRecord;

/// Minimum fuzzy ratio (exclusive) for a non-prefix match.
pub const FUZZY_THRESHOLD: u8 = 40;

/// Indices of the records whose nickname matches `query`. An empty query
/// matches everything.
pub fn search(records: &[AccountRecord], query: &str) -> Vec<usize> {
    if query.is_empty() {
        return (0..records.len()).collect();
    }
    let query = query.to_lowercase();
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            let nickname = record.nickname.to_lowercase();
            nickname.starts_with(&query) || fuzzy_ratio(&query, &nickname) > FUZZY_THRESHOLD
        })
        .map(|(index, _)| index)
        .collect()
}

/// Similarity score in `0..=100`, based on the insert/delete edit distance
/// (a substitution counts as two edits) normalized by the combined length.
pub fn fuzzy_ratio(a: &str, b: &str) -> u8 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 100;
    }
    let distance = indel_distance(a, b);
    let score = (100 * (total - distance) + total / 2) / total;
    score as u8
}

fn indel_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = if a_ch == b_ch { 0 } else { 2 };
            current[j + 1] = cmp::min(
                cmp::min(current[j] + 1, previous[j + 1] + 1),
                previous[j] + substitution,
            );
        }
        previous.copy_from_slice(&current);
    }

    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::{fuzzy_ratio, search};
    use crate::model::AccountRecord;

    fn vault(nicknames: &[&str]) -> Vec<AccountRecord> {
        nicknames
            .iter()
            .enumerate()
            .map(|(i, nick)| {
                AccountRecord::new(format!("login{i}"), "pw")
                    .expect("valid record")
                    .with_nickname(*nick)
            })
            .collect()
    }

    #[test]
    fn empty_query_returns_everything_in_order() {
        let records = vault(&["Foobar", "Zed", "Football"]);
        assert_eq!(search(&records, ""), vec![0, 1, 2]);
        assert!(search(&[], "").is_empty());
    }

    #[test]
    fn prefix_matches_are_case_insensitive() {
        let records = vault(&["Foobar", "Zed", "Football"]);
        assert_eq!(search(&records, "foo"), vec![0, 2]);
        assert_eq!(search(&records, "FOO"), vec![0, 2]);
        assert_eq!(search(&records, "zE"), vec![1]);
    }

    #[test]
    fn near_misses_match_fuzzily() {
        let records = vault(&["Foobar", "Zed"]);
        assert_eq!(search(&records, "Fobar"), vec![0]);

        let records = vault(&["Foobar", "Zed", "Football"]);
        assert!(search(&records, "Fobar").contains(&0));
        assert!(search(&records, "qqqqqqqq").is_empty());
    }

    #[test]
    fn ratio_values() {
        assert_eq!(fuzzy_ratio("", ""), 100);
        assert_eq!(fuzzy_ratio("abc", "abc"), 100);
        assert_eq!(fuzzy_ratio("abc", ""), 0);
        assert_eq!(fuzzy_ratio("abc", "xyz"), 0);
        // One insertion over eleven characters.
        assert_eq!(fuzzy_ratio("fobar", "foobar"), 91);
        // A substitution costs two edits: (8 - 2) / 8.
        assert_eq!(fuzzy_ratio("abcd", "abed"), 75);
        assert_eq!(fuzzy_ratio("ünï", "ÜNÏ".to_lowercase().as_str()), 100);
    }
}
