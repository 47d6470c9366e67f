/// A successful match: higher scores rank first; `positions` are char
/// indices into the candidate for highlighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatch {
    pub score: i64,
    pub positions: Vec<usize>,
}

const MATCH_SCORE: i64 = 16;
const CONSECUTIVE_BONUS: i64 = 8;
const BOUNDARY_BONUS: i64 = 10;
const BASENAME_BONUS: i64 = 6;
const GAP_PENALTY: i64 = 1;

fn is_boundary(prev: Option<char>, current: char) -> bool {
    match prev {
        None => true,
        Some(prev) => {
            matches!(prev, '/' | '\\' | '_' | '-' | '.' | ' ')
                || (prev.is_lowercase() && current.is_uppercase())
        }
    }
}

/// Subsequence match of `query` in `candidate`, smart-case: an all-lowercase
/// query matches case-insensitively. The window is narrowed from the right
/// so `src/main.rs` prefers the tight `main` over scattered letters.
pub fn fuzzy_match(query: &str, candidate: &str) -> Option<FuzzyMatch> {
    let query: Vec<char> = query.chars().filter(|c| !c.is_whitespace()).collect();
    if query.is_empty() {
        return Some(FuzzyMatch {
            score: 0,
            positions: Vec::new(),
        });
    }
    let case_sensitive = query.iter().any(|c| c.is_uppercase());
    let chars: Vec<char> = candidate.chars().collect();
    let eq = |a: char, b: char| {
        if case_sensitive {
            a == b
        } else {
            a.to_lowercase().eq(b.to_lowercase())
        }
    };

    // Forward pass: earliest position where the whole query has been seen.
    let mut qi = 0;
    let mut end = None;
    for (ci, &c) in chars.iter().enumerate() {
        if eq(c, query[qi]) {
            qi += 1;
            if qi == query.len() {
                end = Some(ci);
                break;
            }
        }
    }
    let end = end?;

    // Backward pass from the end gives the shortest window.
    let mut positions = vec![0; query.len()];
    let mut qi = query.len();
    let mut ci = end + 1;
    while qi > 0 && ci > 0 {
        ci -= 1;
        if eq(chars[ci], query[qi - 1]) {
            qi -= 1;
            positions[qi] = ci;
        }
    }

    let basename_start = chars
        .iter()
        .rposition(|c| *c == '/' || *c == '\\')
        .map_or(0, |idx| idx + 1);

    let mut score = 0;
    let mut previous: Option<usize> = None;
    for &pos in &positions {
        score += MATCH_SCORE;
        let prev_char = pos.checked_sub(1).map(|idx| chars[idx]);
        if is_boundary(prev_char, chars[pos]) {
            score += BOUNDARY_BONUS;
        }
        if pos >= basename_start {
            score += BASENAME_BONUS;
        }
        match previous {
            Some(prev) if pos == prev + 1 => score += CONSECUTIVE_BONUS,
            Some(prev) => score -= GAP_PENALTY * (pos - prev - 1) as i64,
            None => {}
        }
        previous = Some(pos);
    }
    // Shorter candidates win ties.
    score -= (chars.len() / 16) as i64;

    Some(FuzzyMatch { score, positions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsequence_positions_are_char_indices() {
        let hit = fuzzy_match("mrs", "src/main.rs").expect("match");
        assert_eq!(hit.positions, vec![4, 9, 10]);
        assert!(fuzzy_match("xyz", "src/main.rs").is_none());
    }

    #[test]
    fn basename_and_contiguous_matches_rank_higher() {
        let tight = fuzzy_match("main", "src/main.rs").expect("tight");
        let scattered = fuzzy_match("main", "src/model/admin/notes.rs").expect("scattered");
        assert!(tight.score > scattered.score);
    }

    #[test]
    fn uppercase_query_is_case_sensitive() {
        assert!(fuzzy_match("Readme", "README.md").is_none());
        assert!(fuzzy_match("readme", "README.md").is_some());
    }

    #[test]
    fn empty_query_matches_everything() {
        let hit = fuzzy_match("", "anything").expect("empty");
        assert!(hit.positions.is_empty());
    }

    #[test]
    fn multibyte_candidates_report_char_positions() {
        let hit = fuzzy_match("nd", "ñandú.txt").expect("match");
        assert_eq!(hit.positions, vec![2, 3]);
    }
}
