// 📏 String Similarity - pure, deterministic 0-100 scores
// Matching logic only talks to `SimilarityBackend`, so a different string
// metric can be swapped in without touching matching or consolidation.

use std::collections::BTreeSet;

/// A base `ratio` plus the derived partial and token variants
///
/// All scores are integers on a 0-100 scale; an empty input scores 0.
pub trait SimilarityBackend: Send + Sync {
    /// Whole-string similarity
    fn ratio(&self, a: &str, b: &str) -> u32;

    /// Best `ratio` of the shorter string against every equal-length
    /// window of the longer one
    fn partial_ratio(&self, a: &str, b: &str) -> u32 {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        if a_chars.is_empty() || b_chars.is_empty() {
            return 0;
        }

        let (shorter, longer) = if a_chars.len() <= b_chars.len() {
            (a_chars, b_chars)
        } else {
            (b_chars, a_chars)
        };
        let shorter: String = shorter.iter().collect();

        let width = shorter.chars().count();
        let mut best = 0;
        for start in 0..=(longer.len() - width) {
            let window: String = longer[start..start + width].iter().collect();
            let score = self.ratio(&shorter, &window);
            if score > best {
                best = score;
                if best == 100 {
                    break;
                }
            }
        }
        best
    }

    fn token_sort_ratio(&self, a: &str, b: &str) -> u32 {
        let (a, b) = (sorted_tokens(a), sorted_tokens(b));
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        self.ratio(&a, &b)
    }

    fn partial_token_sort_ratio(&self, a: &str, b: &str) -> u32 {
        let (a, b) = (sorted_tokens(a), sorted_tokens(b));
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        self.partial_ratio(&a, &b)
    }

    fn token_set_ratio(&self, a: &str, b: &str) -> u32 {
        token_set_with(a, b, |x, y| self.ratio(x, y))
    }

    fn partial_token_set_ratio(&self, a: &str, b: &str) -> u32 {
        token_set_with(a, b, |x, y| self.partial_ratio(x, y))
    }

    /// Mean of the six metrics, 0-100
    fn aggregate(&self, a: &str, b: &str) -> f64 {
        let sum = self.ratio(a, b)
            + self.partial_ratio(a, b)
            + self.token_sort_ratio(a, b)
            + self.token_set_ratio(a, b)
            + self.partial_token_sort_ratio(a, b)
            + self.partial_token_set_ratio(a, b);
        sum as f64 / 6.0
    }
}

// ============================================================================
// TOKEN HELPERS
// ============================================================================

/// Lower-case, punctuation to spaces, trimmed
pub fn process(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.to_lowercase().trim().to_string()
}

fn sorted_tokens(s: &str) -> String {
    let processed = process(s);
    let mut tokens: Vec<&str> = processed.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_set_with<F>(a: &str, b: &str, score: F) -> u32
where
    F: Fn(&str, &str) -> u32,
{
    let (pa, pb) = (process(a), process(b));
    if pa.is_empty() || pb.is_empty() {
        return 0;
    }
    let tokens_a: BTreeSet<&str> = pa.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = pb.split_whitespace().collect();

    let join = |set: Vec<&str>| set.join(" ");
    let sect = join(tokens_a.intersection(&tokens_b).copied().collect());
    let diff_ab = join(tokens_a.difference(&tokens_b).copied().collect());
    let diff_ba = join(tokens_b.difference(&tokens_a).copied().collect());

    let combined_ab = format!("{} {}", sect, diff_ab).trim().to_string();
    let combined_ba = format!("{} {}", sect, diff_ba).trim().to_string();

    [
        score(&sect, &combined_ab),
        score(&sect, &combined_ba),
        score(&combined_ab, &combined_ba),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Indel-distance ratio: 2 * matching chars / total chars
#[derive(Debug, Clone, Copy, Default)]
pub struct IndelRatio;

impl SimilarityBackend for IndelRatio {
    fn ratio(&self, a: &str, b: &str) -> u32 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        let lcs = longest_common_subsequence(&a, &b);
        (100.0 * 2.0 * lcs as f64 / total as f64).round() as u32
    }
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized Levenshtein from `strsim`
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenshteinRatio;

impl SimilarityBackend for LevenshteinRatio {
    fn ratio(&self, a: &str, b: &str) -> u32 {
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        (strsim::normalized_levenshtein(a, b) * 100.0).round() as u32
    }
}
