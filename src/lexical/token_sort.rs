/// Token-sort similarity
///
/// Both strings are lowercased, split on whitespace, sorted and re-joined with
/// single spaces. The similarity of the two normalized strings is the
/// Indel-normalized ratio `200 * LCS / (len_a + len_b)` over chars, in 0..=100.
use ahash::AHashMap;

/// Normalize a string into its sorted-token form, as chars
pub fn sorted_tokens(text: &str) -> Vec<char> {
    let lowered = text.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ").chars().collect()
}

/// Ratio between two already-normalized char sequences
pub fn ratio(lcs: usize, len_a: usize, len_b: usize) -> f64 {
    let total = len_a + len_b;
    if total == 0 {
        return 100.0;
    }
    (200 * lcs) as f64 / total as f64
}

/// Highest ratio two sequences of these lengths could reach
pub fn ratio_upper_bound(len_a: usize, len_b: usize) -> f64 {
    ratio(len_a.min(len_b), len_a, len_b)
}

/// Token-sort ratio of two raw strings
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);
    TokenSortScorer::from_sorted(a).score(&b)
}

/// Query-side scorer
///
/// Precomputes the per-char position bitmasks of the query so each catalog
/// text costs one pass over its chars (bit-parallel LCS, 64 positions per
/// word).
pub struct TokenSortScorer {
    pattern_len: usize,
    words: usize,
    masks: AHashMap<char, Vec<u64>>,
}

impl TokenSortScorer {
    pub fn new(query: &str) -> Self {
        Self::from_sorted(sorted_tokens(query))
    }

    fn from_sorted(pattern: Vec<char>) -> Self {
        let words = pattern.len().div_ceil(64).max(1);
        let mut masks: AHashMap<char, Vec<u64>> = AHashMap::new();
        for (i, c) in pattern.iter().enumerate() {
            masks.entry(*c).or_insert_with(|| vec![0; words])[i / 64] |= 1u64 << (i % 64);
        }
        Self {
            pattern_len: pattern.len(),
            words,
            masks,
        }
    }

    pub fn len(&self) -> usize {
        self.pattern_len
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_len == 0
    }

    /// Score against a normalized (sorted-token) text
    pub fn score(&self, text: &[char]) -> f64 {
        ratio(self.lcs(text), self.pattern_len, text.len())
    }

    fn lcs(&self, text: &[char]) -> usize {
        if self.pattern_len == 0 || text.is_empty() {
            return 0;
        }

        let mut state = vec![u64::MAX; self.words];
        for c in text {
            let Some(mask) = self.masks.get(c) else {
                continue;
            };
            let mut carry = 0u64;
            for (s, m) in state.iter_mut().zip(mask) {
                let matched = *s & m;
                let (sum, c1) = s.overflowing_add(matched);
                let (sum, c2) = sum.overflowing_add(carry);
                carry = u64::from(c1 || c2);
                *s = sum | (*s - matched);
            }
        }

        let tail = self.pattern_len % 64;
        let unmatched: u32 = state
            .iter()
            .enumerate()
            .map(|(w, &s)| {
                if w + 1 == self.words && tail != 0 {
                    (s & ((1u64 << tail) - 1)).count_ones()
                } else {
                    s.count_ones()
                }
            })
            .sum();
        self.pattern_len - unmatched as usize
    }
}
