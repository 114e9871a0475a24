use crate::matching::compare::match_score;

/// Tuning for the word-level alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentConfig {
    /// Cost of leaving one OCR or ground-truth word unpaired, on the same
    /// 0..=100 scale as match scores.
    pub gap_penalty: i64,
}

impl AlignmentConfig {
    /// Largest accepted gap penalty; keeps DP totals far from `i64` overflow.
    pub const MAX_GAP_PENALTY: i64 = 1_000_000;
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self { gap_penalty: 100 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordMatch {
    pub ground_truth_index: usize,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpairedGroundTruth {
    pub ground_truth_index: usize,
    /// Number of OCR words preceding this ground-truth word.
    pub insert_at: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineAlignment {
    /// One entry per OCR word; `None` when the word has no ground-truth partner.
    pub assignments: Vec<Option<WordMatch>>,
    /// Ground-truth words without an OCR partner, in reading order.
    pub unmatched_ground_truth: Vec<UnpairedGroundTruth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Pair,
    SkipGroundTruth,
    SkipOcr,
}

/// Global (Needleman-Wunsch) alignment of OCR tokens against ground-truth tokens.
///
/// Pair weight is `2 * score - 100` so an exact pair earns +100 and an
/// unrelated pair costs -100; every gap costs `gap_penalty`. On equal totals
/// the traceback prefers pairing, then skipping ground truth, then skipping OCR.
pub fn align_tokens(
    ocr: &[&str],
    ground_truth: &[&str],
    config: &AlignmentConfig,
) -> LineAlignment {
    let n = ocr.len();
    let m = ground_truth.len();
    let gap = config.gap_penalty.clamp(0, AlignmentConfig::MAX_GAP_PENALTY);

    let scores: Vec<Vec<u8>> = ocr
        .iter()
        .map(|o| ground_truth.iter().map(|g| match_score(o, g)).collect())
        .collect();
    let pair_weight = |i: usize, j: usize| 2 * i64::from(scores[i][j]) - 100;

    let mut dp = vec![vec![0_i64; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = -gap * i as i64;
    }
    for j in 0..=m {
        dp[0][j] = -gap * j as i64;
    }
    for i in 1..=n {
        for j in 1..=m {
            let pair = dp[i - 1][j - 1] + pair_weight(i - 1, j - 1);
            let skip_ocr = dp[i - 1][j] - gap;
            let skip_gt = dp[i][j - 1] - gap;
            dp[i][j] = pair.max(skip_ocr).max(skip_gt);
        }
    }

    let mut steps = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        let step = if i > 0 && j > 0 && dp[i][j] == dp[i - 1][j - 1] + pair_weight(i - 1, j - 1) {
            Step::Pair
        } else if j > 0 && dp[i][j] == dp[i][j - 1] - gap {
            Step::SkipGroundTruth
        } else {
            Step::SkipOcr
        };
        match step {
            Step::Pair => {
                i -= 1;
                j -= 1;
            }
            Step::SkipGroundTruth => j -= 1,
            Step::SkipOcr => i -= 1,
        }
        steps.push((step, i, j));
    }
    steps.reverse();

    let mut alignment = LineAlignment {
        assignments: vec![None; n],
        unmatched_ground_truth: Vec::new(),
    };
    for (step, i, j) in steps {
        match step {
            Step::Pair => {
                alignment.assignments[i] = Some(WordMatch {
                    ground_truth_index: j,
                    score: scores[i][j],
                });
            }
            Step::SkipGroundTruth => alignment.unmatched_ground_truth.push(UnpairedGroundTruth {
                ground_truth_index: j,
                insert_at: i,
            }),
            Step::SkipOcr => {}
        }
    }
    alignment
}
