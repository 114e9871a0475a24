pub mod align;
pub mod compare;
pub mod resolve;

pub use align::{AlignmentConfig, LineAlignment, UnpairedGroundTruth, WordMatch};
pub use compare::{match_score, tokenize, EXACT_MATCH};

/// Aligns a line's OCR tokens against its ground-truth tokens.
pub trait LineAligner {
    fn align(&self, ocr: &[&str], ground_truth: &[&str]) -> LineAlignment;
}

/// Needleman-Wunsch word alignment scored with [`match_score`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceAligner {
    config: AlignmentConfig,
}

impl SequenceAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }
}

impl LineAligner for SequenceAligner {
    fn align(&self, ocr: &[&str], ground_truth: &[&str]) -> LineAlignment {
        align::align_tokens(ocr, ground_truth, &self.config)
    }
}
