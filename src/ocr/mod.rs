pub mod bridge;
pub mod layout_builder;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use bridge::CommandOcrEngine;
pub use layout_builder::{build_page, PageBuilder};

/// A detected word: text plus a normalized `[min_x, min_y, max_x, max_y]` box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    #[serde(default)]
    pub paragraph: usize,
    pub words: Vec<OcrWord>,
}

/// Raw engine output in reading order. Boxes are validated when the page is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    pub lines: Vec<OcrLine>,
}

pub trait OcrEngine {
    fn recognize(&self, image_path: &Path) -> Result<OcrPage>;
}
