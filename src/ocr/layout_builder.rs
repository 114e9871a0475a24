use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use crate::core::error::{LabelError, LabelResult};
use crate::core::geometry::BBox;
use crate::core::model::{Line, Word};
use crate::core::page::{Page, EDIT_PADDING_PX};
use crate::core::raster::{InkThreshold, PageImage};
use crate::matching::SequenceAligner;
use crate::ocr::{OcrEngine, OcrPage};

/// Turns raw detections into a page with the image attached and every word
/// box snapped to the ink underneath.
pub fn build_page(ocr: OcrPage, image: PageImage) -> LabelResult<Page> {
    let mut lines = Vec::with_capacity(ocr.lines.len());
    for ocr_line in ocr.lines {
        if ocr_line.words.is_empty() {
            continue;
        }
        let words = ocr_line
            .words
            .into_iter()
            .map(|word| {
                let bbox = BBox::try_from(word.bbox)?;
                if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
                    return Err(LabelError::invalid_geometry(format!(
                        "degenerate box {:?} for {:?}",
                        word.bbox, word.text
                    )));
                }
                Ok(Word::new(word.text, bbox))
            })
            .collect::<LabelResult<Vec<_>>>()?;
        let mut line = Line::new(words).with_paragraph(ocr_line.paragraph);
        line.expand_bounding_boxes(&image);
        line.refine_bounding_boxes(&image, EDIT_PADDING_PX);
        lines.push(line);
    }
    debug!(lines = lines.len(), "built page from OCR output");

    let mut page = Page::new(lines);
    page.attach_image(image);
    Ok(page)
}

/// Runs an OCR engine over a page image and builds the editable page.
#[derive(Debug, Clone)]
pub struct PageBuilder<E> {
    engine: E,
    threshold: InkThreshold,
    aligner: SequenceAligner,
}

impl<E: OcrEngine> PageBuilder<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            threshold: InkThreshold::default(),
            aligner: SequenceAligner::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: InkThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_aligner(mut self, aligner: SequenceAligner) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn build(&self, image_path: &Path) -> Result<Page> {
        let image = PageImage::open(image_path, self.threshold)
            .with_context(|| format!("failed to open page image {}", image_path.display()))?;
        let ocr = self.engine.recognize(image_path)?;
        let page = build_page(ocr, image)
            .with_context(|| format!("invalid OCR output for {}", image_path.display()))?;
        Ok(page.with_aligner(self.aligner))
    }
}
