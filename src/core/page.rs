use std::fmt;
use std::rc::Rc;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::{LabelError, LabelResult};
use crate::core::geometry::BBox;
use crate::core::model::{Line, MatchStatus, MergeDirection, Word};
use crate::core::raster::PageImage;
use crate::matching::SequenceAligner;

/// Padding applied after interactive edits (split, margin nudge).
pub const EDIT_PADDING_PX: u32 = 1;
/// Padding used by the batch refine actions.
pub const BATCH_PADDING_PX: u32 = 2;

const WORD_COLOR: Rgb<u8> = Rgb([0, 90, 255]);
const LINE_COLOR: Rgb<u8> = Rgb([0, 170, 0]);
const PARAGRAPH_COLOR: Rgb<u8> = Rgb([200, 0, 200]);
const EXACT_COLOR: Rgb<u8> = Rgb([0, 170, 0]);
const MISMATCH_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
const UNMATCHED_COLOR: Rgb<u8> = Rgb([220, 0, 0]);

/// Notification emitted after a page mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    ImageAttached,
    WordsChanged { line: usize },
    GeometryChanged { line: Option<usize> },
    GroundTruthChanged { line: Option<usize> },
    ValidationChanged { line: Option<usize> },
    LinesRemoved { count: usize },
}

/// Receives page change notifications, e.g. to redraw an editor view.
pub trait PageObserver {
    fn page_changed(&self, event: &PageEvent);
}

/// Which lines an editor view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFilter {
    #[default]
    All,
    MismatchesOnly,
    UnvalidatedMismatchesOnly,
}

impl LineFilter {
    pub fn accepts(&self, line: &Line) -> bool {
        match self {
            Self::All => true,
            Self::MismatchesOnly => !line.ground_truth_exact_match(),
            Self::UnvalidatedMismatchesOnly => {
                !line.ground_truth_exact_match() && !line.is_validated()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PageStats {
    pub total_lines: usize,
    pub exact_matches: usize,
    pub mismatches: usize,
    pub validated: usize,
    pub unvalidated_mismatches: usize,
}

impl PageStats {
    /// Fraction of lines that match exactly, 0.0 for an empty page.
    pub fn accuracy(&self) -> f64 {
        if self.total_lines == 0 {
            0.0
        } else {
            self.exact_matches as f64 / self.total_lines as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Words,
    Lines,
    Paragraphs,
    Mismatches,
}

/// Annotated copies of the page image.
#[derive(Debug, Clone)]
pub struct PageOverlays {
    pub words: RgbImage,
    pub lines: RgbImage,
    pub paragraphs: RgbImage,
    pub mismatches: RgbImage,
}

impl PageOverlays {
    fn render(image: &PageImage, lines: &[Line]) -> Self {
        let (width, height) = image.dimensions();
        let mut words = image.rgb().clone();
        let mut line_overlay = image.rgb().clone();
        let mut paragraphs = image.rgb().clone();
        let mut mismatches = image.rgb().clone();

        let mut paragraph_boxes: Vec<(usize, BBox)> = Vec::new();
        for line in lines {
            for word in line.words() {
                draw_box(&mut words, word.bbox(), width, height, WORD_COLOR);
                let color = match word.status() {
                    MatchStatus::Exact => EXACT_COLOR,
                    MatchStatus::Mismatch => MISMATCH_COLOR,
                    MatchStatus::Unmatched => UNMATCHED_COLOR,
                };
                draw_box(&mut mismatches, word.bbox(), width, height, color);
            }
            let Some(line_box) = line.bbox() else {
                continue;
            };
            draw_box(&mut line_overlay, line_box, width, height, LINE_COLOR);
            if !line.unmatched_ground_truth_words().is_empty() {
                draw_box(&mut mismatches, line_box, width, height, UNMATCHED_COLOR);
            }
            match paragraph_boxes.iter_mut().find(|(p, _)| *p == line.paragraph()) {
                Some((_, bbox)) => *bbox = bbox.union(&line_box),
                None => paragraph_boxes.push((line.paragraph(), line_box)),
            }
        }
        for (_, bbox) in paragraph_boxes {
            draw_box(&mut paragraphs, bbox, width, height, PARAGRAPH_COLOR);
        }

        Self {
            words,
            lines: line_overlay,
            paragraphs,
            mismatches,
        }
    }

    pub fn get(&self, kind: OverlayKind) -> &RgbImage {
        match kind {
            OverlayKind::Words => &self.words,
            OverlayKind::Lines => &self.lines,
            OverlayKind::Paragraphs => &self.paragraphs,
            OverlayKind::Mismatches => &self.mismatches,
        }
    }
}

fn draw_box(canvas: &mut RgbImage, bbox: BBox, width: u32, height: u32, color: Rgb<u8>) {
    let px = bbox.to_pixels(width, height);
    let rect = Rect::at(px.x0 as i32, px.y0 as i32).of_size(px.width().max(1), px.height().max(1));
    draw_hollow_rect_mut(canvas, rect, color);
}

/// One scanned page: its lines plus the session-only image, overlays and
/// observer. Only `lines` is persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct Page {
    lines: Vec<Line>,
    #[serde(skip)]
    image: Option<PageImage>,
    #[serde(skip)]
    overlays: Option<PageOverlays>,
    #[serde(skip)]
    observer: Option<Rc<dyn PageObserver>>,
    #[serde(skip)]
    aligner: SequenceAligner,
    #[serde(skip, default = "default_edit_padding")]
    edit_padding: u32,
}

fn default_edit_padding() -> u32 {
    EDIT_PADDING_PX
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("lines", &self.lines)
            .field("image", &self.image.as_ref().map(PageImage::dimensions))
            .field("overlays_cached", &self.overlays.is_some())
            .field("observer", &self.observer.is_some())
            .field("aligner", &self.aligner)
            .finish()
    }
}

/// Pages compare by their persisted state.
impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.lines == other.lines
    }
}

impl Page {
    pub fn new(lines: Vec<Line>) -> Self {
        Self {
            lines,
            image: None,
            overlays: None,
            observer: None,
            aligner: SequenceAligner::default(),
            edit_padding: EDIT_PADDING_PX,
        }
    }

    pub fn with_aligner(mut self, aligner: SequenceAligner) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn with_edit_padding(mut self, padding_px: u32) -> Self {
        self.edit_padding = padding_px;
        self
    }

    pub fn aligner(&self) -> &SequenceAligner {
        &self.aligner
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> LabelResult<&Line> {
        self.lines
            .get(index)
            .ok_or_else(|| line_index_error(index, self.lines.len()))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn image(&self) -> Option<&PageImage> {
        self.image.as_ref()
    }

    pub fn require_image(&self) -> LabelResult<&PageImage> {
        self.image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))
    }

    pub fn attach_image(&mut self, image: PageImage) {
        self.image = Some(image);
        self.notify(PageEvent::ImageAttached);
    }

    pub fn set_observer(&mut self, observer: Rc<dyn PageObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    fn notify(&mut self, event: PageEvent) {
        // Word colours depend on ground truth, so every change invalidates.
        self.overlays = None;
        debug!(?event, "page changed");
        if let Some(observer) = &self.observer {
            observer.page_changed(&event);
        }
    }

    /// Pairs proofread lines with OCR lines by position and aligns each one.
    /// OCR lines without a proofread partner get empty ground truth.
    pub fn attach_ground_truth<S: AsRef<str>>(&mut self, ground_truth_lines: &[S]) {
        if ground_truth_lines.len() != self.lines.len() {
            warn!(
                ocr_lines = self.lines.len(),
                ground_truth_lines = ground_truth_lines.len(),
                "line count mismatch, pairing by position"
            );
        }
        let aligner = self.aligner;
        for (index, line) in self.lines.iter_mut().enumerate() {
            let text = ground_truth_lines
                .get(index)
                .map(|s| s.as_ref().to_string())
                .unwrap_or_default();
            line.set_base_ground_truth(&aligner, text);
        }
        self.notify(PageEvent::GroundTruthChanged { line: None });
    }

    pub fn set_line_ground_truth(
        &mut self,
        line: usize,
        text: impl Into<String>,
    ) -> LabelResult<()> {
        let aligner = self.aligner;
        line_mut(&mut self.lines, line)?.set_base_ground_truth(&aligner, text);
        self.notify(PageEvent::GroundTruthChanged { line: Some(line) });
        Ok(())
    }

    /// Realigns every line against its stored proofread text.
    pub fn realign_all(&mut self) {
        let aligner = self.aligner;
        for line in &mut self.lines {
            line.realign(&aligner);
        }
        self.notify(PageEvent::GroundTruthChanged { line: None });
    }

    pub fn split_word(
        &mut self,
        line: usize,
        word: usize,
        offset: f64,
        char_index: usize,
    ) -> LabelResult<()> {
        let aligner = self.aligner;
        let padding = self.edit_padding;
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        line_mut(&mut self.lines, line)?
            .split_word(&aligner, word, offset, char_index, image, padding)?;
        self.notify(PageEvent::WordsChanged { line });
        Ok(())
    }

    /// Returns `false` when the word has no neighbour in that direction.
    pub fn merge_words(
        &mut self,
        line: usize,
        word: usize,
        direction: MergeDirection,
    ) -> LabelResult<bool> {
        let aligner = self.aligner;
        let merged = line_mut(&mut self.lines, line)?.merge_words(&aligner, word, direction)?;
        if merged {
            self.notify(PageEvent::WordsChanged { line });
        }
        Ok(merged)
    }

    pub fn remove_word(&mut self, line: usize, word: usize) -> LabelResult<Word> {
        let aligner = self.aligner;
        let removed = line_mut(&mut self.lines, line)?.remove_word(&aligner, word)?;
        self.notify(PageEvent::WordsChanged { line });
        Ok(removed)
    }

    pub fn insert_unmatched_ground_truth_word(
        &mut self,
        line: usize,
        unmatched_index: usize,
        bbox: BBox,
    ) -> LabelResult<()> {
        let aligner = self.aligner;
        line_mut(&mut self.lines, line)?
            .insert_unmatched_ground_truth_word(&aligner, unmatched_index, bbox)?;
        self.notify(PageEvent::WordsChanged { line });
        Ok(())
    }

    pub fn dismiss_unmatched_ground_truth(
        &mut self,
        line: usize,
        unmatched_index: usize,
    ) -> LabelResult<()> {
        let aligner = self.aligner;
        line_mut(&mut self.lines, line)?.dismiss_unmatched_ground_truth(&aligner, unmatched_index)?;
        self.notify(PageEvent::GroundTruthChanged { line: Some(line) });
        Ok(())
    }

    pub fn set_word_ground_truth(
        &mut self,
        line: usize,
        word: usize,
        text: impl Into<String>,
    ) -> LabelResult<()> {
        line_mut(&mut self.lines, line)?.set_word_ground_truth(word, text)?;
        self.notify(PageEvent::GroundTruthChanged { line: Some(line) });
        Ok(())
    }

    /// Takes every word's OCR text as its ground truth and drops the line's
    /// unmatched ground-truth words.
    pub fn copy_line_ocr_to_ground_truth(&mut self, line: usize) -> LabelResult<()> {
        line_mut(&mut self.lines, line)?.copy_ocr_to_ground_truth();
        self.notify(PageEvent::GroundTruthChanged { line: Some(line) });
        Ok(())
    }

    /// Stores a front-end flag alongside the line's validation state.
    pub fn set_line_attribute(
        &mut self,
        line: usize,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> LabelResult<()> {
        line_mut(&mut self.lines, line)?
            .extra_attributes_mut()
            .insert(key.into(), value);
        self.notify(PageEvent::ValidationChanged { line: Some(line) });
        Ok(())
    }

    pub fn mark_line_validated(&mut self, line: usize) -> LabelResult<()> {
        line_mut(&mut self.lines, line)?.mark_validated()?;
        self.notify(PageEvent::ValidationChanged { line: Some(line) });
        Ok(())
    }

    pub fn clear_line_validated(&mut self, line: usize) -> LabelResult<()> {
        line_mut(&mut self.lines, line)?.clear_validated();
        self.notify(PageEvent::ValidationChanged { line: Some(line) });
        Ok(())
    }

    pub fn remove_line(&mut self, line: usize) -> LabelResult<Line> {
        if line >= self.lines.len() {
            return Err(line_index_error(line, self.lines.len()));
        }
        let removed = self.lines.remove(line);
        self.notify(PageEvent::LinesRemoved { count: 1 });
        Ok(removed)
    }

    /// Drops lines without words. Returns how many were removed.
    pub fn remove_empty_lines(&mut self) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| !line.is_empty());
        let count = before - self.lines.len();
        if count > 0 {
            self.notify(PageEvent::LinesRemoved { count });
        }
        count
    }

    /// Nudges a word's edges by pixel margins (left, top, right, bottom), then
    /// refines it with the edit padding.
    pub fn adjust_word_bbox(
        &mut self,
        line: usize,
        word: usize,
        margins_px: [i32; 4],
    ) -> LabelResult<()> {
        let padding = self.edit_padding;
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        let (width, height) = image.dimensions();
        line_mut(&mut self.lines, line)?.update_word_bbox(word, |bbox| {
            Ok(bbox
                .with_pixel_margins(margins_px, width, height)?
                .refine(image, padding))
        })?;
        self.notify(PageEvent::GeometryChanged { line: Some(line) });
        Ok(())
    }

    pub fn crop_word_top(&mut self, line: usize, word: usize) -> LabelResult<()> {
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        line_mut(&mut self.lines, line)?
            .update_word_bbox(word, |bbox| Ok(bbox.crop_top(image)))?;
        self.notify(PageEvent::GeometryChanged { line: Some(line) });
        Ok(())
    }

    pub fn crop_word_bottom(&mut self, line: usize, word: usize) -> LabelResult<()> {
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        line_mut(&mut self.lines, line)?
            .update_word_bbox(word, |bbox| Ok(bbox.crop_bottom(image)))?;
        self.notify(PageEvent::GeometryChanged { line: Some(line) });
        Ok(())
    }

    /// Crop-bottom, expand and refine every word box.
    pub fn expand_and_refine_all(&mut self, padding_px: u32) -> LabelResult<()> {
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        for line in &mut self.lines {
            for index in 0..line.len() {
                line.update_word_bbox(index, |bbox| {
                    Ok(bbox
                        .crop_bottom(image)
                        .expand_to_content(image)
                        .refine(image, padding_px))
                })?;
            }
        }
        self.notify(PageEvent::GeometryChanged { line: None });
        Ok(())
    }

    pub fn refine_all(&mut self, padding_px: u32) -> LabelResult<()> {
        let image = self
            .image
            .as_ref()
            .ok_or(LabelError::MissingImage("page image"))?;
        for line in &mut self.lines {
            line.refine_bounding_boxes(image, padding_px);
        }
        self.notify(PageEvent::GeometryChanged { line: None });
        Ok(())
    }

    pub fn stats(&self) -> PageStats {
        let mut stats = PageStats {
            total_lines: self.lines.len(),
            ..PageStats::default()
        };
        for line in &self.lines {
            let exact = line.ground_truth_exact_match();
            if exact {
                stats.exact_matches += 1;
            } else {
                stats.mismatches += 1;
            }
            if line.is_validated() {
                stats.validated += 1;
            } else if !exact {
                stats.unvalidated_mismatches += 1;
            }
        }
        stats
    }

    /// Validates every exact-match line. Returns how many were newly marked.
    pub fn mark_exact_matches_validated(&mut self) -> usize {
        let mut marked = 0;
        for line in &mut self.lines {
            if line.ground_truth_exact_match() && !line.is_validated() {
                line.force_validated();
                marked += 1;
            }
        }
        if marked > 0 {
            self.notify(PageEvent::ValidationChanged { line: None });
        }
        marked
    }

    /// Fills missing word ground truth from OCR text. Returns the number of
    /// words changed.
    pub fn copy_ocr_to_ground_truth(&mut self) -> usize {
        let filled: usize = self
            .lines
            .iter_mut()
            .map(Line::fill_missing_ground_truth)
            .sum();
        if filled > 0 {
            self.notify(PageEvent::GroundTruthChanged { line: None });
        }
        filled
    }

    pub fn visible_lines(&self, filter: LineFilter) -> Vec<(usize, &Line)> {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| filter.accepts(line))
            .collect()
    }

    /// Plain-text summary of every line's match and validation state.
    pub fn validation_report(&self) -> String {
        let stats = self.stats();
        let mut report = format!(
            "lines: {}  exact: {}  mismatched: {}  validated: {}  accuracy: {:.1}%\n",
            stats.total_lines,
            stats.exact_matches,
            stats.mismatches,
            stats.validated,
            stats.accuracy() * 100.0
        );
        for (index, line) in self.lines.iter().enumerate() {
            let validated = if line.is_validated() { " [validated]" } else { "" };
            if line.ground_truth_exact_match() {
                report.push_str(&format!("line {}: exact{validated}\n", index + 1));
                continue;
            }
            let mismatched = line
                .words()
                .iter()
                .filter(|w| w.status() != MatchStatus::Exact)
                .count();
            report.push_str(&format!(
                "line {}: {} word(s) off, {} unmatched ground truth{validated}\n",
                index + 1,
                mismatched,
                line.unmatched_ground_truth_words().len()
            ));
            report.push_str(&format!("  ocr: {}\n", line.ocr_text()));
            report.push_str(&format!("  gt:  {}\n", line.base_ground_truth_text()));
        }
        report
    }

    pub fn overlays_cached(&self) -> bool {
        self.overlays.is_some()
    }

    /// Overlays for the current geometry, rendered on first access after a change.
    pub fn overlays(&mut self) -> LabelResult<&PageOverlays> {
        if self.overlays.is_none() {
            let rendered = PageOverlays::render(self.require_image()?, &self.lines);
            self.overlays = Some(rendered);
        }
        self.overlays
            .as_ref()
            .ok_or(LabelError::MissingImage("page overlays"))
    }

    pub fn overlay(&mut self, kind: OverlayKind) -> LabelResult<&RgbImage> {
        Ok(self.overlays()?.get(kind))
    }
}

fn line_mut(lines: &mut [Line], index: usize) -> LabelResult<&mut Line> {
    let len = lines.len();
    lines
        .get_mut(index)
        .ok_or_else(|| line_index_error(index, len))
}

fn line_index_error(index: usize, len: usize) -> LabelError {
    LabelError::out_of_range("line index", index, format!("0..{len}"))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::core::raster::fixtures::page_with_ink;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<PageEvent>>,
    }

    impl PageObserver for Recorder {
        fn page_changed(&self, event: &PageEvent) {
            self.events.borrow_mut().push(event.clone());
        }
    }

    fn bbox(l: f64, t: f64, r: f64, b: f64) -> BBox {
        BBox::normalized(l, t, r, b).unwrap()
    }

    fn sample_page() -> Page {
        let first = Line::new(vec![
            Word::new("The", bbox(0.1, 0.1, 0.2, 0.2)),
            Word::new("end", bbox(0.3, 0.1, 0.4, 0.2)),
        ]);
        let second = Line::new(vec![
            Word::new("Helo", bbox(0.1, 0.3, 0.2, 0.4)),
            Word::new("world", bbox(0.3, 0.3, 0.4, 0.4)),
        ])
        .with_paragraph(1);
        let mut page = Page::new(vec![first, second]);
        page.attach_ground_truth(&["The end", "Hello world"]);
        page
    }

    #[test]
    fn stats_count_exact_and_validated_lines() {
        let mut page = sample_page();
        assert_eq!(
            page.stats(),
            PageStats {
                total_lines: 2,
                exact_matches: 1,
                mismatches: 1,
                validated: 0,
                unvalidated_mismatches: 1,
            }
        );
        assert_eq!(page.mark_exact_matches_validated(), 1);
        assert_eq!(page.mark_exact_matches_validated(), 0);
        assert_eq!(page.stats().validated, 1);
        assert_eq!(page.stats().accuracy(), 0.5);
    }

    #[test]
    fn filters_select_mismatched_lines() {
        let mut page = sample_page();
        let indices = |page: &Page, filter| {
            page.visible_lines(filter)
                .into_iter()
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        };
        assert_eq!(indices(&page, LineFilter::All), vec![0, 1]);
        assert_eq!(indices(&page, LineFilter::MismatchesOnly), vec![1]);

        page.set_word_ground_truth(1, 0, "Helo").unwrap();
        page.mark_line_validated(1).unwrap();
        assert!(indices(&page, LineFilter::MismatchesOnly).is_empty());
        assert!(indices(&page, LineFilter::UnvalidatedMismatchesOnly).is_empty());

        // Restoring the proofread text changes the labels the operator approved.
        page.set_line_ground_truth(1, "Hello world").unwrap();
        assert_eq!(indices(&page, LineFilter::MismatchesOnly), vec![1]);
        assert_eq!(indices(&page, LineFilter::UnvalidatedMismatchesOnly), vec![1]);
    }

    #[test]
    fn split_of_validated_line_needs_review_again() {
        let mut page = sample_page();
        page.attach_image(page_with_ink(100, 100, &[(11, 12, 14, 18), (16, 12, 19, 18)]));
        page.mark_line_validated(0).unwrap();
        assert_eq!(page.stats().validated, 1);

        page.split_word(0, 0, 0.5, 1).unwrap();
        let line = page.line(0).unwrap();
        assert_eq!(line.ocr_text(), "T he end");
        assert!(!line.is_validated());
        assert!(!line.ground_truth_exact_match());
        let stats = page.stats();
        assert_eq!(stats.validated, 0);
        assert_eq!(stats.unvalidated_mismatches, 2);
        assert_eq!(
            page.visible_lines(LineFilter::UnvalidatedMismatchesOnly)
                .into_iter()
                .map(|(i, _)| i)
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn merge_of_validated_line_needs_review_again() {
        let mut page = sample_page();
        page.mark_line_validated(0).unwrap();
        page.merge_words(0, 0, MergeDirection::Right).unwrap();
        let line = page.line(0).unwrap();
        assert!(!line.is_validated());
        assert_eq!(line.unmatched_ground_truth_words().len(), 1);
        assert_eq!(page.stats().unvalidated_mismatches, 2);
    }

    #[test]
    fn clearing_validation_notifies() {
        let recorder = Rc::new(Recorder::default());
        let mut page = sample_page();
        page.mark_line_validated(0).unwrap();
        page.set_observer(recorder.clone());
        page.clear_line_validated(0).unwrap();
        assert!(!page.line(0).unwrap().is_validated());
        assert_eq!(page.stats().validated, 0);
        assert!(page.clear_line_validated(5).is_err());
        assert_eq!(
            recorder.events.borrow().as_slice(),
            &[PageEvent::ValidationChanged { line: Some(0) }]
        );
    }

    #[test]
    fn realign_all_replaces_manual_overrides() {
        let mut page = sample_page();
        page.set_word_ground_truth(1, 0, "Helo").unwrap();
        page.mark_line_validated(1).unwrap();
        page.realign_all();
        let line = page.line(1).unwrap();
        assert_eq!(line.words()[0].ground_truth_text(), Some("Hello"));
        assert!(!line.is_validated());
        assert!(page.line(0).unwrap().ground_truth_exact_match());
    }

    #[test]
    fn copy_line_ocr_accepts_whole_line() {
        let mut page = sample_page();
        page.set_line_ground_truth(0, "The end .").unwrap();
        assert_eq!(page.line(0).unwrap().unmatched_ground_truth_words().len(), 1);
        page.copy_line_ocr_to_ground_truth(0).unwrap();
        let line = page.line(0).unwrap();
        assert!(line.unmatched_ground_truth_words().is_empty());
        assert!(line.ground_truth_exact_match());
        assert!(!page.line(1).unwrap().ground_truth_exact_match());
        assert!(page.copy_line_ocr_to_ground_truth(2).is_err());
    }

    #[test]
    fn line_attributes_are_persisted() {
        let mut page = sample_page();
        page.set_line_attribute(1, "needs_recheck", serde_json::Value::Bool(true))
            .unwrap();
        assert_eq!(
            page.line(1).unwrap().attributes().extra.get("needs_recheck"),
            Some(&serde_json::Value::Bool(true))
        );
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["lines"][1]["attributes"]["needs_recheck"], true);
        assert!(page.set_line_attribute(9, "x", serde_json::Value::Null).is_err());
    }

    #[test]
    fn crop_bottom_drops_blank_rows() {
        let mut page = Page::new(vec![Line::new(vec![Word::new(
            "The",
            bbox(0.1, 0.1, 0.2, 0.5),
        )])]);
        page.attach_image(page_with_ink(100, 100, &[(12, 12, 18, 18)]));
        page.crop_word_bottom(0, 0).unwrap();
        let px = page.line(0).unwrap().words()[0].bbox().to_pixels(100, 100);
        assert_eq!((px.x0, px.y0, px.x1, px.y1), (10, 10, 20, 18));
    }

    #[test]
    fn auto_refine_snaps_over_tall_word_to_its_ink() {
        // Ink runs past the right edge; the box hangs far below the text.
        let mut page = Page::new(vec![Line::new(vec![Word::new(
            "The",
            bbox(0.1, 0.1, 0.2, 0.5),
        )])]);
        page.attach_image(page_with_ink(100, 100, &[(12, 12, 24, 18)]));
        page.expand_and_refine_all(BATCH_PADDING_PX).unwrap();
        let px = page.line(0).unwrap().words()[0].bbox().to_pixels(100, 100);
        assert_eq!((px.x0, px.y0, px.x1, px.y1), (10, 10, 26, 20));
    }

    #[test]
    fn missing_ground_truth_lines_are_unmatched() {
        let mut page = sample_page();
        page.attach_ground_truth(&["The end"]);
        let second = page.line(1).unwrap();
        assert!(second.words().iter().all(|w| w.status() == MatchStatus::Unmatched));
        assert_eq!(page.copy_ocr_to_ground_truth(), 2);
        assert!(page.line(1).unwrap().ground_truth_exact_match());
    }

    #[test]
    fn pixel_operations_require_image() {
        let mut page = sample_page();
        assert!(matches!(page.split_word(0, 0, 0.5, 1), Err(LabelError::MissingImage(_))));
        assert!(matches!(page.refine_all(2), Err(LabelError::MissingImage(_))));
        assert!(matches!(page.crop_word_top(0, 0), Err(LabelError::MissingImage(_))));
        assert!(page.overlays().is_err());
    }

    #[test]
    fn adjust_rejects_margins_outside_image_without_change() {
        let mut page = sample_page();
        page.attach_image(page_with_ink(100, 100, &[(12, 12, 18, 18)]));
        let before = page.clone();
        let result = page.adjust_word_bbox(0, 0, [-20, 0, 0, 0]);
        assert!(matches!(result, Err(LabelError::OutOfRange { .. })));
        assert_eq!(page, before);
        assert!(page.adjust_word_bbox(0, 9, [0, 0, 0, 0]).is_err());
    }

    #[test]
    fn adjust_nudges_then_refines() {
        let mut page = sample_page();
        page.attach_image(page_with_ink(100, 100, &[(12, 12, 24, 18)]));
        page.adjust_word_bbox(0, 0, [0, 0, 5, 0]).unwrap();
        let px = page.line(0).unwrap().words()[0].bbox().to_pixels(100, 100);
        assert_eq!((px.x0, px.y0, px.x1, px.y1), (11, 11, 25, 19));
    }

    #[test]
    fn overlays_are_invalidated_by_changes() {
        let mut page = sample_page();
        page.attach_image(page_with_ink(100, 100, &[(12, 12, 18, 18)]));
        assert!(!page.overlays_cached());
        let words = page.overlay(OverlayKind::Words).unwrap();
        assert_eq!(words.get_pixel(10, 10), &WORD_COLOR);
        assert!(page.overlays_cached());

        page.set_word_ground_truth(1, 0, "Hello").unwrap();
        assert!(!page.overlays_cached());
        page.overlays().unwrap();
        page.refine_all(BATCH_PADDING_PX).unwrap();
        assert!(!page.overlays_cached());
        page.overlays().unwrap();
        assert!(page.overlays_cached());
    }

    #[test]
    fn observer_sees_each_mutation() {
        let recorder = Rc::new(Recorder::default());
        let mut page = sample_page();
        page.set_observer(recorder.clone());
        page.merge_words(0, 0, MergeDirection::Right).unwrap();
        assert!(!page.merge_words(0, 0, MergeDirection::Left).unwrap());
        page.remove_line(1).unwrap();
        page.clear_observer();
        page.remove_line(0).unwrap();
        assert_eq!(
            recorder.events.borrow().as_slice(),
            &[PageEvent::WordsChanged { line: 0 }, PageEvent::LinesRemoved { count: 1 }]
        );
    }

    #[test]
    fn removes_empty_lines() {
        let mut page = sample_page();
        page.remove_word(0, 0).unwrap();
        page.remove_word(0, 0).unwrap();
        assert_eq!(page.line(0).unwrap().unmatched_ground_truth_words().len(), 2);
        assert_eq!(page.remove_empty_lines(), 1);
        assert_eq!(page.len(), 1);
        assert!(page.remove_line(4).is_err());
    }

    #[test]
    fn report_lists_mismatched_lines() {
        let page = sample_page();
        let report = page.validation_report();
        assert!(report.starts_with("lines: 2  exact: 1  mismatched: 1"));
        assert!(report.contains("line 1: exact\n"));
        assert!(report.contains("line 2: 1 word(s) off, 0 unmatched ground truth\n"));
        assert!(report.contains("  ocr: Helo world\n"));
    }
}
