use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{LabelError, LabelResult};
use crate::core::geometry::BBox;
use crate::core::raster::PageImage;
use crate::matching::resolve::resolve_words;
use crate::matching::{match_score, tokenize, LineAligner, EXACT_MATCH};

/// How well a word's OCR text agrees with its ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Exact,
    Mismatch,
    /// No ground-truth partner: spurious detector output or never aligned.
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDirection {
    Left,
    Right,
}

/// One OCR-detected token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    text: String,
    bbox: BBox,
    #[serde(default)]
    ground_truth_text: Option<String>,
    #[serde(default)]
    match_score: Option<u8>,
}

impl Word {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
            ground_truth_text: None,
            match_score: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn ground_truth_text(&self) -> Option<&str> {
        self.ground_truth_text.as_deref()
    }

    pub fn match_score(&self) -> Option<u8> {
        self.match_score
    }

    pub fn status(&self) -> MatchStatus {
        let gt_empty = self.ground_truth_text.as_deref().unwrap_or("").is_empty();
        match self.match_score {
            None => MatchStatus::Unmatched,
            Some(0) if gt_empty => MatchStatus::Unmatched,
            Some(EXACT_MATCH) => MatchStatus::Exact,
            Some(_) => MatchStatus::Mismatch,
        }
    }

    /// Manual ground-truth override; the score follows the new text.
    pub fn set_ground_truth(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.match_score = Some(match_score(&self.text, &text));
        self.ground_truth_text = Some(text);
    }

    pub(crate) fn assign_ground_truth(&mut self, text: String, score: u8) {
        self.ground_truth_text = Some(text);
        self.match_score = Some(score);
    }

    pub(crate) fn mark_unmatched(&mut self) {
        self.ground_truth_text = Some(String::new());
        self.match_score = None;
    }

    pub(crate) fn set_bbox(&mut self, bbox: BBox) {
        self.bbox = bbox;
    }

    /// Splits into two words at `offset` (fraction of this word's width) and
    /// `char_index` (in characters). Ground truth is not carried over.
    pub fn split(&self, offset: f64, char_index: usize) -> LabelResult<(Word, Word)> {
        let char_count = self.text.chars().count();
        if char_index > char_count {
            return Err(LabelError::out_of_range(
                "split character index",
                char_index,
                format!("0..={char_count}"),
            ));
        }
        let (left_box, right_box) = self.bbox.split_at(offset)?;
        let byte_index = self
            .text
            .char_indices()
            .nth(char_index)
            .map(|(idx, _)| idx)
            .unwrap_or(self.text.len());
        let (left_text, right_text) = self.text.split_at(byte_index);
        Ok((Word::new(left_text, left_box), Word::new(right_text, right_box)))
    }

    /// Absorbs `other` (which must follow `self` in reading order).
    pub fn merge(&mut self, other: Word) {
        self.text.push_str(&other.text);
        self.bbox = self.bbox.union(&other.bbox);
        self.ground_truth_text = None;
        self.match_score = None;
    }
}

/// Ground-truth word with no OCR partner, persisted as `[insert_at, text]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedWord(usize, String);

impl UnmatchedWord {
    pub fn new(insert_at: usize, text: impl Into<String>) -> Self {
        Self(insert_at, text.into())
    }

    /// Position in the line's word list where this word belongs.
    pub fn insert_at(&self) -> usize {
        self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineAttributes {
    #[serde(default)]
    pub validated: bool,
    /// Open-ended flags set by front-ends.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One row of the line editor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRow {
    pub word_index: Option<usize>,
    pub unmatched_index: Option<usize>,
    pub ocr_text: String,
    pub ground_truth_text: String,
    pub status: MatchStatus,
}

/// Ordered words of one text line plus its proofread text.
///
/// Every structural edit goes through [`Line::commit`], which re-runs the
/// ground-truth alignment for the whole line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    words: Vec<Word>,
    #[serde(default)]
    base_ground_truth_text: String,
    #[serde(default)]
    unmatched_ground_truth_words: Vec<UnmatchedWord>,
    #[serde(default)]
    attributes: LineAttributes,
    #[serde(default)]
    paragraph: usize,
}

impl Line {
    pub fn new(words: Vec<Word>) -> Self {
        Self {
            words,
            base_ground_truth_text: String::new(),
            unmatched_ground_truth_words: Vec::new(),
            attributes: LineAttributes::default(),
            paragraph: 0,
        }
    }

    pub fn with_paragraph(mut self, paragraph: usize) -> Self {
        self.paragraph = paragraph;
        self
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn word(&self, index: usize) -> LabelResult<&Word> {
        self.words
            .get(index)
            .ok_or_else(|| word_index_error(index, self.words.len()))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn paragraph(&self) -> usize {
        self.paragraph
    }

    /// Union of the word boxes; `None` for a line without words.
    pub fn bbox(&self) -> Option<BBox> {
        let mut boxes = self.words.iter().map(Word::bbox);
        let first = boxes.next()?;
        Some(boxes.fold(first, |acc, b| acc.union(&b)))
    }

    pub fn base_ground_truth_text(&self) -> &str {
        &self.base_ground_truth_text
    }

    pub fn unmatched_ground_truth_words(&self) -> &[UnmatchedWord] {
        &self.unmatched_ground_truth_words
    }

    pub fn attributes(&self) -> &LineAttributes {
        &self.attributes
    }

    pub fn extra_attributes_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.attributes.extra
    }

    pub fn is_validated(&self) -> bool {
        self.attributes.validated
    }

    pub fn ocr_text(&self) -> String {
        self.words
            .iter()
            .map(Word::text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn ground_truth_text(&self) -> String {
        self.words
            .iter()
            .filter_map(Word::ground_truth_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True iff every word scored 100 and no ground-truth word is unmatched.
    /// Always computed from current state.
    pub fn ground_truth_exact_match(&self) -> bool {
        self.unmatched_ground_truth_words.is_empty()
            && self
                .words
                .iter()
                .all(|word| word.match_score == Some(EXACT_MATCH))
    }

    /// Assigns the line's proofread text and aligns against it.
    pub fn set_base_ground_truth(&mut self, aligner: &dyn LineAligner, text: impl Into<String>) {
        self.base_ground_truth_text = text.into();
        self.realign(aligner);
    }

    /// Recomputes every word's ground truth from `base_ground_truth_text`.
    /// A validated line whose labels change loses its validation.
    pub fn realign(&mut self, aligner: &dyn LineAligner) {
        let before = self.label_snapshot();
        let ocr: Vec<&str> = self.words.iter().map(Word::text).collect();
        let ground_truth = tokenize(&self.base_ground_truth_text);
        let alignment = aligner.align(&ocr, &ground_truth);
        let unmatched = resolve_words(&mut self.words, &ground_truth, &alignment);
        debug!(
            words = self.words.len(),
            ground_truth = ground_truth.len(),
            unmatched = unmatched.len(),
            "realigned line"
        );
        self.unmatched_ground_truth_words = unmatched;
        if self.label_snapshot() != before {
            self.invalidate("labels changed");
        }
    }

    /// Applies a structural edit to a scratch copy of the words, swaps it in
    /// on success and realigns. On error the line is left untouched. A
    /// successful edit always withdraws validation.
    pub fn commit<F>(&mut self, aligner: &dyn LineAligner, edit: F) -> LabelResult<()>
    where
        F: FnOnce(&mut Vec<Word>) -> LabelResult<()>,
    {
        let mut scratch = self.words.clone();
        edit(&mut scratch)?;
        self.words = scratch;
        self.invalidate("words edited");
        self.realign(aligner);
        Ok(())
    }

    fn label_snapshot(&self) -> (Vec<(Option<String>, Option<u8>)>, Vec<UnmatchedWord>) {
        let labels = self
            .words
            .iter()
            .map(|word| (word.ground_truth_text.clone(), word.match_score))
            .collect();
        (labels, self.unmatched_ground_truth_words.clone())
    }

    fn invalidate(&mut self, reason: &'static str) {
        if self.attributes.validated {
            debug!(reason, "clearing line validation");
            self.attributes.validated = false;
        }
    }

    /// Replaces a word with its two halves, snapping both boxes to the ink
    /// underneath before realigning.
    pub fn split_word(
        &mut self,
        aligner: &dyn LineAligner,
        word_index: usize,
        offset: f64,
        char_index: usize,
        image: &PageImage,
        padding_px: u32,
    ) -> LabelResult<()> {
        self.commit(aligner, |words| {
            let word = words
                .get(word_index)
                .ok_or_else(|| word_index_error(word_index, words.len()))?;
            let (mut left, mut right) = word.split(offset, char_index)?;
            for part in [&mut left, &mut right] {
                let snapped = part.bbox.expand_to_content(image).refine(image, padding_px);
                part.set_bbox(snapped);
            }
            words.splice(word_index..=word_index, [left, right]);
            Ok(())
        })
    }

    /// Merges a word with its neighbour. Returns `false` without touching the
    /// line when there is no neighbour in that direction.
    pub fn merge_words(
        &mut self,
        aligner: &dyn LineAligner,
        word_index: usize,
        direction: MergeDirection,
    ) -> LabelResult<bool> {
        if word_index >= self.words.len() {
            return Err(word_index_error(word_index, self.words.len()));
        }
        let (keep, absorb) = match direction {
            MergeDirection::Left if word_index > 0 => (word_index - 1, word_index),
            MergeDirection::Right if word_index + 1 < self.words.len() => {
                (word_index, word_index + 1)
            }
            _ => return Ok(false),
        };
        self.commit(aligner, |words| {
            let absorbed = words.remove(absorb);
            words[keep].merge(absorbed);
            Ok(())
        })?;
        Ok(true)
    }

    pub fn remove_word(
        &mut self,
        aligner: &dyn LineAligner,
        word_index: usize,
    ) -> LabelResult<Word> {
        let mut removed = None;
        self.commit(aligner, |words| {
            if word_index >= words.len() {
                return Err(word_index_error(word_index, words.len()));
            }
            removed = Some(words.remove(word_index));
            Ok(())
        })?;
        removed.ok_or_else(|| word_index_error(word_index, self.words.len()))
    }

    /// Adds a word for an unmatched ground-truth entry, using its text as the
    /// OCR text and `bbox` as its box.
    pub fn insert_unmatched_ground_truth_word(
        &mut self,
        aligner: &dyn LineAligner,
        unmatched_index: usize,
        bbox: BBox,
    ) -> LabelResult<()> {
        let entry = self
            .unmatched_ground_truth_words
            .get(unmatched_index)
            .cloned()
            .ok_or_else(|| {
                unmatched_index_error(unmatched_index, self.unmatched_ground_truth_words.len())
            })?;
        self.commit(aligner, |words| {
            let at = entry.insert_at().min(words.len());
            words.insert(at, Word::new(entry.text(), bbox));
            Ok(())
        })
    }

    /// Drops an unmatched ground-truth word from this line's proofread text so
    /// later realignments do not bring it back.
    pub fn dismiss_unmatched_ground_truth(
        &mut self,
        aligner: &dyn LineAligner,
        unmatched_index: usize,
    ) -> LabelResult<()> {
        let stored = self.unmatched_ground_truth_words.len();
        if unmatched_index >= stored {
            return Err(unmatched_index_error(unmatched_index, stored));
        }
        let ocr: Vec<&str> = self.words.iter().map(Word::text).collect();
        let tokens = tokenize(&self.base_ground_truth_text);
        let alignment = aligner.align(&ocr, &tokens);
        let target = alignment
            .unmatched_ground_truth
            .get(unmatched_index)
            .map(|unpaired| unpaired.ground_truth_index)
            .ok_or_else(|| {
                unmatched_index_error(unmatched_index, alignment.unmatched_ground_truth.len())
            })?;
        let remaining = tokens
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != target)
            .map(|(_, token)| *token)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_base_ground_truth(aligner, remaining);
        Ok(())
    }

    pub fn set_word_ground_truth(
        &mut self,
        word_index: usize,
        text: impl Into<String>,
    ) -> LabelResult<()> {
        let len = self.words.len();
        let word = self
            .words
            .get_mut(word_index)
            .ok_or_else(|| word_index_error(word_index, len))?;
        word.set_ground_truth(text);
        Ok(())
    }

    /// Accepts the OCR text as ground truth for every word.
    pub fn copy_ocr_to_ground_truth(&mut self) {
        for word in &mut self.words {
            let text = word.text.clone();
            word.set_ground_truth(text);
        }
        self.unmatched_ground_truth_words.clear();
    }

    /// Fills ground truth from OCR text only where it is missing. Returns the
    /// number of words changed.
    pub fn fill_missing_ground_truth(&mut self) -> usize {
        let mut filled = 0;
        for word in &mut self.words {
            let missing = word.ground_truth_text.as_deref().unwrap_or("").is_empty();
            if missing && !word.text.is_empty() {
                let text = word.text.clone();
                word.set_ground_truth(text);
                filled += 1;
            }
        }
        filled
    }

    pub fn mark_validated(&mut self) -> LabelResult<()> {
        if !self.unmatched_ground_truth_words.is_empty() {
            return Err(LabelError::Validation("line has unmatched ground truth words"));
        }
        if self.ground_truth_text().is_empty() {
            return Err(LabelError::Validation("line has no ground truth text"));
        }
        self.attributes.validated = true;
        Ok(())
    }

    pub fn clear_validated(&mut self) {
        self.attributes.validated = false;
    }

    pub(crate) fn force_validated(&mut self) {
        self.attributes.validated = true;
    }

    /// Replaces one word's box. Text is unchanged, so no realignment is needed.
    pub fn update_word_bbox<F>(&mut self, word_index: usize, update: F) -> LabelResult<()>
    where
        F: FnOnce(BBox) -> LabelResult<BBox>,
    {
        let len = self.words.len();
        let word = self
            .words
            .get_mut(word_index)
            .ok_or_else(|| word_index_error(word_index, len))?;
        let bbox = update(word.bbox)?;
        word.set_bbox(bbox);
        Ok(())
    }

    pub fn refine_bounding_boxes(&mut self, image: &PageImage, padding_px: u32) {
        for word in &mut self.words {
            word.bbox = word.bbox.refine(image, padding_px);
        }
    }

    pub fn expand_bounding_boxes(&mut self, image: &PageImage) {
        for word in &mut self.words {
            word.bbox = word.bbox.expand_to_content(image);
        }
    }

    /// Word rows with unmatched ground-truth words interleaved at their
    /// insertion positions.
    pub fn match_rows(&self) -> Vec<MatchRow> {
        let mut rows =
            Vec::with_capacity(self.words.len() + self.unmatched_ground_truth_words.len());
        let mut pending = self.unmatched_ground_truth_words.iter().enumerate().peekable();
        for (word_index, word) in self.words.iter().enumerate() {
            while let Some((unmatched_index, unmatched)) =
                pending.next_if(|(_, u)| u.insert_at() <= word_index)
            {
                rows.push(unmatched_row(unmatched_index, unmatched));
            }
            rows.push(MatchRow {
                word_index: Some(word_index),
                unmatched_index: None,
                ocr_text: word.text.clone(),
                ground_truth_text: word.ground_truth_text.clone().unwrap_or_default(),
                status: word.status(),
            });
        }
        rows.extend(pending.map(|(idx, unmatched)| unmatched_row(idx, unmatched)));
        rows
    }
}

fn unmatched_row(unmatched_index: usize, unmatched: &UnmatchedWord) -> MatchRow {
    MatchRow {
        word_index: None,
        unmatched_index: Some(unmatched_index),
        ocr_text: String::new(),
        ground_truth_text: unmatched.text().to_string(),
        status: MatchStatus::Unmatched,
    }
}

fn word_index_error(index: usize, len: usize) -> LabelError {
    LabelError::out_of_range("word index", index, format!("0..{len}"))
}

fn unmatched_index_error(index: usize, len: usize) -> LabelError {
    LabelError::out_of_range("unmatched ground truth index", index, format!("0..{len}"))
}
