use crate::core::model::{UnmatchedWord, Word};
use crate::matching::align::LineAlignment;

/// Writes an alignment back onto the line's words and returns the ground-truth
/// words left without an OCR partner.
pub fn resolve_words(
    words: &mut [Word],
    ground_truth: &[&str],
    alignment: &LineAlignment,
) -> Vec<UnmatchedWord> {
    for (word, assignment) in words.iter_mut().zip(&alignment.assignments) {
        match assignment {
            Some(matched) => word.assign_ground_truth(
                ground_truth[matched.ground_truth_index].to_string(),
                matched.score,
            ),
            None => word.mark_unmatched(),
        }
    }

    alignment
        .unmatched_ground_truth
        .iter()
        .map(|unpaired| {
            UnmatchedWord::new(
                unpaired.insert_at,
                ground_truth[unpaired.ground_truth_index].to_string(),
            )
        })
        .collect()
}
