//! Error types shared by the labeling core.

use thiserror::Error;

/// Errors raised by geometry, editing, alignment and persistence operations.
///
/// A failed editing operation never leaves a line or page partially modified.
#[derive(Debug, Error)]
pub enum LabelError {
    /// A bounding box with inverted, non-finite or out-of-range edges.
    #[error("invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// An editing parameter (offset, index, margin) outside its valid range.
    #[error("{what} out of range: {value} (valid: {valid})")]
    OutOfRange {
        what: &'static str,
        value: String,
        valid: String,
    },

    /// An operation needed pixel data but no image is attached to the page.
    #[error("missing required resource: {0}")]
    MissingImage(&'static str),

    /// A persisted document could not be turned into a complete `Document`.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// No proofread text is available for the requested page.
    #[error("no ground truth for page {0}")]
    MissingGroundTruth(String),

    /// A line cannot be marked as validated in its current state.
    #[error("cannot validate line: {0}")]
    Validation(&'static str),

    /// The external OCR collaborator failed.
    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl LabelError {
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            message: message.into(),
        }
    }

    pub fn out_of_range(
        what: &'static str,
        value: impl std::fmt::Display,
        valid: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            what,
            value: value.to_string(),
            valid: valid.into(),
        }
    }
}

pub type LabelResult<T> = Result<T, LabelError>;
