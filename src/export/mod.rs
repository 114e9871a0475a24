pub mod html_report_export;
pub mod json_export;
pub mod training_export;

use anyhow::Result;
use std::path::PathBuf;

use crate::core::model::Line;
use crate::core::page::Page;

pub use html_report_export::HtmlReportExporter;
pub use json_export::JsonExporter;
pub use training_export::TrainingSetExporter;

/// Writes one page under a caller-chosen prefix such as `{project}_{page}`.
/// Returns the path of the primary output file.
pub trait Exporter {
    fn export(&self, page: &Page, prefix: &str) -> Result<PathBuf>;
}

/// Lines whose labels are trustworthy enough for training data.
pub fn is_trainable(line: &Line) -> bool {
    !line.is_empty() && (line.is_validated() || line.ground_truth_exact_match())
}
