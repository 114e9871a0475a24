use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::core::model::{Line, MatchStatus};
use crate::core::page::Page;
use crate::export::Exporter;

/// Writes `{prefix}_report.html`: page statistics and one table row per
/// line with OCR and ground-truth words coloured by match status.
#[derive(Debug, Clone)]
pub struct HtmlReportExporter {
    out_dir: PathBuf,
}

impl HtmlReportExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    fn line_to_row(index: usize, line: &Line) -> String {
        let mut ocr = String::new();
        let mut ground_truth = String::new();
        for row in line.match_rows() {
            let class = status_class(row.status);
            if row.word_index.is_some() {
                ocr.push_str(&format!(
                    "<span class='{class}'>{}</span> ",
                    html_escape::encode_text(&row.ocr_text)
                ));
            }
            if !row.ground_truth_text.is_empty() {
                ground_truth.push_str(&format!(
                    "<span class='{class}'>{}</span> ",
                    html_escape::encode_text(&row.ground_truth_text)
                ));
            }
        }
        let state = if line.ground_truth_exact_match() {
            "exact"
        } else {
            "mismatch"
        };
        let validated = if line.is_validated() { "yes" } else { "" };
        format!(
            "<tr class='{state}'><td>{}</td><td>{ocr}</td><td>{ground_truth}</td><td>{validated}</td></tr>\n",
            index + 1
        )
    }
}

fn status_class(status: MatchStatus) -> &'static str {
    match status {
        MatchStatus::Exact => "exact",
        MatchStatus::Mismatch => "mismatch",
        MatchStatus::Unmatched => "unmatched",
    }
}

impl Exporter for HtmlReportExporter {
    fn export(&self, page: &Page, prefix: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        let stats = page.stats();
        let rows: String = page
            .lines()
            .iter()
            .enumerate()
            .map(|(index, line)| HtmlReportExporter::line_to_row(index, line))
            .collect();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset='utf-8'>
<title>{title} labeling report</title>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ddd; padding: 4px 8px; text-align: left; }}
tr.mismatch {{ background: #fff6e6; }}
span.exact {{ color: #008800; }}
span.mismatch {{ color: #cc6600; font-weight: bold; }}
span.unmatched {{ color: #cc0000; text-decoration: underline; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>lines: {total} &middot; exact: {exact} &middot; mismatched: {mismatched} &middot; validated: {validated} &middot; accuracy: {accuracy:.1}%</p>
<table>
<tr><th>#</th><th>OCR</th><th>Ground truth</th><th>Validated</th></tr>
{rows}</table>
</body>
</html>"#,
            title = html_escape::encode_text(prefix),
            total = stats.total_lines,
            exact = stats.exact_matches,
            mismatched = stats.mismatches,
            validated = stats.validated,
            accuracy = stats.accuracy() * 100.0,
            rows = rows,
        );
        let path = self.out_dir.join(format!("{prefix}_report.html"));
        fs::write(&path, html)?;
        info!(path = %path.display(), "wrote report");
        Ok(path)
    }
}
