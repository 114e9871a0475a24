pub mod text;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::error::{LabelError, LabelResult};

pub use text::process_page_text;

/// Page text export file inside a project directory.
pub const PAGES_FILE: &str = "pages.json";

/// One proofread page: its image plus the cleaned ground-truth lines.
#[derive(Debug, Clone, PartialEq)]
pub struct PgdpPage {
    pub image_name: String,
    pub image_path: PathBuf,
    pub raw_text: String,
    pub lines: Vec<String>,
}

impl PgdpPage {
    pub fn new(
        image_name: impl Into<String>,
        image_path: PathBuf,
        raw_text: impl Into<String>,
    ) -> Self {
        let raw_text = raw_text.into();
        let lines = process_page_text(&raw_text);
        Self {
            image_name: image_name.into(),
            image_path,
            raw_text,
            lines,
        }
    }

    pub fn processed_text(&self) -> String {
        self.lines.join("\n")
    }

    /// Image file stem, used to name labeled outputs.
    pub fn stem(&self) -> &str {
        Path::new(&self.image_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.image_name)
    }
}

/// A downloaded proofreading project: page images plus `pages.json`.
#[derive(Debug, Clone)]
pub struct PgdpExport {
    pub project_id: String,
    pub project_dir: PathBuf,
    pages: Vec<PgdpPage>,
}

impl PgdpExport {
    pub fn from_project_dir(project_dir: &Path) -> LabelResult<Self> {
        let pages_path = project_dir.join(PAGES_FILE);
        if !pages_path.is_file() {
            return Err(LabelError::MissingGroundTruth(format!(
                "{} has no {PAGES_FILE}",
                project_dir.display()
            )));
        }
        let data = fs::read_to_string(&pages_path)?;
        // BTreeMap keeps pages in filename order.
        let texts: BTreeMap<String, String> = serde_json::from_str(&data).map_err(|err| {
            LabelError::MalformedDocument(format!("{}: {err}", pages_path.display()))
        })?;
        let pages = texts
            .into_iter()
            .map(|(image_name, text)| {
                let image_path = project_dir.join(&image_name);
                PgdpPage::new(image_name, image_path, text)
            })
            .collect::<Vec<_>>();

        let project_id = project_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        debug!(project = %project_id, pages = pages.len(), "loaded proofread export");
        Ok(Self {
            project_id,
            project_dir: project_dir.to_path_buf(),
            pages,
        })
    }

    pub fn pages(&self) -> &[PgdpPage] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, index: usize) -> LabelResult<&PgdpPage> {
        self.pages.get(index).ok_or_else(|| {
            LabelError::MissingGroundTruth(format!("{} page {index}", self.project_id))
        })
    }

    pub fn page_by_image(&self, image_name: &str) -> Option<&PgdpPage> {
        self.pages.iter().find(|page| page.image_name == image_name)
    }
}

/// Project directories under `source_dir` that hold a `pages.json`, sorted.
pub fn list_projects(source_dir: &Path) -> LabelResult<Vec<String>> {
    let mut projects = Vec::new();
    for entry in fs::read_dir(source_dir)? {
        let path = entry?.path();
        if path.join(PAGES_FILE).is_file() {
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                projects.push(name.to_string());
            }
        }
    }
    projects.sort();
    Ok(projects)
}
