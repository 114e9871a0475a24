use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{LabelError, LabelResult};
use crate::core::page::Page;

/// Provenance label written by this tool.
pub const SOURCE_LIB: &str = "pgdp-labeler";

/// Top-level persisted unit: pages plus where they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
    pub source_lib: String,
    pub source_path: PathBuf,
}

impl Document {
    pub fn new(pages: Vec<Page>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            pages,
            source_lib: SOURCE_LIB.to_string(),
            source_path: source_path.into(),
        }
    }

    pub fn to_json_string(&self) -> LabelResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a document. Any missing or ill-typed field fails the whole load.
    pub fn from_json_str(data: &str) -> LabelResult<Self> {
        serde_json::from_str(data).map_err(|err| LabelError::MalformedDocument(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> LabelResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json_string()?)?;
        debug!(path = %path.display(), pages = self.pages.len(), "saved document");
        Ok(())
    }

    pub fn load(path: &Path) -> LabelResult<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// The page of a single-page document, as required by labeled-page imports.
    pub fn into_single_page(mut self) -> LabelResult<Page> {
        if self.pages.len() != 1 {
            return Err(LabelError::MalformedDocument(format!(
                "expected exactly one page, found {}",
                self.pages.len()
            )));
        }
        self.pages
            .pop()
            .ok_or_else(|| LabelError::MalformedDocument("document has no pages".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::BBox;
    use crate::core::model::{Line, Word};
    use pretty_assertions::assert_eq;

    fn sample_document() -> Document {
        let mut line = Line::new(vec![
            Word::new("Tbe", BBox::normalized(0.1, 0.1, 0.2, 0.2).unwrap()),
            Word::new("end", BBox::normalized(0.25, 0.1, 1.0 / 3.0, 0.2).unwrap()),
        ]);
        line.extra_attributes_mut()
            .insert("reviewer".to_string(), serde_json::json!("ann"));
        let mut page = Page::new(vec![line]);
        page.attach_ground_truth(&["The end ."]);
        Document::new(vec![page], "proj_0.png")
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let doc = sample_document();
        let json = doc.to_json_string().unwrap();
        let back = Document::from_json_str(&json).unwrap();
        assert_eq!(back, doc);
        let line = &back.pages[0].lines()[0];
        assert_eq!(line.words()[1].bbox().max_x(), 1.0 / 3.0);
        assert_eq!(line.unmatched_ground_truth_words()[0].text(), ".");
        assert_eq!(line.attributes().extra["reviewer"], serde_json::json!("ann"));
    }

    #[test]
    fn persisted_layout_uses_flat_keys() {
        let value: serde_json::Value =
            serde_json::from_str(&sample_document().to_json_string().unwrap()).unwrap();
        assert_eq!(value["source_lib"], "pgdp-labeler");
        let line = &value["pages"][0]["lines"][0];
        assert_eq!(line["words"][0]["text"], "Tbe");
        assert_eq!(line["words"][0]["ground_truth_text"], "The");
        assert_eq!(line["words"][0]["match_score"], 67);
        assert_eq!(line["unmatched_ground_truth_words"], serde_json::json!([[2, "."]]));
        assert_eq!(line["attributes"]["validated"], false);
        assert_eq!(line["attributes"]["reviewer"], "ann");
    }

    #[test]
    fn missing_fields_are_rejected() {
        let no_bbox = r#"{"pages":[{"lines":[{"words":[{"text":"a"}]}]}],"source_lib":"x","source_path":"p"}"#;
        assert!(matches!(
            Document::from_json_str(no_bbox),
            Err(LabelError::MalformedDocument(_))
        ));
        let no_lines = r#"{"pages":[{}],"source_lib":"x","source_path":"p"}"#;
        assert!(Document::from_json_str(no_lines).is_err());
    }

    #[test]
    fn single_page_import_requires_one_page() {
        let mut doc = sample_document();
        doc.pages.push(doc.pages[0].clone());
        assert!(matches!(
            doc.clone().into_single_page(),
            Err(LabelError::MalformedDocument(_))
        ));
        doc.pages.clear();
        assert!(doc.into_single_page().is_err());
        assert!(sample_document().into_single_page().is_ok());
    }

    #[test]
    fn saves_and_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("proj_0.json");
        let doc = sample_document();
        doc.save(&path).unwrap();
        assert_eq!(Document::load(&path).unwrap(), doc);
    }
}
