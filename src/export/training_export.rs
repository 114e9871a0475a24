use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::page::Page;
use crate::export::json_export::write_page_png;
use crate::export::{is_trainable, Exporter};

/// Detection label for one page image: word polygons in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionLabel {
    /// `[width, height]` of the page image.
    pub img_dimensions: [u32; 2],
    /// Clockwise corners starting top-left.
    pub polygons: Vec<[[f64; 2]; 4]>,
    pub texts: Vec<String>,
}

/// Writes detection and recognition training data for a page:
///
/// ```text
/// detection/images/{prefix}.png
/// detection/labels.json              {image name -> DetectionLabel}
/// recognition/images/{prefix}_{line}_{word}.png
/// recognition/labels.json            {crop name -> ground truth}
/// ```
///
/// Only validated or exact-match lines contribute. Label files are merged so
/// repeated exports accumulate pages.
#[derive(Debug, Clone)]
pub struct TrainingSetExporter {
    out_dir: PathBuf,
}

impl TrainingSetExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    fn detection_dir(&self) -> PathBuf {
        self.out_dir.join("detection")
    }

    fn recognition_dir(&self) -> PathBuf {
        self.out_dir.join("recognition")
    }
}

fn read_labels<T: DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn write_labels<T: Serialize>(path: &Path, labels: &BTreeMap<String, T>) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(labels)?)?;
    Ok(())
}

impl Exporter for TrainingSetExporter {
    fn export(&self, page: &Page, prefix: &str) -> Result<PathBuf> {
        let image = page.require_image()?;
        let (width, height) = image.dimensions();

        let detection_images = self.detection_dir().join("images");
        let recognition_images = self.recognition_dir().join("images");
        fs::create_dir_all(&detection_images)?;
        fs::create_dir_all(&recognition_images)?;

        let page_name = format!("{prefix}.png");
        write_page_png(page, &detection_images.join(&page_name))?;

        let mut detection = DetectionLabel {
            img_dimensions: [width, height],
            polygons: Vec::new(),
            texts: Vec::new(),
        };
        let mut recognition: BTreeMap<String, String> = BTreeMap::new();

        for (line_idx, line) in page.lines().iter().enumerate() {
            if !is_trainable(line) {
                continue;
            }
            for (word_idx, word) in line.words().iter().enumerate() {
                let text = match word.ground_truth_text() {
                    Some(text) if !text.is_empty() => text.to_string(),
                    _ => continue,
                };
                let scaled = word.bbox().scale(width, height);
                let (x0, y0, x1, y1) =
                    (scaled.min_x(), scaled.min_y(), scaled.max_x(), scaled.max_y());
                detection.polygons.push([[x0, y0], [x1, y0], [x1, y1], [x0, y1]]);
                detection.texts.push(text.clone());

                let px = word.bbox().to_pixels(width, height);
                if px.is_empty() {
                    continue;
                }
                let crop_name = format!("{prefix}_{line_idx}_{word_idx}.png");
                imageops::crop_imm(image.rgb(), px.x0, px.y0, px.width(), px.height())
                    .to_image()
                    .save(recognition_images.join(&crop_name))
                    .with_context(|| format!("failed to write crop {crop_name}"))?;
                recognition.insert(crop_name, text);
            }
        }
        debug!(
            words = detection.texts.len(),
            crops = recognition.len(),
            "collected training labels"
        );

        let detection_labels_path = self.detection_dir().join("labels.json");
        let mut detection_labels: BTreeMap<String, DetectionLabel> =
            read_labels(&detection_labels_path)?;
        detection_labels.insert(page_name, detection);
        write_labels(&detection_labels_path, &detection_labels)?;

        let recognition_labels_path = self.recognition_dir().join("labels.json");
        let mut recognition_labels: BTreeMap<String, String> =
            read_labels(&recognition_labels_path)?;
        recognition_labels.retain(|name, _| !name.starts_with(&format!("{prefix}_")));
        recognition_labels.extend(recognition);
        write_labels(&recognition_labels_path, &recognition_labels)?;

        info!(out_dir = %self.out_dir.display(), prefix, "exported training data");
        Ok(detection_labels_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::BBox;
    use crate::core::model::{Line, Word};
    use crate::core::raster::fixtures::page_with_ink;
    use pretty_assertions::assert_eq;

    fn page() -> Page {
        let exact = Line::new(vec![Word::new(
            "ok",
            BBox::normalized(0.25, 0.25, 0.5, 0.5).unwrap(),
        )]);
        let off = Line::new(vec![Word::new(
            "bd",
            BBox::normalized(0.5, 0.5, 0.75, 0.75).unwrap(),
        )]);
        let mut page = Page::new(vec![exact, off]);
        page.attach_ground_truth(&["ok", "bad"]);
        page.attach_image(page_with_ink(8, 8, &[(2, 2, 4, 4)]));
        page
    }

    #[test]
    fn exports_only_trainable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = TrainingSetExporter::new(dir.path().to_path_buf());
        exporter.export(&page(), "proj_3").unwrap();

        let detection: BTreeMap<String, DetectionLabel> =
            read_labels(&dir.path().join("detection/labels.json")).unwrap();
        let label = &detection["proj_3.png"];
        assert_eq!(label.img_dimensions, [8, 8]);
        assert_eq!(label.texts, vec!["ok"]);
        assert_eq!(label.polygons, vec![[[2.0, 2.0], [4.0, 2.0], [4.0, 4.0], [2.0, 4.0]]]);

        let recognition: BTreeMap<String, String> =
            read_labels(&dir.path().join("recognition/labels.json")).unwrap();
        assert_eq!(
            recognition.into_iter().collect::<Vec<_>>(),
            vec![("proj_3_0_0.png".to_string(), "ok".to_string())]
        );
        let crop = image::open(dir.path().join("recognition/images/proj_3_0_0.png")).unwrap();
        assert_eq!((crop.width(), crop.height()), (2, 2));
        assert!(dir.path().join("detection/images/proj_3.png").is_file());
    }

    #[test]
    fn repeated_exports_merge_labels() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = TrainingSetExporter::new(dir.path().to_path_buf());
        let mut validated = page();
        validated.set_word_ground_truth(1, 0, "bd").unwrap();
        validated.mark_line_validated(1).unwrap();
        exporter.export(&page(), "a_0").unwrap();
        exporter.export(&validated, "a_1").unwrap();

        let detection: BTreeMap<String, DetectionLabel> =
            read_labels(&dir.path().join("detection/labels.json")).unwrap();
        assert_eq!(detection.keys().collect::<Vec<_>>(), vec!["a_0.png", "a_1.png"]);
        assert_eq!(detection["a_1.png"].texts, vec!["ok", "bd"]);
        let recognition: BTreeMap<String, String> =
            read_labels(&dir.path().join("recognition/labels.json")).unwrap();
        assert_eq!(recognition.len(), 3);
    }

    #[test]
    fn export_requires_image() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = TrainingSetExporter::new(dir.path().to_path_buf());
        assert!(exporter.export(&Page::new(vec![]), "x").is_err());
    }
}
