use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use image::{GrayImage, Luma};
use pretty_assertions::assert_eq;

use pgdp_labeler::core::page::LineFilter;
use pgdp_labeler::core::raster::{InkThreshold, PageImage};
use pgdp_labeler::export::{Exporter, TrainingSetExporter};
use pgdp_labeler::ocr::{build_page, OcrEngine, OcrLine, OcrPage, OcrWord};
use pgdp_labeler::pipeline::{ExportSet, LabelerConfig, LabelingSession};
use pgdp_labeler::{Document, LabelError, MatchStatus, MergeDirection, PageEvent, PageObserver};

/// White 200x100 page with black blobs for "The", "qu", "ick", "fox" and ".".
fn page_image() -> GrayImage {
    let blobs = [
        (20, 20, 40, 35),
        (60, 20, 74, 35),
        (76, 20, 96, 35),
        (120, 20, 150, 35),
        (155, 30, 158, 35),
    ];
    GrayImage::from_fn(200, 100, |x, y| {
        let ink = blobs
            .iter()
            .any(|&(x0, y0, x1, y1)| x >= x0 && x < x1 && y >= y0 && y < y1);
        Luma([if ink { 0 } else { 255 }])
    })
}

fn word(text: &str, bbox: [f64; 4]) -> OcrWord {
    OcrWord {
        text: text.to_string(),
        bbox,
    }
}

/// OCR that reads "quick" as two tokens and misses the final period.
struct ScriptedEngine;

impl OcrEngine for ScriptedEngine {
    fn recognize(&self, _image_path: &Path) -> Result<OcrPage> {
        Ok(OcrPage {
            lines: vec![OcrLine {
                paragraph: 0,
                words: vec![
                    word("The", [0.1, 0.2, 0.2, 0.35]),
                    word("qu", [0.3, 0.2, 0.37, 0.35]),
                    word("ick", [0.38, 0.2, 0.48, 0.35]),
                    word("fox", [0.6, 0.2, 0.75, 0.35]),
                ],
            }],
        })
    }
}

#[derive(Default)]
struct EventLog(RefCell<Vec<PageEvent>>);

impl PageObserver for EventLog {
    fn page_changed(&self, event: &PageEvent) {
        self.0.borrow_mut().push(event.clone());
    }
}

#[test]
fn editing_session_reaches_exact_match_and_round_trips() -> Result<()> {
    let image = PageImage::from_gray(page_image(), InkThreshold::Fixed(128));
    let mut page = build_page(ScriptedEngine.recognize(Path::new("p.png"))?, image)?;
    let log = Rc::new(EventLog::default());
    page.set_observer(log.clone());
    page.attach_ground_truth(&["The quick fox ."]);

    let line = page.line(0)?;
    assert!(!line.ground_truth_exact_match());
    assert_eq!(line.unmatched_ground_truth_words().len(), 1);
    assert_eq!(page.visible_lines(LineFilter::MismatchesOnly).len(), 1);

    assert!(page.merge_words(0, 1, MergeDirection::Right)?);
    let line = page.line(0)?;
    assert_eq!(line.ocr_text(), "The quick fox");
    assert!(line.words().iter().all(|w| w.status() == MatchStatus::Exact));
    assert_eq!(line.unmatched_ground_truth_words()[0].insert_at(), 3);

    let period_box = pgdp_labeler::BBox::normalized(0.77, 0.3, 0.79, 0.35)?;
    page.insert_unmatched_ground_truth_word(0, 0, period_box)?;
    assert!(page.line(0)?.ground_truth_exact_match());
    page.mark_line_validated(0)?;
    assert_eq!(page.stats().validated, 1);
    assert!(page.visible_lines(LineFilter::MismatchesOnly).is_empty());

    let events = log.0.borrow();
    assert_eq!(events.first(), Some(&PageEvent::GroundTruthChanged { line: None }));
    assert_eq!(events.last(), Some(&PageEvent::ValidationChanged { line: Some(0) }));
    drop(events);

    let json = Document::new(vec![page.clone()], "p.png").to_json_string()?;
    let restored = Document::from_json_str(&json)?.into_single_page()?;
    assert_eq!(restored, page);
    assert!(restored.line(0)?.is_validated());
    Ok(())
}

#[test]
fn rejected_split_leaves_page_unchanged() -> Result<()> {
    let image = PageImage::from_gray(page_image(), InkThreshold::Fixed(128));
    let mut page = build_page(ScriptedEngine.recognize(Path::new("p.png"))?, image)?;
    page.attach_ground_truth(&["The quick fox ."]);
    let before = page.clone();

    assert!(matches!(page.split_word(0, 0, 1.0, 1), Err(LabelError::OutOfRange { .. })));
    assert!(matches!(page.split_word(0, 0, 0.5, 9), Err(LabelError::OutOfRange { .. })));
    assert_eq!(page, before);

    page.split_word(0, 0, 0.5, 1)?;
    assert_eq!(page.line(0)?.len(), 5);
    Ok(())
}

#[test]
fn session_labels_saves_and_exports_a_project() -> Result<()> {
    let root = tempfile::tempdir()?;
    let project = root.path().join("source").join("projectX");
    fs::create_dir_all(&project)?;
    page_image().save(project.join("001.png"))?;
    fs::write(project.join("pages.json"), r#"{"001.png": "The  quick fox .\n[**smudge]"}"#)?;

    let mut config = LabelerConfig::new(
        root.path().join("source"),
        root.path().join("labeled"),
        root.path().join("training"),
        root.path().join("validation"),
    );
    config.ink_threshold = InkThreshold::Fixed(128);

    let mut session = LabelingSession::open(config.clone(), "projectX", ScriptedEngine)?;
    assert_eq!(session.ground_truth(0)?.lines, vec!["The quick fox ."]);
    {
        let page = session.page(0)?;
        page.merge_words(0, 1, MergeDirection::Right)?;
        page.dismiss_unmatched_ground_truth(0, 0)?;
        assert!(page.line(0)?.ground_truth_exact_match());
        assert_eq!(page.mark_exact_matches_validated(), 1);
    }
    session.save(0)?;
    session.export(0, ExportSet::Validation)?;
    let report = session.report(0)?;
    assert!(report.ends_with("projectX_0_report.html"));

    let saved = Document::load(&root.path().join("labeled/projectX_0.json"))?;
    assert_eq!(saved.source_lib, "pgdp-labeler");
    assert_eq!(saved.pages[0].lines()[0].base_ground_truth_text(), "The quick fox");

    let labels: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(
        root.path().join("validation/recognition/labels.json"),
    )?)?;
    assert_eq!(
        labels.values().cloned().collect::<Vec<_>>(),
        vec!["The", "quick", "fox"]
    );
    assert!(!root.path().join("training").exists());

    // A fresh session picks the saved labels up instead of the OCR output.
    let mut reopened = LabelingSession::open(config, "projectX", ScriptedEngine)?;
    let page = reopened.page(0)?;
    assert!(page.line(0)?.is_validated());
    assert_eq!(page.line(0)?.len(), 3);
    Ok(())
}

#[test]
fn training_export_skips_unreviewed_lines() -> Result<()> {
    let root = tempfile::tempdir()?;
    let image = PageImage::from_gray(page_image(), InkThreshold::Fixed(128));
    let mut page = build_page(ScriptedEngine.recognize(Path::new("p.png"))?, image)?;
    page.attach_ground_truth(&["The quick fox ."]);

    TrainingSetExporter::new(root.path().to_path_buf()).export(&page, "p_0")?;
    let labels = fs::read_to_string(root.path().join("recognition/labels.json"))?;
    assert_eq!(labels.trim(), "{}");
    Ok(())
}

#[test]
fn splitting_a_validated_line_withdraws_it_from_training() -> Result<()> {
    let root = tempfile::tempdir()?;
    let image = PageImage::from_gray(page_image(), InkThreshold::Fixed(128));
    let mut page = build_page(ScriptedEngine.recognize(Path::new("p.png"))?, image)?;
    page.attach_ground_truth(&["The quick fox ."]);
    page.merge_words(0, 1, MergeDirection::Right)?;
    page.dismiss_unmatched_ground_truth(0, 0)?;
    page.mark_line_validated(0)?;

    page.split_word(0, 0, 0.5, 1)?;
    let line = page.line(0)?;
    assert!(!line.is_validated());
    assert_eq!(line.words()[1].ground_truth_text(), Some("The"));
    assert_eq!(page.stats().unvalidated_mismatches, 1);

    TrainingSetExporter::new(root.path().to_path_buf()).export(&page, "p_0")?;
    let labels = fs::read_to_string(root.path().join("recognition/labels.json"))?;
    assert_eq!(labels.trim(), "{}");
    Ok(())
}
