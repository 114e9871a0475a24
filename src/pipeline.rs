use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::document::Document;
use crate::core::page::{Page, BATCH_PADDING_PX, EDIT_PADDING_PX};
use crate::core::raster::{InkThreshold, PageImage};
use crate::export::{Exporter, HtmlReportExporter, JsonExporter, TrainingSetExporter};
use crate::matching::{AlignmentConfig, SequenceAligner};
use crate::ocr::{CommandOcrEngine, OcrEngine, PageBuilder};
use crate::pgdp::{PgdpExport, PgdpPage};

pub const DEFAULT_OCR_COMMAND: &str = "python3 ocr/doctr_bridge.py";

#[derive(Debug, Clone)]
pub struct LabelerConfig {
    /// Downloaded proofreading projects, one directory per project.
    pub source_dir: PathBuf,
    /// Saved labeled pages (`{project}_{page}.json` + `.png`).
    pub labeled_dir: PathBuf,
    pub training_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub ocr_command: String,
    pub batch_padding: u32,
    pub edit_padding: u32,
    pub ink_threshold: InkThreshold,
    pub alignment: AlignmentConfig,
}

impl LabelerConfig {
    pub fn new(
        source_dir: PathBuf,
        labeled_dir: PathBuf,
        training_dir: PathBuf,
        validation_dir: PathBuf,
    ) -> Self {
        Self {
            source_dir,
            labeled_dir,
            training_dir,
            validation_dir,
            ocr_command: DEFAULT_OCR_COMMAND.to_string(),
            batch_padding: BATCH_PADDING_PX,
            edit_padding: EDIT_PADDING_PX,
            ink_threshold: InkThreshold::default(),
            alignment: AlignmentConfig::default(),
        }
    }

    pub fn ocr_engine(&self) -> Result<CommandOcrEngine> {
        CommandOcrEngine::from_command_line(&self.ocr_command)
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.source_dir.join(project_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSet {
    Training,
    Validation,
}

/// One operator session over one proofreading project.
///
/// Pages are cached by index for the session. A cache miss first looks for a
/// previously saved labeled page and only then runs OCR.
pub struct LabelingSession<E> {
    config: LabelerConfig,
    export: PgdpExport,
    builder: PageBuilder<E>,
    pages: BTreeMap<usize, Page>,
}

impl<E: OcrEngine> LabelingSession<E> {
    pub fn open(config: LabelerConfig, project_id: &str, engine: E) -> Result<Self> {
        let project_dir = config.project_dir(project_id);
        let export = PgdpExport::from_project_dir(&project_dir)
            .with_context(|| format!("failed to load project {project_id}"))?;
        let builder = PageBuilder::new(engine)
            .with_threshold(config.ink_threshold)
            .with_aligner(SequenceAligner::with_config(config.alignment));
        info!(project = project_id, pages = export.len(), "opened labeling session");
        Ok(Self {
            config,
            export,
            builder,
            pages: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }

    pub fn project_id(&self) -> &str {
        &self.export.project_id
    }

    pub fn page_count(&self) -> usize {
        self.export.len()
    }

    pub fn ground_truth(&self, index: usize) -> Result<&PgdpPage> {
        Ok(self.export.page(index)?)
    }

    pub fn prefix(&self, index: usize) -> String {
        format!("{}_{}", self.project_id(), index)
    }

    pub fn is_cached(&self, index: usize) -> bool {
        self.pages.contains_key(&index)
    }

    pub fn page(&mut self, index: usize) -> Result<&mut Page> {
        if !self.pages.contains_key(&index) {
            let page = self.load_page(index, true)?;
            self.pages.insert(index, page);
        }
        self.cached(index)
    }

    /// Runs OCR again and replaces the cached page, discarding unsaved edits.
    pub fn force_refresh(&mut self, index: usize) -> Result<&mut Page> {
        let page = self.load_page(index, false)?;
        self.pages.insert(index, page);
        self.cached(index)
    }

    /// Replaces the cached page with the last saved labels, discarding unsaved
    /// edits. Fails when the page was never saved.
    pub fn reload_saved(&mut self, index: usize) -> Result<&mut Page> {
        let ground_truth = self.export.page(index)?;
        let saved = self.saved_json_path(index);
        if !saved.is_file() {
            anyhow::bail!("no saved labels for page {index} at {}", saved.display());
        }
        let page = self
            .import_saved(&saved, ground_truth)?
            .with_edit_padding(self.config.edit_padding);
        self.pages.insert(index, page);
        self.cached(index)
    }

    fn cached(&mut self, index: usize) -> Result<&mut Page> {
        self.pages
            .get_mut(&index)
            .with_context(|| format!("page {index} is not loaded"))
    }

    fn saved_json_path(&self, index: usize) -> PathBuf {
        self.config.labeled_dir.join(format!("{}.json", self.prefix(index)))
    }

    fn load_page(&self, index: usize, allow_saved: bool) -> Result<Page> {
        let ground_truth = self.export.page(index)?;
        let saved = self.saved_json_path(index);
        let page = if allow_saved && saved.is_file() {
            self.import_saved(&saved, ground_truth)?
        } else {
            let mut page = self
                .builder
                .build(&ground_truth.image_path)
                .with_context(|| format!("OCR failed for page {index}"))?;
            page.attach_ground_truth(&ground_truth.lines);
            page
        };
        Ok(page.with_edit_padding(self.config.edit_padding))
    }

    fn import_saved(&self, path: &Path, ground_truth: &PgdpPage) -> Result<Page> {
        info!(path = %path.display(), "importing saved labels");
        let mut page = Document::load(path)
            .and_then(Document::into_single_page)
            .with_context(|| format!("failed to import {}", path.display()))?
            .with_aligner(SequenceAligner::with_config(self.config.alignment));
        let copied = path.with_extension("png");
        let image_path = if copied.is_file() {
            copied
        } else {
            ground_truth.image_path.clone()
        };
        let image = PageImage::open(&image_path, self.config.ink_threshold)
            .with_context(|| format!("failed to open page image {}", image_path.display()))?;
        page.attach_image(image);
        Ok(page)
    }

    /// Saves the cached page to the labeled directory.
    pub fn save(&self, index: usize) -> Result<PathBuf> {
        let page = self.loaded(index)?;
        JsonExporter::new(self.config.labeled_dir.clone()).export(page, &self.prefix(index))
    }

    pub fn export(&self, index: usize, set: ExportSet) -> Result<PathBuf> {
        let page = self.loaded(index)?;
        let out_dir = match set {
            ExportSet::Training => &self.config.training_dir,
            ExportSet::Validation => &self.config.validation_dir,
        };
        debug!(?set, page = index, "exporting");
        TrainingSetExporter::new(out_dir.clone()).export(page, &self.prefix(index))
    }

    pub fn report(&self, index: usize) -> Result<PathBuf> {
        let page = self.loaded(index)?;
        HtmlReportExporter::new(self.config.labeled_dir.clone()).export(page, &self.prefix(index))
    }

    fn loaded(&self, index: usize) -> Result<&Page> {
        self.pages
            .get(&index)
            .with_context(|| format!("page {index} is not loaded"))
    }
}
