use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::core::document::Document;
use crate::core::page::Page;
use crate::export::Exporter;

/// Saves a labeled page as `{prefix}.json` next to a `{prefix}.png` copy of
/// its image, the layout the labeling session imports from.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    out_dir: PathBuf,
}

impl JsonExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    pub fn json_path(&self, prefix: &str) -> PathBuf {
        self.out_dir.join(format!("{prefix}.json"))
    }

    pub fn image_path(&self, prefix: &str) -> PathBuf {
        self.out_dir.join(format!("{prefix}.png"))
    }
}

/// Copies the page's source image, or encodes the decoded raster when the
/// source is not a PNG file.
pub(crate) fn write_page_png(page: &Page, target: &Path) -> Result<()> {
    let image = page.require_image()?;
    let is_png = |path: &Path| {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
    };
    match image.path() {
        Some(source) if is_png(source) && source != target => {
            fs::copy(source, target)
                .with_context(|| format!("failed to copy {}", source.display()))?;
        }
        Some(source) if source == target => {}
        _ => image
            .rgb()
            .save(target)
            .with_context(|| format!("failed to write {}", target.display()))?,
    }
    Ok(())
}

impl Exporter for JsonExporter {
    fn export(&self, page: &Page, prefix: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        let image_path = self.image_path(prefix);
        write_page_png(page, &image_path)?;

        let document = Document::new(vec![page.clone()], image_path);
        let path = self.json_path(prefix);
        document
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        info!(path = %path.display(), "saved labeled page");
        Ok(path)
    }
}
