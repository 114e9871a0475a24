use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::core::error::LabelError;
use crate::ocr::{OcrEngine, OcrPage};

/// Runs an external OCR program as `<program> [args..] --image <path>` and
/// reads an [`OcrPage`] as JSON from its stdout.
#[derive(Debug, Clone)]
pub struct CommandOcrEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandOcrEngine {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
        }
    }

    /// Parses a whitespace-separated command such as `python3 ocr/doctr_bridge.py`.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .with_context(|| "OCR command is empty")?;
        Ok(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl OcrEngine for CommandOcrEngine {
    fn recognize(&self, image_path: &Path) -> Result<OcrPage> {
        info!(image = %image_path.display(), program = %self.program.display(), "running OCR");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--image")
            .arg(image_path)
            .output()
            .with_context(|| format!("failed to invoke OCR command {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LabelError::Ocr(format!("{}: {}", output.status, stderr.trim())).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let page: OcrPage =
            serde_json::from_str(&stdout).with_context(|| "failed to parse OCR JSON response")?;
        debug!(lines = page.lines.len(), "OCR finished");
        Ok(page)
    }
}
