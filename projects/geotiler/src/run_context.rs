use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const RASTER_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

/// Input rasters for a run: the file itself, or every raster below a directory.
pub fn list_rasters(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        anyhow::bail!("Input image not found: {:?}", input);
    }

    let mut rasters: Vec<PathBuf> = WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| RASTER_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    rasters.sort();
    Ok(rasters)
}

/// Bar in the run's common style; `unit` names the counted items.
pub fn progress_bar(len: usize, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{eta}})",
                unit
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Written to `<output>/metadata.json` at the start of a run.
#[derive(Serialize, Debug, Clone)]
pub struct RunMetadata<C: Serialize> {
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub inputs: Vec<PathBuf>,
    pub config: C,
}

pub fn write_run_metadata<C: Serialize>(
    output_dir: &Path,
    command: &str,
    inputs: &[PathBuf],
    config: C,
) -> Result<()> {
    let metadata = RunMetadata {
        command: command.to_string(),
        created_at: Utc::now(),
        inputs: inputs.to_vec(),
        config,
    };
    let path = output_dir.join("metadata.json");
    let content = serde_json::to_string_pretty(&metadata)?;
    fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))
}

/// Scratch directory `<output>/tempworkspace`, owned by one run and removed
/// when dropped.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn create(output_dir: &Path) -> Result<Self> {
        let root = output_dir.join("tempworkspace");
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace {:?}", root))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path for a scratch artifact. A leftover file of the same name is
    /// removed first; failing to remove it is an error.
    pub fn scratch_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to clear scratch file {:?}", path))?;
        }
        Ok(path)
    }

    /// Best-effort removal of a scratch artifact after use.
    pub fn discard(&self, path: &Path) {
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!("Failed to remove scratch file {:?}: {}", path, e);
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            tracing::warn!("Failed to remove workspace {:?}: {}", self.root, e);
        }
    }
}
