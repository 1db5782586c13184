// Run artifact definitions
//
// Records persisted next to the samples of a run: one `samples.csv` row per
// written sample.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// One written sample.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Zero-padded sample tag, the file stem of the image and its label
    pub tag: String,
    pub source_image: String,
    pub image: String,
    /// Annotation or label image, absent for classification samples
    pub label: Option<String>,
    /// Class of a classification sample
    pub class: Option<String>,
    /// Objects annotated in a detection sample
    pub objects: usize,
}

/// Row-by-row writer for `<output>/samples.csv`.
pub struct SampleManifest {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl SampleManifest {
    pub fn create(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join("samples.csv");
        let writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    pub fn record(&mut self, record: &SampleRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .with_context(|| format!("Failed to append to {:?}", self.path))?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes the file and returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))?;
        tracing::info!("Wrote {} sample record(s) to {:?}", self.rows, self.path);
        Ok(self.rows)
    }
}

pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
