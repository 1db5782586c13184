use crate::error::SampleError;
use crate::raster::writer::to_dynamic_image;
use crate::raster::{RasterData, SampleType};
use crate::run_context::Workspace;
use anyhow::{Context, Result};
use serde::Serialize;
use std::process::Command;

/// Segmentation algorithm requested for auto-draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum SegmentMethod {
    Slic,
    Felzenszwalb,
    Quickshift,
    Sam,
}

impl SegmentMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Slic => "slic",
            Self::Felzenszwalb => "felzenszwalb",
            Self::Quickshift => "quickshift",
            Self::Sam => "sam",
        }
    }
}

/// Produces a label map (one segment id per pixel, row-major) for an 8-bit
/// RGB block.
pub trait Segmenter {
    fn segment(&self, rgb: &RasterData, workspace: &Workspace) -> Result<Vec<i64>>;
}

/// Blanket implementation so any closure with the right signature
/// can stand in for a segmenter.
impl<F> Segmenter for F
where
    F: Fn(&RasterData, &Workspace) -> Result<Vec<i64>>,
{
    fn segment(&self, rgb: &RasterData, workspace: &Workspace) -> Result<Vec<i64>> {
        self(rgb, workspace)
    }
}

/// Runs an external program per block.
///
/// The command template is split on whitespace; `{input}`, `{output}` and
/// `{method}` are substituted. The program reads an RGB PNG from `{input}` and
/// must write a 16-bit (or 8-bit) gray PNG of segment ids to `{output}`.
#[derive(Debug, Clone)]
pub struct ExternalCommandSegmenter {
    template: Vec<String>,
    method: SegmentMethod,
}

impl ExternalCommandSegmenter {
    pub fn new(template: &str, method: SegmentMethod) -> Result<Self> {
        let template: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if template.is_empty() {
            return Err(SampleError::config("segmenter command is empty").into());
        }
        let has = |p: &str| template.iter().any(|t| t.contains(p));
        if !has("{input}") || !has("{output}") {
            return Err(SampleError::config(
                "segmenter command must contain {input} and {output} placeholders",
            )
            .into());
        }
        Ok(Self { template, method })
    }

    fn command_line(&self, input: &str, output: &str) -> Vec<String> {
        self.template
            .iter()
            .map(|part| {
                part.replace("{input}", input)
                    .replace("{output}", output)
                    .replace("{method}", self.method.name())
            })
            .collect()
    }

    fn run(&self, rgb: &RasterData, input: &std::path::Path, output: &std::path::Path) -> Result<Vec<i64>> {
        to_dynamic_image(rgb)?
            .save_with_format(input, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write segmenter input {:?}", input))?;

        let args = self.command_line(&input.to_string_lossy(), &output.to_string_lossy());
        tracing::debug!("Running segmenter: {}", args.join(" "));
        let status = Command::new(&args[0])
            .args(&args[1..])
            .status()
            .with_context(|| format!("Failed to start segmenter {:?}", args[0]))?;
        if !status.success() {
            anyhow::bail!("Segmenter {} exited with {}", self.method.name(), status);
        }

        let labels = image::open(output)
            .with_context(|| format!("Failed to read segmenter output {:?}", output))?
            .into_luma16();
        if labels.width() as usize != rgb.cols || labels.height() as usize != rgb.rows {
            anyhow::bail!(
                "Segmenter output is {}x{}, expected {}x{}",
                labels.width(),
                labels.height(),
                rgb.cols,
                rgb.rows
            );
        }
        Ok(labels.into_raw().into_iter().map(i64::from).collect())
    }
}

impl Segmenter for ExternalCommandSegmenter {
    fn segment(&self, rgb: &RasterData, workspace: &Workspace) -> Result<Vec<i64>> {
        if rgb.sample != SampleType::U8 || rgb.bands != 3 {
            return Err(SampleError::config("segmentation needs an 8-bit RGB block").into());
        }

        let input = workspace.scratch_path("segment_input.png")?;
        let output = workspace.scratch_path("segment_labels.png")?;
        let result = self.run(rgb, &input, &output);
        workspace.discard(&input);
        workspace.discard(&output);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_requires_placeholders() {
        assert!(ExternalCommandSegmenter::new("segment --in {input}", SegmentMethod::Slic).is_err());
        assert!(ExternalCommandSegmenter::new("  ", SegmentMethod::Slic).is_err());
    }

    #[test]
    fn test_command_line_substitution() {
        let seg = ExternalCommandSegmenter::new(
            "python seg.py --algo {method} {input} --out={output}",
            SegmentMethod::Felzenszwalb,
        )
        .unwrap();
        assert_eq!(
            seg.command_line("/tmp/in.png", "/tmp/out.png"),
            vec![
                "python",
                "seg.py",
                "--algo",
                "felzenszwalb",
                "/tmp/in.png",
                "--out=/tmp/out.png"
            ]
        );
    }

    #[test]
    fn test_closure_is_a_segmenter() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let seg = |rgb: &RasterData, _: &Workspace| -> Result<Vec<i64>> {
            Ok(vec![1; rgb.rows * rgb.cols])
        };
        let block = RasterData::zeros(3, 2, 2, SampleType::U8);
        assert_eq!(seg.segment(&block, &ws).unwrap(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_failed_command_cleans_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        let seg = ExternalCommandSegmenter::new(
            "geotiler-missing-segmenter {input} {output}",
            SegmentMethod::Slic,
        )
        .unwrap();
        let block = RasterData::zeros(3, 4, 4, SampleType::U8);
        assert!(seg.segment(&block, &ws).is_err());
        assert!(!ws.path().join("segment_input.png").exists());
    }
}
