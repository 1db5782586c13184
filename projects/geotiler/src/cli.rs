use crate::error::SampleError;
use crate::pipeline::autodraw::AutoDrawConfig;
use crate::pipeline::crop::ResampleMethod;
use crate::pipeline::glt::GltMethod;
use crate::pipeline::labels::LabelFormat;
use crate::pipeline::orchestrator::{
    AutoDrawRun, ClassifyConfig, DetectConfig, SampleConfig, SegmentConfig,
};
use crate::pipeline::segmenter::SegmentMethod;
use crate::pipeline::slicing::SliceConfig;
use crate::pipeline::stretch::{StretchKind, StretchMethod};
use crate::raster::writer::ImageFormat;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Object-detection tiles with PASCAL VOC, YOLO or KITTI annotations
    Detect(DetectArgs),
    /// Image-classification tiles sorted into one folder per class
    Classify(ClassifyArgs),
    /// Semantic-segmentation tiles with gray-level label images
    Segment(SegmentArgs),
    /// Segment a raster into class polygons with an external segmenter
    Autodraw(AutoDrawArgs),
}

/// Options shared by the sample generators.
#[derive(clap::Args, Debug)]
pub struct SampleArgs {
    /// Raster file or directory of rasters (tif, png, jpg) with world files
    #[arg(long, env = "GEOTILER_INPUT_IMAGE")]
    pub input_image: PathBuf,

    /// GeoJSON file with the annotated polygons
    #[arg(long, env = "GEOTILER_INPUT_FEATURES")]
    pub input_features: PathBuf,

    /// Feature property holding the class
    #[arg(long, default_value = "class")]
    pub class_field: String,

    /// Root directory for the generated samples
    #[arg(long, env = "GEOTILER_OUTPUT_PATH")]
    pub output_path: PathBuf,

    /// Tile edge length in pixels [default: 512 for detect, 256 otherwise]
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Overlap between neighbouring tiles in pixels
    #[arg(long, default_value_t = 16)]
    pub overlap: u32,

    /// Output bands, 1-based and comma separated (e.g. "3,2,1"); all bands when omitted
    #[arg(long, value_delimiter = ',')]
    pub bands: Vec<usize>,

    /// Output image format [default: tiff, jpeg for segment]
    #[arg(long, value_enum)]
    pub format: Option<ImageFormat>,

    /// Contrast stretch applied to 8-bit outputs
    #[arg(long, value_enum, default_value_t = StretchKind::Percentile)]
    pub stretch: StretchKind,

    /// "lower,upper" percentiles or the stddev multiplier
    #[arg(long)]
    pub stretch_params: Option<String>,
}

impl SampleArgs {
    fn into_config(self, default_tile: u32, default_format: ImageFormat) -> Result<SampleConfig> {
        Ok(SampleConfig {
            input_image: self.input_image,
            input_features: self.input_features,
            class_field: self.class_field,
            output_dir: self.output_path,
            slice: SliceConfig::new(self.tile_size.unwrap_or(default_tile), self.overlap)?,
            bands: self.bands,
            format: self.format.unwrap_or(default_format),
            stretch: StretchMethod::from_parameters(self.stretch, self.stretch_params.as_deref())?,
        })
    }
}

#[derive(clap::Args, Debug)]
pub struct DetectArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Annotation format
    #[arg(long, value_enum, default_value_t = LabelFormat::Voc)]
    pub label_format: LabelFormat,

    /// Write JPEG copies with the boxes drawn into `vision/`
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub vision: bool,

    /// TrueType/OpenType font for class names on vision copies [default: a system font]
    #[arg(long, env = "GEOTILER_LABEL_FONT")]
    pub label_font: Option<PathBuf>,
}

impl DetectArgs {
    pub fn into_config(self) -> Result<DetectConfig> {
        Ok(DetectConfig {
            sample: self.sample.into_config(512, ImageFormat::Tiff)?,
            label_format: self.label_format,
            vision: self.vision,
            label_font: self.label_font,
        })
    }
}

#[derive(clap::Args, Debug)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Interpolation used to resize targets to the tile size
    #[arg(long, value_enum, default_value_t = ResampleMethod::Nearest)]
    pub resample: ResampleMethod,
}

impl ClassifyArgs {
    pub fn into_config(self) -> Result<ClassifyConfig> {
        Ok(ClassifyConfig {
            sample: self.sample.into_config(256, ImageFormat::Tiff)?,
            resample: self.resample,
        })
    }
}

#[derive(clap::Args, Debug)]
pub struct SegmentArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Class to gray level transformation
    #[arg(long, value_enum, default_value_t = GltMethod::MaxContrast)]
    pub glt: GltMethod,

    /// "class:level" pairs for the custom transformation (e.g. "water:1,building:2")
    #[arg(long)]
    pub glt_params: Option<String>,

    /// Labels with a smaller share of foreground pixels are discarded
    #[arg(long, default_value_t = 0.05)]
    pub filter: f64,

    /// Simplification tolerance in map units before the features are buffered
    #[arg(long, default_value_t = 50.0)]
    pub simplify_tolerance: f64,

    /// Write a metadata XML next to each label
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub write_xml: bool,
}

impl SegmentArgs {
    pub fn into_config(self) -> Result<SegmentConfig> {
        Ok(SegmentConfig {
            sample: self.sample.into_config(256, ImageFormat::Jpeg)?,
            glt: self.glt,
            glt_params: self.glt_params,
            min_foreground: self.filter,
            simplify_tolerance: self.simplify_tolerance,
            write_metadata: self.write_xml,
        })
    }
}

#[derive(clap::Args, Debug)]
pub struct AutoDrawArgs {
    /// Raster file or directory of rasters
    #[arg(long, env = "GEOTILER_INPUT_IMAGE")]
    pub input_image: PathBuf,

    /// Directory receiving one GeoJSON layer per raster
    #[arg(long, env = "GEOTILER_OUTPUT_PATH")]
    pub output_path: PathBuf,

    /// Segmentation algorithm, passed to the command as `{method}`
    #[arg(long, value_enum, default_value_t = SegmentMethod::Slic)]
    pub segment_method: SegmentMethod,

    /// Command run per block; `{input}` is an RGB PNG, `{output}` the label PNG it must write
    #[arg(long, env = "GEOTILER_SEGMENTER")]
    pub segmenter: String,

    /// RGB bands, 1-based and comma separated
    #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
    pub rgb_bands: Vec<usize>,

    /// Block edge length in pixels
    #[arg(long, default_value_t = 512)]
    pub block_size: usize,

    /// Stretch used when the raster is not 8-bit
    #[arg(long, value_enum, default_value_t = StretchKind::Percentile)]
    pub stretch: StretchKind,

    #[arg(long)]
    pub stretch_params: Option<String>,
}

impl AutoDrawArgs {
    pub fn into_config(self) -> Result<AutoDrawRun> {
        let rgb_bands: [usize; 3] = self.rgb_bands.as_slice().try_into().map_err(|_| {
            SampleError::config(format!(
                "exactly 3 RGB bands are required, got {:?}",
                self.rgb_bands
            ))
        })?;
        if self.block_size == 0 {
            return Err(SampleError::config("block size must be positive").into());
        }
        Ok(AutoDrawRun {
            input_image: self.input_image,
            output_dir: self.output_path,
            command: self.segmenter,
            draw: AutoDrawConfig {
                block_size: self.block_size,
                rgb_bands,
                method: self.segment_method,
                stretch: StretchMethod::from_parameters(self.stretch, self.stretch_params.as_deref())?,
            },
        })
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
