// Sample orchestrator: drives a run over every input raster
//
// Detection, classification and semantic-segmentation samples are written
// tile by tile; auto-draw segments whole rasters into polygon layers. Tiles
// rejected for their content are skipped, everything else aborts the run.

use crate::error::{is_content_error, SampleError};
use crate::pipeline::assemble::assemble;
use crate::pipeline::autodraw::{auto_draw, AutoDrawConfig};
use crate::pipeline::crop::{clip_to_extent, prepare_tile, resample, validate_bands, ResampleMethod};
use crate::pipeline::finalize::{load_label_font, write_label_png, VisionWriter};
use crate::pipeline::geometry::{buffered_regions, polygon_extent};
use crate::pipeline::glt::{GltMethod, GrayLevelMapping};
use crate::pipeline::labels::{
    current_user, has_enough_foreground, label_path, write_detection_labels, ClassNames,
    LabelFormat, LabelMetadata, VocImage,
};
use crate::pipeline::neighbors::{centered_tile, resolve_tile, split_large_objects, split_large_targets};
use crate::pipeline::segmenter::ExternalCommandSegmenter;
use crate::pipeline::slicing::{split_extent, SliceConfig, TileOriginMode};
use crate::pipeline::stretch::StretchMethod;
use crate::pipeline::types::{Extent, Label, ObjectSample};
use crate::raster::image_reader::open_raster;
use crate::raster::writer::{write_tile, ImageFormat};
use crate::raster::{MemoryRaster, RasterSource};
use crate::run_artifacts::{display_path, SampleManifest, SampleRecord};
use crate::run_context::{list_rasters, progress_bar, write_run_metadata, Workspace};
use crate::vector::rasterize::rasterize;
use crate::vector::{distinct_labels, read_features, Feature};
use anyhow::{Context, Result};
use chrono::Local;
use geo_types::{MultiPolygon, Polygon};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings shared by the tile-writing pipelines.
#[derive(Debug, Clone, Serialize)]
pub struct SampleConfig {
    /// Raster file, or a directory searched for rasters
    pub input_image: PathBuf,
    /// GeoJSON polygons carrying `class_field`
    pub input_features: PathBuf,
    pub class_field: String,
    pub output_dir: PathBuf,
    pub slice: SliceConfig,
    /// 1-based bands written to each tile; empty keeps every band
    pub bands: Vec<usize>,
    pub format: ImageFormat,
    pub stretch: StretchMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectConfig {
    pub sample: SampleConfig,
    pub label_format: LabelFormat,
    /// Also write JPEG copies with the boxes drawn
    pub vision: bool,
    /// Font for class names on vision copies; a system font when unset
    pub label_font: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyConfig {
    pub sample: SampleConfig,
    pub resample: ResampleMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentConfig {
    pub sample: SampleConfig,
    pub glt: GltMethod,
    pub glt_params: Option<String>,
    /// Minimum share of foreground pixels in a label
    pub min_foreground: f64,
    /// Douglas-Peucker tolerance, in map units, applied before buffering
    pub simplify_tolerance: f64,
    /// Write a metadata XML next to each label
    pub write_metadata: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoDrawRun {
    pub input_image: PathBuf,
    pub output_dir: PathBuf,
    /// Segmenter command with `{input}`, `{output}` and optional `{method}`
    pub command: String,
    pub draw: AutoDrawConfig,
}

/// Outcome of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub written: usize,
    pub skipped: usize,
}

/// Creates the output directory, lists the input rasters and records the
/// run configuration in `metadata.json`.
fn prepare_run<C: Serialize>(
    output_dir: &Path,
    command: &str,
    input: &Path,
    config: &C,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;
    let rasters = list_rasters(input)?;
    if rasters.is_empty() {
        return Err(SampleError::config(format!("no rasters found under {:?}", input)).into());
    }
    write_run_metadata(output_dir, command, &rasters, config)?;
    tracing::info!("{}: {} raster(s) to process", command, rasters.len());
    Ok(rasters)
}

fn create_dirs(dirs: &[&Path]) -> Result<()> {
    for dir in dirs {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    Ok(())
}

/// Bands to write: the requested list, or every band when none is given.
fn band_selection(requested: &[usize], band_count: usize, format: ImageFormat) -> Result<Vec<usize>> {
    let bands: Vec<usize> = if requested.is_empty() {
        (1..=band_count).collect()
    } else {
        requested.to_vec()
    };
    validate_bands(&bands, band_count, format)?;
    Ok(bands)
}

fn relative(output_dir: &Path, path: &Path) -> String {
    display_path(path.strip_prefix(output_dir).unwrap_or(path))
}

/// Records a written sample, or counts a content rejection as skipped.
/// Returns whether the sample was written.
fn record_outcome(
    result: Result<SampleRecord>,
    manifest: &mut SampleManifest,
    summary: &mut RunSummary,
) -> Result<bool> {
    match result {
        Ok(record) => {
            manifest.record(&record)?;
            summary.written += 1;
            Ok(true)
        }
        Err(e) if is_content_error(&e) => {
            tracing::debug!("Sample skipped: {:#}", e);
            summary.skipped += 1;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

struct DetectionRun<'a> {
    config: &'a DetectConfig,
    features: &'a [Feature],
    classes: &'a ClassNames,
    dataset: PathBuf,
    image_dir: PathBuf,
    label_dir: PathBuf,
    vision: Option<VisionWriter>,
    manifest: SampleManifest,
    tag: usize,
    summary: RunSummary,
}

impl DetectionRun<'_> {
    fn process_raster(&mut self, path: &Path) -> Result<()> {
        let config = self.config;
        let sample = &config.sample;
        let raster = open_raster(path)?;
        let meta = raster.meta();

        let bands = band_selection(&sample.bands, meta.band_count, sample.format)?;
        if self.vision.is_some() && bands.len() > 3 {
            return Err(SampleError::config(
                "vision copies need an RGB band selection when more than 3 bands are written",
            )
            .into());
        }

        let gt = meta.transform;
        let (cw, ch) = (gt.cell_width(), gt.cell_height());
        let t = sample.slice.tile_size;
        let boxes = split_large_objects(self.features, cw, ch, &sample.slice, &meta.srs);
        tracing::info!("{} object(s) to sample from {:?}", boxes.len(), path);

        let source_image = display_path(path);
        let pb = progress_bar(boxes.len(), "objects")?;
        for b in &boxes {
            pb.inc(1);
            let tile = centered_tile(&b.extent, cw, ch, t);
            if !meta.extent.contains(&tile) {
                tracing::debug!("Tile around {:?} leaves the raster", b.label.as_str());
                self.summary.skipped += 1;
                continue;
            }
            let objects = resolve_tile(&tile, &boxes, cw, t);
            if objects.is_empty() {
                continue;
            }

            let object_sample = assemble(&tile, &objects, &gt, t);
            let stem = format!("{:06}", self.tag);
            let result = self.write_sample(&raster, &bands, &object_sample, &stem, &source_image);
            if record_outcome(result, &mut self.manifest, &mut self.summary)? {
                self.tag += 1;
            }
        }
        pb.finish_with_message("Done");
        Ok(())
    }

    fn write_sample(
        &self,
        raster: &MemoryRaster,
        bands: &[usize],
        object_sample: &ObjectSample,
        stem: &str,
        source_image: &str,
    ) -> Result<SampleRecord> {
        let config = self.config;
        let sample = &config.sample;
        let srs = &raster.meta().srs;

        let clip = clip_to_extent(raster, &object_sample.tile_extent)?;
        let data = prepare_tile(&clip.data, bands, sample.format, sample.stretch)?;
        let image_path = write_tile(&self.image_dir, stem, &data, sample.format, &clip.transform, srs)?;

        let annotation = label_path(&self.dataset, config.label_format, stem);
        let folder = display_path(&self.label_dir);
        let filename = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let voc = VocImage {
            folder: &folder,
            filename: &filename,
            source_image,
            width: data.cols as u32,
            height: data.rows as u32,
            depth: data.bands,
        };
        write_detection_labels(
            &annotation,
            config.label_format,
            &voc,
            &object_sample.boxes,
            self.classes,
            sample.slice.tile_size,
        )?;

        if let Some(vision) = &self.vision {
            vision.write(stem, &data, &object_sample.boxes)?;
        }

        Ok(SampleRecord {
            tag: stem.to_string(),
            source_image: source_image.to_string(),
            image: relative(&sample.output_dir, &image_path),
            label: Some(relative(&sample.output_dir, &annotation)),
            class: None,
            objects: object_sample.boxes.len(),
        })
    }
}

/// Object-detection samples: one tile per object, annotated with every
/// object it overlaps.
pub fn run_detection(config: &DetectConfig) -> Result<RunSummary> {
    let sample = &config.sample;
    let rasters = prepare_run(&sample.output_dir, "detect", &sample.input_image, config)?;
    let features = read_features(&sample.input_features, &sample.class_field)?;
    let classes = ClassNames::new(&distinct_labels(&features));

    let format = config.label_format;
    let dataset = sample.output_dir.join(format.root());
    let image_dir = dataset.join(format.image_directory());
    let label_dir = dataset.join(format.directory());
    create_dirs(&[&image_dir, &label_dir])?;
    if format == LabelFormat::Yolo {
        classes.write(&sample.output_dir.join("class_names.txt"))?;
    }
    let vision = if config.vision {
        let dir = sample.output_dir.join("vision");
        create_dirs(&[&dir])?;
        let font = load_label_font(config.label_font.as_deref())?;
        Some(VisionWriter::new(dir, font, sample.stretch))
    } else {
        None
    };

    let mut run = DetectionRun {
        config,
        features: &features,
        classes: &classes,
        dataset,
        image_dir,
        label_dir,
        vision,
        manifest: SampleManifest::create(&sample.output_dir)?,
        tag: 0,
        summary: RunSummary::default(),
    };
    for path in &rasters {
        run.process_raster(path)?;
    }
    run.manifest.finish()?;

    tracing::info!(
        "Detection finished: {} sample(s) written, {} skipped",
        run.summary.written,
        run.summary.skipped
    );
    Ok(run.summary)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn write_class_sample(
    config: &ClassifyConfig,
    raster: &MemoryRaster,
    bands: &[usize],
    extent: &Extent,
    dir: &Path,
    stem: &str,
) -> Result<PathBuf> {
    let sample = &config.sample;
    let t = sample.slice.tile_size as usize;

    let clip = clip_to_extent(raster, extent)?;
    let resized = resample(&clip.data, t, t, config.resample)?;
    let data = prepare_tile(&resized, bands, sample.format, sample.stretch)?;
    let transform = clip
        .transform
        .rescaled(clip.data.cols, clip.data.rows, t, t);
    write_tile(dir, stem, &data, sample.format, &transform, &raster.meta().srs)
}

/// Image-classification samples: each object (or piece of an oversized one)
/// resized to a square tile under `<output>/<class>/`.
pub fn run_classification(config: &ClassifyConfig) -> Result<RunSummary> {
    let sample = &config.sample;
    let rasters = prepare_run(&sample.output_dir, "classify", &sample.input_image, config)?;
    let features = read_features(&sample.input_features, &sample.class_field)?;

    let mut manifest = SampleManifest::create(&sample.output_dir)?;
    let mut summary = RunSummary::default();
    let mut counters: BTreeMap<Label, usize> = BTreeMap::new();

    for path in &rasters {
        let raster = open_raster(path)?;
        let meta = raster.meta();
        let bands = band_selection(&sample.bands, meta.band_count, sample.format)?;
        let gt = meta.transform;
        let targets = split_large_targets(
            &features,
            gt.cell_width(),
            gt.cell_height(),
            &sample.slice,
            &meta.srs,
        );
        tracing::info!("{} target(s) to sample from {:?}", targets.len(), path);

        let source_image = display_path(path);
        let pb = progress_bar(targets.len(), "targets")?;
        for target in &targets {
            pb.inc(1);
            if !meta.extent.contains(&target.extent) {
                summary.skipped += 1;
                continue;
            }

            let dir = sample.output_dir.join(target.label.as_str());
            create_dirs(&[&dir])?;
            let counter = counters.entry(target.label.clone()).or_insert(0);
            let stem = format!("{:06}", *counter);

            let result = write_class_sample(config, &raster, &bands, &target.extent, &dir, &stem)
                .map(|image| SampleRecord {
                    tag: stem.clone(),
                    source_image: source_image.clone(),
                    image: relative(&sample.output_dir, &image),
                    label: None,
                    class: Some(target.label.to_string()),
                    objects: 1,
                });
            if record_outcome(result, &mut manifest, &mut summary)? {
                *counter += 1;
            }
        }
        pb.finish_with_message("Done");
    }
    manifest.finish()?;

    tracing::info!(
        "Classification finished: {} sample(s) in {} class(es), {} skipped",
        summary.written,
        counters.len(),
        summary.skipped
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Semantic segmentation
// ---------------------------------------------------------------------------

struct SegmentationRun<'a> {
    config: &'a SegmentConfig,
    polygons: Vec<Polygon<f64>>,
    shapes: Vec<(&'a MultiPolygon<f64>, u8)>,
    mapping: &'a GrayLevelMapping,
    image_dir: PathBuf,
    label_dir: PathBuf,
    manifest: SampleManifest,
    tag: usize,
    summary: RunSummary,
}

impl SegmentationRun<'_> {
    /// Tiles covering the buffered, dissolved features; only those touching
    /// the raster are kept.
    fn grids(&self, raster: &MemoryRaster) -> Vec<Extent> {
        let meta = raster.meta();
        let slice = &self.config.sample.slice;
        let gt = meta.transform;
        let buffer = gt.cell_width() * slice.tile_size as f64 / 2.0;

        buffered_regions(&self.polygons, self.config.simplify_tolerance, buffer)
            .iter()
            .filter_map(|region| polygon_extent(region, &meta.srs))
            .flat_map(|extent| {
                split_extent(
                    &extent,
                    gt.cell_width(),
                    gt.cell_height(),
                    slice,
                    TileOriginMode::Center,
                    2,
                )
            })
            .filter(|spec| spec.extent.intersects(&meta.extent))
            .map(|spec| {
                tracing::trace!("Grid tile row {} col {}", spec.source_row, spec.source_col);
                spec.extent
            })
            .collect()
    }

    fn process_raster(&mut self, path: &Path) -> Result<()> {
        let config = self.config;
        let raster = open_raster(path)?;
        let meta = raster.meta();
        let bands = band_selection(&config.sample.bands, meta.band_count, config.sample.format)?;

        let grids = self.grids(&raster);
        tracing::info!("{} grid(s) intersect {:?}", grids.len(), path);

        let source_image = display_path(path);
        let pb = progress_bar(grids.len(), "grids")?;
        for grid in &grids {
            pb.inc(1);
            let stem = format!("{:06}", self.tag);
            let result = self.write_sample(&raster, &bands, grid, &stem, &source_image);
            if record_outcome(result, &mut self.manifest, &mut self.summary)? {
                self.tag += 1;
            }
        }
        pb.finish_with_message("Done");
        Ok(())
    }

    fn write_sample(
        &self,
        raster: &MemoryRaster,
        bands: &[usize],
        grid: &Extent,
        stem: &str,
        source_image: &str,
    ) -> Result<SampleRecord> {
        let config = self.config;
        let sample = &config.sample;
        let srs = &raster.meta().srs;

        let clip = clip_to_extent(raster, grid)?;
        let (cols, rows) = (clip.data.cols, clip.data.rows);
        let label = rasterize(&self.shapes, &clip.transform, cols, rows)?;
        if !has_enough_foreground(&label, config.min_foreground) {
            return Err(SampleError::content(format!(
                "label {} has less than {} foreground",
                stem, config.min_foreground
            ))
            .into());
        }

        let label_png = write_label_png(&self.label_dir, stem, &label, cols, rows, &clip.transform, srs)?;
        let image = prepare_tile(&clip.data, bands, sample.format, sample.stretch).and_then(|data| {
            write_tile(&self.image_dir, stem, &data, sample.format, &clip.transform, srs)
        });
        let image = match image {
            Ok(path) => path,
            Err(e) => {
                discard_label(&label_png);
                return Err(e);
            }
        };

        if config.write_metadata {
            let label_name = label_png
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let creator = current_user();
            let metadata = LabelMetadata {
                label_name: &label_name,
                source_image,
                width: cols as u32,
                height: rows as u32,
                overlap: sample.slice.overlap,
                mapping: self.mapping,
                srs,
                created: Local::now(),
                creator: &creator,
            };
            let xml = self.label_dir.join(format!("{}.xml", stem));
            fs::write(&xml, metadata.to_xml()).with_context(|| format!("Failed to write {:?}", xml))?;
        }

        Ok(SampleRecord {
            tag: stem.to_string(),
            source_image: source_image.to_string(),
            image: relative(&sample.output_dir, &image),
            label: Some(relative(&sample.output_dir, &label_png)),
            class: None,
            objects: 0,
        })
    }
}

/// Removes a label whose image was rejected, with its sidecars.
fn discard_label(label_png: &Path) {
    for path in [
        label_png.to_path_buf(),
        label_png.with_extension(ImageFormat::Png.world_file_extension()),
        label_png.with_extension("prj"),
    ] {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove rejected label {:?}: {}", path, e);
            }
        }
    }
}

/// Semantic-segmentation samples: image tiles with gray-level label images.
pub fn run_segmentation(config: &SegmentConfig) -> Result<RunSummary> {
    let sample = &config.sample;
    let rasters = prepare_run(&sample.output_dir, "segment", &sample.input_image, config)?;
    let features = read_features(&sample.input_features, &sample.class_field)?;
    let mapping = GrayLevelMapping::build(
        config.glt,
        &distinct_labels(&features),
        config.glt_params.as_deref(),
    )?;
    tracing::info!(
        "Gray level transformation {}: {:?}",
        config.glt.display_name(),
        mapping.entries()
    );

    let shapes: Vec<(&MultiPolygon<f64>, u8)> = features
        .iter()
        .filter_map(|f| match mapping.gray_level(&f.label) {
            Some(level) => Some((&f.geometry, level)),
            None => {
                tracing::warn!("Class {:?} has no gray level, feature ignored", f.label.as_str());
                None
            }
        })
        .collect();

    let image_dir = sample.output_dir.join("images");
    let label_dir = sample.output_dir.join("labels");
    create_dirs(&[&image_dir, &label_dir])?;

    let mut run = SegmentationRun {
        config,
        polygons: features.iter().flat_map(|f| f.geometry.0.iter().cloned()).collect(),
        shapes,
        mapping: &mapping,
        image_dir,
        label_dir,
        manifest: SampleManifest::create(&sample.output_dir)?,
        tag: 0,
        summary: RunSummary::default(),
    };
    for path in &rasters {
        run.process_raster(path)?;
    }
    run.manifest.finish()?;

    tracing::info!(
        "Segmentation finished: {} sample(s) written, {} skipped",
        run.summary.written,
        run.summary.skipped
    );
    Ok(run.summary)
}

// ---------------------------------------------------------------------------
// Auto-draw
// ---------------------------------------------------------------------------

/// Segments each raster into `<output>/<raster stem>.geojson`.
pub fn run_autodraw(config: &AutoDrawRun) -> Result<RunSummary> {
    let rasters = prepare_run(&config.output_dir, "autodraw", &config.input_image, config)?;
    let segmenter = ExternalCommandSegmenter::new(&config.command, config.draw.method)?;
    let workspace = Workspace::create(&config.output_dir)?;
    let mut manifest = SampleManifest::create(&config.output_dir)?;
    let mut summary = RunSummary::default();

    for (i, path) in rasters.iter().enumerate() {
        let raster = open_raster(path)?;
        let layer = auto_draw(&raster, &config.draw, &segmenter, &workspace)?;
        if layer.is_empty() {
            tracing::warn!("No polygons drawn for {:?}", path);
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{:06}", i));
        let output = config.output_dir.join(format!("{}.geojson", stem));
        layer.write_geojson(&output)?;

        manifest.record(&SampleRecord {
            tag: format!("{:06}", i),
            source_image: display_path(path),
            image: relative(&config.output_dir, &output),
            label: None,
            class: None,
            objects: layer.len(),
        })?;
        summary.written += 1;
    }
    manifest.finish()?;
    Ok(summary)
}
