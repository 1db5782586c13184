use crate::pipeline::glt::GrayLevelMapping;
use crate::pipeline::types::{Label, PixelBox, SpatialRef};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Annotation layout for detection samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum LabelFormat {
    /// PASCAL VOC XML in `Annotations/`
    Voc,
    /// Normalized `class cx cy w h` lines in `labels/` plus `class_names.txt`
    Yolo,
    /// KITTI object lines in `labels/`
    Kitti,
}

impl LabelFormat {
    /// Dataset folder under the output directory.
    pub fn root(&self) -> &'static str {
        match self {
            Self::Voc => "PASCAL VOC",
            Self::Yolo => "YOLO",
            Self::Kitti => "KITTI",
        }
    }

    pub fn image_directory(&self) -> &'static str {
        match self {
            Self::Voc => "JPEGImages",
            Self::Yolo | Self::Kitti => "images",
        }
    }

    pub fn directory(&self) -> &'static str {
        match self {
            Self::Voc => "Annotations",
            Self::Yolo | Self::Kitti => "labels",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Voc => "xml",
            Self::Yolo | Self::Kitti => "txt",
        }
    }
}

/// Sorted class list; YOLO class ids are positions in this list.
#[derive(Debug, Clone, Default)]
pub struct ClassNames(Vec<Label>);

impl ClassNames {
    pub fn new(labels: &BTreeSet<Label>) -> Self {
        Self(labels.iter().cloned().collect())
    }

    pub fn index_of(&self, label: &Label) -> Option<usize> {
        self.0.binary_search(label).ok()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for label in &self.0 {
            let _ = writeln!(out, "{}", label);
        }
        fs::write(path, out).with_context(|| format!("Failed to write {:?}", path))
    }
}

/// Rounds half away from zero at 6 decimals (`format!` rounds half to even).
fn fixed6(v: f64) -> String {
    format!("{:.6}", (v * 1e6).round() / 1e6)
}

pub fn yolo_line(b: &PixelBox, class_index: usize, tile_size: u32) -> String {
    let t = tile_size as f64;
    let (x0, y0, x1, y1) = (b.x0 as f64, b.y0 as f64, b.x1 as f64, b.y1 as f64);
    format!(
        "{} {} {} {} {}",
        class_index,
        fixed6((x0 + x1) / 2.0 / t),
        fixed6((y0 + y1) / 2.0 / t),
        fixed6((x1 - x0).abs() / t),
        fixed6((y1 - y0).abs() / t)
    )
}

pub fn kitti_line(b: &PixelBox) -> String {
    let label: String = b.label.as_str().chars().filter(|c| *c != ' ').collect();
    format!(
        "{} {:.3} 0 0 {} {} {} {} 0 0 0 0 0 0 0",
        label, b.truncated, b.x0, b.y0, b.x1, b.y1
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Tab-indented XML writer for the small annotation documents.
struct XmlDoc {
    out: String,
    depth: usize,
}

impl XmlDoc {
    fn new() -> Self {
        Self {
            out: String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n"),
            depth: 0,
        }
    }

    fn open(&mut self, name: &str) {
        let _ = writeln!(self.out, "{}<{}>", "\t".repeat(self.depth), name);
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth -= 1;
        let _ = writeln!(self.out, "{}</{}>", "\t".repeat(self.depth), name);
    }

    fn leaf(&mut self, name: &str, value: impl std::fmt::Display) {
        let _ = writeln!(
            self.out,
            "{}<{}>{}</{}>",
            "\t".repeat(self.depth),
            name,
            escape(&value.to_string()),
            name
        );
    }

    fn finish(self) -> String {
        self.out
    }
}

pub struct VocImage<'a> {
    pub folder: &'a str,
    pub filename: &'a str,
    pub source_image: &'a str,
    pub width: u32,
    pub height: u32,
    pub depth: usize,
}

pub fn voc_xml(image: &VocImage<'_>, boxes: &[PixelBox]) -> String {
    let mut doc = XmlDoc::new();
    doc.open("annotation");
    doc.leaf("folder", image.folder);
    doc.leaf("filename", image.filename);

    doc.open("source");
    doc.leaf("imgsource", image.source_image);
    doc.leaf("annotation", "PASCAL VOC");
    doc.close("source");

    doc.open("size");
    doc.leaf("width", image.width);
    doc.leaf("height", image.height);
    doc.leaf("depth", image.depth);
    doc.close("size");

    for b in boxes {
        doc.open("object");
        doc.leaf("class", &b.label);
        doc.open("bndbox");
        doc.leaf("xmin", b.x0);
        doc.leaf("xmax", b.x1);
        doc.leaf("ymin", b.y0);
        doc.leaf("ymax", b.y1);
        doc.close("bndbox");
        doc.leaf("truncated", format!("{:.3}", b.truncated));
        doc.close("object");
    }

    doc.close("annotation");
    doc.finish()
}

/// `<dataset>/<label dir>/<stem>.<ext>`, with `dataset` the format's root folder.
pub fn label_path(dataset_dir: &Path, format: LabelFormat, stem: &str) -> PathBuf {
    dataset_dir
        .join(format.directory())
        .join(format!("{}.{}", stem, format.extension()))
}

/// Writes the annotation file of one detection tile.
pub fn write_detection_labels(
    path: &Path,
    format: LabelFormat,
    image: &VocImage<'_>,
    boxes: &[PixelBox],
    classes: &ClassNames,
    tile_size: u32,
) -> Result<()> {
    let content = match format {
        LabelFormat::Voc => voc_xml(image, boxes),
        LabelFormat::Yolo => {
            let mut out = String::new();
            for b in boxes {
                let index = classes
                    .index_of(&b.label)
                    .with_context(|| format!("Class {:?} missing from class list", b.label.as_str()))?;
                let _ = writeln!(out, "{}", yolo_line(b, index, tile_size));
            }
            out
        }
        LabelFormat::Kitti => {
            let mut out = String::new();
            for b in boxes {
                let _ = writeln!(out, "{}", kitti_line(b));
            }
            out
        }
    };
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}

/// Share of non-zero pixels must reach `min_foreground`; an all-background
/// label is always rejected.
pub fn has_enough_foreground(label: &[u8], min_foreground: f64) -> bool {
    if label.is_empty() {
        return false;
    }
    let foreground = label.iter().filter(|&&v| v != 0).count();
    if foreground == 0 {
        return false;
    }
    foreground as f64 / label.len() as f64 >= min_foreground
}

/// EPSG-style code from the last `AUTHORITY["name","code"]` of a WKT string.
fn factory_code(srs: &SpatialRef) -> u32 {
    srs.wkt()
        .and_then(|wkt| {
            let start = wkt.rfind("AUTHORITY[")?;
            wkt[start..].split('"').nth(3)?.parse().ok()
        })
        .unwrap_or(0)
}

/// Descriptive sidecar for a semantic-segmentation label tile.
pub struct LabelMetadata<'a> {
    pub label_name: &'a str,
    pub source_image: &'a str,
    pub width: u32,
    pub height: u32,
    pub overlap: u32,
    pub mapping: &'a GrayLevelMapping,
    pub srs: &'a SpatialRef,
    pub created: DateTime<Local>,
    pub creator: &'a str,
}

impl LabelMetadata<'_> {
    pub fn to_xml(&self) -> String {
        let mut doc = XmlDoc::new();
        doc.open("metadata");
        doc.leaf("LabelName", self.label_name);
        doc.leaf("CreateDate", self.created.format("%Y-%m-%d"));
        doc.leaf("CreateTime", self.created.format("%H:%M:%S"));
        doc.leaf("Creater", self.creator);
        doc.leaf("SourceImage", self.source_image);
        doc.leaf("Format", "PNG");
        doc.leaf("Height", self.height);
        doc.leaf("Width", self.width);
        doc.leaf("Overlap", self.overlap);
        doc.leaf("GrayLevelTransformation", self.mapping.method.display_name());

        doc.open("GLT");
        for (label, level) in self.mapping.entries() {
            let _ = writeln!(
                doc.out,
                "{}<Class value=\"{}\">{}</Class>",
                "\t".repeat(doc.depth),
                escape(label.as_str()),
                level
            );
        }
        doc.close("GLT");

        doc.open("SpatialReference");
        doc.leaf("Name", self.srs.name());
        doc.leaf("FactoryCode", factory_code(self.srs));
        doc.close("SpatialReference");

        doc.close("metadata");
        doc.finish()
    }
}

/// Name of the account running the tool, for label metadata.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
