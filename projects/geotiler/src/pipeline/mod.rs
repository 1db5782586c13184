// Tiling, labelling and segmentation pipelines

pub mod assemble;
pub mod autodraw;
pub mod blocks;
pub mod crop;
pub mod finalize;
pub mod geometry;
pub mod glt;
pub mod labels;
pub mod neighbors;
pub mod orchestrator;
pub mod segmenter;
pub mod slicing;
pub mod stretch;
pub mod transform;
pub mod types;
