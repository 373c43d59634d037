pub mod assembler;
pub mod config;
pub mod detection;
pub mod errors;
pub mod model;
pub mod params;
pub mod plugin;
pub mod polygon;
pub mod prompt;
pub mod registry;
pub mod shape;
pub mod traits;

pub mod mocks;

pub use assembler::ShapeAssembler;
pub use config::{Config, ModelConfig, Params};
pub use detection::{BoundingBox, DetectionInstance};
pub use errors::{AutoLabelError, Result};
pub use model::YoloSegmenter;
pub use params::InferenceSettings;
pub use plugin::SegmentationPlugin;
pub use polygon::{close_ring, mask_to_polygon, Polygon};
pub use prompt::parse_prompts;
pub use registry::{create_plugin, ModelRegistry};
pub use shape::{ModelMetadata, PredictionResult, Shape, ShapeType};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;
