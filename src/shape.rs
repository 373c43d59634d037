use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ModelConfig, Params};
use crate::detection::BoundingBox;
use crate::polygon::close_ring;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Polygon,
    Rotation,
    Circle,
    Line,
    Linestrip,
    Point,
}

/// One output annotation.
///
/// Rectangles carry their four corners (implicitly closed); polygons carry an
/// explicitly closed ring of at least three distinct points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub label: String,
    pub shape_type: ShapeType,
    pub points: Vec<[f32; 2]>,
    pub score: Option<f32>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub difficult: bool,
    #[serde(default)]
    pub direction: i32,
    #[serde(default)]
    pub flags: Option<Map<String, Value>>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub kie_linking: Vec<Value>,
}

impl Shape {
    pub fn new(
        label: impl Into<String>,
        shape_type: ShapeType,
        points: Vec<[f32; 2]>,
        score: Option<f32>,
    ) -> Self {
        Self {
            label: label.into(),
            shape_type,
            points,
            score,
            attributes: Map::new(),
            description: None,
            difficult: false,
            direction: 0,
            flags: None,
            group_id: None,
            kie_linking: Vec::new(),
        }
    }

    pub fn rectangle(label: impl Into<String>, bbox: &BoundingBox, score: f32) -> Self {
        Self::new(label, ShapeType::Rectangle, bbox.corners(), Some(score))
    }

    /// Polygon shape from an open or closed ring; the stored ring is closed.
    pub fn polygon(label: impl Into<String>, mut points: Vec<[f32; 2]>, score: f32) -> Self {
        close_ring(&mut points);
        Self::new(label, ShapeType::Polygon, points, Some(score))
    }
}

/// Output of one `predict` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub description: String,
}

impl PredictionResult {
    pub fn new(shapes: Vec<Shape>) -> Self {
        Self {
            shapes,
            description: String::new(),
        }
    }
}

/// Discovery payload of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub display_name: String,
    pub widgets: Vec<Value>,
    pub params: Params,
    pub batch_processing_mode: String,
}

impl ModelMetadata {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            display_name: config.display_name.clone(),
            widgets: config.widgets.clone(),
            params: config.params.clone(),
            batch_processing_mode: config.batch_processing_mode.clone(),
        }
    }
}
