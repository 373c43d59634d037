use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbImage;
use ndarray::Array2;

use crate::config::ModelConfig;
use crate::detection::{BoundingBox, DetectionInstance};
use crate::errors::{AutoLabelError, Result};
use crate::plugin::SegmentationPlugin;
use crate::traits::InstanceSegmenter;

/// Test double for a wrapped model.
///
/// Returns a fixed list of instances, keeping those at or above the
/// confidence threshold.
#[derive(Debug, Default)]
pub struct MockSegmenter {
    instances: Vec<DetectionInstance>,
    failing_calls: usize,
    fail_warm_up: bool,
    calls: AtomicUsize,
}

impl MockSegmenter {
    pub fn new(instances: Vec<DetectionInstance>) -> Self {
        Self {
            instances,
            ..Self::default()
        }
    }

    /// Fail every `infer` call.
    pub fn with_failing_infer(self) -> Self {
        self.with_failing_calls(usize::MAX)
    }

    /// Fail the first `count` `infer` calls, then answer normally.
    pub fn with_failing_calls(mut self, count: usize) -> Self {
        self.failing_calls = count;
        self
    }

    pub fn with_failing_warm_up(mut self) -> Self {
        self.fail_warm_up = true;
        self
    }

    /// Number of `infer` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InstanceSegmenter for MockSegmenter {
    fn infer(
        &self,
        _image: &RgbImage,
        conf_threshold: f32,
        _iou_threshold: f32,
    ) -> Result<Vec<DetectionInstance>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failing_calls {
            return Err(AutoLabelError::Model {
                operation: "mock inference".to_string(),
                source: "inference failure requested".into(),
            });
        }
        Ok(self
            .instances
            .iter()
            .filter(|instance| instance.score() >= conf_threshold || instance.score().is_nan())
            .cloned()
            .collect())
    }

    fn warm_up(&self) -> Result<()> {
        if self.fail_warm_up {
            return Err(AutoLabelError::Model {
                operation: "mock warm-up".to_string(),
                source: "warm-up failure requested".into(),
            });
        }
        Ok(())
    }
}

/// Plugin over a `MockSegmenter` that yields `instances` on every call.
pub fn mock_plugin(
    config: ModelConfig,
    instances: Vec<DetectionInstance>,
) -> SegmentationPlugin<MockSegmenter> {
    SegmentationPlugin::new(config, move |_| Ok(MockSegmenter::new(instances.clone())))
}

/// Plugin whose load always fails, as with missing weights.
pub fn failing_plugin(config: ModelConfig) -> SegmentationPlugin<MockSegmenter> {
    SegmentationPlugin::new(config, |config| {
        Err(AutoLabelError::load(&config.model_id, "weights file not found"))
    })
}

/// `(height, width)` mask with ones inside the inclusive rectangle.
pub fn rect_mask(height: usize, width: usize, bbox: &BoundingBox) -> Array2<f32> {
    Array2::from_shape_fn((height, width), |(y, x)| {
        let (x, y) = (x as f32, y as f32);
        if x >= bbox.x1 && x <= bbox.x2 && y >= bbox.y1 && y <= bbox.y2 {
            1.
        } else {
            0.
        }
    })
}

/// `(height, width)` mask of a filled disk.
pub fn disk_mask(height: usize, width: usize, cx: f32, cy: f32, radius: f32) -> Array2<f32> {
    Array2::from_shape_fn((height, width), |(y, x)| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        if dx * dx + dy * dy <= radius * radius {
            1.
        } else {
            0.
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_filters_by_confidence() -> Result<()> {
        let bbox = BoundingBox::new(0., 0., 2., 2.);
        let mock = MockSegmenter::new(vec![
            DetectionInstance::new("low", 0.1, bbox, None),
            DetectionInstance::new("high", 0.9, bbox, None),
        ]);

        let result = mock.infer(&RgbImage::new(4, 4), 0.25, 0.7)?;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].label(), "high");
        assert_eq!(mock.calls(), 1);
        Ok(())
    }

    #[test]
    fn test_mock_failure() {
        let mock = MockSegmenter::new(Vec::new()).with_failing_infer();
        assert!(mock.infer(&RgbImage::new(4, 4), 0.25, 0.7).is_err());
    }

    #[test]
    fn test_mock_recovers_after_failing_calls() {
        let mock = MockSegmenter::new(Vec::new()).with_failing_calls(1);
        let image = RgbImage::new(4, 4);
        assert!(mock.infer(&image, 0.25, 0.7).is_err());
        assert!(mock.infer(&image, 0.25, 0.7).is_ok());
    }

    #[test]
    fn test_rect_mask_is_inclusive() {
        let mask = rect_mask(10, 10, &BoundingBox::new(2., 3., 4., 5.));
        assert_eq!(mask.iter().filter(|&&v| v > 0.).count(), 9);
    }
}
