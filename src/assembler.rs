use image::{imageops, imageops::FilterType, ImageBuffer, Luma};
use ndarray::Array2;

use crate::detection::DetectionInstance;
use crate::errors::{AutoLabelError, Result};
use crate::params::InferenceSettings;
use crate::polygon::mask_to_polygon;
use crate::shape::Shape;

/// Resample a `(height, width)` mask to the given size with bilinear
/// interpolation. Masks already at the target size are returned untouched.
pub fn resample_mask(mask: Array2<f32>, width: u32, height: u32) -> Result<Array2<f32>> {
    let (mask_height, mask_width) = mask.dim();
    if (mask_height, mask_width) == (height as usize, width as usize) {
        return Ok(mask);
    }
    if mask.is_empty() || width == 0 || height == 0 {
        return Err(AutoLabelError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "mask resampling".to_string(),
            source: format!("can not resample a {mask_width}x{mask_height} mask to {width}x{height}")
                .into(),
        });
    }

    let raw: Vec<f32> = mask.iter().copied().collect();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
        mask_width as u32,
        mask_height as u32,
        raw,
    )
    .ok_or_else(|| AutoLabelError::ImageProcessing {
        path: "unknown".to_string(),
        operation: "mask buffer creation".to_string(),
        source: format!("mask of {mask_width}x{mask_height} does not fit its buffer").into(),
    })?;

    let resized = imageops::resize(&buffer, width, height, FilterType::Triangle);
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        resized.into_raw(),
    )?)
}

/// Turns detected instances into annotation shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeAssembler {
    show_boxes: bool,
    epsilon_factor: f32,
}

impl ShapeAssembler {
    pub const fn new(show_boxes: bool, epsilon_factor: f32) -> Self {
        Self {
            show_boxes,
            epsilon_factor,
        }
    }

    pub const fn from_settings(settings: &InferenceSettings) -> Self {
        Self::new(settings.show_boxes, settings.epsilon_factor)
    }

    /// Assemble every instance in model order.
    ///
    /// Malformed instances are skipped with a warning; any other failure
    /// aborts the whole call with the index of the failing instance.
    pub fn assemble_all(
        &self,
        instances: Vec<DetectionInstance>,
        width: u32,
        height: u32,
    ) -> Result<Vec<Shape>> {
        let mut shapes = Vec::with_capacity(instances.len());
        for (index, instance) in instances.into_iter().enumerate() {
            if let Some(reason) = malformed(&instance, width, height) {
                tracing::warn!(index, label = instance.label(), reason, "skipping malformed instance");
                continue;
            }
            shapes.extend(self.assemble(index, instance, width, height)?);
        }
        Ok(shapes)
    }

    /// Shapes of one instance on an image of `width` x `height`.
    ///
    /// Box-only instances give one rectangle. Mask instances give a closed
    /// polygon, preceded by a rectangle when boxes are shown, or nothing when
    /// the mask does not outline at least three points.
    pub fn assemble(
        &self,
        index: usize,
        instance: DetectionInstance,
        width: u32,
        height: u32,
    ) -> Result<Vec<Shape>> {
        match instance {
            DetectionInstance::BoxOnly { label, score, bbox } => {
                Ok(vec![Shape::rectangle(label, &bbox, score)])
            }
            DetectionInstance::BoxWithMask {
                label,
                score,
                bbox,
                mask,
            } => {
                let mask = resample_mask(mask, width, height)
                    .map_err(|e| AutoLabelError::inference(index, "mask resampling", e))?;

                let polygon = mask_to_polygon(mask.view(), self.epsilon_factor);
                if polygon.len() < 3 {
                    tracing::debug!(index, label = %label, "mask outline is degenerate, dropped");
                    return Ok(Vec::new());
                }

                let mut shapes = Vec::with_capacity(2);
                if self.show_boxes {
                    shapes.push(Shape::rectangle(label.clone(), &bbox, score));
                }
                shapes.push(Shape::polygon(label, polygon.into_points(), score));
                Ok(shapes)
            }
        }
    }
}

fn malformed(instance: &DetectionInstance, width: u32, height: u32) -> Option<&'static str> {
    let score = instance.score();
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Some("score is not a probability");
    }
    if !instance.bbox().is_valid() {
        return Some("box is empty or not finite");
    }
    if let DetectionInstance::BoxWithMask { mask, .. } = instance {
        if mask.is_empty() || width == 0 || height == 0 {
            return Some("mask can not be resampled to the image size");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use crate::shape::ShapeType;

    fn square_mask(size: usize, from: usize, to: usize) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(y, x)| {
            if (from..to).contains(&x) && (from..to).contains(&y) {
                1.
            } else {
                0.
            }
        })
    }

    fn masked(mask: Array2<f32>) -> DetectionInstance {
        DetectionInstance::new("person", 0.9, BoundingBox::new(10., 10., 30., 30.), Some(mask))
    }

    #[test]
    fn test_box_only_gives_one_rectangle_regardless_of_show_boxes() -> Result<()> {
        let bbox = BoundingBox::new(1., 2., 3., 4.);
        for show_boxes in [false, true] {
            let assembler = ShapeAssembler::new(show_boxes, 0.001);
            let shapes = assembler.assemble(0, DetectionInstance::new("car", 0.5, bbox, None), 10, 10)?;
            assert_eq!(shapes.len(), 1);
            assert_eq!(shapes[0].shape_type, ShapeType::Rectangle);
            assert_eq!(shapes[0].points, bbox.corners());
            assert_eq!(shapes[0].score, Some(0.5));
        }
        Ok(())
    }

    #[test]
    fn test_mask_with_show_boxes_gives_rectangle_then_polygon() -> Result<()> {
        let assembler = ShapeAssembler::new(true, 0.001);
        let shapes = assembler.assemble(0, masked(square_mask(40, 10, 30)), 40, 40)?;

        let kinds: Vec<_> = shapes.iter().map(|s| s.shape_type).collect();
        assert_eq!(kinds, vec![ShapeType::Rectangle, ShapeType::Polygon]);
        Ok(())
    }

    #[test]
    fn test_mask_without_show_boxes_gives_closed_polygon() -> Result<()> {
        let assembler = ShapeAssembler::new(false, 0.001);
        let shapes = assembler.assemble(0, masked(square_mask(40, 10, 30)), 40, 40)?;

        assert_eq!(shapes.len(), 1);
        let polygon = &shapes[0];
        assert_eq!(polygon.shape_type, ShapeType::Polygon);
        assert_eq!(polygon.label, "person");
        assert_eq!(polygon.points.len(), 5);
        assert_eq!(polygon.points.first(), polygon.points.last());
        Ok(())
    }

    #[test]
    fn test_empty_mask_emits_nothing_even_with_boxes() -> Result<()> {
        let assembler = ShapeAssembler::new(true, 0.001);
        let shapes = assembler.assemble(0, masked(Array2::zeros((40, 40))), 40, 40)?;
        assert!(shapes.is_empty());
        Ok(())
    }

    #[test]
    fn test_low_resolution_mask_is_resampled_to_image_size() -> Result<()> {
        let assembler = ShapeAssembler::new(false, 0.);
        let shapes = assembler.assemble(0, masked(square_mask(10, 2, 8)), 100, 50)?;

        assert_eq!(shapes.len(), 1);
        let (xs, ys): (Vec<f32>, Vec<f32>) = shapes[0].points.iter().map(|p| (p[0], p[1])).unzip();
        let max_x = xs.iter().cloned().fold(f32::MIN, f32::max);
        let max_y = ys.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max_x > 60. && max_x < 100.);
        assert!(max_y > 30. && max_y < 50.);
        Ok(())
    }

    #[test]
    fn test_resample_mask_shape() -> Result<()> {
        let resized = resample_mask(Array2::ones((16, 16)), 64, 32)?;
        assert_eq!(resized.dim(), (32, 64));
        assert!(resized.iter().all(|&v| (v - 1.).abs() < 1e-5));

        let same = resample_mask(Array2::from_elem((4, 6), 0.5), 6, 4)?;
        assert_eq!(same, Array2::from_elem((4, 6), 0.5));
        Ok(())
    }

    #[test]
    fn test_resample_rejects_empty_input() {
        assert!(resample_mask(Array2::zeros((0, 4)), 8, 8).is_err());
        assert!(resample_mask(Array2::ones((4, 4)), 0, 8).is_err());
    }

    #[test]
    fn test_extraction_failure_reports_instance_index() {
        let assembler = ShapeAssembler::new(true, 0.001);
        let err = assembler
            .assemble(2, masked(Array2::zeros((0, 0))), 40, 40)
            .unwrap_err();
        match err {
            AutoLabelError::Inference { index, ref operation, .. } => {
                assert_eq!(index, 2);
                assert_eq!(operation, "mask resampling");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_instances_are_skipped() -> Result<()> {
        let assembler = ShapeAssembler::new(false, 0.001);
        let good = BoundingBox::new(0., 0., 5., 5.);
        let instances = vec![
            DetectionInstance::new("nan", f32::NAN, good, None),
            DetectionInstance::new("flat", 0.5, BoundingBox::new(3., 0., 3., 5.), None),
            DetectionInstance::new("empty-mask", 0.5, good, Some(Array2::zeros((0, 0)))),
            DetectionInstance::new("ok", 0.5, good, None),
        ];

        let shapes = assembler.assemble_all(instances, 20, 20)?;
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].label, "ok");
        Ok(())
    }

    #[test]
    fn test_assemble_all_keeps_model_order() -> Result<()> {
        let assembler = ShapeAssembler::new(true, 0.001);
        let instances = vec![
            DetectionInstance::new("first", 0.4, BoundingBox::new(0., 0., 4., 4.), None),
            masked(square_mask(40, 10, 30)),
            DetectionInstance::new("last", 0.9, BoundingBox::new(0., 0., 4., 4.), None),
        ];

        let shapes = assembler.assemble_all(instances, 40, 40)?;
        let labels: Vec<_> = shapes.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "person", "person", "last"]);
        assert_eq!(shapes[1].shape_type, ShapeType::Rectangle);
        assert_eq!(shapes[2].shape_type, ShapeType::Polygon);
        Ok(())
    }
}
