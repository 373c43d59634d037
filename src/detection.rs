use ndarray::Array2;

/// Axis-aligned box in image coordinates, `[x1, y1, x2, y2]` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from centre coordinates and size.
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn intersection(&self, other: &Self) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.) * h.max(0.)
    }

    pub fn iou(&self, other: &Self) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0. {
            0.
        } else {
            inter / union
        }
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    /// Finite coordinates with `x1 < x2` and `y1 < y2`.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// Corner points clockwise from the top-left, as used by rectangle shapes.
    pub fn corners(&self) -> Vec<[f32; 2]> {
        vec![
            [self.x1, self.y1],
            [self.x2, self.y1],
            [self.x2, self.y2],
            [self.x1, self.y2],
        ]
    }
}

/// One detected object, resolved once when the wrapped model's results are
/// received so post-processing matches on the variant instead of probing for
/// a mask.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionInstance {
    BoxOnly {
        label: String,
        score: f32,
        bbox: BoundingBox,
    },
    BoxWithMask {
        label: String,
        score: f32,
        bbox: BoundingBox,
        /// Per-pixel foreground scores, `(height, width)`.
        mask: Array2<f32>,
    },
}

impl DetectionInstance {
    pub fn new(
        label: impl Into<String>,
        score: f32,
        bbox: BoundingBox,
        mask: Option<Array2<f32>>,
    ) -> Self {
        let label = label.into();
        match mask {
            Some(mask) => Self::BoxWithMask {
                label,
                score,
                bbox,
                mask,
            },
            None => Self::BoxOnly { label, score, bbox },
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::BoxOnly { label, .. } | Self::BoxWithMask { label, .. } => label,
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            Self::BoxOnly { score, .. } | Self::BoxWithMask { score, .. } => *score,
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        match self {
            Self::BoxOnly { bbox, .. } | Self::BoxWithMask { bbox, .. } => bbox,
        }
    }
}
