//! Mask to polygon conversion.
//!
//! A probability mask is binarised, the outer borders of its foreground
//! regions are traced, the border enclosing the largest area is kept and
//! optionally simplified with Douglas-Peucker. Holes are not represented.

use image::{imageops, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use ndarray::ArrayView2;

/// An open ring of `(x, y)` vertices in trace order.
///
/// The ring is never closed here; closing is done when a polygon shape is
/// built from it (see [`close_ring`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon {
    points: Vec<[f32; 2]>,
}

impl Polygon {
    pub fn new(points: Vec<[f32; 2]>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[[f32; 2]] {
        &self.points
    }

    pub fn into_points(self) -> Vec<[f32; 2]> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Enclosed area (shoelace formula), independent of winding.
    pub fn area(&self) -> f64 {
        let points: Vec<(f64, f64)> = self
            .points
            .iter()
            .map(|&[x, y]| (x as f64, y as f64))
            .collect();
        shoelace(&points)
    }
}

/// Append the first point if the ring is not already closed.
pub fn close_ring(points: &mut Vec<[f32; 2]>) {
    if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
        if first != last {
            points.push(first);
        }
    }
}

/// A pixel is foreground when its score is still non-zero once scaled to an
/// 8-bit intensity, i.e. `score >= 1/255`. NaN and negative scores are
/// background.
pub fn binarize(mask: ArrayView2<f32>) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let score = mask[[y as usize, x as usize]];
        if (score * 255.) as u8 > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Convert a mask into the outline of its dominant foreground region.
///
/// Returns an empty polygon when the mask has no foreground. When
/// `epsilon_factor > 0` the outline is simplified with a tolerance of
/// `epsilon_factor` times its perimeter; otherwise the traced outline is
/// returned as is.
pub fn mask_to_polygon(mask: ArrayView2<f32>, epsilon_factor: f32) -> Polygon {
    let binary = binarize(mask);

    // Outer borders only start right of a background pixel, so surround the
    // mask with one and shift the traced points back.
    let mut padded = GrayImage::new(binary.width() + 2, binary.height() + 2);
    imageops::replace(&mut padded, &binary, 1, 1);

    let largest = find_contours::<i32>(&padded)
        .into_iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none())
        .map(|contour| {
            let points: Vec<Point<i32>> = contour
                .points
                .iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect();
            compress_chain(&points)
        })
        .fold(None::<(f64, Vec<(f64, f64)>)>, |best, chain| {
            let area = shoelace(&chain);
            match best {
                Some((best_area, _)) if best_area >= area => best,
                _ => Some((area, chain)),
            }
        });

    let Some((_, chain)) = largest else {
        return Polygon::default();
    };

    let chain = if epsilon_factor > 0. {
        let epsilon = epsilon_factor as f64 * closed_arc_length(&chain);
        simplify_closed(&chain, epsilon)
    } else {
        chain
    };

    Polygon::new(
        chain
            .into_iter()
            .map(|(x, y)| [x as f32, y as f32])
            .collect(),
    )
}

/// Keep only the end points of horizontal, vertical and diagonal runs of a
/// closed border.
fn compress_chain(points: &[Point<i32>]) -> Vec<(f64, f64)> {
    let mut points = points.to_vec();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }

    let n = points.len();
    if n < 3 {
        return points.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    }

    let step = |from: Point<i32>, to: Point<i32>| ((to.x - from.x).signum(), (to.y - from.y).signum());

    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| (points[i].x as f64, points[i].y as f64))
        .collect()
}

fn shoelace(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.;
    }
    let twice_area: f64 = (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum();
    twice_area.abs() / 2.
}

fn closed_arc_length(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.;
    }
    (0..n)
        .map(|i| distance(points[i], points[(i + 1) % n]))
        .sum()
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Distance from `p` to the line through `a` and `b`, or to `a` when the two
/// coincide.
fn line_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let length = dx.hypot(dy);
    if length == 0. {
        return distance(p, a);
    }
    ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / length
}

/// Douglas-Peucker on a closed ring.
///
/// The ring is cut at its first vertex and the vertex farthest from it; both
/// halves are simplified as open polylines. The cut does not depend on
/// `epsilon`, so a larger tolerance always keeps a subset of the vertices a
/// smaller one keeps.
fn simplify_closed(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    let n = points.len();
    if n < 3 || epsilon <= 0. {
        return points.to_vec();
    }

    let (split, farthest) = (1..n)
        .map(|i| (i, distance(points[0], points[i])))
        .fold((0, 0.), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });
    if farthest == 0. {
        return vec![points[0]];
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[split] = true;

    let forward: Vec<usize> = (0..=split).collect();
    let backward: Vec<usize> = (split..n).chain(std::iter::once(0)).collect();
    mark_open(points, &forward, epsilon, &mut keep);
    mark_open(points, &backward, epsilon, &mut keep);

    points
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}

/// Mark the vertices Douglas-Peucker keeps on the open polyline `chain`
/// (indices into `points`).
fn mark_open(points: &[(f64, f64)], chain: &[usize], epsilon: f64, keep: &mut [bool]) {
    let mut stack = vec![(0, chain.len() - 1)];

    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (a, b) = (points[chain[start]], points[chain[end]]);

        let (index, dmax) = (start + 1..end)
            .map(|i| (i, line_distance(points[chain[i]], a, b)))
            .fold((start, 0.), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });

        if dmax > epsilon {
            keep[chain[index]] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }
}
