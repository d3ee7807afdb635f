//! Hand-engineered face descriptor.
//!
//! The face patch is resized to 100×100, contrast-equalized (CLAHE) and
//! lightly blurred, then summarized by four feature groups concatenated in
//! a fixed order:
//!
//! | block | components |
//! |---|---|
//! | intensity histogram | 32 bins, L1-normalized, ×10 |
//! | Hu moments | 7, `sign(m)·log10(|m| + 1e-7)` |
//! | regional statistics | 4×4 cells × (mean, std) in `pixel/255` units |
//! | edges | edge density ×3, then 8 orientation bins, L1-normalized, ×10 |
//!
//! Every component is clipped to [-3, 3] and the whole vector L2-normalized.
//! The order defines the descriptor's coordinate system; enrollment and
//! identification must agree on it.

use std::f32::consts::PI;

use thiserror::Error;
use vigil_imaging::{clahe_enhance, gaussian_blur_3x3, sobel, Frame};

use crate::descriptor::{Descriptor, DescriptorError};
use crate::types::FaceRegion;

/// Edge length of the square patch all features are computed on.
pub const CANONICAL_SIZE: u32 = 100;

const HISTOGRAM_BINS: usize = 32;
const HU_MOMENTS: usize = 7;
const REGION_GRID: usize = 4;
const REGION_VALUE_CAP: usize = 2 * REGION_GRID * REGION_GRID;
const ORIENTATION_BINS: usize = 8;

/// Length of every descriptor this extractor produces.
pub const DESCRIPTOR_DIM: usize = HISTOGRAM_BINS + HU_MOMENTS + REGION_VALUE_CAP + 1 + ORIENTATION_BINS;

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;

const HISTOGRAM_WEIGHT: f32 = 10.0;
const EDGE_DENSITY_WEIGHT: f32 = 3.0;
const ORIENTATION_WEIGHT: f32 = 10.0;
/// L1 Sobel magnitude above which a pixel counts as an edge.
const EDGE_MAGNITUDE_THRESHOLD: f32 = 150.0;
const L1_EPSILON: f32 = 1e-7;
const LOG_EPSILON: f64 = 1e-7;
const COMPONENT_CLIP: f32 = 3.0;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("corrupt face region: {0}")]
    CorruptRegion(String),
}

/// Stateless, deterministic descriptor extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorExtractor;

impl DescriptorExtractor {
    pub fn extract(&self, region: &FaceRegion) -> Result<Descriptor, ExtractError> {
        self.extract_patch(&region.patch)
    }

    /// Compute the descriptor of an arbitrary grayscale patch.
    pub fn extract_patch(&self, patch: &Frame) -> Result<Descriptor, ExtractError> {
        if patch.width == 0
            || patch.height == 0
            || patch.data.len() != patch.width as usize * patch.height as usize
        {
            return Err(ExtractError::CorruptRegion(format!(
                "patch {}x{} with {} bytes",
                patch.width,
                patch.height,
                patch.data.len()
            )));
        }

        let face = preprocess(patch);

        let mut values = Vec::with_capacity(DESCRIPTOR_DIM);
        values.extend(intensity_histogram(&face).iter().map(|h| h * HISTOGRAM_WEIGHT));
        values.extend(hu_moments(&face).iter().map(|&m| log_compress(m)));
        values.extend(regional_statistics(&face));
        let (edge_density, orientations) = edge_features(&face);
        values.push(edge_density * EDGE_DENSITY_WEIGHT);
        values.extend(orientations.iter().map(|o| o * ORIENTATION_WEIGHT));
        debug_assert_eq!(values.len(), DESCRIPTOR_DIM);

        for v in values.iter_mut() {
            *v = v.clamp(-COMPONENT_CLIP, COMPONENT_CLIP);
        }

        Descriptor::normalized(values).map_err(|e| match e {
            DescriptorError::ZeroNorm => ExtractError::CorruptRegion("zero-norm descriptor".into()),
            other => ExtractError::CorruptRegion(other.to_string()),
        })
    }
}

/// Resize → CLAHE → 3×3 blur.
fn preprocess(patch: &Frame) -> Frame {
    let mut face = patch.resize_bilinear(CANONICAL_SIZE, CANONICAL_SIZE);
    clahe_enhance(&mut face, CLAHE_TILES, CLAHE_CLIP_LIMIT);
    gaussian_blur_3x3(&face)
}

fn intensity_histogram(face: &Frame) -> [f32; HISTOGRAM_BINS] {
    let mut hist = [0f32; HISTOGRAM_BINS];
    let bin_width = 256 / HISTOGRAM_BINS;
    for &p in &face.data {
        hist[p as usize / bin_width] += 1.0;
    }
    l1_normalize(&mut hist);
    hist
}

/// The seven Hu invariants of the patch treated as an intensity distribution.
fn hu_moments(face: &Frame) -> [f64; HU_MOMENTS] {
    let w = face.width as usize;

    let (mut m00, mut m10, mut m01) = (0f64, 0f64, 0f64);
    for (i, &p) in face.data.iter().enumerate() {
        let v = p as f64;
        m00 += v;
        m10 += (i % w) as f64 * v;
        m01 += (i / w) as f64 * v;
    }
    if m00 == 0.0 {
        return [0.0; HU_MOMENTS];
    }
    let (xc, yc) = (m10 / m00, m01 / m00);

    let (mut mu20, mut mu11, mut mu02) = (0f64, 0f64, 0f64);
    let (mut mu30, mut mu21, mut mu12, mut mu03) = (0f64, 0f64, 0f64, 0f64);
    for (i, &p) in face.data.iter().enumerate() {
        let v = p as f64;
        let dx = (i % w) as f64 - xc;
        let dy = (i / w) as f64 - yc;
        mu20 += dx * dx * v;
        mu11 += dx * dy * v;
        mu02 += dy * dy * v;
        mu30 += dx * dx * dx * v;
        mu21 += dx * dx * dy * v;
        mu12 += dx * dy * dy * v;
        mu03 += dy * dy * dy * v;
    }

    let s2 = m00 * m00;
    let s3 = s2 * m00.sqrt();
    let (n20, n11, n02) = (mu20 / s2, mu11 / s2, mu02 / s2);
    let (n30, n21, n12, n03) = (mu30 / s3, mu21 / s3, mu12 / s3, mu03 / s3);

    let a = n30 + n12;
    let b = n21 + n03;
    let c = n30 - 3.0 * n12;
    let d = 3.0 * n21 - n03;

    [
        n20 + n02,
        (n20 - n02).powi(2) + 4.0 * n11 * n11,
        c * c + d * d,
        a * a + b * b,
        c * a * (a * a - 3.0 * b * b) + d * b * (3.0 * a * a - b * b),
        (n20 - n02) * (a * a - b * b) + 4.0 * n11 * a * b,
        d * a * (a * a - 3.0 * b * b) - c * b * (3.0 * a * a - b * b),
    ]
}

/// `sign(m) · log10(|m| + ε)`, with zero mapped to zero.
fn log_compress(m: f64) -> f32 {
    if m == 0.0 {
        return 0.0;
    }
    (m.signum() * (m.abs() + LOG_EPSILON).log10()) as f32
}

/// Mean and standard deviation of each grid cell, row-major, in `pixel/255`
/// units. Always exactly `REGION_VALUE_CAP` values long.
fn regional_statistics(face: &Frame) -> Vec<f32> {
    let w = face.width as usize;
    let cell_w = w / REGION_GRID;
    let cell_h = face.height as usize / REGION_GRID;

    let mut values = Vec::with_capacity(REGION_VALUE_CAP);
    if cell_w > 0 && cell_h > 0 {
        let n = (cell_w * cell_h) as f32;
        for row in 0..REGION_GRID {
            for col in 0..REGION_GRID {
                let (mut sum, mut sum_sq) = (0f32, 0f32);
                for y in row * cell_h..(row + 1) * cell_h {
                    for &p in &face.data[y * w + col * cell_w..y * w + (col + 1) * cell_w] {
                        let v = p as f32 / 255.0;
                        sum += v;
                        sum_sq += v * v;
                    }
                }
                let mean = sum / n;
                let variance = (sum_sq / n - mean * mean).max(0.0);
                values.push(mean);
                values.push(variance.sqrt());
            }
        }
    }
    values.truncate(REGION_VALUE_CAP);
    values.resize(REGION_VALUE_CAP, 0.0);
    values
}

/// Fraction of edge pixels and the L1-normalized orientation histogram.
fn edge_features(face: &Frame) -> (f32, [f32; ORIENTATION_BINS]) {
    let gradients = sobel(face);
    let total = face.data.len();

    let mut edges = 0usize;
    let mut hist = [0f32; ORIENTATION_BINS];
    for i in 0..total {
        if gradients.l1_magnitude(i) > EDGE_MAGNITUDE_THRESHOLD {
            edges += 1;
        }
        let theta = gradients.orientation(i);
        let bin = ((theta + PI) / (2.0 * PI) * ORIENTATION_BINS as f32) as usize;
        hist[bin.min(ORIENTATION_BINS - 1)] += 1.0;
    }
    l1_normalize(&mut hist);

    (edges as f32 / total as f32, hist)
}

fn l1_normalize(values: &mut [f32]) {
    let sum: f32 = values.iter().sum::<f32>() + L1_EPSILON;
    for v in values.iter_mut() {
        *v /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth synthetic "face": bright ellipse with two dark eyes and a mouth.
    fn synthetic_face(width: u32, height: u32, shift: i32) -> Frame {
        let mut data = vec![40u8; (width * height) as usize];
        let (cx, cy) = (width as f32 / 2.0 + shift as f32, height as f32 / 2.0);
        let (rx, ry) = (width as f32 * 0.35, height as f32 * 0.45);
        for y in 0..height {
            for x in 0..width {
                let (fx, fy) = (x as f32, y as f32);
                let in_face = ((fx - cx) / rx).powi(2) + ((fy - cy) / ry).powi(2) <= 1.0;
                let eye = |ex: f32| ((fx - ex).powi(2) + (fy - (cy - ry * 0.3)).powi(2)).sqrt() < rx * 0.15;
                let mouth = (fy - (cy + ry * 0.45)).abs() < ry * 0.05 && (fx - cx).abs() < rx * 0.4;
                let v = if !in_face {
                    40
                } else if eye(cx - rx * 0.4) || eye(cx + rx * 0.4) || mouth {
                    30
                } else {
                    180 + ((x + y) % 20) as u8
                };
                data[(y * width + x) as usize] = v;
            }
        }
        Frame::new(data, width, height).unwrap()
    }

    fn checkerboard(size: u32, cell: u32) -> Frame {
        let data = (0..size * size)
            .map(|i| if ((i % size) / cell + (i / size) / cell) % 2 == 0 { 20 } else { 230 })
            .collect();
        Frame::new(data, size, size).unwrap()
    }

    #[test]
    fn test_dimension_is_constant() {
        let ex = DescriptorExtractor;
        for (w, h) in [(100, 100), (37, 81), (240, 180), (12, 12)] {
            let d = ex.extract_patch(&synthetic_face(w, h, 0)).unwrap();
            assert_eq!(d.dim(), DESCRIPTOR_DIM, "patch {w}x{h}");
        }
        assert_eq!(DESCRIPTOR_DIM, 80);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let ex = DescriptorExtractor;
        let patch = synthetic_face(120, 140, 0);
        let a = ex.extract_patch(&patch).unwrap();
        let b = ex.extract_patch(&patch).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized_distance(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_descriptor_is_unit_and_clipped() {
        let d = DescriptorExtractor.extract_patch(&synthetic_face(100, 100, 0)).unwrap();
        assert!((d.norm() - 1.0).abs() < 1e-5);
        assert!(d.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_uniform_patch_still_extracts() {
        let d = DescriptorExtractor.extract_patch(&Frame::filled(100, 100, 128)).unwrap();
        assert_eq!(d.dim(), DESCRIPTOR_DIM);
    }

    #[test]
    fn test_different_patterns_are_apart() {
        let ex = DescriptorExtractor;
        let face = ex.extract_patch(&synthetic_face(100, 100, 0)).unwrap();
        let board = ex.extract_patch(&checkerboard(100, 10)).unwrap();
        let moved = ex.extract_patch(&synthetic_face(100, 100, 6)).unwrap();
        let far = face.normalized_distance(&board).unwrap();
        let near = face.normalized_distance(&moved).unwrap();
        assert!(far > near, "far={far}, near={near}");
    }

    #[test]
    fn test_empty_patch_is_corrupt() {
        let patch = Frame { data: vec![], width: 0, height: 0 };
        let result = DescriptorExtractor.extract_patch(&patch);
        assert!(matches!(result, Err(ExtractError::CorruptRegion(_))));
    }

    #[test]
    fn test_mismatched_buffer_is_corrupt() {
        let patch = Frame { data: vec![0; 10], width: 4, height: 4 };
        let result = DescriptorExtractor.extract_patch(&patch);
        assert!(matches!(result, Err(ExtractError::CorruptRegion(_))));
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let hist = intensity_histogram(&checkerboard(100, 10));
        let sum: f32 = hist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(hist[20 / 8] > 0.0 && hist[230 / 8] > 0.0);
    }

    #[test]
    fn test_hu_moments_reflection_invariant() {
        let face = synthetic_face(100, 100, 7);
        let mut transposed = face.clone();
        for y in 0..100usize {
            for x in 0..100usize {
                transposed.data[x * 100 + y] = face.data[y * 100 + x];
            }
        }
        let a = hu_moments(&face);
        let b = hu_moments(&transposed);
        for i in 0..6 {
            let tol = 1e-9 + a[i].abs() * 1e-6;
            assert!((a[i] - b[i]).abs() < tol, "h{}: {} vs {}", i + 1, a[i], b[i]);
        }
        // The seventh invariant flips sign under reflection.
        assert!((a[6] + b[6]).abs() < 1e-9 + a[6].abs() * 1e-6);
    }

    #[test]
    fn test_hu_moments_black_patch() {
        assert_eq!(hu_moments(&Frame::filled(10, 10, 0)), [0.0; HU_MOMENTS]);
    }

    #[test]
    fn test_log_compress_preserves_sign() {
        assert_eq!(log_compress(0.0), 0.0);
        assert!(log_compress(1e-3) < 0.0);
        assert!((log_compress(1e-3) - (-3.0)).abs() < 1e-3);
        assert!(log_compress(-1e-3) > 0.0);
        assert!(log_compress(100.0) > 1.99);
    }

    #[test]
    fn test_regional_statistics_length_and_units() {
        let values = regional_statistics(&Frame::filled(100, 100, 255));
        assert_eq!(values.len(), REGION_VALUE_CAP);
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!(values[1].abs() < 1e-3);

        let tiny = regional_statistics(&Frame::filled(3, 3, 255));
        assert_eq!(tiny, vec![0.0; REGION_VALUE_CAP]);
    }

    #[test]
    fn test_edge_features_on_checkerboard() {
        let (density, hist) = edge_features(&checkerboard(100, 10));
        assert!(density > 0.0 && density < 1.0);
        let sum: f32 = hist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);

        let (flat_density, _) = edge_features(&Frame::filled(50, 50, 90));
        assert_eq!(flat_density, 0.0);
    }

    #[test]
    fn test_weighted_edge_density_stays_inside_clip() {
        let (density, _) = edge_features(&checkerboard(100, 10));
        assert!(density > 0.2, "density={density}");
        let weighted = density * EDGE_DENSITY_WEIGHT;
        assert!(weighted > 0.0 && weighted < COMPONENT_CLIP, "weighted={weighted}");
    }
}
