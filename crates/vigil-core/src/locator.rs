//! Face locator: picks one face out of the detector's candidates.
//!
//! Candidates below the minimum size are dropped; among the rest the largest
//! area wins, ties keeping the detector's order. The winner is padded by a
//! fraction of its shorter side, clamped to the frame and cut out as a patch
//! of the canonical size.

use thiserror::Error;
use vigil_imaging::{Frame, FrameError, Rect};

use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::CANONICAL_SIZE;
use crate::types::{BoundingBox, FaceRegion};

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Shorter side, in pixels, below which a candidate is ignored.
    pub min_face_size: u32,
    /// Padding added on every side, as a fraction of the shorter side.
    pub padding_ratio: f32,
    /// Edge length of the square patch handed to the extractor.
    pub patch_size: u32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_face_size: 30,
            padding_ratio: 0.1,
            patch_size: CANONICAL_SIZE,
        }
    }
}

pub struct FaceLocator<D> {
    detector: D,
    config: LocatorConfig,
}

impl<D: FaceDetector> FaceLocator<D> {
    pub fn new(detector: D, config: LocatorConfig) -> Self {
        Self { detector, config }
    }

    /// Find the dominant face in `frame`.
    pub fn locate(&mut self, frame: &Frame) -> Result<FaceRegion, LocateError> {
        let candidates = self.detector.detect(frame)?;
        let total = candidates.len();

        let chosen = select_largest(&candidates, self.config.min_face_size)
            .ok_or(LocateError::NoFaceDetected)?;
        if total > 1 {
            tracing::debug!(candidates = total, "multiple faces detected; using the largest");
        }

        let rect = pad_and_clamp(chosen, frame.width, frame.height, self.config.padding_ratio)
            .ok_or(LocateError::NoFaceDetected)?;
        let patch = frame
            .crop(rect)?
            .resize_bilinear(self.config.patch_size, self.config.patch_size);

        tracing::debug!(
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            score = chosen.confidence,
            "face located"
        );

        Ok(FaceRegion {
            rect,
            patch,
            score: chosen.confidence,
        })
    }
}

/// Largest candidate whose shorter side reaches `min_size`; first wins on ties.
pub fn select_largest(candidates: &[BoundingBox], min_size: u32) -> Option<&BoundingBox> {
    let min_size = min_size as f32;
    let mut best: Option<&BoundingBox> = None;
    for candidate in candidates {
        if candidate.width.min(candidate.height) < min_size {
            continue;
        }
        if best.map_or(true, |b| candidate.area() > b.area()) {
            best = Some(candidate);
        }
    }
    best
}

/// Round `bbox` to pixels, grow it by `ratio` of its shorter side on every
/// edge and clamp to the frame. `None` when nothing of it is inside the frame.
pub fn pad_and_clamp(bbox: &BoundingBox, width: u32, height: u32, ratio: f32) -> Option<Rect> {
    let x = bbox.x.round() as i64;
    let y = bbox.y.round() as i64;
    let w = bbox.width.round() as i64;
    let h = bbox.height.round() as i64;
    let pad = (w.min(h) as f32 * ratio) as i64;

    let x0 = (x - pad).max(0);
    let y0 = (y - pad).max(0);
    let x1 = (x + w + pad).min(width as i64);
    let y1 = (y + h + pad).min(height as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(Rect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}
