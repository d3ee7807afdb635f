//! Enrollment and identification pipelines.
//!
//! Both start with decode → locate → extract. Enrollment then rejects near
//! duplicates of anyone already enrolled and stores the new identity;
//! identification matches against authorized identities only and reports
//! the attempt to the access log.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use vigil_imaging::{Frame, FrameError};

use crate::descriptor::Descriptor;
use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::{DescriptorExtractor, ExtractError};
use crate::gallery::{Gallery, GalleryError};
use crate::locator::{FaceLocator, LocateError};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::sink::{AccessLogSink, MediaStore};
use crate::types::{AccessLogEntry, Category, EnrolledIdentity, IdentificationDecision};

const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("corrupt face region: {0}")]
    CorruptRegion(String),
    #[error("descriptor dimension mismatch: gallery uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("a similar identity is already enrolled ({identity_id}, confidence {confidence:.1}%)")]
    DuplicateEnrollment { identity_id: String, confidence: f32 },
    #[error("no authorized identities to compare against")]
    GalleryEmpty,
    #[error("invalid threshold {0}: must be finite and non-negative")]
    InvalidThreshold(f32),
    #[error("duplicate threshold {duplicate} is looser than identify threshold {identify}")]
    ThresholdOrder { duplicate: f32, identify: f32 },
    #[error("unreadable image: {0}")]
    Image(#[from] FrameError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery error: {0}")]
    Gallery(GalleryError),
}

impl PipelineError {
    /// Expected outcomes of a well-formed request, as opposed to failures of
    /// the input or of the infrastructure.
    pub fn is_domain_outcome(&self) -> bool {
        matches!(
            self,
            PipelineError::NoFaceDetected
                | PipelineError::CorruptRegion(_)
                | PipelineError::DimensionMismatch { .. }
                | PipelineError::DuplicateEnrollment { .. }
                | PipelineError::GalleryEmpty
        )
    }
}

impl From<LocateError> for PipelineError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::NoFaceDetected => PipelineError::NoFaceDetected,
            LocateError::Detector(e) => PipelineError::Detector(e),
            LocateError::Frame(e) => PipelineError::CorruptRegion(e.to_string()),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::CorruptRegion(reason) => PipelineError::CorruptRegion(reason),
        }
    }
}

impl From<GalleryError> for PipelineError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::DimensionMismatch { expected, actual } => {
                PipelineError::DimensionMismatch { expected, actual }
            }
            other => PipelineError::Gallery(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Default acceptance threshold (normalized distance) for identification.
    pub identify_threshold: f32,
    /// Stricter threshold under which an enrollment counts as a duplicate.
    pub duplicate_threshold: f32,
    /// Location recorded when the caller gives none.
    pub default_location: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identify_threshold: 0.02,
            duplicate_threshold: 0.01,
            default_location: "Main Entrance".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Both thresholds must be usable, and a duplicate must be at least as
    /// close as a positive identification.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let identify = validate_threshold(self.identify_threshold)?;
        let duplicate = validate_threshold(self.duplicate_threshold)?;
        if duplicate > identify {
            return Err(PipelineError::ThresholdOrder {
                duplicate,
                identify,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub display_name: String,
    pub category: Category,
    pub is_authorized: bool,
    pub external_reference: Option<String>,
}

/// `sha256:<hex>` digest used to refer to an image without storing it inline.
pub fn image_reference(image: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(image))
}

fn validate_threshold(threshold: f32) -> Result<f32, PipelineError> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(threshold)
    } else {
        Err(PipelineError::InvalidThreshold(threshold))
    }
}

/// Locate → extract → match, with the gallery and side-effect sinks injected.
pub struct AccessPipeline<D> {
    locator: FaceLocator<D>,
    extractor: DescriptorExtractor,
    matcher: EuclideanMatcher,
    gallery: Arc<dyn Gallery>,
    access_log: Arc<dyn AccessLogSink>,
    media: Arc<dyn MediaStore>,
    config: PipelineConfig,
}

impl<D: FaceDetector> AccessPipeline<D> {
    pub fn new(
        locator: FaceLocator<D>,
        gallery: Arc<dyn Gallery>,
        access_log: Arc<dyn AccessLogSink>,
        media: Arc<dyn MediaStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            locator,
            extractor: DescriptorExtractor,
            matcher: EuclideanMatcher,
            gallery,
            access_log,
            media,
            config,
        }
    }

    /// Decode an encoded image and compute the descriptor of its dominant face.
    pub fn describe(&mut self, image: &[u8]) -> Result<Descriptor, PipelineError> {
        let frame = Frame::decode(image)?;
        self.describe_frame(&frame)
    }

    pub fn describe_frame(&mut self, frame: &Frame) -> Result<Descriptor, PipelineError> {
        let region = self.locator.locate(frame)?;
        Ok(self.extractor.extract(&region)?)
    }

    /// Enroll the face in `image` as a new identity.
    pub fn enroll(
        &mut self,
        image: &[u8],
        request: EnrollmentRequest,
    ) -> Result<EnrolledIdentity, PipelineError> {
        let descriptor = self.describe(image)?;
        let identity = self.register(descriptor, request)?;

        match self.media.store_reference_photo(&identity.identity_id, image) {
            Ok(location) => {
                tracing::debug!(identity_id = %identity.identity_id, %location, "reference photo stored")
            }
            Err(err) => tracing::error!(
                identity_id = %identity.identity_id,
                error = %err,
                "failed to store reference photo"
            ),
        }
        Ok(identity)
    }

    /// Duplicate-check `descriptor` against every enrolled identity and store it.
    pub fn register(
        &self,
        descriptor: Descriptor,
        request: EnrollmentRequest,
    ) -> Result<EnrolledIdentity, PipelineError> {
        let threshold = validate_threshold(self.config.duplicate_threshold)?;
        let existing = self.gallery.all()?;
        if let Some(hit) = self.matcher.best_match(&descriptor, &existing, threshold) {
            tracing::info!(
                existing = %hit.identity_id,
                confidence = hit.confidence,
                "enrollment rejected as duplicate"
            );
            return Err(PipelineError::DuplicateEnrollment {
                identity_id: hit.identity_id,
                confidence: hit.confidence,
            });
        }

        let identity = EnrolledIdentity {
            identity_id: Uuid::new_v4().to_string(),
            descriptor,
            display_name: request.display_name,
            category: request.category,
            is_authorized: request.is_authorized,
            external_reference: request.external_reference,
            created_at: Utc::now(),
        };
        self.gallery.add(identity.clone())?;

        tracing::info!(
            identity_id = %identity.identity_id,
            name = %identity.display_name,
            category = %identity.category,
            authorized = identity.is_authorized,
            "identity enrolled"
        );
        Ok(identity)
    }

    /// Identify the face in `image` and report the attempt to the access log.
    ///
    /// `threshold` falls back to the configured default; an empty `location`
    /// to the configured default location.
    pub fn identify(
        &mut self,
        image: &[u8],
        threshold: Option<f32>,
        location: &str,
    ) -> Result<IdentificationDecision, PipelineError> {
        let threshold = threshold.unwrap_or(self.config.identify_threshold);
        validate_threshold(threshold)?;

        let descriptor = self.describe(image)?;
        let decision = self.decide(&descriptor, threshold)?;
        self.report(image, &decision, location);
        Ok(decision)
    }

    /// Match `query` against the authorized identities.
    pub fn decide(
        &self,
        query: &Descriptor,
        threshold: f32,
    ) -> Result<IdentificationDecision, PipelineError> {
        let threshold = validate_threshold(threshold)?;
        let candidates = self.gallery.authorized()?;
        if candidates.is_empty() {
            tracing::info!("no authorized identities enrolled");
            return Err(PipelineError::GalleryEmpty);
        }

        let best = self.matcher.best_match(query, &candidates, threshold);
        let matched = best.as_ref().and_then(|hit| {
            candidates
                .iter()
                .find(|c| c.identity_id == hit.identity_id)
                .map(|identity| (hit, identity))
        });

        let decision = match matched {
            Some((hit, identity)) => IdentificationDecision {
                matched_identity_id: Some(identity.identity_id.clone()),
                matched_name: Some(identity.display_name.clone()),
                confidence: hit.confidence,
                access_granted: identity.is_authorized,
            },
            None => IdentificationDecision::no_match(),
        };

        tracing::info!(
            matched = ?decision.matched_identity_id,
            confidence = decision.confidence,
            granted = decision.access_granted,
            threshold,
            compared = candidates.len(),
            "identification decided"
        );
        Ok(decision)
    }

    fn report(&self, image: &[u8], decision: &IdentificationDecision, location: &str) {
        let reference = image_reference(image);
        if let Err(err) = self.media.store_access_image(&reference, image) {
            tracing::error!(reference = %reference, error = %err, "failed to store access image");
        }

        let location = if location.trim().is_empty() {
            self.config.default_location.clone()
        } else {
            location.to_string()
        };
        let entry = AccessLogEntry {
            timestamp: Utc::now(),
            matched_identity_id: decision.matched_identity_id.clone(),
            detected_name: decision
                .matched_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            confidence: decision.confidence,
            access_granted: decision.access_granted,
            location,
            image_reference: reference,
        };
        if let Err(err) = self.access_log.record(&entry) {
            tracing::error!(error = %err, "failed to record access attempt");
        }
    }
}
