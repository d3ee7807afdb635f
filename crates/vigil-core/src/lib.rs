//! vigil-core: Face-matching engine for access control.
//!
//! Locates the dominant face in a photo (SCRFD via ONNX Runtime), turns it
//! into a fixed-length hand-engineered descriptor, and matches it against a
//! gallery of enrolled identities by normalized Euclidean distance.

pub mod descriptor;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod locator;
pub mod matcher;
pub mod pipeline;
pub mod sink;
pub mod types;

use std::path::PathBuf;

pub use descriptor::{Descriptor, DescriptorError};
pub use detector::{FaceDetector, ScrfdDetector};
pub use extractor::{DescriptorExtractor, DESCRIPTOR_DIM};
pub use gallery::{Gallery, GalleryError, MemoryGallery};
pub use locator::{FaceLocator, LocatorConfig};
pub use matcher::{EuclideanMatcher, Matcher};
pub use pipeline::{AccessPipeline, EnrollmentRequest, PipelineConfig, PipelineError};
pub use sink::{AccessLogSink, MediaStore, SinkError};
pub use types::{
    AccessLogEntry, BoundingBox, Category, EnrolledIdentity, FaceRegion, IdentificationDecision,
    MatchCandidate,
};

/// System-wide location of the detection model when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/vigil/models")
}
