//! Collaborators the pipelines hand their side effects to.

use thiserror::Error;

use crate::types::AccessLogEntry;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Receives one record per identification attempt.
pub trait AccessLogSink: Send + Sync {
    fn record(&self, entry: &AccessLogEntry) -> Result<(), SinkError>;
}

/// Keeps the photos behind enrollments and access attempts.
///
/// Both methods return a locator for the stored image (a path or URL,
/// implementation defined).
pub trait MediaStore: Send + Sync {
    fn store_reference_photo(&self, identity_id: &str, image: &[u8]) -> Result<String, SinkError>;
    fn store_access_image(&self, image_reference: &str, image: &[u8]) -> Result<String, SinkError>;
}
