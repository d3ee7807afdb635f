//! D-Bus surface of the daemon.
//!
//! Image-bound requests go to the engine thread; gallery and log queries run
//! on the blocking pool. Domain outcomes come back as JSON with a `status`
//! field, infrastructure failures as D-Bus errors.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use vigil_core::{
    Category, EnrolledIdentity, EnrollmentRequest, Gallery, IdentificationDecision, PipelineError,
};
use zbus::interface;

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::media::DirMediaStore;
use crate::store::{SqliteAccessLog, SqliteGallery};

const MAX_LOG_ENTRIES: u32 = 1000;

/// D-Bus interface for the Vigil access daemon.
///
/// Bus name: org.vigil.Access1
/// Object path: /org/vigil/Access1
pub struct AccessService {
    engine: EngineHandle,
    gallery: Arc<SqliteGallery>,
    access_log: Arc<SqliteAccessLog>,
    media: Arc<DirMediaStore>,
    config: Arc<Config>,
}

impl AccessService {
    pub fn new(
        engine: EngineHandle,
        gallery: Arc<SqliteGallery>,
        access_log: Arc<SqliteAccessLog>,
        media: Arc<DirMediaStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine,
            gallery,
            access_log,
            media,
            config,
        }
    }
}

#[interface(name = "org.vigil.Access1")]
impl AccessService {
    /// Enroll the face in the image at `image_path` as a new identity.
    async fn enroll(
        &self,
        image_path: &str,
        name: &str,
        category: &str,
        authorized: bool,
        external_reference: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(image_path, name, category, authorized, "enroll requested");
        let name = name.trim();
        if name.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("name must not be empty".into()));
        }
        let category = category
            .parse::<Category>()
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let image = read_image(image_path).await?;

        let request = EnrollmentRequest {
            display_name: name.to_string(),
            category,
            is_authorized: authorized,
            external_reference: non_empty(external_reference),
        };
        let result = self.engine.enroll(image, request).await;
        Ok(enrollment_outcome(result)?.to_string())
    }

    /// Identify the face in the image at `image_path`.
    ///
    /// A negative `threshold` selects the configured default; an empty
    /// `location` the configured default location.
    async fn identify(
        &self,
        image_path: &str,
        location: &str,
        threshold: f64,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(image_path, location, threshold, "identify requested");
        let threshold = (threshold >= 0.0).then_some(threshold as f32);
        let image = read_image(image_path).await?;

        let result = self
            .engine
            .identify(image, threshold, location.to_string())
            .await;
        Ok(identification_outcome(result)?.to_string())
    }

    /// List enrolled identities, optionally only the authorized ones.
    async fn list_identities(&self, authorized_only: bool) -> zbus::fdo::Result<String> {
        let gallery = Arc::clone(&self.gallery);
        let identities = blocking(move || {
            if authorized_only {
                gallery.authorized()
            } else {
                gallery.all()
            }
        })
        .await?;
        let summaries: Vec<IdentitySummary> = identities.iter().map(IdentitySummary::from).collect();
        Ok(json!(summaries).to_string())
    }

    /// Remove an identity and its reference photo.
    async fn remove_identity(&self, identity_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity_id, "remove requested");
        let gallery = Arc::clone(&self.gallery);
        let media = Arc::clone(&self.media);
        let id = identity_id.to_string();
        blocking(move || {
            let removed = gallery.remove(&id)?;
            if removed {
                if let Err(err) = media.remove_reference_photo(&id) {
                    tracing::warn!(identity_id = %id, error = %err, "failed to remove reference photo");
                }
            }
            Ok::<_, vigil_core::GalleryError>(removed)
        })
        .await
    }

    /// Grant or revoke access for an identity.
    async fn set_authorized(&self, identity_id: &str, authorized: bool) -> zbus::fdo::Result<bool> {
        tracing::info!(identity_id, authorized, "authorization change requested");
        let gallery = Arc::clone(&self.gallery);
        let id = identity_id.to_string();
        blocking(move || gallery.set_authorized(&id, authorized)).await
    }

    /// The most recent access attempts, newest first.
    async fn recent_access(&self, limit: u32) -> zbus::fdo::Result<String> {
        let log = Arc::clone(&self.access_log);
        let limit = limit.clamp(1, MAX_LOG_ENTRIES);
        let entries = blocking(move || log.recent(limit)).await?;
        Ok(json!(entries).to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let gallery = Arc::clone(&self.gallery);
        let log = Arc::clone(&self.access_log);
        let (identities, authorized, attempts) = blocking(move || {
            let all = gallery.all()?;
            let authorized = all.iter().filter(|i| i.is_authorized).count();
            let attempts = log.count().map_err(vigil_core::GalleryError::from)?;
            Ok::<_, vigil_core::GalleryError>((all.len(), authorized, attempts))
        })
        .await?;

        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model": self.config.scrfd_model_path(),
            "database": self.config.db_path,
            "media_dir": self.media.root(),
            "identities": identities,
            "authorized": authorized,
            "access_attempts": attempts,
            "identify_threshold": self.config.identify_threshold,
            "duplicate_threshold": self.config.duplicate_threshold,
            "default_location": self.config.default_location,
        })
        .to_string())
    }
}

/// Identity as shown to clients; the descriptor stays inside the daemon.
#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub identity_id: String,
    pub name: String,
    pub category: Category,
    pub authorized: bool,
    pub external_reference: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&EnrolledIdentity> for IdentitySummary {
    fn from(identity: &EnrolledIdentity) -> Self {
        Self {
            identity_id: identity.identity_id.clone(),
            name: identity.display_name.clone(),
            category: identity.category,
            authorized: identity.is_authorized,
            external_reference: identity.external_reference.clone(),
            created_at: identity.created_at,
        }
    }
}

/// Map an enrollment result to its JSON outcome. Infrastructure failures
/// become D-Bus errors.
pub fn enrollment_outcome(
    result: Result<EnrolledIdentity, EngineError>,
) -> Result<Value, zbus::fdo::Error> {
    match result {
        Ok(identity) => Ok(json!({
            "status": "enrolled",
            "identity": IdentitySummary::from(&identity),
        })),
        Err(EngineError::Pipeline(err)) => match err {
            PipelineError::NoFaceDetected => Ok(json!({ "status": "no_face" })),
            PipelineError::CorruptRegion(reason) => {
                Ok(json!({ "status": "corrupt_region", "reason": reason }))
            }
            PipelineError::DuplicateEnrollment {
                identity_id,
                confidence,
            } => Ok(json!({
                "status": "duplicate",
                "identity_id": identity_id,
                "confidence": confidence,
            })),
            PipelineError::DimensionMismatch { expected, actual } => Ok(json!({
                "status": "dimension_mismatch",
                "expected": expected,
                "actual": actual,
            })),
            other => Err(failed(other)),
        },
        Err(err) => Err(failed(err)),
    }
}

/// Map an identification result to its JSON outcome. Infrastructure
/// failures become D-Bus errors.
pub fn identification_outcome(
    result: Result<IdentificationDecision, EngineError>,
) -> Result<Value, zbus::fdo::Error> {
    match result {
        Ok(decision) => Ok(json!({
            "status": if decision.access_granted { "granted" } else { "denied" },
            "identity_id": decision.matched_identity_id,
            "name": decision.matched_name,
            "confidence": decision.confidence,
        })),
        Err(EngineError::Pipeline(err)) => match err {
            PipelineError::NoFaceDetected => Ok(json!({ "status": "no_face" })),
            PipelineError::CorruptRegion(reason) => {
                Ok(json!({ "status": "corrupt_region", "reason": reason }))
            }
            PipelineError::GalleryEmpty => Ok(json!({ "status": "gallery_empty" })),
            PipelineError::InvalidThreshold(t) => Err(zbus::fdo::Error::InvalidArgs(format!(
                "invalid threshold {t}"
            ))),
            other => Err(failed(other)),
        },
        Err(err) => Err(failed(err)),
    }
}

fn failed(err: impl std::fmt::Display) -> zbus::fdo::Error {
    tracing::error!(error = %err, "request failed");
    zbus::fdo::Error::Failed(err.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn read_image(path: &str) -> zbus::fdo::Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        tracing::warn!(path, error = %e, "cannot read image");
        zbus::fdo::Error::InvalidArgs(format!("cannot read {path}: {e}"))
    })
}

/// Run a store call on the blocking pool.
async fn blocking<T, E>(f: impl FnOnce() -> Result<T, E> + Send + 'static) -> zbus::fdo::Result<T>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(failed),
        Err(join) => Err(failed(join)),
    }
}
