//! Gallery of enrolled identities.
//!
//! [`Gallery`] is the seam to whatever persists identities. All methods take
//! `&self`; implementations serialize their own writes and hand out owned
//! snapshots, so a scan in progress never observes a half-applied change.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::types::EnrolledIdentity;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("descriptor dimension mismatch: gallery uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("identity {0} already exists")]
    DuplicateId(String),
    #[error("gallery backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub trait Gallery: Send + Sync {
    /// Insert a new identity.
    fn add(&self, identity: EnrolledIdentity) -> Result<(), GalleryError>;

    /// Delete an identity. Returns `false` when the id was not present.
    fn remove(&self, identity_id: &str) -> Result<bool, GalleryError>;

    /// Every enrolled identity, in enrollment order.
    fn all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError>;

    /// Identities currently allowed to be granted access.
    fn authorized(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|identity| identity.is_authorized)
            .collect())
    }

    /// Flip the authorization flag. Returns `false` when the id was not present.
    fn set_authorized(&self, identity_id: &str, authorized: bool) -> Result<bool, GalleryError>;

    fn get(&self, identity_id: &str) -> Result<Option<EnrolledIdentity>, GalleryError> {
        Ok(self
            .all()?
            .into_iter()
            .find(|identity| identity.identity_id == identity_id))
    }
}

/// Check `identity` against the entries already present: unique id, same
/// descriptor dimension as everyone else.
pub fn check_insert(
    existing: &[EnrolledIdentity],
    identity: &EnrolledIdentity,
) -> Result<(), GalleryError> {
    if let Some(first) = existing.first() {
        let expected = first.descriptor.dim();
        let actual = identity.descriptor.dim();
        if expected != actual {
            return Err(GalleryError::DimensionMismatch { expected, actual });
        }
    }
    if existing
        .iter()
        .any(|e| e.identity_id == identity.identity_id)
    {
        return Err(GalleryError::DuplicateId(identity.identity_id.clone()));
    }
    Ok(())
}

/// In-memory gallery with copy-on-write snapshots.
///
/// Writers build a new vector and swap the `Arc`; readers clone the `Arc`
/// and scan it without holding the lock.
#[derive(Default)]
pub struct MemoryGallery {
    entries: RwLock<Arc<Vec<EnrolledIdentity>>>,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Later writes do not affect it.
    pub fn snapshot(&self) -> Arc<Vec<EnrolledIdentity>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut Vec<EnrolledIdentity>) -> Result<T, GalleryError>,
    ) -> Result<T, GalleryError> {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }
}

impl Gallery for MemoryGallery {
    fn add(&self, identity: EnrolledIdentity) -> Result<(), GalleryError> {
        self.update(|entries| {
            check_insert(entries, &identity)?;
            tracing::debug!(identity_id = %identity.identity_id, "identity added to memory gallery");
            entries.push(identity);
            Ok(())
        })
    }

    fn remove(&self, identity_id: &str) -> Result<bool, GalleryError> {
        if !self.snapshot().iter().any(|e| e.identity_id == identity_id) {
            return Ok(false);
        }
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| e.identity_id != identity_id);
            Ok(entries.len() != before)
        })
    }

    fn all(&self) -> Result<Vec<EnrolledIdentity>, GalleryError> {
        Ok(self.snapshot().to_vec())
    }

    fn set_authorized(&self, identity_id: &str, authorized: bool) -> Result<bool, GalleryError> {
        self.update(|entries| {
            Ok(match entries.iter_mut().find(|e| e.identity_id == identity_id) {
                Some(entry) => {
                    entry.is_authorized = authorized;
                    true
                }
                None => false,
            })
        })
    }
}
