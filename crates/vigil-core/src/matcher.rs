use crate::descriptor::Descriptor;
use crate::types::{EnrolledIdentity, MatchCandidate};

/// Normalized distance between two descriptors; `INFINITY` when their
/// dimensions differ so that a mismatched entry can never be accepted.
pub fn normalized_distance(query: &Descriptor, candidate: &Descriptor) -> f32 {
    query
        .normalized_distance(candidate)
        .unwrap_or(f32::INFINITY)
}

/// Map a normalized distance to a 0–100 confidence score.
pub fn confidence(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

/// Strategy for comparing a query descriptor against gallery entries.
pub trait Matcher {
    /// Every candidate with `distance <= threshold`, in gallery order.
    fn accepted(
        &self,
        query: &Descriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> Vec<MatchCandidate>;

    /// The closest accepted candidate, or `None`.
    ///
    /// Ties on distance keep the candidate that comes first in `candidates`.
    fn best_match(
        &self,
        query: &Descriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> Option<MatchCandidate> {
        let mut best: Option<MatchCandidate> = None;
        for candidate in self.accepted(query, candidates, threshold) {
            if best.as_ref().map_or(true, |b| candidate.distance < b.distance) {
                best = Some(candidate);
            }
        }
        best
    }
}

/// Linear-scan matcher on normalized Euclidean distance.
///
/// Scans the whole candidate list; a dimension mismatch rejects that entry
/// and the scan carries on.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn accepted(
        &self,
        query: &Descriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> Vec<MatchCandidate> {
        let mut accepted = Vec::new();
        for identity in candidates {
            if identity.descriptor.dim() != query.dim() {
                tracing::warn!(
                    identity_id = %identity.identity_id,
                    expected = query.dim(),
                    actual = identity.descriptor.dim(),
                    "descriptor dimension mismatch; skipping candidate"
                );
                continue;
            }

            let distance = normalized_distance(query, &identity.descriptor);
            let confidence = confidence(distance);
            tracing::debug!(
                identity_id = %identity.identity_id,
                name = %identity.display_name,
                distance,
                confidence,
                "compared candidate"
            );

            if distance <= threshold {
                accepted.push(MatchCandidate {
                    identity_id: identity.identity_id.clone(),
                    distance,
                    confidence,
                });
            }
        }
        accepted
    }
}
