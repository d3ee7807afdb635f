//! Face descriptor value type and its JSON wire form.
//!
//! A descriptor is a non-empty, finite, L2-normalized `f32` vector. It is
//! serialized as a bare JSON array so the persistence layer can store it as
//! text and read it back without loss.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor has no components")]
    Empty,
    #[error("descriptor component {index} is not finite")]
    NonFinite { index: usize },
    #[error("descriptor has zero norm")]
    ZeroNorm,
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid descriptor json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fixed-length face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Wrap already-normalized values, validating that they are usable.
    ///
    /// Values are taken as-is: stored descriptors are kept bit-exact rather
    /// than renormalized on every load.
    pub fn from_values(values: Vec<f32>) -> Result<Self, DescriptorError> {
        validate(&values)?;
        if norm(&values) == 0.0 {
            return Err(DescriptorError::ZeroNorm);
        }
        Ok(Self { values })
    }

    /// L2-normalize `values` into a descriptor.
    pub fn normalized(values: Vec<f32>) -> Result<Self, DescriptorError> {
        validate(&values)?;
        let n = norm(&values);
        if n == 0.0 {
            return Err(DescriptorError::ZeroNorm);
        }
        Ok(Self {
            values: values.into_iter().map(|v| v / n).collect(),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        norm(&self.values)
    }

    /// Euclidean distance to `other`, or `DimensionMismatch`.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, DescriptorError> {
        if self.dim() != other.dim() {
            return Err(DescriptorError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Euclidean distance divided by `sqrt(dim)`.
    ///
    /// Dividing by the square root of the dimension keeps acceptance
    /// thresholds meaningful when the feature set changes length.
    pub fn normalized_distance(&self, other: &Descriptor) -> Result<f32, DescriptorError> {
        let d = self.euclidean_distance(other)?;
        Ok(d / (self.dim() as f32).sqrt())
    }

    /// Encode as a JSON array of numbers.
    pub fn to_json(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(&self.values)?)
    }

    /// Decode a JSON array produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        let values: Vec<f32> = serde_json::from_str(json)?;
        Self::from_values(values)
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_values(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.values
    }
}

fn validate(values: &[f32]) -> Result<(), DescriptorError> {
    if values.is_empty() {
        return Err(DescriptorError::Empty);
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(DescriptorError::NonFinite { index });
    }
    Ok(())
}

fn norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}
