use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_imaging::{Frame, Rect};

use crate::descriptor::Descriptor;

/// Raw detector output in frame coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// The face chosen by the locator: padded rectangle plus the grayscale patch
/// cut from it, already resampled to the canonical size.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub rect: Rect,
    pub patch: Frame,
    /// Detector score of the chosen candidate.
    pub score: f32,
}

#[derive(Error, Debug)]
#[error("unknown category '{0}' (expected resident, visitor, employee, delivery or unknown)")]
pub struct UnknownCategory(pub String);

/// Kind of person an identity was enrolled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Resident,
    Visitor,
    Employee,
    Delivery,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Resident => "resident",
            Category::Visitor => "visitor",
            Category::Employee => "employee",
            Category::Delivery => "delivery",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resident" => Ok(Category::Resident),
            "visitor" => Ok(Category::Visitor),
            "employee" => Ok(Category::Employee),
            "delivery" => Ok(Category::Delivery),
            "unknown" => Ok(Category::Unknown),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// An enrolled person: descriptor plus the metadata the access workflow needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub identity_id: String,
    pub descriptor: Descriptor,
    pub display_name: String,
    pub category: Category,
    pub is_authorized: bool,
    /// Opaque link to a record owned elsewhere (e.g. a resident account).
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One accepted comparison between a query and a gallery entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub identity_id: String,
    /// Normalized Euclidean distance.
    pub distance: f32,
    /// `max(0, (1 - distance) * 100)`.
    pub confidence: f32,
}

/// Terminal output of the identification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationDecision {
    pub matched_identity_id: Option<String>,
    pub matched_name: Option<String>,
    pub confidence: f32,
    pub access_granted: bool,
}

impl IdentificationDecision {
    pub fn no_match() -> Self {
        Self {
            matched_identity_id: None,
            matched_name: None,
            confidence: 0.0,
            access_granted: false,
        }
    }
}

/// Record handed to the access-log sink after every identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub matched_identity_id: Option<String>,
    /// Display name of the match, or "Unknown".
    pub detected_name: String,
    pub confidence: f32,
    pub access_granted: bool,
    pub location: String,
    pub image_reference: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_roundtrip() {
        for c in [
            Category::Resident,
            Category::Visitor,
            Category::Employee,
            Category::Delivery,
            Category::Unknown,
        ] {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert_eq!(" Resident ".parse::<Category>().unwrap(), Category::Resident);
    }

    #[test]
    fn test_category_rejects_unknown_value() {
        let err = "landlord".parse::<Category>().unwrap_err();
        assert_eq!(err.0, "landlord");
    }

    #[test]
    fn test_category_serde_lowercase() {
        let json = serde_json::to_string(&Category::Delivery).unwrap();
        assert_eq!(json, "\"delivery\"");
    }

    #[test]
    fn test_bounding_box_area_ignores_negative_extent() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: -5.0, height: 10.0, confidence: 0.9 };
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn test_no_match_decision() {
        let d = IdentificationDecision::no_match();
        assert!(d.matched_identity_id.is_none());
        assert!(!d.access_granted);
        assert_eq!(d.confidence, 0.0);
    }
}
