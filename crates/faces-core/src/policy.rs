//! Which feature rectangles a face carries, and how each is derived.

use crate::types::{padded_extent, plain_extent, LandmarkRange, LandmarkSet, Rectangle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown feature policy '{0}' (expected 'eyes' or 'brows-and-lips')")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    None,
    /// Expand by the raw width and height on every side.
    Symmetric,
}

/// One feature rectangle: a named landmark range and its derivation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub range: LandmarkRange,
    #[serde(default)]
    pub padding: Padding,
}

impl FeatureSpec {
    pub fn new(name: &str, range: LandmarkRange, padding: Padding) -> Self {
        Self {
            name: name.to_string(),
            range,
            padding,
        }
    }

    fn derive(&self, landmarks: &LandmarkSet) -> Option<Rectangle> {
        match self.padding {
            Padding::None => plain_extent(landmarks, self.range),
            Padding::Symmetric => padded_extent(landmarks, self.range),
        }
    }
}

/// Ordered set of feature rectangles to derive per face.
///
/// Output order follows `features`, so position identifies the feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureExtractionPolicy {
    pub features: Vec<FeatureSpec>,
}

impl FeatureExtractionPolicy {
    pub const EYES: &'static str = "eyes";
    pub const BROWS_AND_LIPS: &'static str = "brows-and-lips";

    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self { features }
    }

    /// Left eye as a plain box, right eye padded.
    pub fn eyes() -> Self {
        Self::new(vec![
            FeatureSpec::new("left_eye", LandmarkRange::LEFT_EYE, Padding::None),
            FeatureSpec::new("right_eye", LandmarkRange::RIGHT_EYE, Padding::Symmetric),
        ])
    }

    /// Both eyebrows and the outer lip contour, all plain boxes.
    pub fn brows_and_lips() -> Self {
        Self::new(vec![
            FeatureSpec::new("left_eyebrow", LandmarkRange::LEFT_EYEBROW, Padding::None),
            FeatureSpec::new("right_eyebrow", LandmarkRange::RIGHT_EYEBROW, Padding::None),
            FeatureSpec::new("outer_lip", LandmarkRange::OUTER_LIP, Padding::None),
        ])
    }

    /// Feature rectangles for one face; empty unless the landmark set is complete.
    pub fn derive(&self, landmarks: &LandmarkSet) -> Vec<Rectangle> {
        if !landmarks.is_complete() {
            return Vec::new();
        }
        self.features
            .iter()
            .filter_map(|spec| spec.derive(landmarks))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }
}

impl Default for FeatureExtractionPolicy {
    fn default() -> Self {
        Self::eyes()
    }
}

impl FromStr for FeatureExtractionPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            Self::EYES => Ok(Self::eyes()),
            Self::BROWS_AND_LIPS | "brows_and_lips" => Ok(Self::brows_and_lips()),
            _ => Err(PolicyError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for FeatureExtractionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::eyes() {
            return f.write_str(Self::EYES);
        }
        if *self == Self::brows_and_lips() {
            return f.write_str(Self::BROWS_AND_LIPS);
        }
        let names: Vec<&str> = self.names().collect();
        write!(f, "custom[{}]", names.join(","))
    }
}
