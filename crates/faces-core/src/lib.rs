//! faces-core — Facial region extraction engine.
//!
//! Finds faces with SCRFD, fits 68-point landmarks to each face, and derives
//! eye, eyebrow and lip rectangles from landmark ranges. Inference runs via
//! ONNX Runtime; the pipeline is generic over the detectors and over the
//! foreign runtime that calls it.

pub mod config;
pub mod detector;
pub mod image_io;
pub mod landmarks;
pub mod marshal;
pub mod pipeline;
pub mod policy;
pub mod types;

pub use config::{ConfigError, DetectorConfig};
pub use marshal::{JsonTree, TreeBuilder};
pub use pipeline::{
    detect, Backend, CallingRuntime, DetectError, DetectRequest, Detached, FaceDetect,
    LandmarkDetect, OnnxBackend,
};
pub use policy::{FeatureExtractionPolicy, FeatureSpec, Padding, PolicyError};
pub use types::{
    padded_extent, plain_extent, DetectionResult, FaceResult, LandmarkRange, LandmarkSet,
    Point2D, RangeError, Rectangle, LANDMARK_COUNT,
};
