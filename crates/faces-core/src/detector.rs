//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the photo into the square SCRFD input, decodes the three
//! anchor-free stride heads, and suppresses overlapping boxes. Only the
//! score and box heads are read; facial keypoints come from the 68-point
//! landmark model instead.

use crate::config::DetectorConfig;
use crate::image_io;
use crate::types::Rectangle;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_MIN_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector weights not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A scored face box in original image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

impl Detection {
    /// Clip to the image bounds and round to an integer rectangle.
    pub fn to_rect(&self, image_width: u32, image_height: u32) -> Rectangle {
        let x1 = self.x.clamp(0.0, image_width as f32);
        let y1 = self.y.clamp(0.0, image_height as f32);
        let x2 = (self.x + self.width).clamp(0.0, image_width as f32);
        let y2 = (self.y + self.height).clamp(0.0, image_height as f32);
        Rectangle::from_f32(x1, y1, x2 - x1, y2 - y1)
    }
}

/// Mapping from letterboxed input space back to the photo.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    new_w: usize,
    new_h: usize,
    pad_x: usize,
    pad_y: usize,
}

impl Letterbox {
    fn fit(width: u32, height: u32, input_size: usize) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, input_size);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, input_size);
        Self {
            scale,
            new_w,
            new_h,
            pad_x: (input_size - new_w) / 2,
            pad_y: (input_size - new_h) / 2,
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

pub struct FaceDetector {
    session: Session,
    config: DetectorConfig,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD weights, tuned by an already validated config.
    pub fn with_config(weights_path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !weights_path.exists() {
            return Err(DetectorError::ModelNotFound(weights_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(weights_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %weights_path.display(),
            outputs = ?output_names,
            input_size = config.input_size,
            "loaded SCRFD model"
        );

        if output_names.len() < SCRFD_MIN_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            config,
            stride_indices,
        })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let input_size = self.config.input_size;
        let letterbox = Letterbox::fit(width, height, input_size);
        let input = preprocess(image, &letterbox, input_size);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                input_size,
                &letterbox,
                self.config.confidence_threshold,
            ));
        }

        let mut faces = nms(candidates, self.config.nms_threshold);
        if let Some(max) = self.config.max_faces {
            faces.truncate(max);
        }

        tracing::debug!(faces = faces.len(), width, height, "SCRFD detection done");
        Ok(faces)
    }
}

/// Resize into the letterbox and normalize; padding normalizes to 0.0.
fn preprocess(image: &RgbImage, letterbox: &Letterbox, input_size: usize) -> ndarray::Array4<f32> {
    let resized = imageops::resize(
        image,
        letterbox.new_w as u32,
        letterbox.new_h as u32,
        FilterType::Triangle,
    );

    let mut tensor = image_io::nchw_filled(input_size, input_size, 0.0);
    image_io::write_nchw(
        &mut tensor,
        &resized,
        letterbox.pad_x,
        letterbox.pad_y,
        SCRFD_MEAN,
        SCRFD_STD,
    );
    tensor
}

/// Map output names to stride slots.
///
/// Accepts exports that name tensors "score_8" / "bbox_8" and so on, in any
/// order. Anything else falls back to the standard positional layout
/// [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[slot] = (score, bbox),
            _ => {
                tracing::info!(
                    ?names,
                    "SCRFD: output names not recognized, using positional mapping"
                );
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
        let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

        detections.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
        });
    }
    detections
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
