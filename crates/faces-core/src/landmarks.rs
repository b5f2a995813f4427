//! 68-point facial landmark regression via ONNX Runtime.
//!
//! Each face box is grown into a square crop, resized to the model input,
//! and regressed to 136 values: (x, y) pairs normalized to the crop.

use crate::image_io;
use crate::types::{LandmarkSet, Point2D, Rectangle, LANDMARK_COUNT};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 255.0;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pixel region of the photo fed to the landmark model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crop {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Crop {
    /// Square around the face center with side `scale * max(w, h)`,
    /// clipped to the photo. `None` if nothing of it lies on the photo.
    fn around(face: &Rectangle, scale: f32, image_width: u32, image_height: u32) -> Option<Self> {
        let side = face.width.max(face.height) as f32 * scale;
        if side.is_nan() || side < 1.0 {
            return None;
        }
        let cx = face.x as f32 + face.width as f32 / 2.0;
        let cy = face.y as f32 + face.height as f32 / 2.0;

        let x1 = (cx - side / 2.0).round().max(0.0);
        let y1 = (cy - side / 2.0).round().max(0.0);
        let x2 = (cx + side / 2.0).round().min(image_width as f32);
        let y2 = (cy + side / 2.0).round().min(image_height as f32);
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            return None;
        }
        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    /// Map model output (crop-normalized pairs) back to photo coordinates.
    fn decode(&self, raw: &[f32]) -> LandmarkSet {
        LandmarkSet::new(
            raw.chunks_exact(2)
                .map(|xy| {
                    Point2D::new(
                        self.x as f32 + xy[0] * self.width as f32,
                        self.y as f32 + xy[1] * self.height as f32,
                    )
                })
                .collect(),
        )
    }
}

pub struct LandmarkDetector {
    session: Session,
    crop_scale: f32,
}

impl LandmarkDetector {
    /// Load the landmark ONNX model from the given path.
    pub fn load(model_path: &Path, crop_scale: f32, intra_threads: usize) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            intra_threads,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session, crop_scale })
    }

    /// Fit landmarks to one face.
    ///
    /// A face whose crop misses the photo gets an empty set; an unexpected
    /// output length is passed through as-is. Neither is an error.
    pub fn detect(&mut self, image: &RgbImage, face: &Rectangle) -> Result<LandmarkSet, LandmarkError> {
        let (width, height) = image.dimensions();
        let Some(crop) = Crop::around(face, self.crop_scale, width, height) else {
            tracing::debug!(?face, "face crop lies outside the photo");
            return Ok(LandmarkSet::empty());
        };

        let input = preprocess(image, &crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        if raw.len() != LANDMARK_COUNT * 2 {
            tracing::warn!(
                expected = LANDMARK_COUNT * 2,
                got = raw.len(),
                "landmark model returned an unexpected number of values"
            );
        }
        Ok(crop.decode(raw))
    }
}

fn preprocess(image: &RgbImage, crop: &Crop) -> ndarray::Array4<f32> {
    let patch = imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height).to_image();
    let resized = imageops::resize(
        &patch,
        LANDMARK_INPUT_SIZE as u32,
        LANDMARK_INPUT_SIZE as u32,
        FilterType::Triangle,
    );
    let mut tensor = image_io::nchw_filled(LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE, 0.0);
    image_io::write_nchw(&mut tensor, &resized, 0, 0, LANDMARK_MEAN, LANDMARK_STD);
    tensor
}
