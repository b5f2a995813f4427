//! One detection pass: load models, find faces, fit landmarks, derive
//! feature rectangles.
//!
//! Inference runs inside [`CallingRuntime::suspended`], so a foreign
//! runtime that called in can keep its other threads going. Everything the
//! suspended section needs is owned by it; the caller's runtime is only
//! touched again after it has been reacquired.

use crate::config::{ConfigError, DetectorConfig};
use crate::detector::{DetectorError, FaceDetector};
use crate::image_io;
use crate::landmarks::{LandmarkDetector, LandmarkError};
use crate::policy::FeatureExtractionPolicy;
use crate::types::{DetectionResult, FaceResult, LandmarkSet, Rectangle};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    /// Whether the failure is a missing or unusable model artifact.
    pub fn is_model_error(&self) -> bool {
        matches!(self, DetectError::ModelLoad { .. } | DetectError::Config(_))
    }
}

/// The four paths of one call, owned by native code for its duration.
#[derive(Debug, Clone)]
pub struct DetectRequest<P = PathBuf> {
    pub photo: P,
    pub face_config: P,
    pub face_weights: P,
    pub landmark_model: P,
}

impl DetectRequest<PathBuf> {
    pub fn new(
        photo: impl Into<PathBuf>,
        face_config: impl Into<PathBuf>,
        face_weights: impl Into<PathBuf>,
        landmark_model: impl Into<PathBuf>,
    ) -> Self {
        Self {
            photo: photo.into(),
            face_config: face_config.into(),
            face_weights: face_weights.into(),
            landmark_model: landmark_model.into(),
        }
    }
}

/// The runtime that called into native code.
///
/// `suspended` runs `work` with the runtime released and returns once it
/// has been reacquired, whether `work` returns normally or unwinds.
pub trait CallingRuntime {
    fn suspended<T, F>(&self, work: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send;
}

/// No foreign runtime: work runs inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl CallingRuntime for Detached {
    fn suspended<T, F>(&self, work: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        work()
    }
}

pub trait FaceDetect {
    /// Face rectangles in detector order.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Rectangle>, DetectError>;
}

pub trait LandmarkDetect {
    fn detect_landmarks(
        &mut self,
        image: &RgbImage,
        face: &Rectangle,
    ) -> Result<LandmarkSet, DetectError>;
}

/// Source of detector instances and images.
///
/// Instances are built fresh on every call and never shared.
pub trait Backend: Sync {
    type Faces: FaceDetect;
    type Landmarks: LandmarkDetect;

    fn load_models(
        &self,
        face_config: &Path,
        face_weights: &Path,
        landmark_model: &Path,
    ) -> Result<(Self::Faces, Self::Landmarks), DetectError>;

    fn load_image(&self, path: &Path) -> Result<RgbImage, DetectError>;
}

/// SCRFD face detector plus 68-point ONNX landmark model.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxBackend;

/// SCRFD detections as integer rectangles clipped to the photo.
pub struct OnnxFaces(FaceDetector);

pub struct OnnxLandmarks(LandmarkDetector);

impl FaceDetect for OnnxFaces {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Rectangle>, DetectError> {
        let (width, height) = image.dimensions();
        let detections = self
            .0
            .detect(image)
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        Ok(detections.iter().map(|d| d.to_rect(width, height)).collect())
    }
}

impl LandmarkDetect for OnnxLandmarks {
    fn detect_landmarks(
        &mut self,
        image: &RgbImage,
        face: &Rectangle,
    ) -> Result<LandmarkSet, DetectError> {
        self.0
            .detect(image, face)
            .map_err(|e| DetectError::Inference(e.to_string()))
    }
}

impl Backend for OnnxBackend {
    type Faces = OnnxFaces;
    type Landmarks = OnnxLandmarks;

    fn load_models(
        &self,
        face_config: &Path,
        face_weights: &Path,
        landmark_model: &Path,
    ) -> Result<(OnnxFaces, OnnxLandmarks), DetectError> {
        let config = DetectorConfig::load(face_config)?;
        let crop_scale = config.landmark_crop_scale;

        let intra_threads = config.intra_threads;

        let faces = FaceDetector::with_config(face_weights, config).map_err(|e: DetectorError| {
            DetectError::ModelLoad {
                path: face_weights.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        let landmarks = LandmarkDetector::load(landmark_model, crop_scale, intra_threads).map_err(
            |e: LandmarkError| DetectError::ModelLoad {
                path: landmark_model.to_path_buf(),
                reason: e.to_string(),
            },
        )?;

        Ok((OnnxFaces(faces), OnnxLandmarks(landmarks)))
    }

    fn load_image(&self, path: &Path) -> Result<RgbImage, DetectError> {
        image_io::load_rgb(path).map_err(|source| DetectError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A detected face and its landmarks, before feature derivation.
#[derive(Debug, Clone)]
struct RawFace {
    face: Rectangle,
    landmarks: LandmarkSet,
}

fn infer<B, P>(backend: &B, request: &DetectRequest<P>) -> Result<Vec<RawFace>, DetectError>
where
    B: Backend,
    P: AsRef<Path>,
{
    let (mut face_detector, mut landmark_detector) = backend.load_models(
        request.face_config.as_ref(),
        request.face_weights.as_ref(),
        request.landmark_model.as_ref(),
    )?;

    let image = backend.load_image(request.photo.as_ref())?;
    let faces = face_detector.detect_faces(&image)?;

    let mut raw = Vec::with_capacity(faces.len());
    for face in faces {
        let landmarks = landmark_detector.detect_landmarks(&image, &face)?;
        raw.push(RawFace { face, landmarks });
    }
    Ok(raw)
}

fn assemble(raw: Vec<RawFace>, policy: &FeatureExtractionPolicy) -> DetectionResult {
    let faces = raw
        .into_iter()
        .enumerate()
        .map(|(index, RawFace { face, landmarks })| {
            if !landmarks.is_complete() {
                tracing::debug!(index, points = landmarks.len(), "incomplete landmarks, no features");
            }
            FaceResult {
                face,
                features: policy.derive(&landmarks),
            }
        })
        .collect();
    DetectionResult { faces }
}

/// Run one detection pass.
///
/// `request` is consumed inside the suspended section and dropped there on
/// every path, before `runtime` is reacquired. Only a display string of the
/// photo path is kept outside it, for logging. Faces keep detector order;
/// feature rectangles follow `policy` order.
pub fn detect<R, B, P>(
    runtime: &R,
    backend: &B,
    request: DetectRequest<P>,
    policy: &FeatureExtractionPolicy,
) -> Result<DetectionResult, DetectError>
where
    R: CallingRuntime,
    B: Backend,
    P: AsRef<Path> + Send,
{
    let photo = request.photo.as_ref().display().to_string();

    let raw = runtime.suspended(move || {
        let outcome = infer(backend, &request);
        drop(request);
        outcome
    });

    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(%photo, error = %e, "detection failed");
            return Err(e);
        }
    };

    let result = assemble(raw, policy);
    tracing::info!(
        %photo,
        faces = result.len(),
        %policy,
        "detection complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::JsonTree;
    use crate::types::tests::eye_landmarks;
    use crate::types::{Point2D, LANDMARK_COUNT};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Failure {
        Model,
        Image,
        Landmarks,
    }

    /// In-memory backend that asserts it is only used while suspended.
    struct Scripted {
        faces: Vec<Rectangle>,
        landmarks: Vec<LandmarkSet>,
        failure: Option<Failure>,
        suspended: Arc<AtomicBool>,
        images_loaded: AtomicUsize,
    }

    impl Scripted {
        fn new(faces: Vec<Rectangle>, landmarks: Vec<LandmarkSet>) -> Self {
            Self {
                faces,
                landmarks,
                failure: None,
                suspended: Arc::new(AtomicBool::new(false)),
                images_loaded: AtomicUsize::new(0),
            }
        }

        fn failing(failure: Failure) -> Self {
            let mut backend = Self::new(vec![Rectangle::new(0, 0, 10, 10)], vec![LandmarkSet::empty()]);
            backend.failure = Some(failure);
            backend
        }

        fn assert_suspended(&self) {
            assert!(self.suspended.load(Ordering::SeqCst), "native work while runtime held");
        }
    }

    struct ScriptedFaces(Vec<Rectangle>);

    struct ScriptedLandmarks {
        sets: std::vec::IntoIter<LandmarkSet>,
        fail: bool,
    }

    impl FaceDetect for ScriptedFaces {
        fn detect_faces(&mut self, _: &RgbImage) -> Result<Vec<Rectangle>, DetectError> {
            Ok(self.0.clone())
        }
    }

    impl LandmarkDetect for ScriptedLandmarks {
        fn detect_landmarks(&mut self, _: &RgbImage, _: &Rectangle) -> Result<LandmarkSet, DetectError> {
            if self.fail {
                return Err(DetectError::Inference("landmark session crashed".into()));
            }
            Ok(self.sets.next().unwrap_or_default())
        }
    }

    impl Backend for Scripted {
        type Faces = ScriptedFaces;
        type Landmarks = ScriptedLandmarks;

        fn load_models(
            &self,
            _: &Path,
            _: &Path,
            landmark_model: &Path,
        ) -> Result<(ScriptedFaces, ScriptedLandmarks), DetectError> {
            self.assert_suspended();
            if self.failure == Some(Failure::Model) {
                return Err(DetectError::ModelLoad {
                    path: landmark_model.to_path_buf(),
                    reason: "file not found".into(),
                });
            }
            Ok((
                ScriptedFaces(self.faces.clone()),
                ScriptedLandmarks {
                    sets: self.landmarks.clone().into_iter(),
                    fail: self.failure == Some(Failure::Landmarks),
                },
            ))
        }

        fn load_image(&self, path: &Path) -> Result<RgbImage, DetectError> {
            self.assert_suspended();
            self.images_loaded.fetch_add(1, Ordering::SeqCst);
            if self.failure == Some(Failure::Image) {
                return Err(DetectError::ImageLoad {
                    path: path.to_path_buf(),
                    source: image::ImageError::IoError(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no such photo",
                    )),
                });
            }
            Ok(RgbImage::new(1, 1))
        }
    }

    /// Tracks the suspended state and samples live path buffers at resume.
    struct Recording {
        suspended: Arc<AtomicBool>,
        live_paths: Option<Arc<AtomicUsize>>,
        live_at_resume: Mutex<Vec<usize>>,
        entries: AtomicUsize,
    }

    impl Recording {
        fn new(backend: &Scripted) -> Self {
            Self {
                suspended: backend.suspended.clone(),
                live_paths: None,
                live_at_resume: Mutex::new(Vec::new()),
                entries: AtomicUsize::new(0),
            }
        }
    }

    struct Resume<'a>(&'a Recording);

    impl Drop for Resume<'_> {
        fn drop(&mut self) {
            if let Some(live) = &self.0.live_paths {
                self.0.live_at_resume.lock().unwrap().push(live.load(Ordering::SeqCst));
            }
            self.0.suspended.store(false, Ordering::SeqCst);
        }
    }

    impl CallingRuntime for Recording {
        fn suspended<T, F>(&self, work: F) -> T
        where
            F: FnOnce() -> T + Send,
            T: Send,
        {
            assert!(!self.suspended.swap(true, Ordering::SeqCst), "nested suspension");
            self.entries.fetch_add(1, Ordering::SeqCst);
            let _resume = Resume(self);
            work()
        }
    }

    /// Path buffer that counts live instances.
    struct TrackedPath {
        path: PathBuf,
        live: Arc<AtomicUsize>,
    }

    impl TrackedPath {
        fn new(path: &str, live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self {
                path: PathBuf::from(path),
                live: live.clone(),
            }
        }
    }

    impl Drop for TrackedPath {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl AsRef<Path> for TrackedPath {
        fn as_ref(&self) -> &Path {
            &self.path
        }
    }

    fn tracked_request(live: &Arc<AtomicUsize>) -> DetectRequest<TrackedPath> {
        DetectRequest {
            photo: TrackedPath::new("photo.jpg", live),
            face_config: TrackedPath::new("face.toml", live),
            face_weights: TrackedPath::new("det_10g.onnx", live),
            landmark_model: TrackedPath::new("landmarks_68.onnx", live),
        }
    }

    fn request() -> DetectRequest {
        DetectRequest::new("photo.jpg", "face.toml", "det_10g.onnx", "landmarks_68.onnx")
    }

    fn run(backend: &Scripted, policy: &FeatureExtractionPolicy) -> Result<DetectionResult, DetectError> {
        let runtime = Recording::new(backend);
        let result = detect(&runtime, backend, request(), policy);
        assert_eq!(runtime.entries.load(Ordering::SeqCst), 1);
        assert!(!backend.suspended.load(Ordering::SeqCst), "runtime not reacquired");
        result
    }

    #[test]
    fn test_zero_faces_is_empty_result() {
        let backend = Scripted::new(vec![], vec![]);
        let result = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.marshal(&mut JsonTree).unwrap(), serde_json::json!([]));
    }

    #[test]
    fn test_failed_landmarks_keep_face_without_features() {
        let face = Rectangle::new(40, 50, 120, 130);
        let backend = Scripted::new(vec![face], vec![LandmarkSet::empty()]);
        let result = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap();
        assert_eq!(result.faces, vec![FaceResult { face, features: vec![] }]);
    }

    #[test]
    fn test_wrong_landmark_counts_skip_features() {
        for len in [0usize, 67, 69] {
            let face = Rectangle::new(1, 2, 3, 4);
            let set = LandmarkSet::new(vec![Point2D::new(5.0, 5.0); len]);
            let backend = Scripted::new(vec![face], vec![set]);
            let result = run(&backend, &FeatureExtractionPolicy::brows_and_lips()).unwrap();
            assert_eq!(result.len(), 1);
            assert!(result.faces[0].features.is_empty(), "len {len}");
        }
    }

    #[test]
    fn test_eye_rectangles_for_complete_face() {
        let face = Rectangle::new(80, 60, 180, 160);
        let backend = Scripted::new(vec![face], vec![eye_landmarks()]);
        let result = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap();
        assert_eq!(
            result.faces,
            vec![FaceResult {
                face,
                features: vec![Rectangle::new(100, 100, 20, 10), Rectangle::new(180, 90, 60, 30)],
            }]
        );
    }

    #[test]
    fn test_detector_order_preserved() {
        let faces: Vec<Rectangle> = (0..5).map(|i| Rectangle::new(i * 100, 10, 50, 60)).collect();
        let landmarks = vec![
            eye_landmarks(),
            LandmarkSet::empty(),
            eye_landmarks(),
            LandmarkSet::new(vec![Point2D::new(0.0, 0.0); LANDMARK_COUNT - 1]),
            eye_landmarks(),
        ];
        let backend = Scripted::new(faces.clone(), landmarks);
        let result = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap();

        let got: Vec<Rectangle> = result.faces.iter().map(|f| f.face).collect();
        assert_eq!(got, faces);
        let feature_counts: Vec<usize> = result.faces.iter().map(|f| f.features.len()).collect();
        assert_eq!(feature_counts, vec![2, 0, 2, 0, 2]);
    }

    #[test]
    fn test_two_faces_not_reversed() {
        let face_a = Rectangle::new(10, 10, 40, 40);
        let face_b = Rectangle::new(300, 10, 40, 40);
        let backend = Scripted::new(vec![face_a, face_b], vec![LandmarkSet::empty(), LandmarkSet::empty()]);
        let value = run(&backend, &FeatureExtractionPolicy::eyes())
            .unwrap()
            .marshal(&mut JsonTree)
            .unwrap();
        assert_eq!(
            value,
            serde_json::json!([[[10, 10, 40, 40], []], [[300, 10, 40, 40], []]])
        );
    }

    #[test]
    fn test_image_failure_is_fatal() {
        let backend = Scripted::failing(Failure::Image);
        let err = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap_err();
        assert!(matches!(err, DetectError::ImageLoad { .. }), "{err}");
        assert!(!err.is_model_error());
    }

    #[test]
    fn test_model_failure_precedes_image_work() {
        let backend = Scripted::failing(Failure::Model);
        let err = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap_err();
        assert!(err.is_model_error());
        assert_eq!(backend.images_loaded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_landmark_inference_failure_is_fatal() {
        let backend = Scripted::failing(Failure::Landmarks);
        let err = run(&backend, &FeatureExtractionPolicy::eyes()).unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }

    #[test]
    fn test_path_buffers_released_on_failure() {
        let live = Arc::new(AtomicUsize::new(0));
        let backend = Scripted::failing(Failure::Image);
        let mut runtime = Recording::new(&backend);
        runtime.live_paths = Some(live.clone());

        for _ in 0..100 {
            let request = tracked_request(&live);
            assert_eq!(live.load(Ordering::SeqCst), 4);
            let err = detect(&runtime, &backend, request, &FeatureExtractionPolicy::eyes()).unwrap_err();
            assert!(matches!(err, DetectError::ImageLoad { .. }));
            assert_eq!(live.load(Ordering::SeqCst), 0);
        }
        // Released inside the suspended section, before every resume.
        let samples = runtime.live_at_resume.lock().unwrap();
        assert_eq!(samples.len(), 100);
        assert!(samples.iter().all(|&n| n == 0));
    }

    #[test]
    fn test_path_buffers_released_on_success() {
        let live = Arc::new(AtomicUsize::new(0));
        let backend = Scripted::new(vec![Rectangle::new(0, 0, 5, 5)], vec![eye_landmarks()]);
        let mut runtime = Recording::new(&backend);
        runtime.live_paths = Some(live.clone());

        let result = detect(&runtime, &backend, tracked_request(&live), &FeatureExtractionPolicy::eyes());
        assert!(result.is_ok());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(*runtime.live_at_resume.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_detached_runtime_runs_inline() {
        let caller = std::thread::current().id();
        assert_eq!(Detached.suspended(|| std::thread::current().id()), caller);
    }

    #[test]
    fn test_onnx_backend_reports_invalid_config_as_config_error() {
        let config = std::env::temp_dir().join(format!("faces-core-pipeline-{}-bad.toml", std::process::id()));
        std::fs::write(&config, "input_size = 500\n").unwrap();
        let err = detect(
            &Detached,
            &OnnxBackend,
            DetectRequest::new(
                "/nonexistent/photo.jpg",
                &config,
                "/nonexistent/det_10g.onnx",
                "/nonexistent/landmarks_68.onnx",
            ),
            &FeatureExtractionPolicy::default(),
        )
        .unwrap_err();
        std::fs::remove_file(&config).unwrap();
        assert!(matches!(err, DetectError::Config(ConfigError::Invalid(_))), "{err}");
        assert!(err.is_model_error());
    }

    #[test]
    fn test_onnx_backend_reports_missing_weights_as_model_load() {
        let config = std::env::temp_dir().join(format!("faces-core-pipeline-{}-ok.toml", std::process::id()));
        std::fs::write(&config, "intra_threads = 3\n").unwrap();
        let err = OnnxBackend
            .load_models(
                &config,
                Path::new("/nonexistent/det_10g.onnx"),
                Path::new("/nonexistent/landmarks_68.onnx"),
            )
            .err()
            .unwrap();
        std::fs::remove_file(&config).unwrap();
        match err {
            DetectError::ModelLoad { path, .. } => assert_eq!(path, Path::new("/nonexistent/det_10g.onnx")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_onnx_backend_reports_missing_config_as_model_error() {
        let err = detect(
            &Detached,
            &OnnxBackend,
            DetectRequest::new(
                "/nonexistent/photo.jpg",
                "/nonexistent/face.toml",
                "/nonexistent/det_10g.onnx",
                "/nonexistent/landmarks_68.onnx",
            ),
            &FeatureExtractionPolicy::default(),
        )
        .unwrap_err();
        assert!(err.is_model_error(), "{err}");
    }
}
