//! hera_faces — Python extension for facial region extraction.
//!
//! Python is the calling runtime. Path arguments are copied into Rust-owned
//! buffers, the GIL is released for model loading and inference, and the
//! nested result is built with Python allocations only after the GIL is
//! held again.
//!
//! ```python
//! import hera_faces
//! faces = hera_faces.detect("photo.jpg", "face.toml", "det_10g.onnx", "landmarks_68.onnx")
//! for (x, y, w, h), features in faces:
//!     ...
//! ```

use faces_core::{
    CallingRuntime, DetectError, DetectRequest, FeatureExtractionPolicy, OnnxBackend, TreeBuilder,
};
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyList, PyTuple};
use std::path::PathBuf;

create_exception!(hera_faces, FaceRoiError, PyException, "Base class for hera_faces errors.");
create_exception!(hera_faces, ImageLoadError, FaceRoiError, "The photo could not be read or decoded.");
create_exception!(hera_faces, ModelLoadError, FaceRoiError, "A model or detector config could not be loaded.");
create_exception!(hera_faces, InferenceError, FaceRoiError, "A detector failed while running.");

/// The interpreter that called in, held through its GIL token.
struct Interpreter<'py>(Python<'py>);

impl CallingRuntime for Interpreter<'_> {
    fn suspended<T, F>(&self, work: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        // The GIL is reacquired when this returns or unwinds.
        self.0.allow_threads(work)
    }
}

/// Builds the wire shape out of Python ints, tuples and lists.
struct PyTree<'py>(Python<'py>);

impl<'py> TreeBuilder for PyTree<'py> {
    type Node = Bound<'py, PyAny>;
    type Error = PyErr;

    fn int(&mut self, value: isize) -> PyResult<Self::Node> {
        match value.into_pyobject(self.0) {
            Ok(int) => Ok(int.into_any()),
            Err(never) => match never {},
        }
    }

    fn tuple(&mut self, items: Vec<Self::Node>) -> PyResult<Self::Node> {
        Ok(PyTuple::new(self.0, items)?.into_any())
    }

    fn list(&mut self, items: Vec<Self::Node>) -> PyResult<Self::Node> {
        Ok(PyList::new(self.0, items)?.into_any())
    }
}

/// Which exception class a [`DetectError`] surfaces as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    ImageLoad,
    ModelLoad,
    Inference,
}

fn error_kind(err: &DetectError) -> ErrorKind {
    match err {
        DetectError::ImageLoad { .. } => ErrorKind::ImageLoad,
        DetectError::ModelLoad { .. } | DetectError::Config(_) => ErrorKind::ModelLoad,
        DetectError::Inference(_) => ErrorKind::Inference,
    }
}

fn to_py_err(err: DetectError) -> PyErr {
    let message = err.to_string();
    match error_kind(&err) {
        ErrorKind::ImageLoad => ImageLoadError::new_err(message),
        ErrorKind::ModelLoad => ModelLoadError::new_err(message),
        ErrorKind::Inference => InferenceError::new_err(message),
    }
}

fn run<'py>(
    py: Python<'py>,
    request: DetectRequest,
    policy: &FeatureExtractionPolicy,
) -> PyResult<Bound<'py, PyAny>> {
    let result = faces_core::detect(&Interpreter(py), &OnnxBackend, request, policy).map_err(to_py_err)?;
    result.marshal(&mut PyTree(py))
}

/// Detect faces and their feature rectangles in one photo.
///
/// Returns `[((x, y, w, h), [(x, y, w, h), ...]), ...]` in detector order.
/// `policy` selects the feature rectangles: "eyes" (left eye, padded right
/// eye) or "brows-and-lips" (left eyebrow, right eyebrow, outer lip).
#[pyfunction]
#[pyo3(signature = (photo_path, face_config_path, face_weights_path, eyes_model_path, policy = FeatureExtractionPolicy::EYES))]
fn detect<'py>(
    py: Python<'py>,
    photo_path: PathBuf,
    face_config_path: PathBuf,
    face_weights_path: PathBuf,
    eyes_model_path: PathBuf,
    policy: &str,
) -> PyResult<Bound<'py, PyAny>> {
    let policy: FeatureExtractionPolicy = policy
        .parse()
        .map_err(|e: faces_core::PolicyError| PyValueError::new_err(e.to_string()))?;
    let request = DetectRequest::new(photo_path, face_config_path, face_weights_path, eyes_model_path);
    run(py, request, &policy)
}

/// Same as `detect(..., policy="brows-and-lips")`.
#[pyfunction]
fn detect_brows_and_lips<'py>(
    py: Python<'py>,
    photo_path: PathBuf,
    face_config_path: PathBuf,
    face_weights_path: PathBuf,
    landmark_model_path: PathBuf,
) -> PyResult<Bound<'py, PyAny>> {
    let request = DetectRequest::new(photo_path, face_config_path, face_weights_path, landmark_model_path);
    run(py, request, &FeatureExtractionPolicy::brows_and_lips())
}

#[pymodule]
fn hera_faces(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = m.py();
    m.add_function(wrap_pyfunction!(detect, m)?)?;
    m.add_function(wrap_pyfunction!(detect_brows_and_lips, m)?)?;
    m.add("FaceRoiError", py.get_type::<FaceRoiError>())?;
    m.add("ImageLoadError", py.get_type::<ImageLoadError>())?;
    m.add("ModelLoadError", py.get_type::<ModelLoadError>())?;
    m.add("InferenceError", py.get_type::<InferenceError>())?;
    m.add(
        "POLICIES",
        (FeatureExtractionPolicy::EYES, FeatureExtractionPolicy::BROWS_AND_LIPS),
    )?;
    tracing::debug!("hera_faces module initialized");
    Ok(())
}
