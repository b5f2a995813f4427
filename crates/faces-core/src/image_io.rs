//! Image decoding and tensor packing shared by both detectors.

use image::RgbImage;
use ndarray::Array4;
use std::path::Path;

/// Decode an image file into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    let image = image::open(path)?.to_rgb8();
    tracing::debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "decoded image"
    );
    Ok(image)
}

/// Allocate a 1×3×H×W tensor whose every element is `fill`.
pub fn nchw_filled(height: usize, width: usize, fill: f32) -> Array4<f32> {
    Array4::<f32>::from_elem((1, 3, height, width), fill)
}

/// Copy `image` into `tensor` at (`offset_x`, `offset_y`), normalizing
/// each channel as `(pixel - mean) / std`. Pixels falling outside the
/// tensor are dropped.
pub fn write_nchw(
    tensor: &mut Array4<f32>,
    image: &RgbImage,
    offset_x: usize,
    offset_y: usize,
    mean: f32,
    std: f32,
) {
    let (_, _, height, width) = tensor.dim();
    for (x, y, pixel) in image.enumerate_pixels() {
        let tx = offset_x + x as usize;
        let ty = offset_y + y as usize;
        if tx >= width || ty >= height {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - mean) / std;
        }
    }
}
