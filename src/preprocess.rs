//! Image preprocessing for the emotion classifier.
//!
//! The classifier uses a VGG16 backbone trained on caffe-style inputs:
//! channels-last, BGR channel order, per-channel ImageNet mean subtracted,
//! no scaling.

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{s, Array3, Array4, Axis};
use std::path::Path;

use crate::error::PreprocessError;

/// Model input side length (224x224)
pub const INPUT_SIZE: u32 = 224;

/// Full model input shape, NHWC
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3];

/// ImageNet channel means in BGR order
const BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Load an image file, resize it to the model input size, and normalize it.
pub fn preprocess_file(path: &Path) -> Result<Array4<f32>, PreprocessError> {
    let img = load_image(path)?;
    preprocess_image(&img)
}

/// Resize and normalize an already-decoded image (e.g. a detected face crop).
pub fn preprocess_image(img: &DynamicImage) -> Result<Array4<f32>, PreprocessError> {
    // Nearest keeps the output identical to the loader the model was trained with
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Nearest);
    preprocess(image_to_array(&resized))
}

/// Add the batch dimension and apply VGG16 normalization to an HWC RGB array.
///
/// The array is expected to already be sized for the model; spatial size is
/// not checked here.
pub fn preprocess(face_image: Array3<f32>) -> Result<Array4<f32>, PreprocessError> {
    let channels = face_image.shape()[2];
    if channels != 3 {
        return Err(PreprocessError::Channels(channels));
    }

    // RGB -> BGR
    let mut bgr = face_image.slice(s![.., .., ..;-1]).to_owned();
    for (c, mean) in BGR_MEAN.iter().enumerate() {
        bgr.index_axis_mut(Axis(2), c).mapv_inplace(|v| v - mean);
    }

    Ok(bgr.insert_axis(Axis(0)))
}

/// Convert an image to an HWC float array of RGB values in `0.0..=255.0`.
pub fn image_to_array(img: &DynamicImage) -> Array3<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
    })
}

fn load_image(path: &Path) -> Result<DynamicImage, PreprocessError> {
    let bytes = std::fs::read(path).map_err(|source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image::load_from_memory(&bytes)?)
}
