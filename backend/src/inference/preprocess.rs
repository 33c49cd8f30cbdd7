use std::path::Path;

use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::InferenceError;

pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Channel order written into the last tensor axis.
///
/// The prebuilt extractor was trained on BGR frames, so that is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub width: u32,
    pub height: u32,
    pub channel_order: ChannelOrder,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_INPUT_SIZE,
            height: DEFAULT_INPUT_SIZE,
            channel_order: ChannelOrder::Bgr,
        }
    }
}

/// A `[1, height, width, 3]` batch of pixel values scaled to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    pub fn from_array(data: Array4<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> [usize; 4] {
        let dims = self.data.dim();
        [dims.0, dims.1, dims.2, dims.3]
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Values in row-major (NHWC) order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

/// Decodes the file at `path` and normalizes it into an [`ImageTensor`].
///
/// The format is sniffed from the file content, so a valid extension does not
/// make an undecodable file acceptable.
pub fn preprocess(path: &Path, config: &PreprocessConfig) -> Result<ImageTensor, InferenceError> {
    let decode_error =
        |e: &dyn std::fmt::Display| InferenceError::Decode(format!("{}: {}", path.display(), e));

    let image = ImageReader::open(path)
        .map_err(|e| decode_error(&e))?
        .with_guessed_format()
        .map_err(|e| decode_error(&e))?
        .decode()
        .map_err(|e| decode_error(&e))?;

    Ok(preprocess_image(&image, config))
}

pub fn preprocess_image(image: &DynamicImage, config: &PreprocessConfig) -> ImageTensor {
    let rgb = image.to_rgb8();
    // Stretched to the target size, aspect ratio is not preserved.
    let resized = resize_linear(&rgb, config.width, config.height);

    let (width, height) = (config.width as usize, config.height as usize);
    let mut data = Array4::<f32>::zeros((1, height, width, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let channels = match config.channel_order {
            ChannelOrder::Bgr => [b, g, r],
            ChannelOrder::Rgb => [r, g, b],
        };
        for (c, value) in channels.into_iter().enumerate() {
            data[[0, y as usize, x as usize, c]] = value as f32 / 255.0;
        }
    }

    ImageTensor::from_array(data)
}

/// Bilinear resampling the way OpenCV's `INTER_LINEAR` does it: half-pixel
/// centres, edge clamping and only the 2x2 neighbourhood of each sample, even
/// when shrinking. The extractor was trained on frames resized this way.
fn resize_linear(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let columns = sample_positions(image.width(), width);
    let rows = sample_positions(image.height(), height);

    RgbImage::from_fn(width, height, |x, y| {
        let (x0, x1, wx) = columns[x as usize];
        let (y0, y1, wy) = rows[y as usize];
        let [a, b, c, d] = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)]
            .map(|(px, py)| image.get_pixel(px, py).0);
        Rgb(std::array::from_fn(|ch| {
            let top = f32::from(a[ch]) * (1.0 - wx) + f32::from(b[ch]) * wx;
            let bottom = f32::from(c[ch]) * (1.0 - wx) + f32::from(d[ch]) * wx;
            (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Left source index, right source index and weight of the right one for
/// every target coordinate.
fn sample_positions(source: u32, target: u32) -> Vec<(u32, u32, f32)> {
    let scale = source as f32 / target as f32;
    let last = source.saturating_sub(1);
    (0..target)
        .map(|t| {
            let position = (t as f32 + 0.5) * scale - 0.5;
            let left = position.floor();
            if left < 0.0 {
                (0, 0, 0.0)
            } else if left as u32 >= last {
                (last, last, 0.0)
            } else {
                (left as u32, left as u32 + 1, position - left)
            }
        })
        .collect()
}
