//! Image Preprocessing
//!
//! Turns uploaded bytes into the classifier's input tensor. The order is fixed
//! and must match the training-time transform:
//!
//! 1. decode and coerce to 3-channel RGB
//! 2. resize to a square with a bilinear (triangle) filter
//! 3. convert to `f32`
//! 4. sign-centered normalization `x / 127.5 - 1`, mapping [0, 255] to [-1, 1]
//! 5. add a leading batch dimension, giving `[1, size, size, 3]` (NHWC)

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, ImageReader, Limits, RgbImage};

use crate::utils::error::{CropCareError, Result};

/// Input resolution the classifier was trained on
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Largest accepted width or height before decoding is refused
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 8192;

/// Resampling filter shared with the training data loader (bilinear)
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Dense `f32` tensor in NHWC layout
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl InputTensor {
    /// Wrap raw NHWC values; the length must match the shape
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CropCareError::InvalidInput(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// `[batch, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Sign-centered normalization of one channel value
#[inline]
pub fn normalize_channel(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

/// Deterministic bytes-to-tensor pipeline
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// Target square size
    pub image_size: u32,

    /// Decoder guard against pathological dimensions
    pub max_image_dimension: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
        }
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure image size
    pub fn with_image_size(mut self, size: u32) -> Self {
        self.image_size = size;
        self
    }

    /// Configure the decoder dimension limit
    pub fn with_max_image_dimension(mut self, max: u32) -> Self {
        self.max_image_dimension = max;
        self
    }

    /// Output shape of [`Preprocessor::preprocess`]
    pub fn output_shape(&self) -> [usize; 4] {
        let size = self.image_size as usize;
        [1, size, size, 3]
    }

    /// Decode raw bytes into an image
    ///
    /// Empty, truncated, unrecognised or oversized input is a `Decode` error.
    pub fn decode(&self, image_bytes: &[u8]) -> Result<DynamicImage> {
        if image_bytes.is_empty() {
            return Err(CropCareError::Decode("empty image payload".to_string()));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_image_dimension);
        limits.max_image_height = Some(self.max_image_dimension);

        let mut reader = ImageReader::new(Cursor::new(image_bytes))
            .with_guessed_format()
            .map_err(|e| CropCareError::Decode(e.to_string()))?;
        reader.limits(limits);

        reader
            .decode()
            .map_err(|e| CropCareError::Decode(e.to_string()))
    }

    /// Full pipeline from encoded bytes
    pub fn preprocess(&self, image_bytes: &[u8]) -> Result<InputTensor> {
        let image = self.decode(image_bytes)?;
        Ok(self.preprocess_image(&image))
    }

    /// Pipeline steps 1–5 on an already decoded image
    pub fn preprocess_image(&self, image: &DynamicImage) -> InputTensor {
        // Drops alpha, expands grey and 16-bit images to 8-bit RGB
        let rgb = image.to_rgb8();
        let resized = self.resize(&rgb);

        let data: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(normalize_channel)
            .collect();

        InputTensor {
            data,
            shape: self.output_shape(),
        }
    }

    fn resize(&self, rgb: &RgbImage) -> RgbImage {
        if rgb.dimensions() == (self.image_size, self.image_size) {
            return rgb.clone();
        }
        image::imageops::resize(rgb, self.image_size, self.image_size, RESIZE_FILTER)
    }
}
