use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, ImageFormat};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// JPEG quality used when re-encoding images for the vision API
const API_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum ImageInputError {
    #[error("image is empty")]
    Empty,
    #[error("unsupported image format: {0} (expected JPEG or PNG)")]
    UnsupportedFormat(String),
    #[error("failed to process image: {0}")]
    Image(#[from] image::ImageError),
}

/// Immutable, cheaply clonable image bytes shared by every stage of a request
#[derive(Debug, Clone)]
pub struct ImageInput {
    bytes: Arc<[u8]>,
    format: ImageFormat,
}

impl ImageInput {
    /// Wrap raw upload bytes, accepting only JPEG and PNG
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageInputError> {
        if bytes.is_empty() {
            return Err(ImageInputError::Empty);
        }

        let format = image::guess_format(&bytes)?;
        match format {
            ImageFormat::Jpeg | ImageFormat::Png => Ok(Self {
                bytes: Arc::from(bytes),
                format,
            }),
            other => Err(ImageInputError::UnsupportedFormat(format!("{:?}", other))),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn media_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "image/png",
            _ => "image/jpeg",
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for vision chat-completion payloads
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type(), self.to_base64())
    }

    /// Downscale to `max_dimension` on the longest side and re-encode as JPEG
    ///
    /// Percent-based boxes are resolution independent, so the result can be
    /// sent to the reasoning model alongside boxes computed on the original.
    pub fn optimized_for_api(&self, max_dimension: u32) -> Result<Self, ImageInputError> {
        let img = image::load_from_memory(&self.bytes)?;
        let (width, height) = img.dimensions();

        if width.max(height) <= max_dimension && self.format == ImageFormat::Jpeg {
            return Ok(self.clone());
        }

        let resized = if width.max(height) > max_dimension {
            img.resize(
                max_dimension,
                max_dimension,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };

        let rgb = resized.to_rgb8();
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, API_JPEG_QUALITY).encode_image(&rgb)?;

        info!(
            "Optimized image for API: {}x{} ({} bytes) -> {}x{} ({} bytes)",
            width,
            height,
            self.bytes.len(),
            rgb.width(),
            rgb.height(),
            buffer.len()
        );

        Ok(Self {
            bytes: Arc::from(buffer),
            format: ImageFormat::Jpeg,
        })
    }
}
