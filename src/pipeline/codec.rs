/// Codec and resampling capabilities
///
/// The pipeline only sees these two traits. The shipped implementations
/// sit on the `image` crate: any format it can read goes in, baseline JPEG
/// always comes out, and resizing is nearest-neighbour so the output is
/// reproducible byte for byte.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// Content type of every stored derivative
pub const JPEG_MIME: &str = "image/jpeg";

/// Default JPEG quality (same as Go's image/jpeg default)
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Other(String),
}

/// Decode input bytes, encode derivatives
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError>;

    fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError>;

    /// Content type of the bytes produced by `encode`
    fn content_type(&self) -> &'static str;
}

/// Produce an image of exactly the target dimensions
///
/// Must be deterministic: identical inputs give identical pixels.
pub trait Resampler: Send + Sync {
    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegCodec {
    pub quality: u8,
}

impl JpegCodec {
    pub fn new(quality: u8) -> Self {
        // The encoder only accepts 1..=100
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl Codec for JpegCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        Ok(image::load_from_memory(bytes)?)
    }

    fn encode(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        // JPEG has no alpha channel, flatten everything to RGB8 first
        let rgb = image.to_rgb8();
        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        rgb.write_with_encoder(encoder)?;
        Ok(buffer)
    }

    fn content_type(&self) -> &'static str {
        JPEG_MIME
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NearestResampler;

impl Resampler for NearestResampler {
    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        image.resize_exact(width, height, FilterType::Nearest)
    }
}
