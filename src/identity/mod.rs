/// Identity derivation
///
/// Identifiers are a pure function of the encoded bytes of a rung, its
/// dimensions and the colour tag of its family. Nothing here does I/O.

pub mod identifier;

pub use identifier::{ColorTag, Identifier, HASH_LEN, SCHEMA_V1};

use image::DynamicImage;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::pipeline::Resampler;

/// SHA-1 over the exact encoded bytes
pub fn content_hash(encoded: &[u8]) -> [u8; HASH_LEN] {
    let digest = Sha1::digest(encoded);
    let mut bytes = [0u8; HASH_LEN];
    bytes.copy_from_slice(&digest);
    bytes
}

/// Derive the identifier of one encoded rung
///
/// Only schema version 1 (SHA-1) is understood; a different digest would
/// need its own schema version.
pub fn derive(
    schema_version: u16,
    encoded: &[u8],
    width: u32,
    height: u32,
    color_tag: ColorTag,
) -> Result<Identifier> {
    if encoded.is_empty() {
        return Err(Error::InvalidImage("encoded image is empty".into()));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidImage(format!(
            "zero dimension {}x{}",
            width, height
        )));
    }
    if schema_version != SCHEMA_V1 {
        return Err(Error::Config(format!(
            "unsupported schema version {:04x}",
            schema_version
        )));
    }

    Ok(Identifier {
        schema_version,
        content_hash: content_hash(encoded),
        color_tag,
        width,
        height,
    })
}

/// Reduce an image to a single pixel and read its colour
///
/// Called once per ingest on the smallest rung; the result is threaded
/// into every identifier of that family.
pub fn sample_color(image: &DynamicImage, resampler: &dyn Resampler) -> Result<ColorTag> {
    let pixel = sample_pixel(image, resampler)?;
    let rgb = pixel.to_rgb8();
    let [red, green, blue] = rgb.get_pixel(0, 0).0;
    Ok(ColorTag::new(red, green, blue))
}

/// The 1x1 reduction used for the colour tag
pub fn sample_pixel(image: &DynamicImage, resampler: &dyn Resampler) -> Result<DynamicImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidImage("cannot sample an empty image".into()));
    }
    Ok(resampler.resize(image, 1, 1))
}
