/// Derivative pipeline
///
/// This module handles:
/// - The resize ladder and its validation (ladder.rs)
/// - Codec and resampler seams with `image`-backed defaults (codec.rs)
/// - The cascading fold that turns one source into a family of encoded rungs

pub mod codec;
pub mod ladder;

pub use codec::{Codec, CodecError, JpegCodec, NearestResampler, Resampler, JPEG_MIME};
pub use ladder::{Ladder, Rung, RungName};

use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{self, ColorTag, Identifier};

/// One produced rung: the pixels it was encoded from and the encoded bytes
#[derive(Debug, Clone)]
pub struct Derivative {
    pub rung: RungName,
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
}

/// Everything one pipeline run produces, in ladder order
#[derive(Debug, Clone)]
pub struct Generated {
    /// Original first, then each rung of the ladder
    pub derivatives: Vec<Derivative>,
    /// Sampled from the last (smallest) derivative
    pub color_tag: ColorTag,
    /// The 1x1 sample, encoded, when legacy sample storage is on
    pub sample: Option<Derivative>,
}

/// An encoded rung together with its identifier
#[derive(Debug, Clone)]
pub struct Identified {
    pub rung: RungName,
    pub id: Identifier,
    pub bytes: Vec<u8>,
}

impl Generated {
    /// Derive identifiers for every rung, dropping the decoded pixels
    ///
    /// The sample (if any) comes last so the ladder order is unchanged.
    pub fn identify(self, schema_version: u16) -> Result<Vec<Identified>> {
        let color_tag = self.color_tag;
        self.derivatives
            .into_iter()
            .chain(self.sample)
            .map(|d| {
                let id = identity::derive(
                    schema_version,
                    &d.bytes,
                    d.image.width(),
                    d.image.height(),
                    color_tag,
                )?;
                Ok(Identified {
                    rung: d.rung,
                    id,
                    bytes: d.bytes,
                })
            })
            .collect()
    }
}

/// Cascading resize pipeline
#[derive(Clone)]
pub struct Pipeline {
    ladder: Ladder,
    codec: Arc<dyn Codec>,
    resampler: Arc<dyn Resampler>,
    keep_sample: bool,
}

impl Pipeline {
    pub fn new(ladder: Ladder, codec: Arc<dyn Codec>, resampler: Arc<dyn Resampler>) -> Self {
        Self {
            ladder,
            codec,
            resampler,
            keep_sample: false,
        }
    }

    /// Also encode and return the 1x1 colour sample (legacy layout)
    pub fn with_sample(mut self, keep_sample: bool) -> Self {
        self.keep_sample = keep_sample;
        self
    }

    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Run the ladder over `source`
    ///
    /// Every rung is resized from the previous rung's output. Any failure
    /// aborts the whole run; nothing partial is returned.
    pub fn generate(&self, source: DynamicImage) -> Result<Generated> {
        if source.width() == 0 || source.height() == 0 {
            return Err(Error::InvalidImage(format!(
                "zero dimension source {}x{}",
                source.width(),
                source.height()
            )));
        }

        let original = Derivative {
            rung: RungName::Original,
            bytes: self.encode(RungName::Original, &source)?,
            image: source,
        };

        let derivatives = self
            .ladder
            .rungs()
            .iter()
            .try_fold(vec![original], |mut family, rung| {
                let previous = match family.last() {
                    Some(d) => &d.image,
                    None => return Err(Error::InvalidLadder("empty family".into())),
                };
                let (width, height) = rung.target_dimensions(previous.width(), previous.height());
                let image = self.resampler.resize(previous, width, height);
                let bytes = self.encode(rung.name, &image)?;

                debug!(rung = %rung.name, width, height, bytes = bytes.len(), "rung generated");
                family.push(Derivative {
                    rung: rung.name,
                    image,
                    bytes,
                });
                Ok(family)
            })?;

        let smallest = match derivatives.last() {
            Some(d) => &d.image,
            None => return Err(Error::InvalidLadder("empty family".into())),
        };
        let pixel = identity::sample_pixel(smallest, self.resampler.as_ref())?;
        let color_tag = identity::sample_color(&pixel, self.resampler.as_ref())?;

        let sample = if self.keep_sample {
            Some(Derivative {
                rung: RungName::Sample,
                bytes: self.encode(RungName::Sample, &pixel)?,
                image: pixel,
            })
        } else {
            None
        };

        Ok(Generated {
            derivatives,
            color_tag,
            sample,
        })
    }

    fn encode(&self, rung: RungName, image: &DynamicImage) -> Result<Vec<u8>> {
        let bytes = self.codec.encode(image).map_err(|e| Error::EncodeFailed {
            rung,
            reason: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(Error::EncodeFailed {
                rung,
                reason: "codec produced no bytes".into(),
            });
        }
        Ok(bytes)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ladder", &self.ladder)
            .field("keep_sample", &self.keep_sample)
            .finish()
    }
}
