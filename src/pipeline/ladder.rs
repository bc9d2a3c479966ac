/// The resize ladder
///
/// The ladder is an ordered list of rungs. Each rung is resized from the
/// output of the rung before it, never from the original, so the order is
/// part of the output and changing it changes every identifier.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Reference ladder widths
pub const LARGE_WIDTH: u32 = 400;
pub const MEDIUM_WIDTH: u32 = 200;
pub const SMALL_WIDTH: u32 = 100;

/// Role of a derivative within its family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RungName {
    /// The source itself, re-encoded but not resized
    Original,
    Large,
    Medium,
    Small,
    /// Legacy 1x1 colour sample, only stored when explicitly enabled
    Sample,
}

impl RungName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RungName::Original => "original",
            RungName::Large => "large",
            RungName::Medium => "medium",
            RungName::Small => "small",
            RungName::Sample => "sample",
        }
    }
}

impl fmt::Display for RungName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RungName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(RungName::Original),
            "large" => Ok(RungName::Large),
            "medium" => Ok(RungName::Medium),
            "small" => Ok(RungName::Small),
            "sample" => Ok(RungName::Sample),
            other => Err(Error::UnknownRung(other.to_string())),
        }
    }
}

/// One step of the ladder
///
/// A target dimension of 0 is computed from the other one so the aspect
/// ratio of the previous rung is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rung {
    pub name: RungName,
    #[serde(default)]
    pub target_width: u32,
    #[serde(default)]
    pub target_height: u32,
}

impl Rung {
    pub fn new(name: RungName, target_width: u32, target_height: u32) -> Self {
        Self {
            name,
            target_width,
            target_height,
        }
    }

    /// Output dimensions when resizing an image of `width` x `height`
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match (self.target_width, self.target_height) {
            (0, 0) => (width, height),
            (w, 0) => (w, scale(height, w, width)),
            (0, h) => (scale(width, h, height), h),
            (w, h) => (w, h),
        }
    }
}

/// `floor(other * target / source + 0.7)`, never below 1
///
/// With the reference ladder a 401x638 source yields 400x637, 200x319
/// and 100x160.
fn scale(other: u32, target: u32, source: u32) -> u32 {
    if source == 0 {
        return 1;
    }
    let source = u64::from(source);
    let numerator = 10 * u64::from(other) * u64::from(target) + 7 * source;
    let scaled = numerator / (10 * source);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Validated, ordered list of rungs (the Original rung is implicit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Rung>", into = "Vec<Rung>")]
pub struct Ladder {
    rungs: Vec<Rung>,
}

impl Ladder {
    pub fn new(rungs: Vec<Rung>) -> Result<Self, Error> {
        if rungs.is_empty() {
            return Err(Error::InvalidLadder("ladder has no rungs".into()));
        }

        let mut seen = HashSet::new();
        for rung in &rungs {
            if matches!(rung.name, RungName::Original | RungName::Sample) {
                return Err(Error::InvalidLadder(format!(
                    "{} is implicit and cannot be listed",
                    rung.name
                )));
            }
            if rung.target_width == 0 && rung.target_height == 0 {
                return Err(Error::InvalidLadder(format!(
                    "{} rung has no target dimension",
                    rung.name
                )));
            }
            if !seen.insert(rung.name) {
                return Err(Error::InvalidLadder(format!("{} listed twice", rung.name)));
            }
        }

        Ok(Self { rungs })
    }

    /// Large(400) -> Medium(200) -> Small(100), heights preserve aspect
    pub fn reference() -> Self {
        Self {
            rungs: vec![
                Rung::new(RungName::Large, LARGE_WIDTH, 0),
                Rung::new(RungName::Medium, MEDIUM_WIDTH, 0),
                Rung::new(RungName::Small, SMALL_WIDTH, 0),
            ],
        }
    }

    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }
}

impl Default for Ladder {
    fn default() -> Self {
        Self::reference()
    }
}

impl TryFrom<Vec<Rung>> for Ladder {
    type Error = Error;

    fn try_from(rungs: Vec<Rung>) -> Result<Self, Self::Error> {
        Ladder::new(rungs)
    }
}

impl From<Ladder> for Vec<Rung> {
    fn from(ladder: Ladder) -> Self {
        ladder.rungs
    }
}
