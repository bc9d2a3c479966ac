/// Identifier and colour tag types
///
/// An identifier is never assigned, only derived. Its rendered form doubles
/// as the on-disk filename and the value handed back to API callers:
///
/// `0001_58baa4e5acbaafcb60c260b1dd61e4feb26e986e_9AA2A8_400_300`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Schema version for SHA-1 content hashes
pub const SCHEMA_V1: u16 = 1;

/// Width of the content digest in bytes (160 bits)
pub const HASH_LEN: usize = 20;

/// A lossy 24-bit summary colour shared by every rung of one ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorTag {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorTag {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

impl fmt::Display for ColorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.red, self.green, self.blue)
    }
}

impl FromStr for ColorTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 {
            return Err(format!("colour tag must be 6 hex digits, got {}", s.len()));
        }
        let mut rgb = [0u8; 3];
        hex::decode_to_slice(s, &mut rgb).map_err(|e| format!("colour tag: {}", e))?;
        Ok(Self::new(rgb[0], rgb[1], rgb[2]))
    }
}

impl Serialize for ColorTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColorTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite content-derived key of one stored derivative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    pub schema_version: u16,
    pub content_hash: [u8; HASH_LEN],
    pub color_tag: ColorTag,
    pub width: u32,
    pub height: u32,
}

impl Identifier {
    /// Lowercase hex of the content hash
    pub fn hash_hex(&self) -> String {
        hex::encode(self.content_hash)
    }

    /// The rendered form used for filenames and API responses
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}_{}_{}_{}_{}",
            self.schema_version,
            self.hash_hex(),
            self.color_tag,
            self.width,
            self.height
        )
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| Error::InvalidIdentifier {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split('_').collect();
        let [schema, hash, color, width, height] = parts.as_slice() else {
            return Err(invalid(format!("expected 5 fields, got {}", parts.len())));
        };

        if schema.len() != 4 || !schema.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("schema version must be 4 hex digits".into()));
        }
        let schema_version =
            u16::from_str_radix(schema, 16).map_err(|e| invalid(format!("schema version: {}", e)))?;

        if hash.len() != HASH_LEN * 2 {
            return Err(invalid(format!("content hash must be {} hex digits", HASH_LEN * 2)));
        }
        let mut content_hash = [0u8; HASH_LEN];
        hex::decode_to_slice(hash, &mut content_hash)
            .map_err(|e| invalid(format!("content hash: {}", e)))?;

        let color_tag: ColorTag = color.parse().map_err(invalid)?;

        // Plain decimal only: no sign, no leading '+'
        let dimension = |field: &str, name: &str| -> Result<u32, Error> {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(format!("{} must be decimal", name)));
            }
            field.parse().map_err(|e| invalid(format!("{}: {}", name, e)))
        };

        Ok(Identifier {
            schema_version,
            content_hash,
            color_tag,
            width: dimension(*width, "width")?,
            height: dimension(*height, "height")?,
        })
    }
}

impl Serialize for Identifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
