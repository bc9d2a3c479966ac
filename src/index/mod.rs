/// Metadata index
///
/// Links an original's identifier to the identifiers of its derivatives so
/// a caller can ask for "the small rung of X" without knowing the small
/// rung's own hash. The store never depends on it: a get by identifier
/// works with or without an index.

pub mod sqlite;

pub use sqlite::SqliteIndex;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::identity::{ColorTag, Identifier};
use crate::pipeline::RungName;

/// One ingest's family of identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeSet {
    pub original: Identifier,
    pub color_tag: ColorTag,
    /// Every rung except the original itself
    pub rungs: BTreeMap<RungName, Identifier>,
}

impl DerivativeSet {
    /// Identifier for a role; `Original` resolves to the original
    pub fn get(&self, rung: RungName) -> Option<Identifier> {
        match rung {
            RungName::Original => Some(self.original),
            other => self.rungs.get(&other).copied(),
        }
    }

    /// All identifiers of the family, original first
    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> + '_ {
        std::iter::once(&self.original).chain(self.rungs.values())
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.identifiers().any(|member| member == id)
    }
}

/// What the core needs from an index
///
/// `record_derivative_set` is only ever called after every identifier in
/// the set has been stored.
pub trait MetadataIndex: Send + Sync {
    /// Recording the same set twice is a no-op
    fn record_derivative_set(&self, set: &DerivativeSet) -> Result<()>;

    fn lookup_derivative(&self, original: &Identifier, rung: RungName) -> Result<Option<Identifier>>;

    /// The set an identifier belongs to, as original or as derivative
    fn find_set(&self, id: &Identifier) -> Result<Option<DerivativeSet>>;
}
