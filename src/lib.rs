//! Content-addressed store for resized image derivatives
//!
//! An uploaded image is resized into a fixed ladder of smaller variants.
//! Every variant is named by a hash of its own encoded bytes plus a colour
//! tag shared by the whole family, and stored under a two-level sharded
//! directory tree.
//!
//! Layout:
//! - `identity` - identifiers, colour tags, hashing
//! - `pipeline` - the resize ladder, codec and resampler seams
//! - `store` - sharded layout, startup gate, put/get
//! - `index` - optional original -> derivatives lookup (SQLite)
//! - `service` - ingest/fetch orchestration
//! - `config` - file and default configuration

pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod pipeline;
pub mod service;
pub mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use identity::{ColorTag, Identifier};
pub use index::{DerivativeSet, MetadataIndex, SqliteIndex};
pub use pipeline::{Ladder, Pipeline, Rung, RungName};
pub use service::{DerivativeService, Served};
pub use store::{Store, StoreGate};
