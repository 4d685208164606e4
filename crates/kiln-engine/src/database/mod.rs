//! Named resource caches backed by XML manifests.
//!
//! A [`Database<T>`] maps names to values of one resource kind. Values are
//! built on first request by a [`Loader`] from the manifest record of the same
//! name. Managers such as `Textures` and `Fonts` wrap a database and supply the
//! loader plus the device-lifecycle handling their resources need.

mod error;
mod manifest;
mod table;

pub use error::{DatabaseError, LoadError};
pub use manifest::{Element, FieldError, Manifest, ManifestEntry, ManifestSource};
pub use table::{Database, Loader, ResourceId};
