/*!
This module contains the database versioning abstractions.

The state of the table files is captured by a set of versions maintained by the [`VersionSet`]
struct. Explicitly the most up to date version is tracked as the "current"
version and older versions are kept alive by readers that pinned them so that their table files are
not removed.

Each [`Version`] keeps track of a set of table files per level.

# Concurrency

[`VersionSet`] requires external synchronization e.g. a mutex. A [`Version`] is immutable once it
is installed and can be shared freely.

[`VersionSet`]: version_set::VersionSet
[`Version`]: version::Version
*/

pub(crate) mod errors;
pub(crate) mod file_iterators;
pub(crate) mod file_metadata;
pub(crate) mod utils;
pub(crate) mod version;
mod version_builder;
pub(crate) mod version_manifest;
pub(crate) mod version_set;

pub(crate) use version_manifest::VersionChangeManifest;
pub(crate) use version_set::VersionSet;
