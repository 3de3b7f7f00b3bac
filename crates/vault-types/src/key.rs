//! The domain key and its tagged-union view over data types.

use serde::{Deserialize, Serialize};

use crate::ids::Identity;

/// Discriminates the domain type a [`Key`] belongs to.
///
/// New variants are added here, never modelled as separate key types — every
/// operation polymorphic in the variant dispatches on this tag: a closed sum
/// type, not subtype polymorphism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataTypeTag {
    /// Immutable, content-addressed chunk.
    ImmutableChunk,
    /// Mutable structured data (small, owner-versioned records).
    MutableData,
    /// A directory entry (container of other keys).
    Directory,
}

/// A domain key: `(tag, 512-bit content identity)`, totally ordered by
/// identity and partitioned by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub tag: DataTypeTag,
    pub name: Identity,
}

impl Key {
    pub fn new(tag: DataTypeTag, name: Identity) -> Self {
        Self { tag, name }
    }

    pub fn immutable_chunk(name: Identity) -> Self {
        Self::new(DataTypeTag::ImmutableChunk, name)
    }

    pub fn mutable_data(name: Identity) -> Self {
        Self::new(DataTypeTag::MutableData, name)
    }

    pub fn directory(name: Identity) -> Self {
        Self::new(DataTypeTag::Directory, name)
    }

    /// Converts this key into its [`DataNameVariant`], the exhaustive view
    /// used by per-variant dispatch tables. Every inbound payload carries a
    /// name convertible to exactly one variant.
    pub fn as_variant(&self) -> DataNameVariant {
        match self.tag {
            DataTypeTag::ImmutableChunk => DataNameVariant::ImmutableChunk(self.name),
            DataTypeTag::MutableData => DataNameVariant::MutableData(self.name),
            DataTypeTag::Directory => DataNameVariant::Directory(self.name),
        }
    }
}

/// A tagged union over all domain key types, used as the dispatch key for
/// variant-polymorphic operations (get-from-cache, put-to-cache, the
/// Data Manager's action handlers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataNameVariant {
    ImmutableChunk(Identity),
    MutableData(Identity),
    Directory(Identity),
}

impl DataNameVariant {
    pub fn to_key(self) -> Key {
        match self {
            DataNameVariant::ImmutableChunk(name) => Key::immutable_chunk(name),
            DataNameVariant::MutableData(name) => Key::mutable_data(name),
            DataNameVariant::Directory(name) => Key::directory(name),
        }
    }

    pub fn tag(&self) -> DataTypeTag {
        match self {
            DataNameVariant::ImmutableChunk(_) => DataTypeTag::ImmutableChunk,
            DataNameVariant::MutableData(_) => DataTypeTag::MutableData,
            DataNameVariant::Directory(_) => DataTypeTag::Directory,
        }
    }
}
