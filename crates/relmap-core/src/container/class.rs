//! Concrete container classes a collection mapping can be stored in.

use std::fmt;

/// Structural kind of a container class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Ordered, duplicates allowed
    Sequence,
    /// Unique elements
    Set,
    /// Key → value entries
    Map,
}

/// A container class known to the registry.
///
/// All keyed classes keep entries in an insertion-ordered map; the sorted
/// classes additionally keep entries ordered by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerClass {
    Vec,
    HashSet,
    IndexSet,
    BTreeSet,
    HashMap,
    IndexMap,
    BTreeMap,
    /// Hash map that rejects null keys.
    NonNullHashMap,
    /// Read-only sequence; `add`/`remove` are unsupported.
    FrozenVec,
    FrozenSet,
    FrozenMap,
    /// Collection interface without a concrete representation.
    AbstractCollection,
    /// Map interface without a concrete representation.
    AbstractMap,
}

impl ContainerClass {
    /// Every class, registered by default under [`ContainerClass::name`].
    pub const ALL: [ContainerClass; 13] = [
        ContainerClass::Vec,
        ContainerClass::HashSet,
        ContainerClass::IndexSet,
        ContainerClass::BTreeSet,
        ContainerClass::HashMap,
        ContainerClass::IndexMap,
        ContainerClass::BTreeMap,
        ContainerClass::NonNullHashMap,
        ContainerClass::FrozenVec,
        ContainerClass::FrozenSet,
        ContainerClass::FrozenMap,
        ContainerClass::AbstractCollection,
        ContainerClass::AbstractMap,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ContainerClass::Vec => "Vec",
            ContainerClass::HashSet => "HashSet",
            ContainerClass::IndexSet => "IndexSet",
            ContainerClass::BTreeSet => "BTreeSet",
            ContainerClass::HashMap => "HashMap",
            ContainerClass::IndexMap => "IndexMap",
            ContainerClass::BTreeMap => "BTreeMap",
            ContainerClass::NonNullHashMap => "NonNullHashMap",
            ContainerClass::FrozenVec => "FrozenVec",
            ContainerClass::FrozenSet => "FrozenSet",
            ContainerClass::FrozenMap => "FrozenMap",
            ContainerClass::AbstractCollection => "Collection",
            ContainerClass::AbstractMap => "Map",
        }
    }

    pub const fn kind(self) -> ContainerKind {
        match self {
            ContainerClass::Vec | ContainerClass::FrozenVec | ContainerClass::AbstractCollection => {
                ContainerKind::Sequence
            }
            ContainerClass::HashSet
            | ContainerClass::IndexSet
            | ContainerClass::BTreeSet
            | ContainerClass::FrozenSet => ContainerKind::Set,
            ContainerClass::HashMap
            | ContainerClass::IndexMap
            | ContainerClass::BTreeMap
            | ContainerClass::NonNullHashMap
            | ContainerClass::FrozenMap
            | ContainerClass::AbstractMap => ContainerKind::Map,
        }
    }

    /// Entries are kept ordered by key.
    pub const fn is_sorted(self) -> bool {
        matches!(self, ContainerClass::BTreeSet | ContainerClass::BTreeMap)
    }

    pub const fn allows_null_keys(self) -> bool {
        !matches!(
            self,
            ContainerClass::BTreeSet | ContainerClass::BTreeMap | ContainerClass::NonNullHashMap
        )
    }

    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            ContainerClass::FrozenVec | ContainerClass::FrozenSet | ContainerClass::FrozenMap
        )
    }

    pub const fn is_instantiable(self) -> bool {
        !matches!(
            self,
            ContainerClass::AbstractCollection | ContainerClass::AbstractMap
        )
    }
}

impl fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
