//! Key Namespace
//!
//! Maps an entity kind plus identifier to a cache key, and a mutation to the
//! keys it makes stale. Everything here is pure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

// == Entity Kind ==
/// The kinds of derived facts the cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// Basic package metadata
    Info,
    /// Package metadata plus its dependencies and dependents
    InfoWithDeps,
    /// Commands a package puts on the PATH
    Commands,
    /// Usage documentation for a single command
    Documentation,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Info,
        EntityKind::InfoWithDeps,
        EntityKind::Commands,
        EntityKind::Documentation,
    ];

    /// Kinds whose identifier is a package name.
    pub const PACKAGE_KINDS: [EntityKind; 3] = [
        EntityKind::Info,
        EntityKind::InfoWithDeps,
        EntityKind::Commands,
    ];

    /// Key prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::Info => "info",
            EntityKind::InfoWithDeps => "info-with-deps",
            EntityKind::Commands => "commands",
            EntityKind::Documentation => "doc",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for EntityKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.prefix() == s)
            .ok_or_else(|| CacheError::InvalidRequest(format!("Unknown entity kind: {s}")))
    }
}

// == Cache Key ==
/// A namespaced key, `<kind>:<identifier>`.
///
/// Identifiers are taken verbatim: no trimming, no case folding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: EntityKind, identifier: &str) -> Self {
        Self(format!("{}:{}", kind.prefix(), identifier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Every key derived from a package's own state.
///
/// Keys of related packages (dependencies, dependents) are not included;
/// those relationships live inside cached values only.
pub fn entity_keys(identifier: &str) -> Vec<CacheKey> {
    EntityKind::PACKAGE_KINDS
        .into_iter()
        .map(|kind| CacheKey::new(kind, identifier))
        .collect()
}

// == Invalidation ==
/// What a mutation makes stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Invalidation {
    /// One package's derived keys
    Entity { identifier: String },
    /// Everything
    Global,
}

impl Invalidation {
    pub fn entity(identifier: impl Into<String>) -> Self {
        Invalidation::Entity {
            identifier: identifier.into(),
        }
    }

    /// The precise key set, or `None` when the whole cache goes.
    pub fn keys(&self) -> Option<Vec<CacheKey>> {
        match self {
            Invalidation::Entity { identifier } => Some(entity_keys(identifier)),
            Invalidation::Global => None,
        }
    }
}

// == Mutation ==
/// A successful state change of the package manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Mutation {
    Install { package: String },
    Uninstall { package: String },
    Update,
    Upgrade,
    UpdateAndUpgrade,
}

impl Mutation {
    /// Per-package mutations drop that package's keys; system-wide ones
    /// can touch any package, so they drop everything.
    pub fn invalidation(&self) -> Invalidation {
        match self {
            Mutation::Install { package } | Mutation::Uninstall { package } => {
                Invalidation::entity(package.clone())
            }
            Mutation::Update | Mutation::Upgrade | Mutation::UpdateAndUpgrade => {
                Invalidation::Global
            }
        }
    }
}
