/// SUPPORT WHITELISTS
///
/// Which price identifiers may be asked and which currencies may back bonds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Currency, Identifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Whitelist<T: Ord> {
    members: BTreeSet<T>,
}

impl<T: Ord> Default for Whitelist<T> {
    fn default() -> Self {
        Whitelist {
            members: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> Whitelist<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when already present
    pub fn add(&mut self, member: T) -> bool {
        self.members.insert(member)
    }

    pub fn remove(&mut self, member: &T) -> bool {
        self.members.remove(member)
    }

    pub fn is_supported(&self, member: &T) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Identifier and collateral whitelists consulted on every new request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportRegistry {
    pub identifiers: Whitelist<Identifier>,
    pub collateral: Whitelist<Currency>,
}

impl SupportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifier(mut self, identifier: impl Into<Identifier>) -> Self {
        self.identifiers.add(identifier.into());
        self
    }

    pub fn with_collateral(mut self, currency: impl Into<Currency>) -> Self {
        self.collateral.add(currency.into());
        self
    }
}
