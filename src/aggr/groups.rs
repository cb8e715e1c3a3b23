//! Group membership resolution for event sessions

use crate::aggr::error::AggregationError;
use crate::aggr::types::EventSession;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Resolves the set of group identifiers an event's acting user currently
/// belongs to.
///
/// The set may be empty - the engine treats an empty set as a no-op
/// reconciliation for the interval.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn groups_for(&self, session: &EventSession) -> Result<HashSet<String>, AggregationError>;
}

/// Membership table loaded once at startup, mapping user name to group
/// identifiers.
///
/// File format (JSON): `{"drew": ["local:Group A", "local:Group B"]}`
pub struct StaticGroupResolver {
    memberships: HashMap<String, HashSet<String>>,
}

impl StaticGroupResolver {
    pub fn new(memberships: HashMap<String, HashSet<String>>) -> Self {
        Self { memberships }
    }

    /// Resolver with no memberships; every session resolves to the empty
    /// set
    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Load the membership table from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AggregationError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let memberships: HashMap<String, HashSet<String>> = serde_json::from_str(&raw)?;

        log::info!(
            "👥 Loaded group memberships for {} users from {}",
            memberships.len(),
            path.as_ref().display()
        );
        Ok(Self::new(memberships))
    }
}

#[async_trait]
impl GroupResolver for StaticGroupResolver {
    async fn groups_for(&self, session: &EventSession) -> Result<HashSet<String>, AggregationError> {
        Ok(self
            .memberships
            .get(&session.user_name)
            .cloned()
            .unwrap_or_default())
    }
}
