//! The domain-metadata state machine: per-transaction add/remove buffers, resolution against a
//! snapshot's already-active domains, and the system-domain gating that keeps `delta.*` domains
//! off the public API.
//!
//! There's no single teacher file for this (delta-kernel-rs's pack doesn't carry domain-metadata
//! write support), so the buffer/resolve split is grounded in the same "stage now, resolve at
//! commit time" shape `create_table.rs`'s builder uses for its action list.

use std::collections::HashMap;

use crate::actions::DomainMetadata;
use crate::{DeltaResult, Error};

/// The set of domain-metadata changes staged by a single transaction, before they're merged
/// against a snapshot's active map and written as commit actions.
#[derive(Debug, Clone, Default)]
pub struct DomainMetadataState {
    to_add: HashMap<String, String>,
    to_remove: HashMap<String, ()>,
}

impl DomainMetadataState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an add/update of a user domain. Rejects `delta.`-prefixed names: those are
    /// system-owned and only touched through the dedicated row-tracking/clustering helpers.
    pub fn add(&mut self, domain: impl Into<String>, configuration: impl Into<String>) -> DeltaResult<()> {
        let domain = domain.into();
        if DomainMetadata::is_system_domain(&domain) {
            return Err(Error::ReservedDomain(domain));
        }
        // Re-adding a domain that this same transaction just tombstoned cancels the tombstone,
        // symmetric with `remove()` canceling a pending add below.
        self.to_remove.remove(&domain);
        self.to_add.insert(domain, configuration.into());
        Ok(())
    }

    pub fn remove(&mut self, domain: impl Into<String>) -> DeltaResult<()> {
        let domain = domain.into();
        if DomainMetadata::is_system_domain(&domain) {
            return Err(Error::ReservedDomain(domain));
        }
        if self.to_add.remove(&domain).is_some() {
            // Staged add immediately reverted; nothing further to do.
            return Ok(());
        }
        self.to_remove.insert(domain, ());
        Ok(())
    }

    pub(crate) fn add_system(&mut self, domain: impl Into<String>, configuration: impl Into<String>) {
        let domain = domain.into();
        self.to_remove.remove(&domain);
        self.to_add.insert(domain, configuration.into());
    }

    /// Stage a tombstone for a system domain (e.g. all of a REPLACE target's active domains
    /// before the clustering domain is reseeded). Bypasses the public `remove()`'s
    /// reserved-domain guard since this is only called internally by the create/replace planner.
    pub(crate) fn remove_system(&mut self, domain: impl Into<String>) {
        let domain = domain.into();
        if self.to_add.remove(&domain).is_some() {
            return;
        }
        self.to_remove.insert(domain, ());
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Resolve staged changes against the snapshot's currently-active domain map, producing the
    /// [`DomainMetadata`] actions to append to the commit. Removing a domain that isn't active
    /// (and wasn't just added in this same transaction) is an error, not a silent no-op.
    pub fn resolve(&self, active: &HashMap<String, String>) -> DeltaResult<Vec<DomainMetadata>> {
        let mut actions = Vec::with_capacity(self.to_add.len() + self.to_remove.len());
        for domain in self.to_remove.keys() {
            let Some(configuration) = active.get(domain) else {
                return Err(Error::DomainDoesNotExist(domain.clone()));
            };
            // A tombstone carries the active record's configuration forward, per §4.3: "the
            // snapshot's current record with removed=true", not an emptied-out one.
            actions.push(DomainMetadata {
                domain: domain.clone(),
                configuration: configuration.clone(),
                removed: true,
            });
        }
        for (domain, configuration) in &self.to_add {
            actions.push(DomainMetadata {
                domain: domain.clone(),
                configuration: configuration.clone(),
                removed: false,
            });
        }
        Ok(actions)
    }
}

/// Merge an ordered sequence of `DomainMetadata` actions (oldest to newest) into the map of
/// currently-active domains, applying tombstones. Used by log replay to build a snapshot's
/// active domain map, and reused here so tests can assert resolve() against a realistic map.
pub fn merge_domain_metadata(
    base: &mut HashMap<String, String>,
    actions: impl IntoIterator<Item = DomainMetadata>,
) {
    for action in actions {
        if action.removed {
            base.remove(&action.domain);
        } else {
            base.insert(action.domain, action.configuration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_domain() {
        let mut state = DomainMetadataState::new();
        assert!(matches!(
            state.add("delta.rowTracking", "{}"),
            Err(Error::ReservedDomain(_))
        ));
        assert!(matches!(
            state.remove("delta.clustering"),
            Err(Error::ReservedDomain(_))
        ));
    }

    #[test]
    fn remove_of_unknown_domain_errors_on_resolve() {
        let mut state = DomainMetadataState::new();
        state.remove("analytics.tag").unwrap();
        let err = state.resolve(&HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::DomainDoesNotExist(_)));
    }

    #[test]
    fn remove_of_just_added_domain_is_a_no_op() {
        let mut state = DomainMetadataState::new();
        state.add("analytics.tag", "v1").unwrap();
        state.remove("analytics.tag").unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn resolve_against_active_map_produces_tombstone() {
        let mut state = DomainMetadataState::new();
        state.remove("analytics.tag").unwrap();
        let mut active = HashMap::new();
        active.insert("analytics.tag".to_string(), "v1".to_string());
        let actions = state.resolve(&active).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].removed);
        assert_eq!(actions[0].configuration, "v1");
    }

    #[test]
    fn add_of_just_removed_domain_cancels_the_tombstone() {
        let mut state = DomainMetadataState::new();
        state.remove("analytics.tag").unwrap();
        state.add("analytics.tag", "v2").unwrap();
        let active = HashMap::from([("analytics.tag".to_string(), "v1".to_string())]);
        let actions = state.resolve(&active).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(!actions[0].removed);
        assert_eq!(actions[0].configuration, "v2");
    }

    #[test]
    fn merge_applies_tombstones_in_order() {
        let mut active = HashMap::new();
        merge_domain_metadata(
            &mut active,
            vec![
                DomainMetadata {
                    domain: "d".into(),
                    configuration: "1".into(),
                    removed: false,
                },
                DomainMetadata {
                    domain: "d".into(),
                    configuration: String::new(),
                    removed: true,
                },
            ],
        );
        assert!(!active.contains_key("d"));
    }
}
