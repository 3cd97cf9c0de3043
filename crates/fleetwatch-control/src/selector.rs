//! Agent group matching.
//!
//! An agent belongs to a group when every entry of the group's identifying
//! selector equals the agent's identifying attribute of the same key. Among
//! matching active groups the highest priority wins; equal priorities are
//! broken by the smallest name in byte order. Configurations are never
//! merged across groups.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleetwatch_store::{AgentGroup, AgentSelector, Store};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Result;

/// Returns true if `attributes` satisfy every identifying entry of `selector`.
///
/// Non-identifying selector entries are ignored. An empty selector matches
/// every agent.
#[must_use]
pub fn matches(attributes: &BTreeMap<String, String>, selector: &AgentSelector) -> bool {
    selector
        .identifying_attributes
        .iter()
        .all(|(key, want)| attributes.get(key) == Some(want))
}

/// Pick the effective group for an agent out of `candidates`.
///
/// Tombstoned candidates are skipped. The result does not depend on the
/// order of `candidates`.
pub fn resolve<'a>(
    attributes: &BTreeMap<String, String>,
    candidates: impl IntoIterator<Item = &'a AgentGroup>,
) -> Option<&'a AgentGroup> {
    candidates
        .into_iter()
        .filter(|group| group.is_active() && matches(attributes, &group.selector))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.name.as_bytes().cmp(a.name.as_bytes()))
        })
}

/// Resolves the effective agent group for a set of identifying attributes.
pub trait SelectorResolver: Send + Sync {
    /// The winning group, or `None` if no active group matches.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the groups cannot be loaded.
    fn resolve(&self, attributes: &BTreeMap<String, String>) -> Result<Option<AgentGroup>>;

    /// Drop any cached view of the groups.
    fn invalidate(&self);
}

/// [`SelectorResolver`] over a cached snapshot of the active groups.
///
/// The snapshot is loaded on first use and kept until [`invalidate`] is
/// called, which the group service does after every write.
///
/// [`invalidate`]: SelectorResolver::invalidate
pub struct SnapshotResolver<S: Store> {
    store: Arc<S>,
    snapshot: RwLock<Option<Arc<Vec<AgentGroup>>>>,
    generation: AtomicU64,
}

impl<S: Store> SnapshotResolver<S> {
    /// Create a resolver reading groups from `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Result<Arc<Vec<AgentGroup>>> {
        if let Some(groups) = self.snapshot.read().as_ref() {
            return Ok(Arc::clone(groups));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let groups = Arc::new(self.store.list_active_agent_groups()?);
        debug!(groups = groups.len(), "Loaded agent group snapshot");

        // An invalidation during the load means `groups` may be stale.
        let mut slot = self.snapshot.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *slot = Some(Arc::clone(&groups));
        }
        Ok(groups)
    }
}

impl<S: Store> SelectorResolver for SnapshotResolver<S> {
    fn resolve(&self, attributes: &BTreeMap<String, String>) -> Result<Option<AgentGroup>> {
        let groups = self.snapshot()?;
        Ok(resolve(attributes, groups.iter()).cloned())
    }

    fn invalidate(&self) {
        let mut slot = self.snapshot.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }
}
