//! Process-local runtime state shared by the pipeline, deployer and reaper.
//!
//! Three pieces of bookkeeping live here: the registry of containers this
//! process created (so they can be removed wholesale), the reference counts
//! of shared base images (so one environment's teardown does not delete an
//! image another environment still uses), and the `(user, env)` pairs whose
//! instance is being provisioned right now. None of it is persisted; a
//! restart starts from empty maps.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

/// Outcome of releasing one reference to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRelease {
    /// Other references remain; the image must be kept.
    Kept {
        /// References still outstanding.
        remaining: u32,
    },
    /// This was the last (or only) reference; the image may be removed.
    Last,
}

/// Shared mutable state, injected into components via `Arc`.
#[derive(Debug, Default)]
pub struct RuntimeState {
    containers: RwLock<HashMap<String, String>>,
    image_refs: Mutex<HashMap<String, u32>>,
    provisioning: Mutex<HashSet<(u64, u64)>>,
}

/// Exclusive hold on provisioning one user's instance of an environment.
///
/// Dropping the claim releases the pair.
#[derive(Debug)]
pub struct ProvisionClaim<'a> {
    state: &'a RuntimeState,
    key: (u64, u64),
}

impl Drop for ProvisionClaim<'_> {
    fn drop(&mut self) {
        self.state
            .provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl RuntimeState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a container created by this process.
    pub fn register_container(&self, id: &str, name: &str) {
        self.containers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(String::from(id), String::from(name));
    }

    /// Forget a container, returning its recorded name.
    pub fn unregister_container(&self, id: &str) -> Option<String> {
        self.containers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Snapshot of every registered `(id, name)` pair, sorted by id.
    #[must_use]
    pub fn created_containers(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Add one reference to `image`, returning the new count.
    pub fn add_image_reference(&self, image: &str) -> u32 {
        let mut refs = self
            .image_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = refs.entry(String::from(image)).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Current reference count of `image` (zero when untracked).
    #[must_use]
    pub fn image_reference_count(&self, image: &str) -> u32 {
        self.image_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(image)
            .copied()
            .unwrap_or(0)
    }

    /// Release one reference to `image`.
    ///
    /// With more than one reference outstanding the count is decremented and
    /// the image must be kept. Otherwise the entry is dropped and the caller
    /// may remove the image.
    pub fn release_image_reference(&self, image: &str) -> ImageRelease {
        let mut refs = self
            .image_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match refs.get_mut(image) {
            Some(count) if *count > 1 => {
                *count -= 1;
                ImageRelease::Kept { remaining: *count }
            }
            _ => {
                refs.remove(image);
                ImageRelease::Last
            }
        }
    }

    /// Claim `(user_id, env_id)` for provisioning.
    ///
    /// Returns `None` while another claim on the same pair is alive.
    #[must_use]
    pub fn claim_provisioning(&self, user_id: u64, env_id: u64) -> Option<ProvisionClaim<'_>> {
        let key = (user_id, env_id);
        let inserted = self
            .provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        inserted.then_some(ProvisionClaim { state: self, key })
    }
}
