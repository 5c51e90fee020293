//! Persistence seam for environments, instances and balances.
//!
//! The lifecycle service only talks to [`LabStore`]; [`MemoryStore`] backs
//! the CLI and the tests.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::model::{InstanceStatus, VulEnv, VulInstance};
use crate::error::{PersistenceError, VulnlabError};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VulnlabError>> + Send + 'a>>;

/// One page of records and the total number of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Records in the requested window.
    pub items: Vec<T>,
    /// Total records across all pages.
    pub total: usize,
}

/// Environment and instance persistence.
///
/// Inserting assigns the record id; any id on the input is ignored.
pub trait LabStore: Send + Sync {
    /// Insert an environment and return it with its id.
    fn insert_env(&self, env: VulEnv) -> StoreFuture<'_, VulEnv>;

    /// Fetch an environment by id.
    fn env(&self, env_id: u64) -> StoreFuture<'_, Option<VulEnv>>;

    /// Fetch an environment by its unique name.
    fn env_by_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<VulEnv>>;

    /// Environments whose open level is at least `access_level`.
    fn envs_open_to(&self, access_level: i32) -> StoreFuture<'_, Vec<VulEnv>>;

    /// Every environment, ordered by id.
    fn envs(&self) -> StoreFuture<'_, Vec<VulEnv>>;

    /// A window of environments ordered by id.
    fn envs_page(&self, offset: usize, limit: usize) -> StoreFuture<'_, Page<VulEnv>>;

    /// Replace a stored environment.
    fn update_env(&self, env: VulEnv) -> StoreFuture<'_, ()>;

    /// Delete an environment.
    fn delete_env(&self, env_id: u64) -> StoreFuture<'_, ()>;

    /// Insert an instance and return it with its id.
    fn insert_instance(&self, instance: VulInstance) -> StoreFuture<'_, VulInstance>;

    /// Fetch an instance by id.
    fn instance(&self, instance_id: u64) -> StoreFuture<'_, Option<VulInstance>>;

    /// Fetch the instance a user holds for an environment.
    fn instance_for(&self, user_id: u64, env_id: u64) -> StoreFuture<'_, Option<VulInstance>>;

    /// Every instance, ordered by id.
    fn instances(&self) -> StoreFuture<'_, Vec<VulInstance>>;

    /// Instances owned by a user.
    fn instances_by_user(&self, user_id: u64) -> StoreFuture<'_, Vec<VulInstance>>;

    /// Instances of an environment.
    fn instances_by_env(&self, env_id: u64) -> StoreFuture<'_, Vec<VulInstance>>;

    /// A window of instances ordered by id.
    fn instances_page(&self, offset: usize, limit: usize) -> StoreFuture<'_, Page<VulInstance>>;

    /// Replace a stored instance.
    fn update_instance(&self, instance: VulInstance) -> StoreFuture<'_, ()>;

    /// Delete an instance.
    fn delete_instance(&self, instance_id: u64) -> StoreFuture<'_, ()>;

    /// Delete every instance of an environment, returning how many went.
    fn delete_instances_by_env(&self, env_id: u64) -> StoreFuture<'_, usize>;

    /// Subtract `amount` from a user's balance.
    fn debit_balance(&self, user_id: u64, amount: f64) -> StoreFuture<'_, ()>;
}

#[derive(Debug, Default)]
struct Tables {
    envs: BTreeMap<u64, VulEnv>,
    instances: BTreeMap<u64, VulInstance>,
    balances: HashMap<u64, f64>,
    next_env_id: u64,
    next_instance_id: u64,
}

/// In-process [`LabStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's balance.
    pub fn set_balance(&self, user_id: u64, balance: f64) {
        self.lock().balances.insert(user_id, balance);
    }

    /// A user's balance; unknown users hold zero.
    #[must_use]
    pub fn balance(&self, user_id: u64) -> f64 {
        self.lock().balances.get(&user_id).copied().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<T: Send + 'static>(
        &self,
        op: impl FnOnce(&mut Tables) -> Result<T, VulnlabError>,
    ) -> StoreFuture<'_, T> {
        let mut tables = self.lock();
        let result = op(&mut *tables);
        drop(tables);
        Box::pin(std::future::ready(result))
    }
}

fn missing(entity: &'static str, key: u64) -> VulnlabError {
    PersistenceError::NotFound {
        entity,
        key: key.to_string(),
    }
    .into()
}

fn page<T: Clone>(records: &BTreeMap<u64, T>, offset: usize, limit: usize) -> Page<T> {
    Page {
        items: records.values().skip(offset).take(limit).cloned().collect(),
        total: records.len(),
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "balances are fractional amounts"
)]
const fn debit(balance: f64, amount: f64) -> f64 {
    balance - amount
}

impl LabStore for MemoryStore {
    fn insert_env(&self, env: VulEnv) -> StoreFuture<'_, VulEnv> {
        self.with(move |tables| {
            tables.next_env_id = tables.next_env_id.saturating_add(1);
            let stored = VulEnv {
                id: tables.next_env_id,
                ..env
            };
            tables.envs.insert(stored.id, stored.clone());
            Ok(stored)
        })
    }

    fn env(&self, env_id: u64) -> StoreFuture<'_, Option<VulEnv>> {
        self.with(move |tables| Ok(tables.envs.get(&env_id).cloned()))
    }

    fn env_by_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<VulEnv>> {
        self.with(|tables| {
            Ok(tables
                .envs
                .values()
                .find(|env| env.env_name == name)
                .cloned())
        })
    }

    fn envs_open_to(&self, access_level: i32) -> StoreFuture<'_, Vec<VulEnv>> {
        self.with(move |tables| {
            Ok(tables
                .envs
                .values()
                .filter(|env| env.is_open_to(access_level))
                .cloned()
                .collect())
        })
    }

    fn envs(&self) -> StoreFuture<'_, Vec<VulEnv>> {
        self.with(|tables| Ok(tables.envs.values().cloned().collect()))
    }

    fn envs_page(&self, offset: usize, limit: usize) -> StoreFuture<'_, Page<VulEnv>> {
        self.with(move |tables| Ok(page(&tables.envs, offset, limit)))
    }

    fn update_env(&self, env: VulEnv) -> StoreFuture<'_, ()> {
        self.with(move |tables| match tables.envs.get_mut(&env.id) {
            Some(stored) => {
                *stored = env;
                Ok(())
            }
            None => Err(missing("environment", env.id)),
        })
    }

    fn delete_env(&self, env_id: u64) -> StoreFuture<'_, ()> {
        self.with(move |tables| {
            tables
                .envs
                .remove(&env_id)
                .map(|_| ())
                .ok_or_else(|| missing("environment", env_id))
        })
    }

    fn insert_instance(&self, instance: VulInstance) -> StoreFuture<'_, VulInstance> {
        self.with(move |tables| {
            tables.next_instance_id = tables.next_instance_id.saturating_add(1);
            let stored = VulInstance {
                id: tables.next_instance_id,
                ..instance
            };
            tables.instances.insert(stored.id, stored.clone());
            Ok(stored)
        })
    }

    fn instance(&self, instance_id: u64) -> StoreFuture<'_, Option<VulInstance>> {
        self.with(move |tables| Ok(tables.instances.get(&instance_id).cloned()))
    }

    fn instance_for(&self, user_id: u64, env_id: u64) -> StoreFuture<'_, Option<VulInstance>> {
        self.with(move |tables| {
            let mut held = tables
                .instances
                .values()
                .filter(|instance| instance.user_id == user_id && instance.env_id == env_id);
            let first = held.next().cloned();
            let running = held
                .chain(first.iter())
                .find(|instance| instance.status == InstanceStatus::Running)
                .cloned();
            Ok(running.or(first))
        })
    }

    fn instances(&self) -> StoreFuture<'_, Vec<VulInstance>> {
        self.with(|tables| Ok(tables.instances.values().cloned().collect()))
    }

    fn instances_by_user(&self, user_id: u64) -> StoreFuture<'_, Vec<VulInstance>> {
        self.with(move |tables| {
            Ok(tables
                .instances
                .values()
                .filter(|instance| instance.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn instances_by_env(&self, env_id: u64) -> StoreFuture<'_, Vec<VulInstance>> {
        self.with(move |tables| {
            Ok(tables
                .instances
                .values()
                .filter(|instance| instance.env_id == env_id)
                .cloned()
                .collect())
        })
    }

    fn instances_page(&self, offset: usize, limit: usize) -> StoreFuture<'_, Page<VulInstance>> {
        self.with(move |tables| Ok(page(&tables.instances, offset, limit)))
    }

    fn update_instance(&self, instance: VulInstance) -> StoreFuture<'_, ()> {
        self.with(move |tables| match tables.instances.get_mut(&instance.id) {
            Some(stored) => {
                *stored = instance;
                Ok(())
            }
            None => Err(missing("instance", instance.id)),
        })
    }

    fn delete_instance(&self, instance_id: u64) -> StoreFuture<'_, ()> {
        self.with(move |tables| {
            tables
                .instances
                .remove(&instance_id)
                .map(|_| ())
                .ok_or_else(|| missing("instance", instance_id))
        })
    }

    fn delete_instances_by_env(&self, env_id: u64) -> StoreFuture<'_, usize> {
        self.with(move |tables| {
            let before = tables.instances.len();
            tables.instances.retain(|_, instance| instance.env_id != env_id);
            Ok(before.saturating_sub(tables.instances.len()))
        })
    }

    fn debit_balance(&self, user_id: u64, amount: f64) -> StoreFuture<'_, ()> {
        self.with(move |tables| {
            let balance = tables.balances.entry(user_id).or_default();
            *balance = debit(*balance, amount);
            Ok(())
        })
    }
}
