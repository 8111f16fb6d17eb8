//! Shard type registry.
//!
//! Maps a registered type name to a factory producing a fresh, set-up
//! shard instance from a config map. Registries are created once at
//! startup and shared by `Arc`; lookups are safe concurrently with
//! registration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::pool::PoolRegistry;

use super::{ConfigMap, PhysicalShard, ReplicateShard, Shard, ShardError};

/// Factory building a configured shard node from its config map.
pub type ShardFactory<C> =
    Arc<dyn Fn(&ConfigMap) -> Result<Arc<dyn Shard<C>>, ShardError> + Send + Sync>;

/// Derive the registered name for a declared shard type name: a trailing
/// `"Shard"` is stripped and the result lowercased, so `"PhysicalShard"`
/// registers as `"physical"`.
pub fn shard_type_name(declared: &str) -> String {
    let base = declared.strip_suffix("Shard").unwrap_or(declared);
    base.to_ascii_lowercase()
}

pub struct ShardRegistry<C> {
    factories: RwLock<HashMap<String, ShardFactory<C>>>,
}

impl<C: Send + 'static> ShardRegistry<C> {
    pub fn new() -> Self {
        ShardRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in `physical` and `replicate` types;
    /// physical shards draw their pools from `pools`.
    pub fn with_builtins(pools: Arc<PoolRegistry<C>>) -> Self {
        let registry = Self::new();
        registry.register("PhysicalShard", move |config| {
            let shard = PhysicalShard::new(Arc::clone(&pools));
            shard.setup(config)?;
            Ok(shard as Arc<dyn Shard<C>>)
        });
        registry.register("ReplicateShard", |config| {
            let shard = ReplicateShard::new();
            shard.setup(config)?;
            Ok(shard as Arc<dyn Shard<C>>)
        });
        registry
    }

    /// Register a factory under the declared type name (normalized via
    /// [`shard_type_name`]), replacing any previous registration.
    pub fn register<F>(&self, declared: &str, factory: F)
    where
        F: Fn(&ConfigMap) -> Result<Arc<dyn Shard<C>>, ShardError> + Send + Sync + 'static,
    {
        let mut factories = self
            .factories
            .write()
            .expect("shard registry lock poisoned");
        factories.insert(shard_type_name(declared), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<ShardFactory<C>> {
        let factories = self.factories.read().expect("shard registry lock poisoned");
        factories.get(name).cloned()
    }
}

impl<C: Send + 'static> Default for ShardRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
