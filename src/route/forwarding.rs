//! Key-range forwarding table.
//!
//! An ordered map from an inclusive maximum shard key to the root of the
//! shard subtree serving keys up to it. Lookup is a ceiling search: the
//! entry with the least `max_key >= k` wins.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::shard::{ConfigError, Shard, ShardConfig, ShardRegistry};

pub struct ForwardingTable<C: Send + 'static> {
    entries: RwLock<BTreeMap<i64, Arc<dyn Shard<C>>>>,
}

impl<C: Send + 'static> ForwardingTable<C> {
    pub fn new() -> Self {
        ForwardingTable {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a table from its JSON document: an object whose keys are
    /// decimal integers (the `max_key` of each range) and whose values
    /// are shard configs.
    pub fn from_json(json: &str, registry: &ShardRegistry<C>) -> Result<Self, ConfigError> {
        let document: BTreeMap<String, ShardConfig> = serde_json::from_str(json)?;
        Self::from_config(&document, registry)
    }

    pub fn from_config(
        config: &BTreeMap<String, ShardConfig>,
        registry: &ShardRegistry<C>,
    ) -> Result<Self, ConfigError> {
        let table = Self::new();
        for (raw_key, node) in config {
            let max_key: i64 = raw_key
                .parse()
                .map_err(|_| ConfigError::NonIntegerKey {
                    key: raw_key.clone(),
                })?;
            table.insert(max_key, node.build(registry)?);
        }
        Ok(table)
    }

    /// Serialise the table back into its JSON document form.
    pub fn to_config(&self) -> BTreeMap<String, ShardConfig> {
        self.read()
            .iter()
            .map(|(max_key, shard)| (max_key.to_string(), ShardConfig::from_shard(shard)))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<i64, Arc<dyn Shard<C>>>> {
        self.entries.read().expect("forwarding table lock poisoned")
    }

    /// Insert an entry, replacing any existing entry with the same
    /// `max_key`.
    pub fn insert(&self, max_key: i64, shard: Arc<dyn Shard<C>>) {
        let mut entries = self
            .entries
            .write()
            .expect("forwarding table lock poisoned");
        entries.insert(max_key, shard);
    }

    pub fn remove(&self, max_key: i64) -> Option<Arc<dyn Shard<C>>> {
        let mut entries = self
            .entries
            .write()
            .expect("forwarding table lock poisoned");
        entries.remove(&max_key)
    }

    /// The shard owning `key`: the entry with the least `max_key >= key`.
    pub fn lookup(&self, key: i64) -> Option<Arc<dyn Shard<C>>> {
        self.read().range(key..).next().map(|(_, shard)| shard.clone())
    }

    /// In-order snapshot of the table.
    pub fn entries(&self) -> Vec<(i64, Arc<dyn Shard<C>>)> {
        self.read()
            .iter()
            .map(|(max_key, shard)| (*max_key, shard.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<C: Send + 'static> Default for ForwardingTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
