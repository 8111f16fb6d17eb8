//! Leaf shard bound to one backend endpoint through a connection pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::Value;

use crate::pool::{Pool, PoolRegistry};
use crate::route::{DispatchError, Query};

use super::{ConfigMap, Shard, ShardError};

const KIND: &str = "physical";

struct State<C: Send + 'static> {
    parent: Option<Weak<dyn Shard<C>>>,
    pool: Option<Pool<C>>,
    config: ConfigMap,
}

/// Leaf node. `setup` requires `"url"` and `"pool"` (a registered pool
/// prototype name); queries borrow a connection, run the resolved handler,
/// and release the connection on every exit path.
pub struct PhysicalShard<C: Send + 'static> {
    pools: Arc<PoolRegistry<C>>,
    state: RwLock<State<C>>,
    destroyed: AtomicBool,
}

impl<C: Send + 'static> PhysicalShard<C> {
    pub fn new(pools: Arc<PoolRegistry<C>>) -> Arc<Self> {
        Arc::new(PhysicalShard {
            pools,
            state: RwLock::new(State {
                parent: None,
                pool: None,
                config: ConfigMap::new(),
            }),
            destroyed: AtomicBool::new(false),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State<C>> {
        self.state.read().expect("physical shard lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<C>> {
        self.state.write().expect("physical shard lock poisoned")
    }

    fn required_str<'a>(
        config: &'a ConfigMap,
        field: &'static str,
    ) -> Result<&'a str, ShardError> {
        let value = config.get(field).ok_or(ShardError::MissingField {
            kind: KIND,
            field,
        })?;
        match value {
            Value::String(s) => Ok(s),
            _ => Err(ShardError::FieldType { kind: KIND, field }),
        }
    }
}

impl<C: Send + 'static> Shard<C> for PhysicalShard<C> {
    fn parent(&self) -> Option<Arc<dyn Shard<C>>> {
        self.read().parent.as_ref().and_then(Weak::upgrade)
    }

    fn children(&self) -> Vec<Arc<dyn Shard<C>>> {
        Vec::new()
    }

    fn set_parent(&self, parent: Weak<dyn Shard<C>>) {
        self.write().parent = Some(parent);
    }

    fn add_child(self: Arc<Self>, _child: Arc<dyn Shard<C>>) {
        // Leaf: no children.
    }

    fn remove_child(&self, _id: &str) {
        // Leaf: no children.
    }

    fn id(&self) -> String {
        self.read()
            .pool
            .as_ref()
            .map(|pool| pool.url().to_string())
            .unwrap_or_default()
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn setup(&self, config: &ConfigMap) -> Result<(), ShardError> {
        let url = Self::required_str(config, "url")?;
        let pool_name = Self::required_str(config, "pool")?;
        let prototype = self
            .pools
            .get(pool_name)
            .ok_or_else(|| ShardError::UnknownPoolType {
                name: pool_name.to_string(),
            })?;

        let mut state = self.write();
        state.pool = Some(prototype.instantiate(url));
        state.config = config.clone();
        Ok(())
    }

    fn config(&self) -> Option<ConfigMap> {
        let state = self.read();
        if state.config.is_empty() {
            None
        } else {
            Some(state.config.clone())
        }
    }

    fn destroy(&self) {
        let was_destroyed = self.destroyed.swap(true, Ordering::SeqCst);
        debug_assert!(!was_destroyed, "physical shard destroyed twice");
        if let Some(pool) = self.read().pool.as_ref() {
            pool.close();
        }
    }

    fn query(&self, query: &mut Query<C>) -> Result<(), DispatchError> {
        let state = self.read();
        let pool = state
            .pool
            .as_ref()
            .ok_or_else(|| DispatchError::ShardNotSetUp { id: self.id() })?
            .clone();
        let mut conn = pool.borrow()?;
        query.run(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolPrototype;
    use serde_json::json;

    struct NullConn;

    fn registry_with(name: &str) -> Arc<PoolRegistry<NullConn>> {
        let pools = Arc::new(PoolRegistry::new());
        pools.register(name, PoolPrototype::new(|_url| Ok(NullConn), 1));
        pools
    }

    fn config(url: &str, pool: &str) -> ConfigMap {
        let Value::Object(map) = json!({ "url": url, "pool": pool }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn setup_instantiates_pool_and_records_config() {
        let shard = PhysicalShard::new(registry_with("example"));
        let config = config("backend-1", "example");
        shard.setup(&config).unwrap();

        assert_eq!(shard.id(), "backend-1");
        assert_eq!(shard.kind(), "physical");
        assert_eq!(shard.config(), Some(config));
    }

    #[test]
    fn setup_rejects_missing_fields() {
        let shard = PhysicalShard::new(registry_with("example"));

        let mut only_url = ConfigMap::new();
        only_url.insert("url".into(), Value::String("backend-1".into()));
        assert!(matches!(
            shard.setup(&only_url),
            Err(ShardError::MissingField { field: "pool", .. })
        ));

        let mut only_pool = ConfigMap::new();
        only_pool.insert("pool".into(), Value::String("example".into()));
        assert!(matches!(
            shard.setup(&only_pool),
            Err(ShardError::MissingField { field: "url", .. })
        ));
    }

    #[test]
    fn setup_rejects_non_string_url() {
        let shard = PhysicalShard::new(registry_with("example"));
        let mut bad = ConfigMap::new();
        bad.insert("url".into(), Value::from(42));
        bad.insert("pool".into(), Value::String("example".into()));
        assert!(matches!(
            shard.setup(&bad),
            Err(ShardError::FieldType { field: "url", .. })
        ));
    }

    #[test]
    fn setup_rejects_unknown_pool_type() {
        let shard = PhysicalShard::new(registry_with("example"));
        let err = shard.setup(&config("backend-1", "missing")).unwrap_err();
        assert!(matches!(err, ShardError::UnknownPoolType { name } if name == "missing"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "destroyed twice")]
    fn double_destroy_panics() {
        let shard = PhysicalShard::new(registry_with("example"));
        shard.setup(&config("backend-1", "example")).unwrap();
        shard.destroy();
        shard.destroy();
    }
}
