//! Resolves queries to shards and invokes the shard tree.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::forwarding::ForwardingTable;
use super::query::Query;
use super::service::Service;
use super::DispatchError;

/// The in-process entry point: resolves a query's service and method,
/// routes its shard key through the forwarding table, and invokes the
/// shard subtree. Replies land in the query's reply slot.
pub struct Dispatcher<C: Send + 'static> {
    forwarding: Arc<ForwardingTable<C>>,
    services: RwLock<HashMap<String, Arc<Service<C>>>>,
}

impl<C: Send + 'static> Dispatcher<C> {
    pub fn new(forwarding: Arc<ForwardingTable<C>>) -> Self {
        Dispatcher {
            forwarding,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn forwarding(&self) -> &Arc<ForwardingTable<C>> {
        &self.forwarding
    }

    /// Register a service. Duplicate names and services without methods
    /// are rejected.
    pub fn register(&self, service: Service<C>) -> Result<(), DispatchError> {
        if service.is_empty() {
            return Err(DispatchError::EmptyService {
                name: service.name().to_string(),
            });
        }
        let mut services = self.services.write().expect("service table lock poisoned");
        if services.contains_key(service.name()) {
            return Err(DispatchError::DuplicateService {
                name: service.name().to_string(),
            });
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    pub fn dispatch(&self, query: &mut Query<C>) -> Result<(), DispatchError> {
        let path = query.method_path().to_string();
        let (service_name, method_name) = split_method_path(&path)
            .ok_or_else(|| DispatchError::InvalidMethodPath { path: path.clone() })?;

        let service = {
            let services = self.services.read().expect("service table lock poisoned");
            services.get(service_name).cloned()
        }
        .ok_or_else(|| DispatchError::UnknownService {
            name: service_name.to_string(),
        })?;
        let method = service
            .get(method_name)
            .ok_or_else(|| DispatchError::UnknownMethod { path: path.clone() })?;
        query.resolve(method);

        let key = query.shard_key();
        let root = self
            .forwarding
            .lookup(key)
            .ok_or(DispatchError::NoShardForKey { key })?;
        root.query(query)
    }
}

// Exactly two non-empty dot-separated parts.
fn split_method_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.split_once('.')?;
    if service.is_empty() || method.is_empty() || method.contains('.') {
        return None;
    }
    Some((service, method))
}
