//! Shard tree nodes and composition.
//!
//! A shard tree routes queries from a root down to physical leaves. Every
//! node implements the [`Shard`] capability set; the built-in variants are
//! [`PhysicalShard`] (leaf bound to one backend via a pool) and
//! [`ReplicateShard`] (internal node fanning writes to all children and
//! reads to one). Parent links are weak back-references; ownership flows
//! strictly from parent to children.

use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::route::{DispatchError, Query};

mod config;
mod physical;
mod registry;
mod replicate;

pub use config::{ConfigError, ShardConfig};
pub use physical::PhysicalShard;
pub use registry::{shard_type_name, ShardFactory, ShardRegistry};
pub use replicate::ReplicateShard;

/// JSON object carried in a shard's `config` slot.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("missing '{field}' in {kind} shard config")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("expected a string for '{field}' in {kind} shard config")]
    FieldType { kind: &'static str, field: &'static str },
    #[error("unknown pool type '{name}'")]
    UnknownPoolType { name: String },
}

/// Capability set implemented by every shard tree node.
///
/// `C` is the backend connection type handed to service handlers by the
/// physical leaves. Nodes are shared as `Arc<dyn Shard<C>>`; each node
/// guards its own state with a read-write lock, and `query` holds that
/// node's read lock for the duration of downstream dispatch.
pub trait Shard<C: Send + 'static>: Send + Sync {
    /// Parent node, or `None` at the root (or if the parent was dropped).
    fn parent(&self) -> Option<Arc<dyn Shard<C>>>;

    /// Snapshot of the node's children, in child-list order.
    fn children(&self) -> Vec<Arc<dyn Shard<C>>>;

    fn set_parent(&self, parent: Weak<dyn Shard<C>>);

    /// Attach `child`, also linking its parent back to this node.
    fn add_child(self: Arc<Self>, child: Arc<dyn Shard<C>>);

    /// Destroy and remove the child with the given id, if present. The
    /// order of the remaining children is unspecified.
    fn remove_child(&self, id: &str);

    /// Unique id of this node. A physical shard's id is its backing url.
    fn id(&self) -> String;

    /// Registered type tag, e.g. `"physical"` or `"replicate"`.
    fn kind(&self) -> &'static str;

    /// Configure the node. Called exactly once, before the node joins a
    /// tree.
    fn setup(&self, config: &ConfigMap) -> Result<(), ShardError>;

    /// Config that [`setup`](Shard::setup) would accept to recreate this
    /// node, or `None` if the node carries no configuration of its own.
    fn config(&self) -> Option<ConfigMap>;

    /// Release this node's resources, destroying children first. One-shot:
    /// a second call is a bug and panics in debug builds.
    fn destroy(&self);

    fn query(&self, query: &mut Query<C>) -> Result<(), DispatchError>;
}

/// Generates node ids for internal shards.
pub(crate) fn new_node_id() -> uuid::Uuid {
    use rand::RngCore;
    let mut rng = rand::rng();
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Uuid::from_bytes(bytes)
}
