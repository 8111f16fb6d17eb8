//! In-process sharded RPC dispatch with a journaled at-least-once job
//! queue.
//!
//! The router half accepts service-method calls, hashes a caller-supplied
//! shard key into a [`ForwardingTable`], walks a tree of [`Shard`] nodes
//! to one or more backend connections drawn from per-destination
//! [`Pool`]s, and returns the result (reads) or fans the mutation out to
//! every replica (writes). Alongside it sits a [`JobQueue`]: append-only
//! journals, a sliding acknowledgement window, and a single-owner loop
//! giving at-least-once delivery with bounded in-flight state.
//!
//! The on-wire transport and the concrete backend driver stay outside the
//! crate; the driver arrives through the pool's dial callback, and the
//! whole router is generic over that connection type.

#![forbid(unsafe_code)]

pub mod error;
pub mod pool;
pub mod queue;
pub mod route;
pub mod shard;

pub use error::{BackendError, Error};
pub type Result<T> = std::result::Result<T, Error>;

pub use pool::{Pool, PoolError, PoolPrototype, PoolRegistry, PooledConn};
pub use queue::{AckWindow, Job, JobQueue, JournalPersister, QueueError};
pub use route::{
    DispatchError, Dispatcher, ForwardingTable, MethodDescriptor, Query, Service, ShardKey,
};
pub use shard::{
    shard_type_name, ConfigError, ConfigMap, PhysicalShard, ReplicateShard, Shard, ShardConfig,
    ShardError, ShardRegistry,
};
