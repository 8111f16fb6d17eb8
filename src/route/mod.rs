//! Query routing: forwarding table, service descriptors, dispatcher.

use thiserror::Error;

use crate::error::BackendError;
use crate::pool::PoolError;

mod dispatcher;
mod forwarding;
mod query;
mod service;

pub use dispatcher::Dispatcher;
pub use forwarding::ForwardingTable;
pub use query::{Query, ShardKey};
pub use service::{MethodDescriptor, Service};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid method path '{path}', expected 'Service.Method'")]
    InvalidMethodPath { path: String },
    #[error("unknown service '{name}'")]
    UnknownService { name: String },
    #[error("unknown method '{path}'")]
    UnknownMethod { path: String },
    #[error("no shard for key {key}")]
    NoShardForKey { key: i64 },
    #[error("service '{name}' is already registered")]
    DuplicateService { name: String },
    #[error("service '{name}' has no methods")]
    EmptyService { name: String },
    #[error("query argument is not a {expected}")]
    ArgType { expected: &'static str },
    #[error("query was not routed through a dispatcher")]
    Unrouted,
    #[error("shard '{id}' is not set up")]
    ShardNotSetUp { id: String },
    #[error("replicate shard '{id}' has no children")]
    NoChildren { id: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("backend error: {0}")]
    Backend(BackendError),
}
