use thiserror::Error;

use crate::pool::PoolError;
use crate::queue::QueueError;
use crate::route::DispatchError;
use crate::shard::{ConfigError, ShardError};

/// Error type produced by user-supplied backend callbacks (dial, health
/// check, service handlers). Returned verbatim to the query caller.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-level convenience error.
///
/// A thin wrapper over the per-subsystem errors; match on the variant to
/// recover the original.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
