//! Per-destination connection pooling.
//!
//! A [`Pool`] keeps a LIFO cache of idle backend connections for one
//! destination url. Borrowers receive a [`PooledConn`] guard that returns
//! the connection to the pool when dropped. [`PoolPrototype`] is the
//! immutable template a physical shard instantiates a pool from, and
//! [`PoolRegistry`] maps short prototype names to prototypes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::BackendError;

/// Application-supplied function creating a new connection to `url`.
pub type DialFn<C> = Arc<dyn Fn(&str) -> Result<C, BackendError> + Send + Sync>;

/// Optional application-supplied health check run before an idle
/// connection is handed out again. The `Instant` is the time the
/// connection was last released to the pool. An error closes the
/// connection and the pool moves on to the next idle entry.
pub type TestOnBorrowFn<C> = Arc<dyn Fn(&mut C, Instant) -> Result<(), BackendError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("borrow on closed pool ({url})")]
    Closed { url: String },
    #[error("dial {url} failed: {source}")]
    Dial { url: String, source: BackendError },
}

struct IdleConn<C> {
    conn: C,
    released_at: Instant,
}

struct Inner<C> {
    // LIFO: most recently released at the front.
    idle: VecDeque<IdleConn<C>>,
    closed: bool,
}

struct Shared<C> {
    url: String,
    dial: DialFn<C>,
    test_on_borrow: Option<TestOnBorrowFn<C>>,
    max_idle: usize,
    idle_timeout: Duration,
    inner: Mutex<Inner<C>>,
}

/// A pool of reusable connections to one destination.
///
/// Cheap to clone; all clones share the same idle list.
pub struct Pool<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("url", &self.shared.url)
            .field("max_idle", &self.shared.max_idle)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Pool<C> {
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Number of idle connections currently cached.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<C>> {
        self.shared.inner.lock().expect("pool mutex poisoned")
    }

    /// Borrow a connection: an idle one if available (most recently
    /// released first), otherwise a freshly dialed one.
    pub fn borrow(&self) -> Result<PooledConn<C>, PoolError> {
        let conn = self.take()?;
        Ok(PooledConn {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    // The mutex is dropped across every close, health check, and dial so
    // the pool stays responsive while I/O is in flight.
    fn take(&self) -> Result<C, PoolError> {
        let shared = &self.shared;
        let mut inner = self.lock();
        if inner.closed {
            return Err(PoolError::Closed {
                url: shared.url.clone(),
            });
        }

        // Prune stale entries from the back (oldest release first).
        if shared.idle_timeout > Duration::ZERO {
            loop {
                let stale = match inner.idle.back() {
                    Some(entry) => entry.released_at + shared.idle_timeout <= Instant::now(),
                    None => false,
                };
                if !stale {
                    break;
                }
                let evicted = inner.idle.pop_back();
                drop(inner);
                drop(evicted);
                inner = self.lock();
                if inner.closed {
                    return Err(PoolError::Closed {
                        url: shared.url.clone(),
                    });
                }
            }
        }

        // Take from the front, health-checking each candidate.
        loop {
            let Some(entry) = inner.idle.pop_front() else {
                break;
            };
            let Some(test) = shared.test_on_borrow.clone() else {
                return Ok(entry.conn);
            };
            drop(inner);
            let mut conn = entry.conn;
            match test(&mut conn, entry.released_at) {
                Ok(()) => return Ok(conn),
                Err(err) => {
                    tracing::warn!(
                        url = %shared.url,
                        "closing idle connection that failed its borrow check: {err}"
                    );
                    drop(conn);
                    inner = self.lock();
                    if inner.closed {
                        return Err(PoolError::Closed {
                            url: shared.url.clone(),
                        });
                    }
                }
            }
        }

        drop(inner);
        (shared.dial)(&shared.url).map_err(|source| PoolError::Dial {
            url: shared.url.clone(),
            source,
        })
    }

    fn release(&self, conn: C) {
        let mut inner = self.lock();
        if inner.closed {
            drop(inner);
            drop(conn);
            return;
        }
        inner.idle.push_front(IdleConn {
            conn,
            released_at: Instant::now(),
        });
        let evicted = if inner.idle.len() > self.shared.max_idle {
            inner.idle.pop_back()
        } else {
            None
        };
        drop(inner);
        drop(evicted);
    }

    /// Close the pool: drop all idle connections and reject further
    /// borrows.
    pub fn close(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.idle)
        };
        drop(drained);
    }
}

/// A borrowed connection. Dereferences to the connection and returns it
/// to the pool on drop.
pub struct PooledConn<C: Send + 'static> {
    conn: Option<C>,
    pool: Pool<C>,
}

impl<C: Send + 'static> PooledConn<C> {
    /// Take the connection out of the guard; it will not be returned to
    /// the pool.
    pub fn detach(mut self) -> C {
        self.conn.take().expect("connection already detached")
    }
}

impl<C: Send + 'static> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection already detached")
    }
}

impl<C: Send + 'static> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection already detached")
    }
}

impl<C: Send + 'static> Drop for PooledConn<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Immutable template from which per-destination pools are instantiated.
pub struct PoolPrototype<C> {
    dial: DialFn<C>,
    test_on_borrow: Option<TestOnBorrowFn<C>>,
    max_idle: usize,
    idle_timeout: Duration,
}

impl<C: Send + 'static> PoolPrototype<C> {
    pub fn new<F>(dial: F, max_idle: usize) -> Self
    where
        F: Fn(&str) -> Result<C, BackendError> + Send + Sync + 'static,
    {
        PoolPrototype {
            dial: Arc::new(dial),
            test_on_borrow: None,
            max_idle,
            idle_timeout: Duration::ZERO,
        }
    }

    pub fn with_test_on_borrow<F>(mut self, test: F) -> Self
    where
        F: Fn(&mut C, Instant) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        self.test_on_borrow = Some(Arc::new(test));
        self
    }

    /// Close idle connections after this duration. Zero (the default)
    /// disables idle eviction.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Instantiate a fresh pool bound to `url`.
    pub fn instantiate(&self, url: &str) -> Pool<C> {
        Pool {
            shared: Arc::new(Shared {
                url: url.to_string(),
                dial: Arc::clone(&self.dial),
                test_on_borrow: self.test_on_borrow.clone(),
                max_idle: self.max_idle,
                idle_timeout: self.idle_timeout,
                inner: Mutex::new(Inner {
                    idle: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }
}

/// Registry of pool prototypes by short name. Read-heavy; registration
/// normally happens once at startup.
pub struct PoolRegistry<C> {
    prototypes: RwLock<HashMap<String, Arc<PoolPrototype<C>>>>,
}

impl<C: Send + 'static> PoolRegistry<C> {
    pub fn new() -> Self {
        PoolRegistry {
            prototypes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a prototype under `name`, replacing any previous one.
    pub fn register(&self, name: &str, prototype: PoolPrototype<C>) {
        let mut prototypes = self
            .prototypes
            .write()
            .expect("pool registry lock poisoned");
        prototypes.insert(name.to_string(), Arc::new(prototype));
    }

    pub fn get(&self, name: &str) -> Option<Arc<PoolPrototype<C>>> {
        let prototypes = self.prototypes.read().expect("pool registry lock poisoned");
        prototypes.get(name).cloned()
    }
}

impl<C: Send + 'static> Default for PoolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
