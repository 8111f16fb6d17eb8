//! Service and method descriptors.
//!
//! Methods are registered as explicit descriptors binding a typed handler
//! closure: read methods take `(connection, arg)` and produce a reply,
//! write methods take `(connection, arg)` and produce nothing. The typed
//! closure is erased at registration; argument downcast mismatches
//! surface at call time.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BackendError;

use super::{DispatchError, ShardKey};

type ErasedHandler<C> = Box<
    dyn Fn(&mut C, &dyn Any) -> Result<Option<Box<dyn Any + Send>>, DispatchError> + Send + Sync,
>;

pub struct MethodDescriptor<C> {
    handler: ErasedHandler<C>,
    read_only: bool,
}

impl<C: Send + 'static> MethodDescriptor<C> {
    /// A read-only method: the handler's return value becomes the query
    /// reply.
    pub fn read<A, R, F>(handler: F) -> Self
    where
        A: ShardKey + Any,
        R: Any + Send,
        F: Fn(&mut C, &A) -> Result<R, BackendError> + Send + Sync + 'static,
    {
        let handler: ErasedHandler<C> = Box::new(move |conn, arg| {
            let arg = arg
                .downcast_ref::<A>()
                .ok_or(DispatchError::ArgType {
                    expected: std::any::type_name::<A>(),
                })?;
            let reply = handler(conn, arg).map_err(DispatchError::Backend)?;
            Ok(Some(Box::new(reply) as Box<dyn Any + Send>))
        });
        MethodDescriptor {
            handler,
            read_only: true,
        }
    }

    /// A write method: no reply; the mutation is fanned out to every
    /// replica by the shard tree.
    pub fn write<A, F>(handler: F) -> Self
    where
        A: ShardKey + Any,
        F: Fn(&mut C, &A) -> Result<(), BackendError> + Send + Sync + 'static,
    {
        let handler: ErasedHandler<C> = Box::new(move |conn, arg| {
            let arg = arg
                .downcast_ref::<A>()
                .ok_or(DispatchError::ArgType {
                    expected: std::any::type_name::<A>(),
                })?;
            handler(conn, arg).map_err(DispatchError::Backend)?;
            Ok(None)
        });
        MethodDescriptor {
            handler,
            read_only: false,
        }
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn call(
        &self,
        conn: &mut C,
        arg: &dyn Any,
    ) -> Result<Option<Box<dyn Any + Send>>, DispatchError> {
        (self.handler)(conn, arg)
    }
}

/// A named set of methods.
pub struct Service<C> {
    name: String,
    methods: HashMap<String, Arc<MethodDescriptor<C>>>,
}

impl<C: Send + 'static> Service<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Service {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method, replacing any previous one with the same name.
    pub fn method(mut self, name: impl Into<String>, descriptor: MethodDescriptor<C>) -> Self {
        self.methods
            .insert(name.into(), Arc::new(descriptor));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub(crate) fn get(&self, method: &str) -> Option<Arc<MethodDescriptor<C>>> {
        self.methods.get(method).cloned()
    }
}
