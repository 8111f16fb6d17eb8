//! A single service-method invocation.

use std::any::Any;
use std::sync::Arc;

use super::service::MethodDescriptor;
use super::DispatchError;

/// Implemented by query arguments: the shard key routes the query through
/// the forwarding table.
pub trait ShardKey {
    fn shard_key(&self) -> i64;
}

/// One invocation of `"Service.Method"`. Single-use: construct, dispatch,
/// then take the reply.
pub struct Query<C> {
    method_path: String,
    key: i64,
    arg: Box<dyn Any + Send>,
    reply: Option<Box<dyn Any + Send>>,
    method: Option<Arc<MethodDescriptor<C>>>,
}

impl<C: Send + 'static> Query<C> {
    pub fn new<A>(method_path: impl Into<String>, arg: A) -> Self
    where
        A: ShardKey + Any + Send,
    {
        let key = arg.shard_key();
        Query {
            method_path: method_path.into(),
            key,
            arg: Box::new(arg),
            reply: None,
            method: None,
        }
    }

    pub fn method_path(&self) -> &str {
        &self.method_path
    }

    pub fn shard_key(&self) -> i64 {
        self.key
    }

    /// Whether the resolved method is read-only. Unrouted queries are
    /// treated as writes.
    pub fn read_only(&self) -> bool {
        self.method.as_ref().is_some_and(|method| method.read_only())
    }

    pub(crate) fn resolve(&mut self, method: Arc<MethodDescriptor<C>>) {
        self.method = Some(method);
    }

    /// Invoke the resolved handler against a borrowed connection,
    /// capturing the reply for read methods.
    pub(crate) fn run(&mut self, conn: &mut C) -> Result<(), DispatchError> {
        let method = self.method.clone().ok_or(DispatchError::Unrouted)?;
        if let Some(reply) = method.call(conn, self.arg.as_ref())? {
            self.reply = Some(reply);
        }
        Ok(())
    }

    /// Take the reply produced by a read method, if its type matches.
    pub fn take_reply<R: Any>(&mut self) -> Option<R> {
        let reply = self.reply.take()?;
        match reply.downcast::<R>() {
            Ok(reply) => Some(*reply),
            Err(other) => {
                self.reply = Some(other);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Key(i64);

    impl ShardKey for Key {
        fn shard_key(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn key_is_extracted_at_construction() {
        let query: Query<()> = Query::new("Svc.Get", Key(42));
        assert_eq!(query.shard_key(), 42);
        assert_eq!(query.method_path(), "Svc.Get");
        assert!(!query.read_only());
    }

    #[test]
    fn run_without_resolution_fails() {
        let mut query: Query<()> = Query::new("Svc.Get", Key(1));
        let err = query.run(&mut ()).unwrap_err();
        assert!(matches!(err, DispatchError::Unrouted));
    }

    #[test]
    fn read_method_produces_a_typed_reply() {
        let mut query: Query<()> = Query::new("Svc.Get", Key(7));
        query.resolve(Arc::new(MethodDescriptor::read(
            |_conn: &mut (), arg: &Key| Ok(arg.0 * 2),
        )));
        assert!(query.read_only());

        query.run(&mut ()).unwrap();
        assert_eq!(query.take_reply::<i64>(), Some(14));
        assert_eq!(query.take_reply::<i64>(), None);
    }

    #[test]
    fn mismatched_reply_type_is_left_in_place() {
        let mut query: Query<()> = Query::new("Svc.Get", Key(7));
        query.resolve(Arc::new(MethodDescriptor::read(
            |_conn: &mut (), _arg: &Key| Ok("reply".to_string()),
        )));
        query.run(&mut ()).unwrap();

        assert_eq!(query.take_reply::<i64>(), None);
        assert_eq!(query.take_reply::<String>(), Some("reply".to_string()));
    }

    #[test]
    fn mismatched_arg_type_fails() {
        struct Other(i64);

        impl ShardKey for Other {
            fn shard_key(&self) -> i64 {
                self.0
            }
        }

        let mut query: Query<()> = Query::new("Svc.Get", Other(1));
        query.resolve(Arc::new(MethodDescriptor::read(
            |_conn: &mut (), arg: &Key| Ok(arg.0),
        )));
        let err = query.run(&mut ()).unwrap_err();
        assert!(matches!(err, DispatchError::ArgType { .. }));
    }
}
