//! Internal shard replicating writes to every child.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use rand::Rng;

use crate::route::{DispatchError, Query};

use super::{new_node_id, ConfigMap, Shard, ShardError};

const KIND: &str = "replicate";

struct State<C: Send + 'static> {
    parent: Option<Weak<dyn Shard<C>>>,
    children: Vec<Arc<dyn Shard<C>>>,
    id: String,
}

/// Internal node whose children are functionally interchangeable for
/// reads. A read query recurses into one child picked uniformly at
/// random; a write query recurses into every child sequentially in
/// child-list order.
pub struct ReplicateShard<C: Send + 'static> {
    state: RwLock<State<C>>,
    destroyed: AtomicBool,
}

impl<C: Send + 'static> ReplicateShard<C> {
    pub fn new() -> Arc<Self> {
        Arc::new(ReplicateShard {
            state: RwLock::new(State {
                parent: None,
                children: Vec::new(),
                id: String::new(),
            }),
            destroyed: AtomicBool::new(false),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State<C>> {
        self.state.read().expect("replicate shard lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<C>> {
        self.state.write().expect("replicate shard lock poisoned")
    }
}

impl<C: Send + 'static> Shard<C> for ReplicateShard<C> {
    fn parent(&self) -> Option<Arc<dyn Shard<C>>> {
        self.read().parent.as_ref().and_then(Weak::upgrade)
    }

    fn children(&self) -> Vec<Arc<dyn Shard<C>>> {
        self.read().children.clone()
    }

    fn set_parent(&self, parent: Weak<dyn Shard<C>>) {
        self.write().parent = Some(parent);
    }

    fn add_child(self: Arc<Self>, child: Arc<dyn Shard<C>>) {
        let this: Arc<dyn Shard<C>> = self.clone();
        child.set_parent(Arc::downgrade(&this));
        self.write().children.push(child);
    }

    fn remove_child(&self, id: &str) {
        let mut state = self.write();
        if let Some(index) = state.children.iter().position(|child| child.id() == id) {
            let child = state.children.swap_remove(index);
            child.destroy();
        }
    }

    fn id(&self) -> String {
        self.read().id.clone()
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn setup(&self, _config: &ConfigMap) -> Result<(), ShardError> {
        self.write().id = new_node_id().to_string();
        Ok(())
    }

    fn config(&self) -> Option<ConfigMap> {
        None
    }

    fn destroy(&self) {
        let was_destroyed = self.destroyed.swap(true, Ordering::SeqCst);
        debug_assert!(!was_destroyed, "replicate shard destroyed twice");
        let state = self.write();
        for child in &state.children {
            child.destroy();
        }
    }

    fn query(&self, query: &mut Query<C>) -> Result<(), DispatchError> {
        let state = self.read();
        if query.read_only() {
            if state.children.is_empty() {
                return Err(DispatchError::NoChildren { id: state.id.clone() });
            }
            let index = rand::rng().random_range(0..state.children.len());
            state.children[index].query(query)
        } else {
            // Every child is attempted; the first error is the reported
            // result.
            let mut first_err = None;
            for child in &state.children {
                if let Err(err) = child.query(query) {
                    tracing::warn!(
                        child = %child.id(),
                        "write fan-out to child shard failed: {err}"
                    );
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
            match first_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A stub leaf that records how many times it was queried and can be
    // primed to fail.
    struct StubShard {
        id: String,
        calls: std::sync::atomic::AtomicUsize,
        fail: bool,
        destroyed: AtomicBool,
    }

    impl StubShard {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(StubShard {
                id: id.to_string(),
                calls: std::sync::atomic::AtomicUsize::new(0),
                fail: false,
                destroyed: AtomicBool::new(false),
            })
        }

        fn failing(id: &str) -> Arc<Self> {
            Arc::new(StubShard {
                id: id.to_string(),
                calls: std::sync::atomic::AtomicUsize::new(0),
                fail: true,
                destroyed: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Shard<()> for StubShard {
        fn parent(&self) -> Option<Arc<dyn Shard<()>>> {
            None
        }

        fn children(&self) -> Vec<Arc<dyn Shard<()>>> {
            Vec::new()
        }

        fn set_parent(&self, _parent: Weak<dyn Shard<()>>) {}

        fn add_child(self: Arc<Self>, _child: Arc<dyn Shard<()>>) {}

        fn remove_child(&self, _id: &str) {}

        fn id(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> &'static str {
            "stub"
        }

        fn setup(&self, _config: &ConfigMap) -> Result<(), ShardError> {
            Ok(())
        }

        fn config(&self) -> Option<ConfigMap> {
            None
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }

        fn query(&self, _query: &mut Query<()>) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DispatchError::Backend("stub failure".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Key(i64);

    impl crate::route::ShardKey for Key {
        fn shard_key(&self) -> i64 {
            self.0
        }
    }

    fn write_query() -> Query<()> {
        let mut query = Query::new("Svc.Put", Key(1));
        query.resolve(Arc::new(crate::route::MethodDescriptor::write(
            |_conn: &mut (), _arg: &Key| Ok(()),
        )));
        query
    }

    fn read_query() -> Query<()> {
        let mut query = Query::new("Svc.Get", Key(1));
        query.resolve(Arc::new(crate::route::MethodDescriptor::read(
            |_conn: &mut (), _arg: &Key| Ok(0i64),
        )));
        query
    }

    fn replica_with(children: &[Arc<StubShard>]) -> Arc<ReplicateShard<()>> {
        let shard = ReplicateShard::new();
        shard.setup(&ConfigMap::new()).unwrap();
        for child in children {
            shard.clone().add_child(child.clone() as Arc<dyn Shard<()>>);
        }
        shard
    }

    #[test]
    fn write_reaches_every_child_in_order() {
        let a = StubShard::new("a");
        let b = StubShard::new("b");
        let shard = replica_with(&[a.clone(), b.clone()]);

        shard.query(&mut write_query()).unwrap();
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[test]
    fn read_reaches_exactly_one_child() {
        let a = StubShard::new("a");
        let b = StubShard::new("b");
        let shard = replica_with(&[a.clone(), b.clone()]);

        shard.query(&mut read_query()).unwrap();
        assert_eq!(a.calls() + b.calls(), 1);
    }

    #[test]
    fn write_fan_out_attempts_all_children_and_reports_first_error() {
        let bad = StubShard::failing("bad");
        let good = StubShard::new("good");
        let shard = replica_with(&[bad.clone(), good.clone()]);

        let err = shard.query(&mut write_query()).unwrap_err();
        assert!(matches!(err, DispatchError::Backend(_)));
        assert_eq!(bad.calls(), 1);
        assert_eq!(good.calls(), 1);
    }

    #[test]
    fn read_with_no_children_fails() {
        let shard = replica_with(&[]);
        let err = shard.query(&mut read_query()).unwrap_err();
        assert!(matches!(err, DispatchError::NoChildren { .. }));
    }

    #[test]
    fn add_child_links_parent() {
        let shard = replica_with(&[]);
        let child = ReplicateShard::new();
        child.setup(&ConfigMap::new()).unwrap();
        shard
            .clone()
            .add_child(child.clone() as Arc<dyn Shard<()>>);

        let parent = child.parent().expect("child should have a parent");
        assert_eq!(parent.id(), shard.id());
    }

    #[test]
    fn remove_child_destroys_it() {
        let a = StubShard::new("a");
        let b = StubShard::new("b");
        let shard = replica_with(&[a.clone(), b.clone()]);

        shard.remove_child("a");
        assert!(a.destroyed.load(Ordering::SeqCst));
        assert!(!b.destroyed.load(Ordering::SeqCst));
        assert_eq!(shard.children().len(), 1);
        assert_eq!(shard.children()[0].id(), "b");
    }

    #[test]
    fn destroy_recurses_into_children() {
        let a = StubShard::new("a");
        let shard = replica_with(&[a.clone()]);
        shard.destroy();
        assert!(a.destroyed.load(Ordering::SeqCst));
    }
}
