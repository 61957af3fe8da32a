//! Asynchronous tree traversal
//!
//! Nodes are addressed by identity; a [`Hierarchy`] answers "what are the
//! children of this node" through lookup, so parents and children never
//! hold references to each other.
//!
//! Visits are asynchronous: each one returns a promise and the traversal
//! waits for it before moving on. Siblings are always visited concurrently
//! and joined with [`Kernel::all`].

use crate::promise::{Kernel, Promise};
use serde_json::Value;
use std::fmt::Debug;
use std::rc::Rc;

/// Identity-based view of a node hierarchy
pub trait Hierarchy {
    /// Node identity
    type Id: Copy + Debug + 'static;

    /// Ordered child identities, or `None` for an unknown node
    fn children(&self, id: Self::Id) -> Option<Vec<Self::Id>>;
}

type Visit<Id> = Rc<dyn Fn(Id) -> Result<Promise, Value>>;

/// Parent-first and children-first traversal over a [`Hierarchy`]
pub struct TreeTraversal<H: Hierarchy> {
    kernel: Kernel,
    hierarchy: Rc<H>,
}

impl<H: Hierarchy> Clone for TreeTraversal<H> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            hierarchy: Rc::clone(&self.hierarchy),
        }
    }
}

impl<H: Hierarchy + 'static> TreeTraversal<H> {
    pub fn new(kernel: Kernel, hierarchy: Rc<H>) -> Self {
        Self { kernel, hierarchy }
    }

    /// The hierarchy being walked
    pub fn hierarchy(&self) -> &Rc<H> {
        &self.hierarchy
    }

    /// Visit `root`, then all of its subtrees concurrently
    ///
    /// Children are looked up after the root's visit completes, so a visit
    /// may attach children to the node it is visiting. The returned promise
    /// fulfills with `null` once every subtree has been visited and rejects
    /// with the first failure anywhere in the tree.
    pub fn parent_first<V>(&self, root: H::Id, visit: V) -> Promise
    where
        V: Fn(H::Id) -> Result<Promise, Value> + 'static,
    {
        self.descend_parent_first(root, Rc::new(visit))
    }

    /// Visit all subtrees of `root` concurrently, then `root` itself
    pub fn children_first<V>(&self, root: H::Id, visit: V) -> Promise
    where
        V: Fn(H::Id) -> Result<Promise, Value> + 'static,
    {
        self.descend_children_first(root, Rc::new(visit))
    }

    fn descend_parent_first(&self, root: H::Id, visit: Visit<H::Id>) -> Promise {
        if self.hierarchy.children(root).is_none() {
            return self.kernel.reject(unknown_node(root));
        }
        let visited = match visit(root) {
            Ok(promise) => promise,
            Err(reason) => return self.kernel.reject(reason),
        };

        let traversal = self.clone();
        visited.then(move |_| {
            let children = traversal
                .hierarchy
                .children(root)
                .ok_or_else(|| unknown_node(root))?;
            tracing::trace!(node = ?root, children = children.len(), "descending parent-first");
            let subtrees: Vec<Promise> = children
                .into_iter()
                .map(|child| traversal.descend_parent_first(child, Rc::clone(&visit)))
                .collect();
            Ok(traversal.kernel.all(subtrees).then(|_| Ok(Value::Null)))
        })
    }

    fn descend_children_first(&self, root: H::Id, visit: Visit<H::Id>) -> Promise {
        let Some(children) = self.hierarchy.children(root) else {
            return self.kernel.reject(unknown_node(root));
        };
        tracing::trace!(node = ?root, children = children.len(), "descending children-first");
        let subtrees: Vec<Promise> = children
            .into_iter()
            .map(|child| self.descend_children_first(child, Rc::clone(&visit)))
            .collect();

        self.kernel.all(subtrees).then(move |_| {
            let visited = visit(root)?;
            Ok(visited.then(|_| Ok(Value::Null)))
        })
    }
}

fn unknown_node(id: impl Debug) -> Value {
    Value::from(format!("unknown tree node {id:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Deferred;
    use crate::scheduler::Scheduler;
    use rustc_hash::FxHashMap;
    use serde_json::json;
    use std::cell::RefCell;

    struct Tree(FxHashMap<u32, Vec<u32>>);

    impl Hierarchy for Tree {
        type Id = u32;

        fn children(&self, id: u32) -> Option<Vec<u32>> {
            self.0.get(&id).cloned()
        }
    }

    /// 1 -> [2, 3], 2 -> [4]
    fn sample() -> Rc<Tree> {
        let mut nodes = FxHashMap::default();
        nodes.insert(1, vec![2, 3]);
        nodes.insert(2, vec![4]);
        nodes.insert(3, vec![]);
        nodes.insert(4, vec![]);
        Rc::new(Tree(nodes))
    }

    struct Harness {
        scheduler: Scheduler,
        traversal: TreeTraversal<Tree>,
        started: Rc<RefCell<Vec<u32>>>,
        gates: Rc<RefCell<FxHashMap<u32, Deferred>>>,
    }

    impl Harness {
        fn new() -> Self {
            let scheduler = Scheduler::new();
            let kernel = Kernel::new(scheduler.clone());
            Self {
                scheduler,
                traversal: TreeTraversal::new(kernel, sample()),
                started: Rc::new(RefCell::new(Vec::new())),
                gates: Rc::new(RefCell::new(FxHashMap::default())),
            }
        }

        /// Visit that records the node and leaves it pending until released
        fn visit(&self) -> impl Fn(u32) -> Result<Promise, Value> + 'static {
            let kernel = Kernel::new(self.scheduler.clone());
            let started = Rc::clone(&self.started);
            let gates = Rc::clone(&self.gates);
            move |id| {
                started.borrow_mut().push(id);
                let gate = kernel.defer();
                let promise = gate.promise();
                gates.borrow_mut().insert(id, gate);
                Ok(promise)
            }
        }

        fn release(&self, id: u32) {
            let gate = self.gates.borrow_mut().remove(&id).unwrap();
            gate.resolve(());
            self.scheduler.run_until_idle().unwrap();
        }

        fn started(&self) -> Vec<u32> {
            self.started.borrow().clone()
        }
    }

    #[test]
    fn test_parent_first_visits_root_before_children() {
        let harness = Harness::new();
        let done = harness.traversal.parent_first(1, harness.visit());
        harness.scheduler.run_until_idle().unwrap();
        assert_eq!(harness.started(), vec![1]);

        harness.release(1);
        assert_eq!(harness.started(), vec![1, 2, 3]);

        harness.release(3);
        harness.release(2);
        assert_eq!(harness.started(), vec![1, 2, 3, 4]);
        assert!(!done.is_settled());

        harness.release(4);
        assert_eq!(done.outcome(), Some(Ok(json!(null))));
    }

    #[test]
    fn test_children_first_visits_children_before_root() {
        let harness = Harness::new();
        let done = harness.traversal.children_first(1, harness.visit());
        harness.scheduler.run_until_idle().unwrap();
        // Leaves start concurrently; 2 waits for 4
        assert_eq!(harness.started(), vec![4, 3]);

        harness.release(4);
        assert_eq!(harness.started(), vec![4, 3, 2]);
        harness.release(2);
        assert_eq!(harness.started(), vec![4, 3, 2]);
        harness.release(3);
        assert_eq!(harness.started(), vec![4, 3, 2, 1]);
        assert!(!done.is_settled());

        harness.release(1);
        assert_eq!(done.outcome(), Some(Ok(json!(null))));
    }

    #[test]
    fn test_child_rejection_reaches_aggregate() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let traversal = TreeTraversal::new(kernel.clone(), sample());
        let done = traversal.parent_first(1, move |id| {
            if id == 4 {
                Ok(kernel.reject(format!("node {id} failed")))
            } else {
                Ok(kernel.when(()))
            }
        });
        scheduler.run_until_idle().unwrap();
        assert_eq!(done.outcome(), Some(Err(json!("node 4 failed"))));
    }

    #[test]
    fn test_visit_error_becomes_rejection() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let traversal = TreeTraversal::new(kernel.clone(), sample());
        let done = traversal.children_first(1, move |id| {
            if id == 3 {
                Err(json!("cannot visit 3"))
            } else {
                Ok(kernel.when(()))
            }
        });
        scheduler.run_until_idle().unwrap();
        assert_eq!(done.outcome(), Some(Err(json!("cannot visit 3"))));
    }

    #[test]
    fn test_unknown_root_rejects_without_visiting() {
        let scheduler = Scheduler::new();
        let kernel = Kernel::new(scheduler.clone());
        let traversal = TreeTraversal::new(kernel.clone(), sample());
        let visited = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&visited);
        let done = traversal.parent_first(99, move |id| {
            sink.borrow_mut().push(id);
            Ok(kernel.when(()))
        });
        scheduler.run_until_idle().unwrap();
        assert!(visited.borrow().is_empty());
        assert_eq!(done.outcome(), Some(Err(json!("unknown tree node 99"))));
    }
}
