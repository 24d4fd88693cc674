use bincode::{Decode, Encode};
use std::collections::HashMap;

use crate::communication::transports::PeerId;

pub type TaskId = u64;

/// Where a subtree reports back to: the dispatching peer and its task id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ParentRef {
    pub peer: PeerId,
    pub task_id: TaskId,
}

#[derive(Debug)]
struct Task {
    parent: Option<ParentRef>,
    outstanding: u32,
    local_done: bool,
}

/// A task that just left the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fulfilled {
    /// The search root: the whole distributed search is exhausted.
    Root,
    /// Report to this parent.
    Child(ParentRef),
}

/// In-flight search tasks owned by one peer.
///
/// A task stays registered while its local walk is still running or any of
/// its dispatched children has not reported back. It is removed on the
/// transition to "done and no children", which happens exactly once.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: TaskId,
    tasks: HashMap<TaskId, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root task of the search. It has no local walk; it starts with the one
    /// child that carries the empty node.
    pub fn create_root(&mut self) -> TaskId {
        let id = self.alloc();
        self.tasks.insert(
            id,
            Task {
                parent: None,
                outstanding: 1,
                local_done: true,
            },
        );
        id
    }

    /// Task for one received node; its local walk is running.
    pub fn create(&mut self, parent: ParentRef) -> TaskId {
        let id = self.alloc();
        self.tasks.insert(
            id,
            Task {
                parent: Some(parent),
                outstanding: 0,
                local_done: false,
            },
        );
        id
    }

    fn alloc(&mut self) -> TaskId {
        self.next_id += 1;
        self.next_id
    }

    /// Record one dispatched child. Must precede the send.
    pub fn add_child(&mut self, id: TaskId) {
        if let Some(t) = self.tasks.get_mut(&id) {
            t.outstanding += 1;
        }
    }

    /// The local walk of `id` ended.
    pub fn finish_local(&mut self, id: TaskId) -> Option<Fulfilled> {
        let t = self.tasks.get_mut(&id)?;
        t.local_done = true;
        self.take_if_fulfilled(id)
    }

    /// A child of `id` reported fulfillment. Unknown ids yield `None`.
    pub fn child_fulfilled(&mut self, id: TaskId) -> Option<Fulfilled> {
        let t = self.tasks.get_mut(&id)?;
        t.outstanding = t.outstanding.saturating_sub(1);
        self.take_if_fulfilled(id)
    }

    fn take_if_fulfilled(&mut self, id: TaskId) -> Option<Fulfilled> {
        let done = self
            .tasks
            .get(&id)
            .is_some_and(|t| t.local_done && t.outstanding == 0);
        if !done {
            return None;
        }
        let t = self.tasks.remove(&id)?;
        Some(match t.parent {
            None => Fulfilled::Root,
            Some(p) => Fulfilled::Child(p),
        })
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> ParentRef {
        ParentRef {
            peer: PeerId::from_bytes([7; 16]),
            task_id: 42,
        }
    }

    #[test]
    fn task_is_removed_after_the_kth_child_exactly_once() {
        for k in 0..5u32 {
            let mut r = TaskRegistry::new();
            let id = r.create(parent());
            for _ in 0..k {
                r.add_child(id);
            }
            let first = r.finish_local(id);
            if k == 0 {
                assert_eq!(first, Some(Fulfilled::Child(parent())));
                assert!(!r.contains(id));
                continue;
            }
            assert_eq!(first, None);
            for i in 1..k {
                assert_eq!(r.child_fulfilled(id), None, "early at {i}/{k}");
                assert!(r.contains(id));
            }
            assert_eq!(r.child_fulfilled(id), Some(Fulfilled::Child(parent())));
            assert!(r.is_empty());
            assert_eq!(r.child_fulfilled(id), None);
        }
    }

    #[test]
    fn children_finishing_before_the_walk_do_not_fulfil() {
        let mut r = TaskRegistry::new();
        let id = r.create(parent());
        r.add_child(id);
        assert_eq!(r.child_fulfilled(id), None);
        assert!(r.contains(id));
        assert_eq!(r.finish_local(id), Some(Fulfilled::Child(parent())));
    }

    #[test]
    fn root_fulfils_on_its_single_child() {
        let mut r = TaskRegistry::new();
        let root = r.create_root();
        let other = r.create(parent());
        assert_ne!(root, other);
        assert_eq!(r.child_fulfilled(root), Some(Fulfilled::Root));
        assert_eq!(r.len(), 1);
    }
}
