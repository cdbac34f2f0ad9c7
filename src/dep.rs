//! Dependency registry - the atomic unit of the dependency graph.
//!
//! A `Dep` is the subscription list linking one observed property (or one
//! container as a whole) to the watchers that currently read it. The
//! evaluating watcher sits on a thread-local stack; `depend()` records the
//! top entry, `notify()` wakes every subscriber in creation order.
//!
//! Subscribers are held weakly: a watcher strongly holds the registries it
//! reads, never the reverse, so dropping an owner releases the whole graph.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::watcher::{Watcher, WatcherInner};

thread_local! {
    static DEP_ID: Cell<u64> = const { Cell::new(0) };

    /// Stack of currently-evaluating watchers. The top entry collects
    /// dependencies; nested evaluation resumes the outer watcher on pop.
    static TARGET_STACK: RefCell<Vec<Watcher>> = const { RefCell::new(Vec::new()) };
}

struct DepInner {
    id: u64,
    subs: RefCell<Vec<Weak<WatcherInner>>>,
}

/// Cheap cloneable handle; identity lives in the shared inner.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    pub fn new() -> Dep {
        let id = DEP_ID.with(|counter| {
            let id = counter.get();
            counter.set(id + 1);
            id
        });
        Dep {
            inner: Rc::new(DepInner {
                id,
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register the currently-active watcher as a subscriber, if any.
    /// Delegates to the watcher's `add_dep` so the watcher records this
    /// registry for later cleanup.
    pub fn depend(&self) {
        if let Some(watcher) = target() {
            watcher.add_dep(self);
        }
    }

    /// Notify subscribers in ascending watcher-id order. Dead entries are
    /// pruned on the way.
    pub fn notify(&self) {
        let mut live: Vec<Watcher> = Vec::new();
        self.inner.subs.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(inner) => {
                live.push(Watcher::from_inner(inner));
                true
            }
            None => false,
        });
        live.sort_by_key(Watcher::id);
        for watcher in &live {
            watcher.update();
        }
    }

    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.inner.subs.borrow_mut().push(watcher.downgrade());
    }

    pub(crate) fn remove_sub(&self, watcher_id: u64) {
        self.inner.subs.borrow_mut().retain(|weak| match weak.upgrade() {
            Some(inner) => inner.id() != watcher_id,
            None => false,
        });
    }

    /// Number of live subscribers. Gates the lazy/activated duality of
    /// computed watchers.
    pub(crate) fn live_subs(&self) -> usize {
        let mut count = 0;
        self.inner.subs.borrow_mut().retain(|weak| {
            if weak.upgrade().is_some() {
                count += 1;
                true
            } else {
                false
            }
        });
        count
    }
}

impl Default for Dep {
    fn default() -> Dep {
        Dep::new()
    }
}

pub(crate) fn push_target(watcher: &Watcher) {
    TARGET_STACK.with(|stack| stack.borrow_mut().push(watcher.clone()));
}

pub(crate) fn pop_target() {
    TARGET_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

pub(crate) fn target() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn has_target() -> bool {
    TARGET_STACK.with(|stack| !stack.borrow().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = Dep::new();
        let b = Dep::new();
        let c = Dep::new();
        assert!(a.id() < b.id());
        assert!(b.id() < c.id());
    }

    #[test]
    fn depend_without_target_is_noop() {
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.live_subs(), 0);
    }

    #[test]
    fn notify_on_empty_registry() {
        let dep = Dep::new();
        dep.notify();
        assert_eq!(dep.live_subs(), 0);
    }
}
