//! Reactive owner - the narrow seam to the lifecycle collaborator.
//!
//! A `Scope` owns a root state record (observed as root) and every watcher
//! created against it, carries the mounted/inactive/destroying flags the
//! scheduler consults, and exposes the post-flush lifecycle hooks. The
//! component manager living outside this crate drives it; nothing in here
//! knows about rendering.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::WatchResult;
use crate::observer::observe;
use crate::value::{Record, Value};
use crate::watcher::{CallbackFn, WatchSource, Watcher, WatcherFlags};

pub(crate) struct ScopeInner {
    state: Record,
    watchers: RefCell<Vec<Watcher>>,
    primary: RefCell<Option<Watcher>>,
    mounted: Cell<bool>,
    inactive: Cell<bool>,
    destroying: Cell<bool>,
    destroyed: Cell<bool>,
    on_updated: RefCell<Option<Box<dyn Fn()>>>,
    on_activated: RefCell<Option<Box<dyn Fn()>>>,
}

/// Cheap cloneable handle over one reactive owner.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create an owner around a root state record. The record is observed
    /// as root state, which gates the runtime key-addition warning.
    pub fn new(state: Record) -> Scope {
        let scope = Scope {
            inner: Rc::new(ScopeInner {
                state: state.clone(),
                watchers: RefCell::new(Vec::new()),
                primary: RefCell::new(None),
                mounted: Cell::new(false),
                inactive: Cell::new(false),
                destroying: Cell::new(false),
                destroyed: Cell::new(false),
                on_updated: RefCell::new(None),
                on_activated: RefCell::new(None),
            }),
        };
        observe(&Value::Record(state), true);
        scope
    }

    /// The root state record.
    pub fn state(&self) -> Record {
        self.inner.state.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.inner.mounted.set(mounted);
    }

    pub fn is_inactive(&self) -> bool {
        self.inner.inactive.get()
    }

    pub(crate) fn set_inactive(&self, inactive: bool) {
        self.inner.inactive.set(inactive);
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.destroying.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Hook fired after a flush in which this owner's mounted primary
    /// computation ran.
    pub fn on_updated(&self, hook: impl Fn() + 'static) {
        *self.inner.on_updated.borrow_mut() = Some(Box::new(hook));
    }

    /// Hook fired after a flush in which this owner was queued as activated.
    pub fn on_activated(&self, hook: impl Fn() + 'static) {
        *self.inner.on_activated.borrow_mut() = Some(Box::new(hook));
    }

    /// Declared side-effect watch. `USER` is implied: failures are reported
    /// through the error sink and never abort a flush.
    pub fn watch(
        &self,
        source: WatchSource,
        callback: CallbackFn,
        flags: WatcherFlags,
    ) -> WatchResult<Watcher> {
        Watcher::new(
            self,
            source,
            Some(callback),
            flags | WatcherFlags::USER,
            None,
            false,
        )
    }

    /// Tear down every watcher wholesale. Individual watchers skip the
    /// owner-list bookkeeping while this runs. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.get() {
            return;
        }
        self.inner.destroying.set(true);
        let watchers = std::mem::take(&mut *self.inner.watchers.borrow_mut());
        *self.inner.primary.borrow_mut() = None;
        for watcher in &watchers {
            watcher.teardown();
        }
        self.inner.mounted.set(false);
        self.inner.destroyed.set(true);
    }

    /// Number of live watchers registered against this owner.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    pub(crate) fn register_watcher(&self, watcher: &Watcher, primary: bool) {
        self.inner.watchers.borrow_mut().push(watcher.clone());
        if primary {
            *self.inner.primary.borrow_mut() = Some(watcher.clone());
        }
    }

    pub(crate) fn deregister_watcher(&self, watcher_id: u64) {
        self.inner
            .watchers
            .borrow_mut()
            .retain(|watcher| watcher.id() != watcher_id);
        let mut primary = self.inner.primary.borrow_mut();
        if primary.as_ref().is_some_and(|p| p.id() == watcher_id) {
            *primary = None;
        }
    }

    pub(crate) fn call_updated_if_primary(&self, watcher: &Watcher) {
        let is_primary = self
            .inner
            .primary
            .borrow()
            .as_ref()
            .is_some_and(|p| p.id() == watcher.id());
        if is_primary && self.inner.mounted.get() {
            if let Some(hook) = self.inner.on_updated.borrow().as_ref() {
                hook();
            }
        }
    }

    pub(crate) fn call_activated(&self) {
        if let Some(hook) = self.inner.on_activated.borrow().as_ref() {
            hook();
        }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Scope {
        Scope { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }
}
