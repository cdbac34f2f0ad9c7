//! Watcher - one reactive computation.
//!
//! A watcher evaluates a getter (a closure or a dot-path into its owner's
//! state), records every dependency registry touched during evaluation, and
//! re-evaluates when any of them notifies. The same type backs all three
//! computation kinds: an owner's primary computation, a declared side-effect
//! watch (`USER` - failures isolated), and a computed value (`COMPUTED` -
//! lazy, owning a registry for downstream dependents).

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::dep::{Dep, has_target, pop_target, push_target};
use crate::error::{WatchResult, handle_error, warn};
use crate::scheduler::queue_watcher;
use crate::scope::{Scope, ScopeInner};
use crate::traverse::traverse;
use crate::value::Value;

thread_local! {
    static WATCHER_ID: Cell<u64> = const { Cell::new(0) };
}

bitflags! {
    /// Watcher mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WatcherFlags: u8 {
        /// Traverse the full result graph after evaluation so nested
        /// mutations are tracked, not just the top-level reference.
        const DEEP = 1 << 0;
        /// Declared side-effect watch: evaluator and callback failures are
        /// reported through the error sink, never propagated.
        const USER = 1 << 1;
        /// Lazy/computed: evaluation deferred until read; owns a registry
        /// for downstream dependents.
        const COMPUTED = 1 << 2;
        /// Re-evaluate synchronously on notify instead of queueing.
        const SYNC = 1 << 3;
    }
}

pub type GetterFn = Rc<dyn Fn(&Scope) -> WatchResult<Value>>;
pub type CallbackFn = Rc<dyn Fn(&Scope, &Value, &Value) -> WatchResult<()>>;
pub type BeforeHook = Box<dyn Fn()>;

/// What a watcher evaluates: a dot-delimited path into the owner's state,
/// or a getter closure.
#[derive(Clone)]
pub enum WatchSource {
    Path(String),
    Getter(GetterFn),
}

impl WatchSource {
    pub fn path(path: impl Into<String>) -> WatchSource {
        WatchSource::Path(path.into())
    }

    pub fn getter(f: impl Fn(&Scope) -> WatchResult<Value> + 'static) -> WatchSource {
        WatchSource::Getter(Rc::new(f))
    }
}

enum Getter {
    Path(Vec<String>),
    Func(GetterFn),
    /// Installed when a path expression fails to parse; evaluates to `Null`.
    Noop,
}

pub(crate) struct WatcherInner {
    id: u64,
    scope: Weak<ScopeInner>,
    getter: Getter,
    cb: Option<CallbackFn>,
    flags: WatcherFlags,
    before: Option<BeforeHook>,
    expression: String,
    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,
    deps: RefCell<Vec<Dep>>,
    new_deps: RefCell<Vec<Dep>>,
    dep_ids: RefCell<HashSet<u64>>,
    new_dep_ids: RefCell<HashSet<u64>>,
    /// Computed watchers own a registry so downstream dependents can
    /// subscribe to the derived value itself.
    own_dep: Option<Dep>,
}

impl WatcherInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// Cheap cloneable handle; identity lives in the shared inner.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher against `owner`. Non-computed watchers evaluate
    /// immediately; an evaluation failure of a non-`USER` watcher is
    /// returned to the caller (the watcher is torn down first).
    pub fn new(
        owner: &Scope,
        source: WatchSource,
        cb: Option<CallbackFn>,
        flags: WatcherFlags,
        before: Option<BeforeHook>,
        primary: bool,
    ) -> WatchResult<Watcher> {
        let (getter, expression) = match source {
            WatchSource::Getter(f) => (Getter::Func(f), String::from("<getter>")),
            WatchSource::Path(path) => match parse_path(&path) {
                Some(segments) => (Getter::Path(segments), path),
                None => {
                    warn(&format!(
                        "failed watching path: \"{path}\" - only dot-delimited paths are \
                         supported; use a getter for full control"
                    ));
                    (Getter::Noop, path)
                }
            },
        };
        let id = WATCHER_ID.with(|counter| {
            let id = counter.get() + 1;
            counter.set(id);
            id
        });
        let computed = flags.contains(WatcherFlags::COMPUTED);
        let watcher = Watcher {
            inner: Rc::new(WatcherInner {
                id,
                scope: owner.downgrade(),
                getter,
                cb,
                flags,
                before,
                expression,
                active: Cell::new(true),
                dirty: Cell::new(computed),
                value: RefCell::new(Value::Null),
                deps: RefCell::new(Vec::new()),
                new_deps: RefCell::new(Vec::new()),
                dep_ids: RefCell::new(HashSet::new()),
                new_dep_ids: RefCell::new(HashSet::new()),
                own_dep: computed.then(Dep::new),
            }),
        };
        owner.register_watcher(&watcher, primary);
        if !computed {
            match watcher.get() {
                Ok(value) => *watcher.inner.value.borrow_mut() = value,
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }
        Ok(watcher)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn flags(&self) -> WatcherFlags {
        self.inner.flags
    }

    /// The watched path, or `"<getter>"` for closure sources. Diagnostics
    /// only.
    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Last evaluated value.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    pub(crate) fn from_inner(inner: Rc<WatcherInner>) -> Watcher {
        Watcher { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.inner)
    }

    /// Evaluate the getter and re-collect dependencies. `USER` failures are
    /// reported through the error sink and yield `Null`; other failures
    /// propagate to the caller.
    pub fn get(&self) -> WatchResult<Value> {
        push_target(self);
        let scope = self.scope();
        let result = match (&self.inner.getter, &scope) {
            (Getter::Noop, _) => Ok(Value::Null),
            (_, None) => Ok(Value::Null),
            (Getter::Func(f), Some(scope)) => f(scope),
            (Getter::Path(segments), Some(scope)) => Ok(walk_path(scope, segments)),
        };
        if self.inner.flags.contains(WatcherFlags::DEEP) {
            // touch every reachable property so all of them are tracked
            if let Ok(value) = &result {
                traverse(value);
            }
        }
        pop_target();
        self.cleanup_deps();
        match result {
            Err(err) if self.inner.flags.contains(WatcherFlags::USER) => {
                handle_error(
                    &err,
                    &format!("getter for watcher \"{}\"", self.inner.expression),
                );
                Ok(Value::Null)
            }
            other => other,
        }
    }

    /// Record a registry touched during the current evaluation; subscribe
    /// unless the previous evaluation already did. Called through
    /// `Dep::depend` while this watcher is the active target.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        if self.inner.new_dep_ids.borrow_mut().insert(id) {
            self.inner.new_deps.borrow_mut().push(dep.clone());
            if !self.inner.dep_ids.borrow().contains(&id) {
                dep.add_sub(self);
            }
        }
    }

    /// Swap dep generations, unsubscribing from registries the latest
    /// evaluation no longer touched.
    fn cleanup_deps(&self) {
        {
            let deps = self.inner.deps.borrow();
            let new_ids = self.inner.new_dep_ids.borrow();
            for dep in deps.iter() {
                if !new_ids.contains(&dep.id()) {
                    dep.remove_sub(self.inner.id);
                }
            }
        }
        mem::swap(
            &mut *self.inner.deps.borrow_mut(),
            &mut *self.inner.new_deps.borrow_mut(),
        );
        self.inner.new_deps.borrow_mut().clear();
        mem::swap(
            &mut *self.inner.dep_ids.borrow_mut(),
            &mut *self.inner.new_dep_ids.borrow_mut(),
        );
        self.inner.new_dep_ids.borrow_mut().clear();
    }

    /// Subscriber interface - called when a dependency notifies.
    ///
    /// A computed watcher with no downstream subscribers only marks itself
    /// dirty; with subscribers it re-evaluates now and propagates only when
    /// the derived value actually changed. `SYNC` runs immediately;
    /// everything else queues for the batched flush.
    pub(crate) fn update(&self) {
        if self.inner.flags.contains(WatcherFlags::COMPUTED) {
            let Some(own_dep) = &self.inner.own_dep else {
                return;
            };
            if own_dep.live_subs() == 0 {
                self.inner.dirty.set(true);
            } else {
                let own_dep = own_dep.clone();
                self.get_and_invoke(move |_watcher, _new, _old| {
                    own_dep.notify();
                });
            }
        } else if self.inner.flags.contains(WatcherFlags::SYNC) {
            self.run();
        } else {
            queue_watcher(self);
        }
    }

    /// Scheduler job interface. No-op once torn down; failures here stay on
    /// the notify path and are reported, never propagated.
    pub(crate) fn run(&self) {
        if !self.inner.active.get() {
            return;
        }
        self.get_and_invoke(|watcher, new, old| {
            if let Some(cb) = watcher.inner.cb.clone() {
                let Some(scope) = watcher.scope() else {
                    return;
                };
                if let Err(err) = cb(&scope, new, old) {
                    handle_error(
                        &err,
                        &format!("callback for watcher \"{}\"", watcher.inner.expression),
                    );
                }
            }
        });
    }

    /// Re-evaluate; on change (by value, or any container - possibly
    /// mutated in place - or deep mode) commit the value and invoke
    /// `on_change` with the new and previous values.
    fn get_and_invoke(&self, on_change: impl FnOnce(&Watcher, &Value, &Value)) {
        let value = match self.get() {
            Ok(value) => value,
            Err(err) => {
                handle_error(
                    &err,
                    &format!("getter for watcher \"{}\"", self.inner.expression),
                );
                return;
            }
        };
        let old = self.inner.value.borrow().clone();
        let changed = !Value::same(&value, &old)
            || value.is_container()
            || self.inner.flags.contains(WatcherFlags::DEEP);
        if changed {
            *self.inner.value.borrow_mut() = value.clone();
            self.inner.dirty.set(false);
            on_change(self, &value, &old);
        }
    }

    /// Evaluate if dirty and return the cached value. The read surface of
    /// computed watchers.
    pub fn evaluate(&self) -> WatchResult<Value> {
        if self.inner.dirty.get() {
            let value = self.get()?;
            *self.inner.value.borrow_mut() = value;
            self.inner.dirty.set(false);
        }
        Ok(self.inner.value.borrow().clone())
    }

    /// Register the active watcher on this computed's own registry, so the
    /// derived value itself becomes a dependency.
    pub fn depend(&self) {
        if let Some(own_dep) = &self.inner.own_dep {
            if has_target() {
                own_dep.depend();
            }
        }
    }

    /// Unsubscribe from every registry and deregister from the owner.
    /// Idempotent. Owner deregistration is skipped while the owner is being
    /// destroyed wholesale.
    pub fn teardown(&self) {
        if !self.inner.active.get() {
            return;
        }
        if let Some(scope) = self.scope() {
            if !scope.is_destroying() {
                scope.deregister_watcher(self.inner.id);
            }
        }
        for dep in self.inner.deps.borrow().iter() {
            dep.remove_sub(self.inner.id);
        }
        self.inner.deps.borrow_mut().clear();
        self.inner.dep_ids.borrow_mut().clear();
        self.inner.active.set(false);
    }

    pub(crate) fn call_before(&self) {
        if let Some(before) = &self.inner.before {
            before();
        }
    }

    /// Post-flush: let the owner fire its updated hook if this watcher is
    /// its mounted primary computation.
    pub(crate) fn notify_owner_updated(&self) {
        if let Some(scope) = self.scope() {
            scope.call_updated_if_primary(self);
        }
    }

    fn scope(&self) -> Option<Scope> {
        self.inner.scope.upgrade().map(Scope::from_inner)
    }
}

impl PartialEq for Watcher {
    fn eq(&self, other: &Watcher) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("flags", &self.inner.flags)
            .field("active", &self.inner.active.get())
            .finish()
    }
}

// =============================================================================
// PATH GETTERS
// =============================================================================

/// Parse a dot-delimited path. Anything outside alphanumerics, `_`, `$`,
/// and `.` fails.
fn parse_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty()
        || !path
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
    {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

/// Walk a parsed path from the owner's state; `Null` as soon as a segment
/// is not a record.
fn walk_path(scope: &Scope, segments: &[String]) -> Value {
    let mut current = Value::Record(scope.state());
    for segment in segments {
        match current {
            Value::Record(record) => current = record.get(segment),
            _ => return Value::Null,
        }
    }
    current
}

// =============================================================================
// COMPUTED
// =============================================================================

/// Lazily-evaluated derived value backed by a computed watcher. Reading
/// registers the active watcher on the computed's own registry, then
/// evaluates only if dirty.
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    pub fn new(
        owner: &Scope,
        getter: impl Fn(&Scope) -> WatchResult<Value> + 'static,
    ) -> WatchResult<Computed> {
        let watcher = Watcher::new(
            owner,
            WatchSource::getter(getter),
            None,
            WatcherFlags::COMPUTED,
            None,
            false,
        )?;
        Ok(Computed { watcher })
    }

    pub fn get(&self) -> WatchResult<Value> {
        self.watcher.depend();
        self.watcher.evaluate()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn teardown(&self) {
        self.watcher.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::scope::Scope;
    use crate::value::Record;
    use std::cell::Cell;

    fn scope_with(entries: &[(&str, f64)]) -> Scope {
        let state = Record::new();
        for (key, value) in entries {
            state.set(*key, *value);
        }
        Scope::new(state)
    }

    #[test]
    fn parse_path_accepts_dotted_identifiers() {
        assert_eq!(
            parse_path("a.b.c"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(parse_path("$data"), Some(vec!["$data".to_string()]));
        assert!(parse_path("a[0]").is_none());
        assert!(parse_path("a b").is_none());
        assert!(parse_path("").is_none());
    }

    #[test]
    fn path_watcher_reads_initial_value() {
        let scope = scope_with(&[("count", 3.0)]);
        let watcher = Watcher::new(
            &scope,
            WatchSource::path("count"),
            None,
            WatcherFlags::empty(),
            None,
            false,
        )
        .unwrap();
        assert_eq!(watcher.value().as_number(), Some(3.0));
    }

    #[test]
    fn path_through_missing_segment_is_null() {
        let scope = scope_with(&[("count", 3.0)]);
        let watcher = Watcher::new(
            &scope,
            WatchSource::path("count.nested.deeper"),
            None,
            WatcherFlags::empty(),
            None,
            false,
        )
        .unwrap();
        assert!(watcher.value().is_null());
    }

    #[test]
    fn bad_path_degrades_to_noop_getter() {
        use crate::error::set_warn_handler;
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        set_warn_handler(Some(Box::new(move |msg| {
            seen_clone.borrow_mut().push(msg.to_string());
        })));

        let scope = scope_with(&[("count", 3.0)]);
        let watcher = Watcher::new(
            &scope,
            WatchSource::path("count[0]"),
            None,
            WatcherFlags::empty(),
            None,
            false,
        )
        .unwrap();
        assert!(watcher.value().is_null());
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("failed watching path"));

        set_warn_handler(None);
    }

    #[test]
    fn sync_watcher_reruns_on_write() {
        let scope = scope_with(&[("count", 0.0)]);
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let _watcher = Watcher::new(
            &scope,
            WatchSource::path("count"),
            Some(Rc::new(move |_scope, _new, _old| {
                runs_clone.set(runs_clone.get() + 1);
                Ok(())
            })),
            WatcherFlags::SYNC,
            None,
            false,
        )
        .unwrap();

        scope.state().set("count", 1.0);
        assert_eq!(runs.get(), 1);
        scope.state().set("count", 1.0);
        assert_eq!(runs.get(), 1);
        scope.state().set("count", 2.0);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn stale_branch_dependencies_are_dropped() {
        let state = Record::new();
        state.set("use_a", true);
        state.set("a", 1.0);
        state.set("b", 2.0);
        let scope = Scope::new(state.clone());

        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let _watcher = Watcher::new(
            &scope,
            WatchSource::getter(move |scope: &Scope| {
                let state = scope.state();
                if state.get("use_a").as_bool() == Some(true) {
                    Ok(state.get("a"))
                } else {
                    Ok(state.get("b"))
                }
            }),
            Some(Rc::new(move |_scope, _new, _old| {
                runs_clone.set(runs_clone.get() + 1);
                Ok(())
            })),
            WatcherFlags::SYNC,
            None,
            false,
        )
        .unwrap();

        state.set("b", 3.0);
        assert_eq!(runs.get(), 0); // branch not taken yet

        state.set("use_a", false);
        assert_eq!(runs.get(), 1);

        state.set("a", 9.0); // stale dependency, must not trigger
        assert_eq!(runs.get(), 1);

        state.set("b", 4.0);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn user_watcher_getter_failure_is_isolated() {
        use crate::error::set_error_handler;
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        set_error_handler(Some(Box::new(move |err, context| {
            seen_clone
                .borrow_mut()
                .push(format!("{context}: {}", err.message()));
        })));

        let scope = scope_with(&[("count", 0.0)]);
        let watcher = Watcher::new(
            &scope,
            WatchSource::getter(|_scope| Err(WatchError::new("broken getter"))),
            None,
            WatcherFlags::USER,
            None,
            false,
        )
        .unwrap();
        assert!(watcher.value().is_null());
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("broken getter"));

        set_error_handler(None);
    }

    #[test]
    fn non_user_getter_failure_propagates_from_constructor() {
        let scope = scope_with(&[]);
        let result = Watcher::new(
            &scope,
            WatchSource::getter(|_scope| Err(WatchError::new("render failed"))),
            None,
            WatcherFlags::empty(),
            None,
            false,
        );
        assert!(result.is_err());
        assert_eq!(scope.watcher_count(), 0); // torn down before returning
    }

    #[test]
    fn teardown_stops_retriggering_and_is_idempotent() {
        let scope = scope_with(&[("count", 0.0)]);
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let watcher = Watcher::new(
            &scope,
            WatchSource::path("count"),
            Some(Rc::new(move |_scope, _new, _old| {
                runs_clone.set(runs_clone.get() + 1);
                Ok(())
            })),
            WatcherFlags::SYNC,
            None,
            false,
        )
        .unwrap();

        scope.state().set("count", 1.0);
        assert_eq!(runs.get(), 1);

        watcher.teardown();
        watcher.teardown();
        assert!(!watcher.is_active());

        scope.state().set("count", 2.0);
        assert_eq!(runs.get(), 1);
        assert_eq!(scope.watcher_count(), 0);
    }

    #[test]
    fn computed_stays_lazy_without_subscribers() {
        let scope = scope_with(&[("base", 2.0)]);
        let evals = Rc::new(Cell::new(0));
        let evals_clone = evals.clone();
        let computed = Computed::new(&scope, move |scope: &Scope| {
            evals_clone.set(evals_clone.get() + 1);
            let base = scope.state().get("base").as_number().unwrap_or(0.0);
            Ok(Value::Number(base * 10.0))
        })
        .unwrap();

        // deferred first evaluation
        assert_eq!(evals.get(), 0);
        assert!(computed.watcher().is_dirty());

        assert_eq!(computed.get().unwrap().as_number(), Some(20.0));
        assert_eq!(evals.get(), 1);

        // unchanged source: cached
        assert_eq!(computed.get().unwrap().as_number(), Some(20.0));
        assert_eq!(evals.get(), 1);

        // source change only marks dirty
        scope.state().set("base", 3.0);
        assert_eq!(evals.get(), 1);
        assert!(computed.watcher().is_dirty());

        assert_eq!(computed.get().unwrap().as_number(), Some(30.0));
        assert_eq!(evals.get(), 2);
    }

    #[test]
    fn computed_with_subscriber_propagates_only_real_changes() {
        let scope = scope_with(&[("base", 2.0)]);
        let computed = Rc::new(
            Computed::new(&scope, |scope: &Scope| {
                let base = scope.state().get("base").as_number().unwrap_or(0.0);
                Ok(Value::Bool(base > 0.0))
            })
            .unwrap(),
        );

        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();
        let computed_clone = computed.clone();
        let _effect = Watcher::new(
            &scope,
            WatchSource::getter(move |_scope| computed_clone.get()),
            Some(Rc::new(move |_scope, _new, _old| {
                runs_clone.set(runs_clone.get() + 1);
                Ok(())
            })),
            WatcherFlags::SYNC,
            None,
            false,
        )
        .unwrap();

        // derived value flips: downstream notified
        scope.state().set("base", -1.0);
        assert_eq!(runs.get(), 1);

        // source changes but derived value does not: no downstream run
        scope.state().set("base", -5.0);
        assert_eq!(runs.get(), 1);
    }
}
