//! Dynamic value model - reactive records and lists behind explicit cells.
//!
//! Rust has no ambient property interception, so reads and writes go through
//! explicit methods on cheap `Rc`-backed handles. `Record::get` and
//! `Record::set` are the per-key interception points installed by
//! observation; `List` exposes intercepted mutators that notify the
//! container's structural registry after performing the underlying mutation.
//!
//! Element access on a list is deliberately untracked - dependencies on list
//! contents flow through the structural registry, registered by the property
//! getter that exposed the list (see `observer::depend_list`).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::dep::{Dep, has_target};
use crate::observer::{Observer, depend_list, observe};

// =============================================================================
// VALUE
// =============================================================================

/// A dynamically-typed observable value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Record(Record),
    List(List),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Records and lists - the observable container types.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Record(_) | Value::List(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Write-equality: primitive equality with NaN treated equal to NaN,
    /// containers compared by handle identity. A write whose new value is
    /// `same` as the old one is a no-op.
    pub fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Record::handle_eq(a, b),
            (Value::List(a), Value::List(b)) => List::handle_eq(a, b),
            _ => false,
        }
    }

    /// The observer carried by a container value, if it has been observed.
    pub(crate) fn observer(&self) -> Option<Rc<Observer>> {
        match self {
            Value::Record(record) => record.observer_slot(),
            Value::List(list) => list.observer_slot(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => Value::same(self, other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::Record(record) => fmt::Debug::fmt(record, f),
            Value::List(list) => fmt::Debug::fmt(list, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Str(Rc::from(value.as_str()))
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Value {
        Value::Record(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Value {
        Value::List(value)
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// One record key: current value slot, optional pre-existing accessor, and
/// the interception state installed by `observer::define_reactive`.
pub(crate) struct Property {
    pub(crate) value: Value,
    pub(crate) getter: Option<Rc<dyn Fn() -> Value>>,
    pub(crate) setter: Option<Rc<dyn Fn(&Value)>>,
    pub(crate) dep: Option<Dep>,
    pub(crate) child_ob: Option<Rc<Observer>>,
    pub(crate) shallow: bool,
    pub(crate) locked: bool,
    pub(crate) interceptor: Option<Rc<dyn Fn()>>,
}

impl Property {
    fn plain(value: Value) -> Property {
        Property {
            value,
            getter: None,
            setter: None,
            dep: None,
            child_ob: None,
            shallow: false,
            locked: false,
            interceptor: None,
        }
    }
}

/// Snapshot of a key's current shape, taken so accessors can be invoked
/// without holding the record borrow.
pub(crate) struct PropShape {
    pub(crate) locked: bool,
    pub(crate) getter: Option<Rc<dyn Fn() -> Value>>,
    pub(crate) setter: Option<Rc<dyn Fn(&Value)>>,
    pub(crate) value: Value,
}

struct RecordInner {
    props: HashMap<String, Property>,
    observer: Option<Rc<Observer>>,
    sealed: bool,
}

/// A string-keyed reactive container. Cloning clones the handle, not the
/// data.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RefCell<RecordInner>>,
}

impl Record {
    pub fn new() -> Record {
        Record {
            inner: Rc::new(RefCell::new(RecordInner {
                props: HashMap::new(),
                observer: None,
                sealed: false,
            })),
        }
    }

    /// Identity comparison of two handles.
    pub fn handle_eq(a: &Record, b: &Record) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Read a key. While a watcher is evaluating, an intercepted key
    /// registers that watcher on its own registry, on the nested value's
    /// structural registry, and - for lists - on every structural registry
    /// reachable through the list (element access itself is untracked).
    pub fn get(&self, key: &str) -> Value {
        let shape = {
            let inner = self.inner.borrow();
            inner.props.get(key).map(|prop| {
                (
                    prop.getter.clone(),
                    prop.value.clone(),
                    prop.dep.clone(),
                    prop.child_ob.clone(),
                )
            })
        };
        let Some((getter, stored, dep, child_ob)) = shape else {
            return Value::Null;
        };
        let value = match getter {
            Some(get) => get(),
            None => stored,
        };
        if let Some(dep) = dep {
            if has_target() {
                dep.depend();
                if let Some(child_ob) = child_ob {
                    child_ob.dep().depend();
                    if let Value::List(list) = &value {
                        depend_list(list);
                    }
                }
            }
        }
        value
    }

    /// Write a key. An intercepted key short-circuits on unchanged values
    /// (NaN equals NaN), writes through any pre-existing setter, re-observes
    /// the new value, and notifies its registry. A key never observed is a
    /// plain assignment, exactly like a field write nobody intercepted.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let shape = {
            let inner = self.inner.borrow();
            if inner.props.get(key).is_none() && inner.sealed {
                // sealed records silently refuse new keys
                return;
            }
            inner.props.get(key).map(|prop| {
                (
                    prop.getter.clone(),
                    prop.setter.clone(),
                    prop.value.clone(),
                    prop.dep.clone(),
                    prop.shallow,
                    prop.interceptor.clone(),
                )
            })
        };
        let Some((getter, setter, stored, dep, shallow, interceptor)) = shape else {
            self.inner
                .borrow_mut()
                .props
                .insert(key.to_string(), Property::plain(value));
            return;
        };
        let Some(dep) = dep else {
            // never intercepted: plain assignment
            if let Some(set) = setter {
                set(&value);
            } else if let Some(prop) = self.inner.borrow_mut().props.get_mut(key) {
                prop.value = value;
            }
            return;
        };
        let old = match getter {
            Some(get) => get(),
            None => stored,
        };
        if Value::same(&old, &value) {
            return;
        }
        if let Some(hook) = interceptor {
            hook();
        }
        if let Some(set) = setter {
            set(&value);
        } else if let Some(prop) = self.inner.borrow_mut().props.get_mut(key) {
            prop.value = value.clone();
        }
        let child_ob = if shallow { None } else { observe(&value, false) };
        if let Some(prop) = self.inner.borrow_mut().props.get_mut(key) {
            prop.child_ob = child_ob;
        }
        dep.notify();
    }

    /// Read the current value of a key without registering a dependency.
    pub fn peek(&self, key: &str) -> Value {
        let shape = {
            let inner = self.inner.borrow();
            inner
                .props
                .get(key)
                .map(|prop| (prop.getter.clone(), prop.value.clone()))
        };
        match shape {
            Some((Some(get), _)) => get(),
            Some((None, stored)) => stored,
            None => Value::Null,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().props.contains_key(key)
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().props.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().props.is_empty()
    }

    /// Install custom read/write behavior on a key. Later observation wraps
    /// the accessor instead of discarding it; reads go through `getter`,
    /// writes through `setter`.
    pub fn define_accessor(
        &self,
        key: &str,
        getter: Option<Rc<dyn Fn() -> Value>>,
        setter: Option<Rc<dyn Fn(&Value)>>,
    ) {
        let mut inner = self.inner.borrow_mut();
        let prop = inner
            .props
            .entry(key.to_string())
            .or_insert_with(|| Property::plain(Value::Null));
        prop.getter = getter;
        prop.setter = setter;
    }

    /// Mark a key as non-interceptable; `define_reactive` skips it.
    pub fn lock_key(&self, key: &str) {
        let mut inner = self.inner.borrow_mut();
        let prop = inner
            .props
            .entry(key.to_string())
            .or_insert_with(|| Property::plain(Value::Null));
        prop.locked = true;
    }

    /// Mark the record non-extensible: it can no longer be observed, and it
    /// silently refuses new keys.
    pub fn seal(&self) {
        self.inner.borrow_mut().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.borrow().sealed
    }

    pub(crate) fn observer_slot(&self) -> Option<Rc<Observer>> {
        self.inner.borrow().observer.clone()
    }

    pub(crate) fn set_observer(&self, observer: Rc<Observer>) {
        self.inner.borrow_mut().observer = Some(observer);
    }

    pub(crate) fn prop_shape(&self, key: &str) -> Option<PropShape> {
        let inner = self.inner.borrow();
        inner.props.get(key).map(|prop| PropShape {
            locked: prop.locked,
            getter: prop.getter.clone(),
            setter: prop.setter.clone(),
            value: prop.value.clone(),
        })
    }

    /// Install interception state on a key, creating it if needed. Any
    /// pre-existing accessor survives.
    pub(crate) fn install_reactive(
        &self,
        key: &str,
        value: Value,
        dep: Dep,
        child_ob: Option<Rc<Observer>>,
        shallow: bool,
        interceptor: Option<Rc<dyn Fn()>>,
    ) {
        let mut inner = self.inner.borrow_mut();
        let prop = inner
            .props
            .entry(key.to_string())
            .or_insert_with(|| Property::plain(Value::Null));
        prop.value = value;
        prop.dep = Some(dep);
        prop.child_ob = child_ob;
        prop.shallow = shallow;
        prop.interceptor = interceptor;
    }

    pub(crate) fn remove_prop(&self, key: &str) -> bool {
        self.inner.borrow_mut().props.remove(key).is_some()
    }
}

impl Default for Record {
    fn default() -> Record {
        Record::new()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("Record").field("keys", &keys).finish()
    }
}

// =============================================================================
// LIST
// =============================================================================

struct ListInner {
    items: Vec<Value>,
    observer: Option<Rc<Observer>>,
}

/// An index-keyed reactive container. Reads are untracked; the intercepted
/// mutators observe newly-inserted elements and notify the structural
/// registry exactly once per call.
#[derive(Clone)]
pub struct List {
    inner: Rc<RefCell<ListInner>>,
}

impl List {
    pub fn new() -> List {
        List {
            inner: Rc::new(RefCell::new(ListInner {
                items: Vec::new(),
                observer: None,
            })),
        }
    }

    pub fn from_vec(items: Vec<Value>) -> List {
        List {
            inner: Rc::new(RefCell::new(ListInner {
                items,
                observer: None,
            })),
        }
    }

    /// Identity comparison of two handles.
    pub fn handle_eq(a: &List, b: &List) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// Untracked element read; `Null` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.inner
            .borrow()
            .items
            .get(index)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    /// Append to the back.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.inner.borrow_mut().items.push(value.clone());
        self.after_mutation(&[value]);
    }

    /// Remove from the back.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.inner.borrow_mut().items.pop();
        self.after_mutation(&[]);
        removed
    }

    /// Remove from the front.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if inner.items.is_empty() {
                None
            } else {
                Some(inner.items.remove(0))
            }
        };
        self.after_mutation(&[]);
        removed
    }

    /// Insert at the front.
    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        self.inner.borrow_mut().items.insert(0, value.clone());
        self.after_mutation(&[value]);
    }

    /// Remove `delete_count` elements starting at `start` (both clamped to
    /// the current length), inserting `items` in their place. Returns the
    /// removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let removed: Vec<Value> = {
            let mut inner = self.inner.borrow_mut();
            let len = inner.items.len();
            let start = start.min(len);
            let end = (start + delete_count).min(len);
            inner.items.splice(start..end, items.iter().cloned()).collect()
        };
        self.after_mutation(&items);
        removed
    }

    /// Sort in place with a comparator.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) {
        self.inner.borrow_mut().items.sort_by(compare);
        self.after_mutation(&[]);
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        self.inner.borrow_mut().items.reverse();
        self.after_mutation(&[]);
    }

    /// Grow to `len` with `Null` holes, silently - the follow-up `splice`
    /// carries the notification (mirrors length extension before insertion).
    pub(crate) fn raw_extend(&self, len: usize) {
        let mut inner = self.inner.borrow_mut();
        while inner.items.len() < len {
            inner.items.push(Value::Null);
        }
    }

    pub(crate) fn observer_slot(&self) -> Option<Rc<Observer>> {
        self.inner.borrow().observer.clone()
    }

    pub(crate) fn set_observer(&self, observer: Rc<Observer>) {
        self.inner.borrow_mut().observer = Some(observer);
    }

    /// Observe anything newly inserted, then notify the structural registry.
    fn after_mutation(&self, inserted: &[Value]) {
        for item in inserted {
            observe(item, false);
        }
        if let Some(observer) = self.observer_slot() {
            observer.dep().notify();
        }
    }
}

impl Default for List {
    fn default() -> List {
        List::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List(len={})", self.len())
    }
}
