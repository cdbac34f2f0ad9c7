//! Observation layer - converts plain records and lists into reactive ones.
//!
//! An `Observer` marks a container value as reactive and owns its structural
//! registry - the registry notified on key addition/removal and list-shape
//! mutation, as opposed to a single key's own registry. `observe` is
//! idempotent; `define_reactive` installs per-key interception.

use std::cell::Cell;
use std::rc::Rc;

use crate::dep::Dep;
use crate::value::{List, Record, Value};

thread_local! {
    /// Global observation switch. The rendering collaborator disables this
    /// around values created transiently during an update computation.
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Process-wide toggle suppressing observer creation while `false`.
pub fn set_observation_enabled(enabled: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(enabled));
}

pub fn observation_enabled() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

// =============================================================================
// OBSERVER
// =============================================================================

/// Attached to each observed container. Owns the structural registry and
/// counts how many reactive owners hold the container as their root state
/// bag (gates the runtime key-addition warning, nothing else).
pub struct Observer {
    dep: Dep,
    root_count: Cell<u32>,
}

impl Observer {
    fn new() -> Rc<Observer> {
        Rc::new(Observer {
            dep: Dep::new(),
            root_count: Cell::new(0),
        })
    }

    /// The container's structural registry.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    pub(crate) fn root_count(&self) -> u32 {
        self.root_count.get()
    }

    pub(crate) fn inc_root_count(&self) {
        self.root_count.set(self.root_count.get() + 1);
    }
}

// =============================================================================
// OBSERVE
// =============================================================================

/// Attempt to observe a value. Returns the existing observer when the value
/// already carries one (idempotent); `None` for non-containers, sealed
/// records, or while observation is disabled. `as_root` marks the value as
/// some owner's root state bag.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
    let observer = match value {
        Value::Record(record) => observe_record(record),
        Value::List(list) => observe_list(list),
        _ => None,
    };
    if as_root {
        if let Some(observer) = &observer {
            observer.inc_root_count();
        }
    }
    observer
}

fn observe_record(record: &Record) -> Option<Rc<Observer>> {
    if let Some(existing) = record.observer_slot() {
        return Some(existing);
    }
    if !observation_enabled() || record.is_sealed() {
        return None;
    }
    let observer = Observer::new();
    // installed before the walk: a record reachable from itself observes once
    record.set_observer(observer.clone());
    for key in record.keys() {
        define_reactive(record, &key, None, None, false);
    }
    Some(observer)
}

fn observe_list(list: &List) -> Option<Rc<Observer>> {
    if let Some(existing) = list.observer_slot() {
        return Some(existing);
    }
    if !observation_enabled() {
        return None;
    }
    let observer = Observer::new();
    list.set_observer(observer.clone());
    for item in list.to_vec() {
        observe(&item, false);
    }
    Some(observer)
}

// =============================================================================
// DEFINE REACTIVE
// =============================================================================

/// Install per-key interception on a record.
///
/// Skips keys marked non-interceptable. Wraps any pre-existing accessor
/// rather than discarding it: the current value is snapshotted through the
/// accessor unless a getter-only accessor guards it. Unless `shallow`, the
/// value is eagerly observed so nested containers are reactive too.
/// `interceptor` is a developer-facing hook invoked on every accepted write.
pub fn define_reactive(
    record: &Record,
    key: &str,
    initial: Option<Value>,
    interceptor: Option<Rc<dyn Fn()>>,
    shallow: bool,
) {
    let shape = record.prop_shape(key);
    if let Some(shape) = &shape {
        if shape.locked {
            return;
        }
    }
    let value = match initial {
        Some(value) => value,
        None => match &shape {
            None => Value::Null,
            Some(shape) => {
                if shape.getter.is_none() {
                    shape.value.clone()
                } else if shape.setter.is_some() {
                    // read-through is safe when the accessor is symmetric
                    match &shape.getter {
                        Some(get) => get(),
                        None => Value::Null,
                    }
                } else {
                    Value::Null
                }
            }
        },
    };
    let child_ob = if shallow { None } else { observe(&value, false) };
    record.install_reactive(key, value, Dep::new(), child_ob, shallow, interceptor);
}

/// Register the active watcher on every observed container reachable from a
/// list, recursing into nested lists. List element access is not itself
/// intercepted, so the property getter exposing the list runs this instead.
pub(crate) fn depend_list(list: &List) {
    for item in list.to_vec() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::List(nested) = &item {
            depend_list(nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(key: &str, value: impl Into<Value>) -> Record {
        let record = Record::new();
        record.set(key, value);
        record
    }

    #[test]
    fn observe_is_idempotent() {
        let record = record_with("a", 1.0);
        let value = Value::Record(record);
        let first = observe(&value, false);
        let second = observe(&value, false);
        match (first, second) {
            (Some(a), Some(b)) => assert!(Rc::ptr_eq(&a, &b)),
            _ => panic!("expected observers"),
        }
    }

    #[test]
    fn observe_rejects_non_containers() {
        assert!(observe(&Value::Number(1.0), false).is_none());
        assert!(observe(&Value::Null, false).is_none());
        assert!(observe(&Value::from("text"), false).is_none());
    }

    #[test]
    fn observe_respects_toggle() {
        let record = record_with("a", 1.0);
        let value = Value::Record(record);
        set_observation_enabled(false);
        assert!(observe(&value, false).is_none());
        set_observation_enabled(true);
        assert!(observe(&value, false).is_some());
    }

    #[test]
    fn observe_rejects_sealed_record() {
        let record = record_with("a", 1.0);
        record.seal();
        assert!(observe(&Value::Record(record), false).is_none());
    }

    #[test]
    fn root_count_increments() {
        let record = record_with("a", 1.0);
        let value = Value::Record(record);
        let ob = match observe(&value, true) {
            Some(ob) => ob,
            None => panic!("expected observer"),
        };
        assert_eq!(ob.root_count(), 1);
        observe(&value, true);
        assert_eq!(ob.root_count(), 2);
        observe(&value, false);
        assert_eq!(ob.root_count(), 2);
    }

    #[test]
    fn observation_recurses_into_nested_containers() {
        let child = record_with("x", 1.0);
        let list = List::from_vec(vec![Value::from(2.0), Value::Record(child.clone())]);
        let parent = Record::new();
        parent.set("child", child.clone());
        parent.set("items", list.clone());

        observe(&Value::Record(parent), false);
        assert!(child.observer_slot().is_some());
        assert!(list.observer_slot().is_some());
    }

    #[test]
    fn shallow_define_skips_nested_observation() {
        let child = record_with("x", 1.0);
        let parent = Record::new();
        parent.set("child", child.clone());

        define_reactive(&parent, "child", None, None, true);
        assert!(child.observer_slot().is_none());
    }

    #[test]
    fn locked_keys_are_skipped() {
        let record = Record::new();
        record.set("frozen", 1.0);
        record.lock_key("frozen");

        observe(&Value::Record(record.clone()), false);
        // a locked key keeps plain assignment semantics: no registry installed
        record.set("frozen", 2.0);
        assert_eq!(record.get("frozen").as_number(), Some(2.0));
    }

    #[test]
    fn list_elements_observed_on_insert() {
        let list = List::new();
        observe(&Value::List(list.clone()), false);

        let element = record_with("x", 1.0);
        list.push(element.clone());
        assert!(element.observer_slot().is_some());
    }
}
