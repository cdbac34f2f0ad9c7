//! Imperative mutation helpers - `set` and `del`.
//!
//! Per-key interception is installed at observation time, so keys that did
//! not exist then cannot be reactive on their own. These helpers retrofit
//! interception onto new keys and route removals through the structural
//! registry. Misuse degrades to a warning plus a safe fallback, never a
//! panic.

use crate::error::warn;
use crate::observer::define_reactive;
use crate::value::{Record, Value};

/// Key into a record or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(name: &'a str) -> Key<'a> {
        Key::Name(name)
    }
}

impl<'a> From<usize> for Key<'a> {
    fn from(index: usize) -> Key<'a> {
        Key::Index(index)
    }
}

/// Set a key/index on a container. Adds reactivity and notifies the
/// structural registry when the key is new; existing keys are ordinary
/// writes. Returns the value.
pub fn set<'a>(target: &Value, key: impl Into<Key<'a>>, value: impl Into<Value>) -> Value {
    let key = key.into();
    let value = value.into();
    match (target, key) {
        (Value::List(list), Key::Index(index)) => {
            // grow silently, then route through the intercepted splice so
            // the structural registry fires exactly once
            list.raw_extend(index);
            list.splice(index, 1, vec![value.clone()]);
            value
        }
        (Value::List(_), Key::Name(name)) => {
            warn(&format!("cannot set non-index key \"{name}\" on a list"));
            value
        }
        (Value::Record(record), Key::Name(name)) => set_record(record, name, value),
        (Value::Record(record), Key::Index(index)) => {
            set_record(record, &index.to_string(), value)
        }
        _ => {
            warn(&format!(
                "cannot set reactive property on null or primitive value: {target:?}"
            ));
            value
        }
    }
}

fn set_record(record: &Record, key: &str, value: Value) -> Value {
    if record.contains_key(key) {
        // already present: reactive keys notify through their own registry,
        // plain keys stay plain
        record.set(key, value.clone());
        return value;
    }
    let observer = record.observer_slot();
    if let Some(observer) = &observer {
        if observer.root_count() > 0 {
            warn(
                "avoid adding reactive keys to a root state record at runtime - \
                 declare them upfront in the initial state",
            );
            return value;
        }
    }
    let Some(observer) = observer else {
        // plain, non-reactive target
        record.set(key, value.clone());
        return value;
    };
    define_reactive(record, key, Some(value.clone()), None, false);
    // the new key's own registry cannot have subscribers yet - nobody could
    // have read a key that did not exist - so notify the structural registry
    observer.dep().notify();
    value
}

/// Delete a key/index. Notifies the structural registry when the target was
/// observed; deleting an absent key is a no-op.
pub fn del<'a>(target: &Value, key: impl Into<Key<'a>>) {
    let key = key.into();
    match (target, key) {
        (Value::List(list), Key::Index(index)) => {
            list.splice(index, 1, Vec::new());
        }
        (Value::List(_), Key::Name(name)) => {
            warn(&format!("cannot delete non-index key \"{name}\" from a list"));
        }
        (Value::Record(record), key) => {
            let name = match key {
                Key::Name(name) => name.to_string(),
                Key::Index(index) => index.to_string(),
            };
            let observer = record.observer_slot();
            if let Some(observer) = &observer {
                if observer.root_count() > 0 {
                    warn(
                        "avoid deleting keys on a root state record at runtime - \
                         set the value to null instead",
                    );
                    return;
                }
            }
            if !record.remove_prop(&name) {
                return;
            }
            if let Some(observer) = observer {
                observer.dep().notify();
            }
        }
        _ => {
            warn(&format!(
                "cannot delete reactive property on null or primitive value: {target:?}"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::set_warn_handler;
    use crate::observer::observe;
    use crate::value::List;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn capture_warnings() -> Rc<RefCell<Vec<String>>> {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        set_warn_handler(Some(Box::new(move |msg| {
            seen_clone.borrow_mut().push(msg.to_string());
        })));
        seen
    }

    #[test]
    fn set_on_plain_record_is_plain_assignment() {
        let record = Record::new();
        set(&Value::Record(record.clone()), "a", 1.0);
        assert_eq!(record.get("a").as_number(), Some(1.0));
    }

    #[test]
    fn set_on_observed_record_installs_interception() {
        let record = Record::new();
        record.set("a", 1.0);
        observe(&Value::Record(record.clone()), false);

        set(&Value::Record(record.clone()), "b", 2.0);
        assert_eq!(record.get("b").as_number(), Some(2.0));
        // retroactively intercepted: the follow-up is an ordinary reactive write
        set(&Value::Record(record.clone()), "b", 3.0);
        assert_eq!(record.get("b").as_number(), Some(3.0));
    }

    #[test]
    fn set_on_root_state_warns_and_aborts() {
        let seen = capture_warnings();
        let record = Record::new();
        record.set("a", 1.0);
        observe(&Value::Record(record.clone()), true);

        set(&Value::Record(record.clone()), "b", 2.0);
        assert!(!record.contains_key("b"));
        assert_eq!(seen.borrow().len(), 1);
        assert!(seen.borrow()[0].contains("declare them upfront"));

        set_warn_handler(None);
    }

    #[test]
    fn set_on_primitive_warns() {
        let seen = capture_warnings();
        set(&Value::Number(5.0), "a", 1.0);
        assert_eq!(seen.borrow().len(), 1);
        set_warn_handler(None);
    }

    #[test]
    fn set_extends_list_to_index() {
        let list = List::new();
        list.push(1.0);
        set(&Value::List(list.clone()), 3usize, 9.0);
        assert_eq!(list.len(), 4);
        assert_eq!(list.get(3).as_number(), Some(9.0));
        assert!(list.get(1).is_null());
    }

    #[test]
    fn set_replaces_existing_list_index() {
        let list = List::from_vec(vec![Value::from(1.0), Value::from(2.0)]);
        set(&Value::List(list.clone()), 0usize, 7.0);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).as_number(), Some(7.0));
    }

    #[test]
    fn del_absent_key_is_noop() {
        let record = Record::new();
        record.set("a", 1.0);
        del(&Value::Record(record.clone()), "missing");
        assert!(record.contains_key("a"));
    }

    #[test]
    fn del_removes_key() {
        let record = Record::new();
        record.set("a", 1.0);
        observe(&Value::Record(record.clone()), false);
        del(&Value::Record(record.clone()), "a");
        assert!(!record.contains_key("a"));
    }

    #[test]
    fn del_on_root_state_warns() {
        let seen = capture_warnings();
        let record = Record::new();
        record.set("a", 1.0);
        observe(&Value::Record(record.clone()), true);

        del(&Value::Record(record.clone()), "a");
        assert!(record.contains_key("a"));
        assert_eq!(seen.borrow().len(), 1);

        set_warn_handler(None);
    }

    #[test]
    fn del_list_index() {
        let list = List::from_vec(vec![Value::from(1.0), Value::from(2.0)]);
        del(&Value::List(list.clone()), 0usize);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).as_number(), Some(2.0));
    }
}
