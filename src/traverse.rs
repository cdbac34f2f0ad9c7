//! Deep traversal - read every reachable property so a deep watcher depends
//! on the entire value graph, not just the top-level reference.
//!
//! Record keys are read through `Record::get`, which registers their
//! registries on the active watcher; structural registries are registered
//! explicitly, since a directly-watched container is not reached through any
//! property getter. A seen-set of structural-registry ids guards cycles.

use std::collections::HashSet;

use crate::value::Value;

pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_value(value, &mut seen);
}

fn traverse_value(value: &Value, seen: &mut HashSet<u64>) {
    if let Some(observer) = value.observer() {
        if !seen.insert(observer.dep().id()) {
            return;
        }
        observer.dep().depend();
    }
    match value {
        Value::Record(record) => {
            for key in record.keys() {
                traverse_value(&record.get(&key), seen);
            }
        }
        Value::List(list) => {
            for item in list.to_vec() {
                traverse_value(&item, seen);
            }
        }
        _ => {}
    }
}
