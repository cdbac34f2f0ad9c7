//! Update scheduler - batches, deduplicates, orders, and flushes watchers.
//!
//! Watchers queued within one turn flush together on the next tick, in
//! ascending creation order - parents before children, side-effect watches
//! before their owner's primary computation. A per-watcher re-entry counter
//! aborts runaway update loops instead of spinning forever.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::error::warn;
use crate::scope::Scope;
use crate::tick;
use crate::watcher::{Watcher, WatcherFlags};

/// Re-entries of a single watcher within one flush before the circuit
/// breaker trips.
pub const MAX_UPDATE_COUNT: u32 = 100;

struct SchedulerState {
    queue: Vec<Watcher>,
    activated: Vec<Scope>,
    has: HashSet<u64>,
    circular: HashMap<u64, u32>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl SchedulerState {
    fn new() -> SchedulerState {
        SchedulerState {
            queue: Vec::new(),
            activated: Vec::new(),
            has: HashSet::new(),
            circular: HashMap::new(),
            waiting: false,
            flushing: false,
            index: 0,
        }
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::new());

    static FLUSH_OBSERVER: RefCell<Option<Box<dyn Fn()>>> = const { RefCell::new(None) };
}

/// Queue a watcher for the next flush. Duplicate ids are skipped; a watcher
/// queued mid-flush is spliced into id order among the entries not yet
/// processed, and runs next if its slot has already passed.
pub(crate) fn queue_watcher(watcher: &Watcher) {
    let id = watcher.id();
    let schedule = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if state.has.contains(&id) {
            return false;
        }
        state.has.insert(id);
        if !state.flushing {
            state.queue.push(watcher.clone());
        } else {
            let mut pos = state.queue.len();
            while pos > state.index + 1 && state.queue[pos - 1].id() > id {
                pos -= 1;
            }
            state.queue.insert(pos, watcher.clone());
        }
        if !state.waiting {
            state.waiting = true;
            return true;
        }
        false
    });
    if schedule {
        tick::schedule(Box::new(flush_scheduler_queue));
    }
}

/// Queue an owner activated during the current flush; its activation hook
/// fires after the flush completes, before any updated hook.
pub fn queue_activated(scope: &Scope) {
    scope.set_inactive(false);
    SCHEDULER.with(|state| state.borrow_mut().activated.push(scope.clone()));
}

/// Flush the queue: sort by creation order, run each watcher, detect
/// circular updates, then reset state and fire the post-flush hooks.
pub(crate) fn flush_scheduler_queue() {
    SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = true;
        state.queue.sort_by_key(Watcher::id);
        state.index = 0;
    });

    // index is live state, not a snapshot: running a watcher may queue more
    loop {
        let watcher = SCHEDULER.with(|state| {
            let state = state.borrow();
            state.queue.get(state.index).cloned()
        });
        let Some(watcher) = watcher else {
            break;
        };
        watcher.call_before();
        let id = watcher.id();
        SCHEDULER.with(|state| {
            state.borrow_mut().has.remove(&id);
        });
        watcher.run();

        // the watcher re-queued itself, directly or transitively
        let requeued = SCHEDULER.with(|state| state.borrow().has.contains(&id));
        if requeued {
            let count = SCHEDULER.with(|state| {
                let mut state = state.borrow_mut();
                let count = state.circular.entry(id).or_insert(0);
                *count += 1;
                *count
            });
            if count > MAX_UPDATE_COUNT {
                let culprit = if watcher.flags().contains(WatcherFlags::USER) {
                    format!("in watcher with expression \"{}\"", watcher.expression())
                } else {
                    String::from("in a primary computation")
                };
                warn(&format!("you may have an infinite update loop {culprit}"));
                break;
            }
        }
        SCHEDULER.with(|state| {
            state.borrow_mut().index += 1;
        });
    }

    // snapshot the post queues, then reset before invoking callbacks so a
    // callback can start a fresh cycle
    let (activated, updated) = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        let activated = std::mem::take(&mut state.activated);
        let updated = std::mem::take(&mut state.queue);
        state.has.clear();
        state.circular.clear();
        state.waiting = false;
        state.flushing = false;
        state.index = 0;
        (activated, updated)
    });

    for scope in &activated {
        scope.call_activated();
    }
    for watcher in updated.iter().rev() {
        watcher.notify_owner_updated();
    }
    FLUSH_OBSERVER.with(|slot| {
        if let Some(hook) = slot.borrow().as_ref() {
            hook();
        }
    });
}

/// Install a developer-tooling hook invoked after every flush. `None`
/// removes it.
pub fn set_flush_observer(hook: Option<Box<dyn Fn()>>) {
    FLUSH_OBSERVER.with(|slot| *slot.borrow_mut() = hook);
}

/// Reset all scheduler state (for testing).
pub fn reset_scheduler_state() {
    SCHEDULER.with(|state| *state.borrow_mut() = SchedulerState::new());
    FLUSH_OBSERVER.with(|slot| *slot.borrow_mut() = None);
}
