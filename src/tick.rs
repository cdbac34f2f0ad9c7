//! Deferred flush - the next-tick seam.
//!
//! The scheduler hands its flush callback here instead of running it inline.
//! By default tasks land in a thread-local queue the host drains with
//! `run_pending()` (or implicitly through `batch()`); an event-loop host can
//! take over delivery entirely with `set_flush_scheduler`. Draining keeps
//! going until the queue stays empty, so a flush callback that schedules a
//! new cycle still completes within the same drain.

use std::cell::{Cell, RefCell};

/// A deferred unit of work, normally the scheduler's flush.
pub type Task = Box<dyn FnOnce()>;

thread_local! {
    static PENDING: RefCell<Vec<Task>> = const { RefCell::new(Vec::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static HOST: RefCell<Option<Box<dyn Fn(Task)>>> = const { RefCell::new(None) };
}

/// Route scheduled tasks through a host event loop instead of the internal
/// queue. `None` restores the internal queue.
pub fn set_flush_scheduler(host: Option<Box<dyn Fn(Task)>>) {
    HOST.with(|slot| *slot.borrow_mut() = host);
}

/// Schedule a task for the next tick.
pub fn schedule(task: Task) {
    let mut task = Some(task);
    let routed = HOST.with(|slot| {
        if let Some(host) = slot.borrow().as_ref() {
            if let Some(task) = task.take() {
                host(task);
            }
            true
        } else {
            false
        }
    });
    if !routed {
        if let Some(task) = task.take() {
            PENDING.with(|pending| pending.borrow_mut().push(task));
        }
    }
}

/// Drain pending tasks, including any scheduled while draining. Returns the
/// number of tasks run; re-entrant calls are no-ops.
pub fn run_pending() -> usize {
    if DRAINING.with(Cell::get) {
        return 0;
    }
    DRAINING.with(|flag| flag.set(true));
    let mut count = 0;
    loop {
        let tasks: Vec<Task> = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        if tasks.is_empty() {
            break;
        }
        for task in tasks {
            task();
            count += 1;
        }
    }
    DRAINING.with(|flag| flag.set(false));
    count
}

/// Run `f`, then drain every flush it scheduled.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let result = f();
    run_pending();
    result
}

/// Drop pending tasks and any host hook (for testing).
pub fn reset_tick_state() {
    PENDING.with(|pending| pending.borrow_mut().clear());
    DRAINING.with(|flag| flag.set(false));
    HOST.with(|slot| *slot.borrow_mut() = None);
}
