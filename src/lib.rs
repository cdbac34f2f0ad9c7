//! # ripple-reactive
//!
//! Fine-grained reactive dependency-tracking runtime for Rust.
//!
//! Observes mutable state, discovers which computations read which pieces of
//! it, and re-runs exactly the affected computations - in a deterministic,
//! batched, cycle-safe order - whenever the state changes. No rendering, no
//! templates: a general observable-state engine for whatever sits on top.
//!
//! ## Architecture
//!
//! ```text
//! Record/List cells → Dep (per key + structural) → Watcher → Scheduler → flush
//! ```
//!
//! Reads inside an evaluating watcher register dependency registries; writes
//! notify the touched registries; notified watchers either run synchronously,
//! mark themselves dirty (computed), or queue for a single batched flush on
//! the next tick.
//!
//! ## Modules
//!
//! - [`value`] - dynamic value model (`Value`, `Record`, `List`)
//! - [`dep`] - dependency registries and the active-watcher stack
//! - [`observer`] - observation layer (`observe`, `define_reactive`)
//! - [`mutate`] - imperative `set`/`del` for keys unknown at observation time
//! - [`watcher`] - reactive computations and computed values
//! - [`scheduler`] - batched, deduplicated, ordered flushing
//! - [`scope`] - reactive owners (root state + lifecycle seam)
//! - [`tick`] - the deferred-flush seam (`batch`, `run_pending`)
//!
//! ## Example
//!
//! ```
//! use ripple_reactive::{batch, Record, Scope, WatchSource, WatcherFlags};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let state = Record::new();
//! state.set("count", 0.0);
//! let scope = Scope::new(state.clone());
//!
//! let runs = Rc::new(Cell::new(0));
//! let runs_in = runs.clone();
//! let _watch = scope
//!     .watch(
//!         WatchSource::path("count"),
//!         Rc::new(move |_scope, _new, _old| {
//!             runs_in.set(runs_in.get() + 1);
//!             Ok(())
//!         }),
//!         WatcherFlags::empty(),
//!     )
//!     .unwrap();
//!
//! batch(|| state.set("count", 1.0));
//! assert_eq!(runs.get(), 1);
//! ```

pub mod dep;
pub mod error;
pub mod mutate;
pub mod observer;
pub mod scheduler;
pub mod scope;
pub mod tick;
mod traverse;
pub mod value;
pub mod watcher;

// Re-export the working surface
pub use dep::Dep;
pub use error::{WatchError, WatchResult, set_error_handler, set_warn_handler};
pub use mutate::{Key, del, set};
pub use observer::{
    Observer, define_reactive, observation_enabled, observe, set_observation_enabled,
};
pub use scheduler::{
    MAX_UPDATE_COUNT, queue_activated, reset_scheduler_state, set_flush_observer,
};
pub use scope::Scope;
pub use tick::{batch, reset_tick_state, run_pending, schedule, set_flush_scheduler};
pub use value::{List, Record, Value};
pub use watcher::{
    BeforeHook, CallbackFn, Computed, GetterFn, WatchSource, Watcher, WatcherFlags,
};
