//! Diagnostics - warning and error side channels.
//!
//! Misuse warnings (runtime root-state mutation, unparseable watch paths)
//! and isolated watcher failures are reported through pluggable sinks rather
//! than propagated, so one failing watch cannot abort a flush or crash the
//! consumer. Defaults log through `tracing`.

use std::cell::RefCell;

use thiserror::Error;

/// Failure value produced by watcher evaluators and result callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WatchError {
    message: String,
}

impl WatchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for WatchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for WatchError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Result alias used by evaluators, callbacks, and the watcher surface.
pub type WatchResult<T> = Result<T, WatchError>;

type WarnHandler = Box<dyn Fn(&str)>;
type ErrorHandler = Box<dyn Fn(&WatchError, &str)>;

thread_local! {
    static WARN_HANDLER: RefCell<Option<WarnHandler>> = const { RefCell::new(None) };
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install a custom warning sink. `None` restores the default
/// (`tracing::warn!`).
pub fn set_warn_handler(handler: Option<WarnHandler>) {
    WARN_HANDLER.with(|slot| *slot.borrow_mut() = handler);
}

/// Install a custom error sink for isolated watcher failures. `None`
/// restores the default (`tracing::error!`). The context string names the
/// failing phase and watch expression.
pub fn set_error_handler(handler: Option<ErrorHandler>) {
    ERROR_HANDLER.with(|slot| *slot.borrow_mut() = handler);
}

pub(crate) fn warn(message: &str) {
    let handled = WARN_HANDLER.with(|slot| {
        if let Some(handler) = slot.borrow().as_ref() {
            handler(message);
            true
        } else {
            false
        }
    });
    if !handled {
        tracing::warn!(target: "ripple_reactive", "{message}");
    }
}

pub(crate) fn handle_error(error: &WatchError, context: &str) {
    let handled = ERROR_HANDLER.with(|slot| {
        if let Some(handler) = slot.borrow().as_ref() {
            handler(error, context);
            true
        } else {
            false
        }
    });
    if !handled {
        tracing::error!(target: "ripple_reactive", "{context}: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn watch_error_display() {
        let err = WatchError::new("lookup failed");
        assert_eq!(err.to_string(), "lookup failed");
        assert_eq!(err.message(), "lookup failed");
    }

    #[test]
    fn custom_warn_sink_captures() {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        set_warn_handler(Some(Box::new(move |msg| {
            seen_clone.borrow_mut().push(msg.to_string());
        })));

        warn("something questionable");
        assert_eq!(seen.borrow().as_slice(), ["something questionable"]);

        set_warn_handler(None);
    }

    #[test]
    fn custom_error_sink_receives_context() {
        let seen: Rc<RefCell<Vec<(String, String)>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        set_error_handler(Some(Box::new(move |err, context| {
            seen_clone
                .borrow_mut()
                .push((err.message().to_string(), context.to_string()));
        })));

        handle_error(&WatchError::new("boom"), "getter for watcher \"a.b\"");
        assert_eq!(
            seen.borrow().as_slice(),
            [("boom".to_string(), "getter for watcher \"a.b\"".to_string())]
        );

        set_error_handler(None);
    }
}
