//! Panic recovery for user-supplied callbacks (codecs, hooks, transformers).
//!
//! `catch_unwind` only hands back the payload, so the backtrace is captured by a process-wide
//! panic hook on the panicking thread and picked up by the catch site on that same thread.

use crate::error::EngineError;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

thread_local! {
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

/// Chain a panic hook that records the backtrace of each panic. The previous hook still runs.
/// Called by `AppState::new`; calling it again is a no-op.
pub fn install_panic_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            LAST_STACK.with(|s| *s.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Backtrace of the most recent panic on this thread, if not already taken.
pub(crate) fn take_stack() -> Option<String> {
    LAST_STACK.with(|s| s.borrow_mut().take())
}

/// Human-readable cause of a caught panic.
pub(crate) fn panic_cause(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `PanicRecovered` for a panic caught while running `what`.
pub(crate) fn recovered(what: impl std::fmt::Display, payload: Box<dyn Any + Send>) -> EngineError {
    EngineError::PanicRecovered {
        cause: format!("{}: {}", what, panic_cause(payload)),
        stack: take_stack(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn recovered_panic_carries_the_stack() {
        install_panic_hook();
        let payload = catch_unwind(|| -> u8 { panic!("boom") }).unwrap_err();
        match recovered("custom export of Tag", payload) {
            EngineError::PanicRecovered { cause, stack } => {
                assert_eq!(cause, "custom export of Tag: boom");
                assert!(stack.is_some_and(|s| !s.is_empty()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(take_stack().is_none());
    }

    #[test]
    fn string_payloads_are_readable() {
        assert_eq!(panic_cause(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_cause(Box::new(7u8)), "unknown panic");
    }
}
