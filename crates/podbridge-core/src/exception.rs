//! Per-thread pending failure and the boundary that surfaces it.
//!
//! Every bridge call runs inside [`translate`]. Failures raised during the
//! call, whether returned, recorded with [`fail`], or panicked, end up in a
//! thread-local pending slot. When the call returns, a pending failure always
//! wins over whatever value was produced, so the host never sees a partial
//! result next to an exception.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

thread_local! {
    static PENDING: RefCell<Option<BridgeError>> = const { RefCell::new(None) };
}

/// Record a failure for the current call. A later failure replaces an
/// earlier one.
pub fn fail(err: BridgeError) {
    PENDING.with(|slot| {
        if let Some(previous) = slot.borrow_mut().replace(err) {
            debug!(kind = %previous.kind(), error = %previous, "pending failure overwritten");
        }
    });
}

/// Remove and return the pending failure, if any.
pub fn take_pending() -> Option<BridgeError> {
    PENDING.with(|slot| slot.borrow_mut().take())
}

pub fn has_pending() -> bool {
    PENDING.with(|slot| slot.borrow().is_some())
}

fn clear() {
    PENDING.with(|slot| {
        if let Some(stale) = slot.borrow_mut().take() {
            debug!(kind = %stale.kind(), error = %stale, "discarding stale pending failure");
        }
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one bridge call and translate its outcome.
///
/// `call` names the host entry point for logging.
pub fn translate<T, F>(call: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    clear();

    let value = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            fail(err);
            None
        }
        Err(payload) => {
            fail(BridgeError::native(format!(
                "panic in {call}: {}",
                panic_message(payload.as_ref())
            )));
            None
        }
    };

    if let Some(err) = take_pending() {
        warn!(call, kind = %err.kind(), error = %err, "bridge call failed");
        return Err(err);
    }
    value.ok_or_else(|| BridgeError::native(format!("{call} produced no value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_value() {
        assert_eq!(translate("ok", || Ok(7)), Ok(7));
        assert!(!has_pending());
    }

    #[test]
    fn test_error_is_surfaced_and_cleared() {
        let result: Result<()> = translate("err", || Err(BridgeError::name("z")));
        assert_eq!(result, Err(BridgeError::Name("z".into())));
        assert!(!has_pending());
    }

    #[test]
    fn test_pending_failure_beats_value() {
        let result = translate("partial", || {
            fail(BridgeError::Inference("first".into()));
            fail(BridgeError::Lookup("second".into()));
            Ok(vec![1, 2, 3])
        });
        assert_eq!(result, Err(BridgeError::Lookup("second".into())));
    }

    #[test]
    fn test_panic_becomes_native_error() {
        let result: Result<u8> = translate("boom", || panic!("engine exploded"));
        match result {
            Err(BridgeError::Native(msg)) => {
                assert!(msg.contains("boom"));
                assert!(msg.contains("engine exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stale_state_is_cleared_on_entry() {
        fail(BridgeError::native("left over"));
        assert!(has_pending());
        assert_eq!(translate("fresh", || Ok("fine")), Ok("fine"));
    }

    #[test]
    fn test_pending_is_per_thread() {
        fail(BridgeError::native("main thread"));
        std::thread::spawn(|| assert!(!has_pending())).join().unwrap();
        assert!(take_pending().is_some());
    }
}
