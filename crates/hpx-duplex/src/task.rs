//! Fault boundaries for caller-supplied code.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

/// Run `f`, logging instead of unwinding if it panics. Returns `None` on panic.
pub(crate) fn guarded<F, T>(label: &'static str, f: F) -> Option<T>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(panic) => {
            error!(callback = label, panic = %panic_message(panic.as_ref()), "Recovered from panic in callback");
            None
        }
    }
}

/// Run `f` on its own task behind a fault boundary.
pub(crate) fn spawn_guarded<F>(label: &'static str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        guarded(label, f);
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
