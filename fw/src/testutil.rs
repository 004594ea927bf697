//! Shared test support.
//!
//! Most registries in this crate are process-wide statics. Tests that touch
//! them serialize on this lock and restore what they changed.

use std::sync::{Mutex, MutexGuard};

static GLOBAL: Mutex<()> = Mutex::new(());

pub fn lock() -> MutexGuard<'static, ()> {
    GLOBAL.lock().unwrap_or_else(|poison| poison.into_inner())
}
