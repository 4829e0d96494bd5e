//! Scoped exclusive access to a device.
//!
//! [`Guarded`] pairs a mutex with a busy flag. Long operations (a control
//! change, a frame grab) run through [`Guarded::with_device`]; opportunistic
//! work that must never wait, like the overlay refresh, uses
//! [`Guarded::try_if_idle`] and is skipped while the device is busy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, TryLockError};

/// A device behind a mutex and a busy flag.
#[derive(Debug)]
pub struct Guarded<D> {
    device: Mutex<D>,
    busy: AtomicBool,
}

/// Clears the busy flag on every exit path, unwinding included.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<D> Guarded<D> {
    pub fn new(device: D) -> Self {
        Self {
            device: Mutex::new(device),
            busy: AtomicBool::new(false),
        }
    }

    /// True while an operation holds the device.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Run `f` with exclusive access, waiting for any current holder.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        let _busy = BusyFlag::raise(&self.busy);
        f(&mut device)
    }

    /// Run `f` only if nobody holds the device; `None` otherwise.
    pub fn try_if_idle<R>(&self, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        if self.is_busy() {
            return None;
        }
        let mut device = match self.device.try_lock() {
            Ok(device) => device,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        let _busy = BusyFlag::raise(&self.busy);
        Some(f(&mut device))
    }
}
