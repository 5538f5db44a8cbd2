//! Deadlock bookkeeping for the mutex implementation
//!
//! The mutex implementation reports every deadlock it detects or resolves.
//! This module keeps the number of active deadlocks, maintains
//! [`StateFlags::DEADLOCK`], and forwards each report to the application.
//!
//! Only available with the `deadlock_detect` feature.
use core::{num::NonZeroUsize, sync::atomic::Ordering};

use crate::{
    error::{ReportDeadlockError, SetCallbackError},
    klock::{self, CpuLockTokenRefMut},
    state::{self, StateFlags},
    task::TaskId,
    KernelTraits, System,
};

/// Identifies a mutex. The numbering is defined by the mutex implementation.
pub type MutexId = NonZeroUsize;

/// Called on every deadlock report with `(active, mutex, task)`: whether the
/// deadlock became active or was resolved, the mutex involved, and the task
/// that tried to lock it.
pub type DeadlockCallback = fn(bool, MutexId, TaskId);

/// Record a deadlock becoming active (`active == true`) or being resolved.
///
/// The counter saturates at zero. [`StateFlags::DEADLOCK`] is set when the
/// counter leaves zero and cleared when it returns to zero. The registered
/// callback, if any, is then invoked exactly once.
pub fn record_deadlock<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    active: bool,
    mutex: MutexId,
    task: TaskId,
) {
    let state = Traits::state();
    let count = state.deadlock_count.load(Ordering::Relaxed);

    if active {
        state.deadlock_count.store(count + 1, Ordering::Relaxed);
        if count == 0 {
            log::warn!("deadlock detected (mutex {mutex}, task {task})");
            state::set_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
        }
    } else if count > 0 {
        state.deadlock_count.store(count - 1, Ordering::Relaxed);
        if count == 1 {
            log::warn!("all deadlocks resolved (mutex {mutex}, task {task})");
            state::clear_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
        }
    }

    if let Some(callback) = *state.deadlock_callback.read(&*lock) {
        callback(active, mutex, task);
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Register the function notified of every deadlock report.
    pub fn set_deadlock_callback(callback: DeadlockCallback) -> Result<(), SetCallbackError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Traits::state()
            .deadlock_callback
            .replace(&mut *lock, Some(callback));
        Ok(())
    }

    /// Get the number of currently active deadlocks.
    pub fn deadlock_count() -> usize {
        Traits::state().deadlock_count.load(Ordering::Relaxed)
    }

    /// Report a deadlock becoming active or being resolved. This is the
    /// entry point for a mutex implementation outside the kernel's CPU Lock.
    pub fn report_deadlock(
        active: bool,
        mutex: MutexId,
        task: TaskId,
    ) -> Result<(), ReportDeadlockError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        record_deadlock(lock.borrow_mut(), active, mutex, task);
        Ok(())
    }
}
