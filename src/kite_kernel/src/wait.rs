//! Wait queues
//!
//! A wait queue is a FIFO list of tasks blocked on some kernel object. The
//! synchronization objects that own wait queues are not part of this crate;
//! they block the running task with [`System::wait_current`] and release
//! waiters with [`WaitQueue::notify_deleted`] when they are deleted.
//!
//! [`System::wait_current`]: crate::System::wait_current
use core::fmt;

use crate::{
    error::{fatal, FatalError, ResultCode, WaitQueueError},
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    task::{self, TaskCb},
    utils::{
        intrusive_list::{ListAccessorCell, ListHead},
        Init,
    },
    KernelCfg1, KernelTraits, PortThreading,
};

/// A queue of tasks waiting for the same event.
pub struct WaitQueue<Traits: KernelCfg1 + PortThreading> {
    pub(crate) head: CpuLockCell<Traits, ListHead>,
}

impl<Traits: KernelCfg1 + PortThreading> Init for WaitQueue<Traits> {
    const INIT: Self = Self::new();
}

impl<Traits: KernelCfg1 + PortThreading> WaitQueue<Traits> {
    pub const fn new() -> Self {
        Self {
            head: CpuLockCell::new(ListHead::INIT),
        }
    }
}

impl<Traits: KernelCfg1 + PortThreading> Default for WaitQueue<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: KernelTraits> fmt::Debug for WaitQueue<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitQueue").field("head", &self.head).finish()
    }
}

/// Get a `ListAccessorCell` used to access a wait queue.
macro_rules! list_accessor {
    ($head:expr, $key:expr) => {
        ListAccessorCell::new(
            $head,
            Traits::task_cb_pool(),
            |task_cb: &'static TaskCb<Traits>| &task_cb.queue_link,
            $key,
        )
    };
}

impl<Traits: KernelTraits> WaitQueue<Traits> {
    /// Wake up every waiting task with [`ResultCode::Deleted`], then request
    /// a dispatch if one of them outranks the running task.
    ///
    /// Called by the owner of the queue when the object is deleted.
    pub fn notify_deleted(&'static self) -> Result<(), WaitQueueError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        notify_deleted(lock.borrow_mut(), self);
        task::unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Get the number of waiting tasks.
    pub fn len(&self) -> Result<usize, WaitQueueError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(list_accessor!(&self.head, lock.borrow_mut()).iter().count())
    }

    /// Return `true` if no task is waiting.
    pub fn is_empty(&self) -> Result<bool, WaitQueueError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(list_accessor!(&self.head, lock.borrow_mut()).is_empty())
    }

    /// Link `task_cb` to the tail of the queue.
    pub(crate) fn push_back(
        &'static self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
    ) {
        if let Err(e) = list_accessor!(&self.head, lock.borrow_mut()).push_back(task_cb.index()) {
            fatal::<Traits>(e.into());
        }
        task_cb.waiting_on.replace(&mut *lock, Some(self));
    }

    /// Unlink `task_cb`, which must be in this queue.
    pub(crate) fn remove(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
    ) {
        if let Err(e) = list_accessor!(&self.head, lock.borrow_mut()).remove(task_cb.index()) {
            fatal::<Traits>(e.into());
        }
        task_cb.waiting_on.replace(&mut *lock, None);
    }
}

/// Complete the wait of every task in `queue` with [`ResultCode::Deleted`].
///
/// Each waiter leaves the queue as its wait completes, so the successor is
/// read before the current waiter is released. The queue is empty when this
/// returns; anything else is a fatal error.
pub(crate) fn notify_deleted<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    queue: &WaitQueue<Traits>,
) {
    let pool = Traits::task_cb_pool();
    let mut cursor = list_accessor!(&queue.head, lock.borrow_mut()).front();
    let mut woken = 0usize;

    while let Some(i) = cursor {
        let next = list_accessor!(&queue.head, lock.borrow_mut())
            .next(i)
            .unwrap_or_else(|e| fatal::<Traits>(e.into()));

        let Some(task_cb) = pool.get(i) else {
            fatal::<Traits>(FatalError::InconsistentQueue);
        };
        task::complete_wait(lock.borrow_mut(), task_cb, ResultCode::Deleted);
        woken += 1;

        cursor = next;
    }

    if !list_accessor!(&queue.head, lock.borrow_mut()).is_empty() {
        fatal::<Traits>(FatalError::WaitQueueNotEmpty);
    }

    log::debug!("wait queue deleted, {woken} waiter(s) released");
}
