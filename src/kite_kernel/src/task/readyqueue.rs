//! Task ready queue implementation
//!
//! One FIFO list per priority level plus a bitmap of the non-empty levels.
//! The running task stays at the head of its level's list while it runs.
use core::marker::PhantomData;

use crate::{
    error::{fatal, FatalError},
    klock::{CpuLockCell, CpuLockTokenRefMut},
    task::{TaskCb, TaskSt},
    utils::{
        intrusive_list::{InconsistentError, ListAccessorCell, ListHead},
        Init, PrioBitmap,
    },
    KernelTraits, PortThreading,
};

/// Represents a task ready queue, which tracks the Runnable tasks of every
/// priority level.
///
/// This trait is not intended to be implemented on custom types.
pub trait Queue<Traits>: Send + Sync + Init + 'static + private::Sealed {
    /// The number of priority levels this queue can track.
    const CAPACITY: usize;

    /// Empty every level.
    fn reset(&self, ctx: Ctx<'_, Traits>)
    where
        Traits: KernelTraits;

    /// Append `task_cb` to the tail of the list for `priority` and mark the
    /// level as non-empty.
    ///
    /// `task_cb` must not be in any ready list.
    fn push_back_task(&self, ctx: Ctx<'_, Traits>, task_cb: &'static TaskCb<Traits>, priority: usize)
    where
        Traits: KernelTraits;

    /// Unlink `task_cb` from the list for `priority`, clearing the level's
    /// bit if the list becomes empty.
    fn remove_task(&self, ctx: Ctx<'_, Traits>, task_cb: &'static TaskCb<Traits>, priority: usize)
    where
        Traits: KernelTraits;

    /// Get the highest priority level (lowest value) with a Runnable task.
    fn highest_ready_priority(&self, ctx: Ctx<'_, Traits>) -> Option<usize>
    where
        Traits: KernelTraits;

    /// Get the first task of the list for `priority`.
    fn front_task(&self, ctx: Ctx<'_, Traits>, priority: usize) -> Option<&'static TaskCb<Traits>>
    where
        Traits: KernelTraits;

    /// Move the first task of the list for `priority` to its tail.
    fn rotate(&self, ctx: Ctx<'_, Traits>, priority: usize)
    where
        Traits: KernelTraits;

    /// Get the number of tasks in the list for `priority`.
    fn len(&self, ctx: Ctx<'_, Traits>, priority: usize) -> usize
    where
        Traits: KernelTraits;

    /// Call `f` for each task in the list for `priority`, from head to tail.
    fn for_each(
        &self,
        ctx: Ctx<'_, Traits>,
        priority: usize,
        f: impl FnMut(&'static TaskCb<Traits>),
    ) where
        Traits: KernelTraits;

    /// Check that every level's bit is set iff its list is non-empty and
    /// every listed task is Runnable at that level.
    fn is_consistent(&self, ctx: Ctx<'_, Traits>) -> bool
    where
        Traits: KernelTraits;
}

/// Implements [the sealed trait pattern], which prevents [`Queue`] against
/// downstream implementations.
///
/// [the sealed trait pattern]: https://rust-lang.github.io/api-guidelines/future-proofing.html
mod private {
    pub trait Sealed {}
}

/// The context type for [`Queue`].
pub struct Ctx<'a, Traits: PortThreading> {
    pub(crate) lock: CpuLockTokenRefMut<'a, Traits>,
}

impl<'a, Traits: PortThreading> From<CpuLockTokenRefMut<'a, Traits>> for Ctx<'a, Traits> {
    #[inline]
    fn from(lock: CpuLockTokenRefMut<'a, Traits>) -> Self {
        Self { lock }
    }
}

/// The ready queue implementation that uses a set of queues segregated by the
/// priorities of contained tasks.
///
/// `Bitmap` is the bitmap word (`u8`, `u16`, `u32`, `u64`, or `usize`).
/// `LEN` is the number of priority levels and must not exceed the word
/// width.
pub struct BitmapQueue<Traits: PortThreading, Bitmap: 'static, const LEN: usize> {
    /// The set of segregated task ready queues, in which each queue stores
    /// the list of Runnable tasks at the corresponding priority.
    ///
    /// Invariant: `queues[i].first.is_some() == bitmap.get(i)`
    queues: [CpuLockCell<Traits, ListHead>; LEN],

    /// The task ready bitmap, in which each bit indicates whether the
    /// segregated queue corresponding to that bit contains a task or not.
    bitmap: CpuLockCell<Traits, Bitmap>,

    _phantom: PhantomData<Traits>,
}

impl<Traits: PortThreading, Bitmap: Init, const LEN: usize> Init
    for BitmapQueue<Traits, Bitmap, LEN>
{
    const INIT: Self = Self {
        queues: Init::INIT,
        bitmap: Init::INIT,
        _phantom: PhantomData,
    };
}

impl<Traits: PortThreading, Bitmap, const LEN: usize> private::Sealed
    for BitmapQueue<Traits, Bitmap, LEN>
{
}

/// Get a `ListAccessorCell` used to access a task ready queue.
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

/// Unwrap a list operation result, treating a corrupted list as fatal.
#[inline]
fn or_fatal<Traits: KernelTraits, T>(x: Result<T, InconsistentError>) -> T {
    x.unwrap_or_else(|e| fatal::<Traits>(FatalError::from(e)))
}

impl<Traits: KernelTraits, Bitmap: PrioBitmap, const LEN: usize> BitmapQueue<Traits, Bitmap, LEN> {
    /// Get the list head for `priority`, treating an out-of-range level as
    /// fatal.
    #[inline]
    fn queue(&self, priority: usize) -> &CpuLockCell<Traits, ListHead> {
        self.queues
            .get(priority)
            .unwrap_or_else(|| fatal::<Traits>(FatalError::TooManyPriorityLevels))
    }
}

impl<Traits: PortThreading, Bitmap: PrioBitmap, const LEN: usize> Queue<Traits>
    for BitmapQueue<Traits, Bitmap, LEN>
{
    const CAPACITY: usize = if LEN < Bitmap::CAPACITY {
        LEN
    } else {
        Bitmap::CAPACITY
    };

    fn reset(&self, Ctx { mut lock }: Ctx<'_, Traits>)
    where
        Traits: KernelTraits,
    {
        for head in self.queues.iter() {
            head.replace(&mut *lock, ListHead::INIT);
        }
        self.bitmap.replace(&mut *lock, Bitmap::INIT);
    }

    fn push_back_task(
        &self,
        Ctx { mut lock }: Ctx<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
        priority: usize,
    ) where
        Traits: KernelTraits,
    {
        or_fatal::<Traits, _>(
            list_accessor!(self.queue(priority), lock.borrow_mut()).push_back(task_cb.index()),
        );

        // Update `bitmap` accordingly
        self.bitmap.write(&mut *lock).set(priority);
    }

    fn remove_task(
        &self,
        Ctx { mut lock }: Ctx<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
        priority: usize,
    ) where
        Traits: KernelTraits,
    {
        let is_empty = {
            let mut accessor = list_accessor!(self.queue(priority), lock.borrow_mut());
            or_fatal::<Traits, _>(accessor.remove(task_cb.index()));
            accessor.is_empty()
        };

        if is_empty {
            self.bitmap.write(&mut *lock).clear(priority);
        }
    }

    #[inline]
    fn highest_ready_priority(&self, Ctx { lock }: Ctx<'_, Traits>) -> Option<usize>
    where
        Traits: KernelTraits,
    {
        self.bitmap.read(&*lock).find_set()
    }

    fn front_task(
        &self,
        Ctx { mut lock }: Ctx<'_, Traits>,
        priority: usize,
    ) -> Option<&'static TaskCb<Traits>>
    where
        Traits: KernelTraits,
    {
        let accessor = list_accessor!(self.queue(priority), lock.borrow_mut());
        accessor.front().and_then(|i| accessor.element(i))
    }

    fn rotate(&self, Ctx { mut lock }: Ctx<'_, Traits>, priority: usize)
    where
        Traits: KernelTraits,
    {
        or_fatal::<Traits, _>(list_accessor!(self.queue(priority), lock.borrow_mut()).rotate());
    }

    fn len(&self, Ctx { mut lock }: Ctx<'_, Traits>, priority: usize) -> usize
    where
        Traits: KernelTraits,
    {
        list_accessor!(self.queue(priority), lock.borrow_mut())
            .iter()
            .count()
    }

    fn for_each(
        &self,
        Ctx { mut lock }: Ctx<'_, Traits>,
        priority: usize,
        mut f: impl FnMut(&'static TaskCb<Traits>),
    ) where
        Traits: KernelTraits,
    {
        let accessor = list_accessor!(self.queue(priority), lock.borrow_mut());
        for i in accessor.iter() {
            let i = or_fatal::<Traits, _>(i);
            if let Some(task_cb) = accessor.element(i) {
                f(task_cb);
            }
        }
    }

    fn is_consistent(&self, Ctx { mut lock }: Ctx<'_, Traits>) -> bool
    where
        Traits: KernelTraits,
    {
        let bitmap = *self.bitmap.read(&*lock);
        for (priority, head) in self.queues.iter().enumerate().take(Self::CAPACITY) {
            let accessor = list_accessor!(head, lock.borrow_mut());
            if accessor.is_empty() == bitmap.get(priority) {
                return false;
            }
            for i in accessor.iter() {
                let Ok(i) = i else { return false };
                let Some(task_cb) = accessor.element(i) else {
                    return false;
                };
                let key = &**accessor.cell_key();
                if *task_cb.priority.read(key) != priority
                    || *task_cb.st.read(key) != TaskSt::Runnable
                {
                    return false;
                }
            }
        }
        true
    }
}
