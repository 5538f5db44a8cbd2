//! Global kernel state: the system state flags, the execution context, and
//! the scheduler decision shared by every component
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::{
    error::BadContextError,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    task::{StackRegion, TaskCb},
    utils::{intrusive_list::ListHead, Init},
    KernelCfg1, KernelTraits, PortThreading, System,
};

bitflags::bitflags! {
    /// The global system state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        /// The kernel has handed control to the first task.
        const SYS_RUNNING = 1 << 0;
        /// At least one mutex deadlock is active.
        const DEADLOCK = 1 << 1;
    }
}

/// The kind of code that is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// The system hasn't started yet.
    None,
    /// A task is running.
    Task,
    /// An interrupt handler is running.
    Interrupt,
}

/// The state of a kernel instance.
pub struct State<Traits: KernelCfg1 + PortThreading> {
    pub(crate) task_ready_queue: Traits::TaskReadyQueue,

    pub(crate) tick: Traits::TickMode,

    /// [`StateFlags`]. Loaded without CPU Lock. Only modified by
    /// [`set_flags`] and [`clear_flags`], which require CPU Lock.
    flags: AtomicU8,

    /// The number of mutex deadlocks currently active.
    #[cfg(feature = "deadlock_detect")]
    pub(crate) deadlock_count: AtomicUsize,

    #[cfg(feature = "deadlock_detect")]
    pub(crate) deadlock_callback: CpuLockCell<Traits, Option<crate::deadlock::DeadlockCallback>>,

    /// Tasks created but never activated, linked by `TaskCb::create_link`.
    pub(crate) staging_queue: CpuLockCell<Traits, ListHead>,

    /// The length of `staging_queue`. Loaded without CPU Lock.
    pub(crate) created_task_count: AtomicUsize,

    /// The task that currently owns the processor.
    pub(crate) running_task: CpuLockCell<Traits, Option<&'static TaskCb<Traits>>>,

    /// The task the port should switch to at the next dispatch. Once the idle
    /// task is runnable, this is the head of the highest-priority non-empty
    /// ready queue.
    pub(crate) next_task_to_run: CpuLockCell<Traits, Option<&'static TaskCb<Traits>>>,

    pub(crate) idle_hook: CpuLockCell<Traits, Option<fn()>>,

    pub(crate) int_stack: CpuLockCell<Traits, Option<StackRegion>>,
}

impl<Traits: KernelCfg1 + PortThreading> Init for State<Traits> {
    const INIT: Self = Self {
        task_ready_queue: Init::INIT,
        tick: Init::INIT,
        flags: AtomicU8::new(0),
        #[cfg(feature = "deadlock_detect")]
        deadlock_count: AtomicUsize::new(0),
        #[cfg(feature = "deadlock_detect")]
        deadlock_callback: CpuLockCell::new(None),
        staging_queue: Init::INIT,
        created_task_count: AtomicUsize::new(0),
        running_task: CpuLockCell::new(None),
        next_task_to_run: CpuLockCell::new(None),
        idle_hook: CpuLockCell::new(None),
        int_stack: CpuLockCell::new(None),
    };
}

impl<Traits: KernelTraits> State<Traits> {
    /// Get the current [`StateFlags`] without entering CPU Lock.
    #[inline]
    pub fn flags(&self) -> StateFlags {
        StateFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn running_task(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
    ) -> Option<&'static TaskCb<Traits>> {
        *self.running_task.read(&*lock)
    }

    #[inline]
    pub(crate) fn next_task_to_run(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
    ) -> Option<&'static TaskCb<Traits>> {
        *self.next_task_to_run.read(&*lock)
    }

    /// Put every field back to its boot-time value.
    pub(crate) fn reset(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        self.flags.store(0, Ordering::Release);
        #[cfg(feature = "deadlock_detect")]
        self.deadlock_count.store(0, Ordering::Relaxed);
        self.staging_queue.replace(&mut *lock, ListHead::INIT);
        self.created_task_count.store(0, Ordering::Relaxed);
        self.running_task.replace(&mut *lock, None);
        self.next_task_to_run.replace(&mut *lock, None);
        self.int_stack.replace(&mut *lock, None);
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Get the system state flags. Doesn't enter CPU Lock, so this can be
    /// called from any context.
    #[inline]
    pub fn state_flags() -> StateFlags {
        Traits::state().flags()
    }

    /// Get the kind of code that is currently executing.
    #[inline]
    pub fn context() -> Context {
        context::<Traits>()
    }
}

/// Set the bits of `mask` in the system state flags and return the previous
/// flags.
pub fn set_flags<Traits: KernelTraits>(
    _lock: CpuLockTokenRefMut<'_, Traits>,
    mask: StateFlags,
) -> StateFlags {
    let state = Traits::state();
    // CPU Lock serializes writers, so a plain load-store pair is enough
    let prev = state.flags();
    state.flags.store((prev | mask).bits(), Ordering::Release);
    prev
}

/// Clear the bits of `mask` in the system state flags and return the
/// previous flags.
pub fn clear_flags<Traits: KernelTraits>(
    _lock: CpuLockTokenRefMut<'_, Traits>,
    mask: StateFlags,
) -> StateFlags {
    let state = Traits::state();
    let prev = state.flags();
    state.flags.store((prev - mask).bits(), Ordering::Release);
    prev
}

/// Return `true` if the kernel has handed control to the first task.
#[inline]
pub(crate) fn is_running<Traits: KernelTraits>() -> bool {
    Traits::state().flags().contains(StateFlags::SYS_RUNNING)
}

/// Determine the current [`Context`].
pub(crate) fn context<Traits: KernelTraits>() -> Context {
    if !is_running::<Traits>() {
        Context::None
    } else if Traits::is_interrupt_context() {
        Context::Interrupt
    } else {
        Context::Task
    }
}

/// If the current context is an interrupt context, return `Err(BadContext)`.
pub(crate) fn expect_non_interrupt_context<Traits: KernelTraits>() -> Result<(), BadContextError>
{
    if context::<Traits>() == Context::Interrupt {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}

/// If the current context is not a task context, return `Err(BadContext)`.
pub(crate) fn expect_task_context<Traits: KernelTraits>() -> Result<(), BadContextError> {
    if context::<Traits>() != Context::Task {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}
