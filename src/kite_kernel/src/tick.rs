//! System tick processing and round-robin time slicing
//!
//! The tick mode is chosen statically by [`KernelCfg1::TickMode`]:
//!
//!  - [`StaticTick`] expects [`System::process_tick`] to be called from a
//!    periodic timer interrupt. It owns the system clock and the per-priority
//!    time-slice table.
//!
//!  - [`DynamicTick`] lets the application drive the timer hardware on
//!    demand through two callbacks. The clock is whatever the "get current
//!    tick" callback returns. Time slicing is not supported in this mode.
use core::fmt;

use crate::{
    cfg::{MAX_TIME_SLICE, NO_TIME_SLICE},
    error::{FatalError, SetCallbackError, SetTimeSliceError, TickError, TimeError},
    klock::{self, CpuLockCell, CpuLockTokenRefMut},
    state::{self, Context},
    task::{self, readyqueue::Queue as _, TaskCb, TaskSt},
    utils::Init,
    KernelCfg1, KernelTraits, PortThreading, System,
};

/// The system clock value, in ticks. Wraps around on overflow.
pub type TickCount = u32;

/// The tick mode of a kernel instance.
///
/// This trait is not intended to be implemented on custom types.
pub trait TickMode<Traits>: Init + Send + Sync + 'static + private::Sealed {
    /// `true` for [`DynamicTick`].
    const DYNAMIC: bool;

    /// Put the clock and the time-slice table back to their boot-time values.
    fn reset(&self, lock: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits;

    /// Check that the tick mode can start.
    fn check_startup(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> Result<(), FatalError>
    where
        Traits: KernelTraits;

    /// Advance the clock by one tick.
    fn advance(&self, lock: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits;

    /// Get the current clock value.
    fn now(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> TickCount
    where
        Traits: KernelTraits;

    /// Charge one tick to `running_task` and rotate its priority level when
    /// its quota is used up.
    fn round_robin(&self, lock: CpuLockTokenRefMut<'_, Traits>, running_task: &'static TaskCb<Traits>)
    where
        Traits: KernelTraits;

    /// Set the time-slice quota of `priority`. The arguments are already
    /// range-checked by the caller.
    fn set_time_slice(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
        priority: usize,
        ticks: u16,
    ) -> Result<(), SetTimeSliceError>
    where
        Traits: KernelTraits;
}

mod private {
    pub trait Sealed {}
}

/// The per-tick hooks of the timer subsystem.
pub trait TimerHooks<Traits>: 'static {
    /// Called once during startup.
    fn init(lock: CpuLockTokenRefMut<'_, Traits>);

    /// Called once per tick, after round robin and before the scheduling
    /// decision is refreshed.
    fn tick(lock: CpuLockTokenRefMut<'_, Traits>);
}

/// No timer subsystem.
impl<Traits> TimerHooks<Traits> for () {
    #[inline]
    fn init(_: CpuLockTokenRefMut<'_, Traits>) {}
    #[inline]
    fn tick(_: CpuLockTokenRefMut<'_, Traits>) {}
}

/// The static tick mode for `LEN` priority levels.
pub struct StaticTick<Traits, const LEN: usize> {
    clock: CpuLockCell<Traits, TickCount>,

    /// The time-slice quota of each priority level, or [`NO_TIME_SLICE`].
    time_slices: CpuLockCell<Traits, [u16; LEN]>,
}

impl<Traits, const LEN: usize> Init for StaticTick<Traits, LEN> {
    const INIT: Self = Self {
        clock: CpuLockCell::new(0),
        time_slices: CpuLockCell::new([NO_TIME_SLICE; LEN]),
    };
}

impl<Traits, const LEN: usize> private::Sealed for StaticTick<Traits, LEN> {}

impl<Traits: PortThreading, const LEN: usize> TickMode<Traits> for StaticTick<Traits, LEN> {
    const DYNAMIC: bool = false;

    fn reset(&self, mut lock: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits,
    {
        self.clock.replace(&mut *lock, 0);
        self.time_slices.replace(&mut *lock, [NO_TIME_SLICE; LEN]);
    }

    fn check_startup(&self, _: CpuLockTokenRefMut<'_, Traits>) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        if LEN < Traits::NUM_TASK_PRIORITY_LEVELS {
            return Err(FatalError::TooManyPriorityLevels);
        }
        Ok(())
    }

    #[inline]
    fn advance(&self, mut lock: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits,
    {
        let clock = self.clock.write(&mut *lock);
        *clock = clock.wrapping_add(1);
    }

    #[inline]
    fn now(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> TickCount
    where
        Traits: KernelTraits,
    {
        *self.clock.read(&*lock)
    }

    fn round_robin(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        running_task: &'static TaskCb<Traits>,
    ) where
        Traits: KernelTraits,
    {
        // A task that stopped being runnable has already left its queue
        if *running_task.st.read(&*lock) != TaskSt::Runnable {
            return;
        }

        let priority = *running_task.priority.read(&*lock);
        let quota = self
            .time_slices
            .read(&*lock)
            .get(priority)
            .copied()
            .unwrap_or(NO_TIME_SLICE);
        if quota == NO_TIME_SLICE {
            return;
        }

        let count = running_task.tslice_count.write(&mut *lock);
        *count += 1;
        if *count <= u32::from(quota) {
            return;
        }
        *count = 0;

        let queue = &Traits::state().task_ready_queue;
        if queue.len(lock.borrow_mut().into(), priority) > 1 {
            log::trace!("time slice expired at priority {priority}, rotating");
            queue.rotate(lock.borrow_mut().into(), priority);
        }
    }

    fn set_time_slice(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        priority: usize,
        ticks: u16,
    ) -> Result<(), SetTimeSliceError>
    where
        Traits: KernelTraits,
    {
        let slot = self
            .time_slices
            .write(&mut *lock)
            .get_mut(priority)
            .ok_or(SetTimeSliceError::BadParam)?;
        *slot = ticks;
        Ok(())
    }
}

/// The callbacks through which [`DynamicTick`] controls the timer hardware.
#[derive(Clone, Copy)]
pub struct DynTickCallbacks {
    /// Arrange for [`System::process_tick`] to be called after the given
    /// number of ticks. [`TickCount::MAX`] means "no timeout pending".
    pub schedule: fn(TickCount),
    /// Read the current tick count.
    pub get_tick: fn() -> TickCount,
}

impl fmt::Debug for DynTickCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("DynTickCallbacks")
    }
}

/// The dynamic tick mode.
pub struct DynamicTick<Traits> {
    callbacks: CpuLockCell<Traits, Option<DynTickCallbacks>>,
}

impl<Traits> Init for DynamicTick<Traits> {
    const INIT: Self = Self {
        callbacks: CpuLockCell::new(None),
    };
}

impl<Traits> private::Sealed for DynamicTick<Traits> {}

impl<Traits: KernelTraits> DynamicTick<Traits> {
    /// Ask the application to deliver the next tick after `timeout` ticks.
    /// Used by the timer subsystem.
    pub fn schedule_next_tick(&self, lock: CpuLockTokenRefMut<'_, Traits>, timeout: TickCount) {
        if let Some(callbacks) = *self.callbacks.read(&*lock) {
            (callbacks.schedule)(timeout);
        }
    }
}

impl<Traits: PortThreading> TickMode<Traits> for DynamicTick<Traits> {
    const DYNAMIC: bool = true;

    // The callbacks are registered before startup, so they survive the reset
    #[inline]
    fn reset(&self, _: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits,
    {
    }

    fn check_startup(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        if self.callbacks.read(&*lock).is_none() {
            return Err(FatalError::DynTickCallbacksMissing);
        }
        Ok(())
    }

    #[inline]
    fn advance(&self, _: CpuLockTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits,
    {
    }

    #[inline]
    fn now(&self, lock: CpuLockTokenRefMut<'_, Traits>) -> TickCount
    where
        Traits: KernelTraits,
    {
        self.callbacks
            .read(&*lock)
            .map_or(0, |callbacks| (callbacks.get_tick)())
    }

    #[inline]
    fn round_robin(&self, _: CpuLockTokenRefMut<'_, Traits>, _: &'static TaskCb<Traits>)
    where
        Traits: KernelTraits,
    {
    }

    fn set_time_slice(
        &self,
        _: CpuLockTokenRefMut<'_, Traits>,
        _: usize,
        _: u16,
    ) -> Result<(), SetTimeSliceError>
    where
        Traits: KernelTraits,
    {
        Err(SetTimeSliceError::NotSupported)
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Process a system tick.
    ///
    /// Must be called from an interrupt handler after the system has
    /// started: once per timer period in the static tick mode, or whenever
    /// the timer scheduled through [`DynTickCallbacks::schedule`] fires in
    /// the dynamic tick mode. Returns `BadContext` otherwise, leaving every
    /// piece of kernel state untouched.
    pub fn process_tick() -> Result<(), TickError> {
        if state::context::<Traits>() != Context::Interrupt {
            return Err(TickError::BadContext);
        }

        let mut lock = klock::lock_cpu::<Traits>()?;
        let state = Traits::state();

        state.tick.advance(lock.borrow_mut());

        if let Some(running_task) = state.running_task(lock.borrow_mut()) {
            state.tick.round_robin(lock.borrow_mut(), running_task);
        }

        <Traits::Timers as TimerHooks<Traits>>::tick(lock.borrow_mut());

        // Round robin may have changed the head of the running level
        task::refresh_next_task_to_run(lock.borrow_mut());

        task::unlock_cpu_and_check_preemption(lock);

        Ok(())
    }

    /// Set the time-slice quota of priority level `priority`. `ticks ==`
    /// [`NO_TIME_SLICE`] disables round robin for the level.
    ///
    /// The idle level (`NUM_TASK_PRIORITY_LEVELS - 1`) can't be configured.
    pub fn set_time_slice(priority: usize, ticks: u16) -> Result<(), SetTimeSliceError> {
        state::expect_non_interrupt_context::<Traits>()?;
        let mut lock = klock::lock_cpu::<Traits>()?;

        if <Traits::TickMode as TickMode<Traits>>::DYNAMIC {
            return Err(SetTimeSliceError::NotSupported);
        }

        if priority >= Traits::NUM_TASK_PRIORITY_LEVELS - 1 || ticks > MAX_TIME_SLICE {
            return Err(SetTimeSliceError::BadParam);
        }

        Traits::state()
            .tick
            .set_time_slice(lock.borrow_mut(), priority, ticks)
    }

    /// Get the current system clock value.
    pub fn time() -> Result<TickCount, TimeError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(Traits::state().tick.now(lock.borrow_mut()))
    }
}

impl<Traits> System<Traits>
where
    Traits: KernelTraits + KernelCfg1<TickMode = DynamicTick<Traits>>,
{
    /// Register the dynamic tick callbacks. Must be called before
    /// [`System::start`]; startup halts with
    /// [`FatalError::DynTickCallbacksMissing`] otherwise.
    pub fn set_dyn_tick_callbacks(
        schedule: fn(TickCount),
        get_tick: fn() -> TickCount,
    ) -> Result<(), SetCallbackError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        if state::is_running::<Traits>() {
            return Err(SetCallbackError::BadObjectState);
        }
        Traits::state()
            .tick
            .callbacks
            .replace(&mut *lock, Some(DynTickCallbacks { schedule, get_tick }));
        Ok(())
    }

    /// Ask the application to deliver the next tick after `timeout` ticks.
    pub fn schedule_next_tick(timeout: TickCount) -> Result<(), TimeError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Traits::state()
            .tick
            .schedule_next_tick(lock.borrow_mut(), timeout);
        Ok(())
    }
}
