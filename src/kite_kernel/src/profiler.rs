//! Context-switch profiler
//!
//! When [`KernelCfg1::Profiler`] is [`TickProfiler`], every context switch
//! charges the elapsed ticks to the outgoing task as run time and to the
//! incoming task as wait time, bucketed by the reason the incoming task last
//! stopped running. [`NoProfiler`] compiles all of it away.
//!
//! [`KernelCfg1::Profiler`]: crate::KernelCfg1::Profiler
use core::fmt;

use crate::{
    error::{FatalError, QueryTaskError},
    klock::{self, CpuLockTokenRefMut},
    task::{TaskCb, TaskId, WaitReason},
    tick::{TickCount, TickMode as _},
    utils::Init,
    KernelCfg1, KernelTraits, System,
};

/// The profiler capability of a kernel instance.
///
/// This trait is not intended to be implemented on custom types.
pub trait Profiler<Traits>: 'static + private::Sealed {
    /// Per-task statistics stored in each task control block.
    type PerTaskData: Init + Send + Sync + fmt::Debug + 'static;

    /// `true` for [`TickProfiler`].
    const ENABLED: bool;

    /// Mark `task_cb` as the running task without a preceding switch. Used
    /// for the idle task during startup.
    fn mark_running(
        lock: CpuLockTokenRefMut<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits;

    /// Account for a context switch from `prev` to `next`.
    fn on_switch(
        lock: CpuLockTokenRefMut<'_, Traits>,
        prev: &'static TaskCb<Traits>,
        next: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits;
}

mod private {
    pub trait Sealed {}
}

/// The profiler is disabled.
pub struct NoProfiler;

impl private::Sealed for NoProfiler {}

impl<Traits> Profiler<Traits> for NoProfiler {
    type PerTaskData = ();

    const ENABLED: bool = false;

    #[inline]
    fn mark_running(
        _: CpuLockTokenRefMut<'_, Traits>,
        _: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        Ok(())
    }

    #[inline]
    fn on_switch(
        _: CpuLockTokenRefMut<'_, Traits>,
        _: &'static TaskCb<Traits>,
        _: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        Ok(())
    }
}

/// The profiler is enabled, measuring in system ticks.
pub struct TickProfiler;

impl private::Sealed for TickProfiler {}

/// Accumulated timing statistics of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    /// The total number of ticks the task has been running.
    pub total_run_time: u64,
    /// The longest uninterrupted run, in ticks.
    pub max_consecutive_run_time: TickCount,
    /// The total number of ticks spent waiting, indexed by
    /// `WaitReason as usize`.
    pub total_wait_time: [u64; WaitReason::COUNT],
    /// The longest uninterrupted wait, indexed by `WaitReason as usize`.
    pub max_consecutive_wait_time: [TickCount; WaitReason::COUNT],
    /// The number of times the task was switched in.
    pub got_running_count: u32,
}

impl Init for TaskTiming {
    const INIT: Self = Self {
        total_run_time: 0,
        max_consecutive_run_time: 0,
        total_wait_time: [0; WaitReason::COUNT],
        max_consecutive_wait_time: [0; WaitReason::COUNT],
        got_running_count: 0,
    };
}

/// The per-task state of [`TickProfiler`].
#[derive(Debug)]
pub struct ProfilerTaskData {
    last_tick: TickCount,
    last_wait_reason: WaitReason,
    timing: TaskTiming,
    /// Only maintained in debug builds.
    is_running: bool,
}

impl Init for ProfilerTaskData {
    const INIT: Self = Self {
        last_tick: 0,
        last_wait_reason: WaitReason::None,
        timing: TaskTiming::INIT,
        is_running: false,
    };
}

impl ProfilerTaskData {
    /// Charge the ticks since the last switch as run time. `wait_reason` is
    /// why the task stops running.
    fn switch_out(&mut self, now: TickCount, wait_reason: WaitReason) {
        let run_time = now.wrapping_sub(self.last_tick);
        self.timing.total_run_time += u64::from(run_time);
        self.timing.max_consecutive_run_time = self.timing.max_consecutive_run_time.max(run_time);
        self.last_tick = now;
        self.last_wait_reason = wait_reason;
    }

    /// Charge the ticks since the last switch as wait time for the reason
    /// recorded by [`Self::switch_out`].
    fn switch_in(&mut self, now: TickCount) {
        let wait_time = now.wrapping_sub(self.last_tick);
        let bucket = self.last_wait_reason as usize;
        self.timing.total_wait_time[bucket] += u64::from(wait_time);
        let max = &mut self.timing.max_consecutive_wait_time[bucket];
        *max = (*max).max(wait_time);
        self.timing.got_running_count = self.timing.got_running_count.wrapping_add(1);
        self.last_tick = now;
    }
}

impl<Traits> Profiler<Traits> for TickProfiler
where
    Traits: KernelCfg1<Profiler = Self>,
{
    type PerTaskData = ProfilerTaskData;

    const ENABLED: bool = true;

    fn mark_running(
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        task_cb: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        let now = Traits::state().tick.now(lock.borrow_mut());
        let data = task_cb.profiler_data.write(&mut *lock);
        if cfg!(debug_assertions) {
            if data.is_running {
                return Err(FatalError::ProfilerRunningFlag);
            }
            data.is_running = true;
        }
        data.last_tick = now;
        Ok(())
    }

    fn on_switch(
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        prev: &'static TaskCb<Traits>,
        next: &'static TaskCb<Traits>,
    ) -> Result<(), FatalError>
    where
        Traits: KernelTraits,
    {
        let now = Traits::state().tick.now(lock.borrow_mut());
        let prev_wait_reason = *prev.wait_reason.read(&*lock);

        {
            let data = prev.profiler_data.write(&mut *lock);
            if cfg!(debug_assertions) {
                if !data.is_running {
                    return Err(FatalError::ProfilerRunningFlag);
                }
                data.is_running = false;
            }

            data.switch_out(now, prev_wait_reason);
        }

        {
            let data = next.profiler_data.write(&mut *lock);
            if cfg!(debug_assertions) {
                if data.is_running {
                    return Err(FatalError::ProfilerRunningFlag);
                }
                data.is_running = true;
            }

            data.switch_in(now);
        }

        Ok(())
    }
}

impl<Traits> System<Traits>
where
    Traits: KernelTraits + KernelCfg1<Profiler = TickProfiler>,
{
    /// Get a snapshot of the timing statistics of the task `id`.
    pub fn task_timing(id: TaskId) -> Result<TaskTiming, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        Ok(task_cb.profiler_data.read(&*lock).timing)
    }
}
