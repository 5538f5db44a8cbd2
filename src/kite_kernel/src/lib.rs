#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
use core::{fmt, marker::PhantomData, mem::forget};

pub mod cfg;
#[cfg(feature = "deadlock_detect")]
pub mod deadlock;
mod error;
pub mod klock;
pub mod profiler;
pub mod state;
mod startup;
pub mod task;
pub mod tick;
pub mod utils;
pub mod wait;

pub use self::{
    cfg::{BuildCfg, MAX_TIME_SLICE, NO_TIME_SLICE, STACK_FILL_VALUE},
    error::*,
    profiler::{NoProfiler, Profiler, TaskTiming, TickProfiler},
    startup::StartupPhase,
    state::{Context, State, StateFlags},
    task::{
        readyqueue::{self, BitmapQueue},
        CreateOptions, StackRegion, TaskAttr, TaskCb, TaskId, TaskSt, WaitReason, IDLE_TASK_ID,
    },
    tick::{DynTickCallbacks, DynamicTick, StaticTick, TickCount, TickMode, TimerHooks},
    utils::Init,
    wait::WaitQueue,
};

#[cfg(feature = "deadlock_detect")]
pub use self::deadlock::{DeadlockCallback, MutexId};

/// The kernel's entry points for a kernel instance `Traits`.
///
/// This is a zero-sized type. All operations are associated functions, e.g.,
/// `System::<MyTraits>::process_tick()`.
pub struct System<Traits>(PhantomData<Traits>);

impl<Traits> Clone for System<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for System<Traits> {}

impl<Traits> fmt::Debug for System<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("System")
    }
}

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states and context switching.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    type PortTaskState: Init + Send + Sync + fmt::Debug + 'static;

    /// Transfer the control to the task chosen by
    /// [`PortToKernel::choose_running_task`], discarding the current
    /// (startup) context. `int_stack` is the interrupt stack the port should
    /// switch to for interrupt handlers.
    ///
    /// Precondition: CPU Lock active, startup phase
    unsafe fn dispatch_first_task(int_stack: StackRegion) -> !;

    /// Yield the processor.
    ///
    /// In a task context, this method immediately transfers the control to
    /// a dispatcher. The dispatcher should call
    /// [`PortToKernel::choose_running_task`] to find the next task to run and
    /// transfer the control to that task.
    ///
    /// In an interrupt context, the effect of this method will be deferred
    /// until the processor completes the execution of all active interrupt
    /// handler threads.
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn yield_cpu();

    /// Disable all kernel-managed interrupts (this state is called *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock();

    /// Re-enable kernel-managed interrupts previously disabled by
    /// `enter_cpu_lock`, thus deactivating the CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Activate CPU Lock. Return `true` iff CPU Lock was inactive before the
    /// call.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return a flag indicating whether the current context is an interrupt
    /// context.
    fn is_interrupt_context() -> bool;

    /// Prepare the task for activation. More specifically, set the current
    /// program counter to [`TaskAttr::entry_point`] and the current stack
    /// pointer to the top of `stack`, ensuring the task will start execution
    /// from `entry_point` next time the task receives the control.
    ///
    /// Precondition: CPU Lock active, the task is Dormant
    unsafe fn initialize_task_state(task: &'static TaskCb<Self>, attr: &TaskAttr, stack: StackRegion)
    where
        Self: KernelTraits;

    /// Halt the system after an unrecoverable error. The error has already
    /// been logged.
    fn fatal_error(e: FatalError) -> ! {
        panic!("kernel fatal error: {e}")
    }
}

/// Methods intended to be called by a port.
pub trait PortToKernel {
    /// Determine the next task to run and make it the running task.
    ///
    /// Precondition: CPU Lock active / Postcondition: CPU Lock active
    unsafe fn choose_running_task();

    /// Tear down a kernel instance that is no longer running. Clears the
    /// system state flags, the scheduling decision and every task control
    /// block, so the instance reports [`Context::None`] until the next
    /// [`System::start`].
    ///
    /// Precondition: CPU Lock active, no task or interrupt handler running
    /// on the instance / Postcondition: CPU Lock active
    unsafe fn shutdown();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn choose_running_task() {
        // Safety: The precondition of this method includes CPU Lock being
        // active
        let mut lock = unsafe { klock::assume_cpu_lock::<Traits>() };

        task::choose_next_running_task(lock.borrow_mut());

        // Post-condition: CPU Lock active
        forget(lock);
    }

    unsafe fn shutdown() {
        // Safety: CPU Lock active
        let mut lock = unsafe { klock::assume_cpu_lock::<Traits>() };

        startup::shutdown(lock.borrow_mut());

        // Post-condition: CPU Lock active
        forget(lock);
    }
}

/// The compile-time configuration of a kernel instance.
pub trait KernelCfg1: Sized + Send + Sync + 'static {
    /// The number of task priority levels, including the idle level
    /// `NUM_TASK_PRIORITY_LEVELS - 1`.
    const NUM_TASK_PRIORITY_LEVELS: usize;

    /// The ready queue implementation. Its capacity must cover every
    /// priority level.
    type TaskReadyQueue: readyqueue::Queue<Self>;

    /// [`StaticTick`] or [`DynamicTick`].
    type TickMode: TickMode<Self>;

    /// [`NoProfiler`] or [`TickProfiler`].
    type Profiler: Profiler<Self>;

    /// The timer subsystem hooked into the tick processor. `()` for none.
    type Timers: TimerHooks<Self>;
}

/// Associates a kernel instance with its static storage. Use [`build!`] to
/// implement.
///
/// # Safety
///
/// This is only intended to be implemented by `build!`.
pub unsafe trait KernelCfg2: PortThreading + KernelCfg1 {
    /// Access the kernel's global state.
    fn state() -> &'static State<Self>;

    /// The pool of task control blocks. Slot 0 is the idle task.
    fn task_cb_pool() -> &'static [TaskCb<Self>];

    /// The build configuration the application was compiled against, if it
    /// wants it checked at startup.
    #[inline]
    fn app_build_cfg() -> Option<BuildCfg> {
        None
    }
}

/// Represents a complete kernel instance.
pub trait KernelTraits: PortThreading + KernelCfg1 + KernelCfg2 {}
impl<T: PortThreading + KernelCfg1 + KernelCfg2> KernelTraits for T {}

/// Implement [`KernelCfg2`] on `$Traits`, instantiating the kernel state and
/// a pool of `num_tasks` task control blocks (including the idle task).
///
/// `$Traits` must implement [`PortThreading`] and [`KernelCfg1`].
///
/// ```ignore
/// kite_kernel::build!(MyTraits, num_tasks = 8);
/// kite_kernel::build!(MyTraits, num_tasks = 8, app_build_cfg = MY_BUILD_CFG);
/// ```
#[macro_export]
macro_rules! build {
    ($Traits:ty, num_tasks = $num_tasks:expr $(, app_build_cfg = $app_build_cfg:expr)? $(,)?) => {
        const _: () = {
            use $crate::{
                readyqueue::Queue, utils::Init, BuildCfg, KernelCfg1, KernelCfg2, State, TaskCb,
            };

            const _: () = assert!(
                <$Traits as KernelCfg1>::NUM_TASK_PRIORITY_LEVELS >= 2
                    && <$Traits as KernelCfg1>::NUM_TASK_PRIORITY_LEVELS
                        <= <<$Traits as KernelCfg1>::TaskReadyQueue as Queue<$Traits>>::CAPACITY,
                "the number of priority levels must be in `2..=TaskReadyQueue::CAPACITY`",
            );
            const _: () = assert!($num_tasks >= 1, "the idle task needs a slot");

            // Safety: We are `build!`, so it's okay to `impl` this
            unsafe impl KernelCfg2 for $Traits {
                #[inline(always)]
                fn state() -> &'static State<$Traits> {
                    static KERNEL_STATE: State<$Traits> = Init::INIT;
                    &KERNEL_STATE
                }

                #[inline(always)]
                fn task_cb_pool() -> &'static [TaskCb<$Traits>] {
                    static TASK_CB_POOL: [TaskCb<$Traits>; $num_tasks] = Init::INIT;
                    &TASK_CB_POOL
                }

                $(
                    #[inline]
                    fn app_build_cfg() -> Option<BuildCfg> {
                        Some($app_build_cfg)
                    }
                )?
            }
        };
    };
}
