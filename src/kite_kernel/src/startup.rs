//! System startup
use core::{marker::PhantomData, mem};

use crate::{
    cfg::BuildCfg,
    error::{fatal, FatalError},
    klock::{self, CpuLockGuard},
    profiler::Profiler,
    state::{self, StateFlags},
    task::{self, readyqueue::Queue, CreateOptions, StackRegion, TaskAttr},
    tick::{TickMode, TimerHooks},
    KernelTraits, System,
};

/// The phases of [`Startup`].
///
/// <center>
///
#[doc = svgbobdoc::transform!(
/// ```svgbob
///  .---------------.  initialize   .--------------.  create_idle_task
///  | Uninitialized |-------------->| Initializing |----------------------.
///  '---------------'               '--------------'                      |
///                                                                        v
///  .---------.    launch    .------------------.                 .-------------.
///  | Running |<-------------| UserTasksCreated |                 | IdleCreated |
///  '---------'              '------------------'                 '-------------'
///                                    ^                                   |
///                                    | create_user_tasks                 |
///                           .----------------.    activate_idle_task     |
///                           | IdleActivated  |<--------------------------'
///                           '----------------'
/// ```
)]
///
/// </center>
///
/// Calling a step in any other phase is [`FatalError::StartupOutOfOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    Uninitialized,
    Initializing,
    IdleCreated,
    IdleActivated,
    UserTasksCreated,
    Running,
}

/// Drives a kernel instance from reset to the first dispatch.
pub(crate) struct Startup<Traits> {
    phase: StartupPhase,
    int_stack: Option<StackRegion>,
    _phantom: PhantomData<Traits>,
}

impl<Traits: KernelTraits> Startup<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            phase: StartupPhase::Uninitialized,
            int_stack: None,
            _phantom: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn phase(&self) -> StartupPhase {
        self.phase
    }

    fn advance(&mut self, from: StartupPhase, to: StartupPhase) -> Result<(), FatalError> {
        if self.phase != from {
            return Err(FatalError::StartupOutOfOrder);
        }
        log::debug!("startup: {from:?} -> {to:?}");
        self.phase = to;
        Ok(())
    }

    fn lock() -> Result<CpuLockGuard<Traits>, FatalError> {
        klock::lock_cpu::<Traits>().map_err(|_| FatalError::StartupOutOfOrder)
    }

    /// Validate the configuration and put every piece of kernel state back to
    /// its boot-time value.
    pub(crate) fn initialize(&mut self, int_stack: StackRegion) -> Result<(), FatalError> {
        self.advance(StartupPhase::Uninitialized, StartupPhase::Initializing)?;
        let mut lock = Self::lock()?;
        let state = Traits::state();

        state.tick.check_startup(lock.borrow_mut())?;

        if let Some(app) = Traits::app_build_cfg() {
            if let Some(field) = BuildCfg::of::<Traits>().mismatch(&app) {
                return Err(FatalError::BuildCfgMismatch(field));
            }
        }

        let levels = Traits::NUM_TASK_PRIORITY_LEVELS;
        if levels < 2 || levels > <Traits::TaskReadyQueue as Queue<Traits>>::CAPACITY {
            return Err(FatalError::TooManyPriorityLevels);
        }

        state.reset(lock.borrow_mut());
        state.task_ready_queue.reset(lock.borrow_mut().into());
        state.tick.reset(lock.borrow_mut());
        task::reset_pool(lock.borrow_mut());

        int_stack.fill();
        state.int_stack.replace(&mut *lock, Some(int_stack));
        self.int_stack = Some(int_stack);

        <Traits::Timers as TimerHooks<Traits>>::init(lock.borrow_mut());

        Ok(())
    }

    /// Create the idle task in slot 0 at the lowest priority level.
    pub(crate) fn create_idle_task(&mut self, idle_stack: StackRegion) -> Result<(), FatalError> {
        self.advance(StartupPhase::Initializing, StartupPhase::IdleCreated)?;
        let mut lock = Self::lock()?;
        let idle = Traits::task_cb_pool()
            .first()
            .ok_or(FatalError::IdleTaskCreation)?;
        let attr = TaskAttr {
            entry_point: idle_task_body::<Traits>,
            entry_param: 0,
            priority: Traits::NUM_TASK_PRIORITY_LEVELS - 1,
        };
        task::create(lock.borrow_mut(), idle, attr, idle_stack, CreateOptions::IDLE)
            .map_err(|_| FatalError::IdleTaskCreation)
    }

    /// Activate the idle task and make it the running task, so that every
    /// later switch has a valid outgoing task.
    pub(crate) fn activate_idle_task(&mut self) -> Result<(), FatalError> {
        self.advance(StartupPhase::IdleCreated, StartupPhase::IdleActivated)?;
        let mut lock = Self::lock()?;
        let state = Traits::state();
        let idle = Traits::task_cb_pool()
            .first()
            .ok_or(FatalError::IdleTaskActivation)?;

        state.next_task_to_run.replace(&mut *lock, Some(idle));
        task::activate(lock.borrow_mut(), idle).map_err(|_| FatalError::IdleTaskActivation)?;
        state.running_task.replace(&mut *lock, Some(idle));
        <Traits::Profiler as Profiler<Traits>>::mark_running(lock.borrow_mut(), idle)
    }

    /// Let the application create its tasks. CPU Lock is inactive while
    /// `create_user_tasks` runs.
    pub(crate) fn create_user_tasks(&mut self, create_user_tasks: fn()) -> Result<(), FatalError> {
        self.advance(StartupPhase::IdleActivated, StartupPhase::UserTasksCreated)?;
        create_user_tasks();
        log::debug!(
            "startup: {} task(s) staged",
            System::<Traits>::created_task_count()
        );
        Ok(())
    }

    /// Mark the system as running and hand the processor to the first task.
    /// CPU Lock stays active until the port's first dispatch releases it.
    pub(crate) fn launch(mut self) -> Result<core::convert::Infallible, FatalError> {
        self.advance(StartupPhase::UserTasksCreated, StartupPhase::Running)?;
        let int_stack = self.int_stack.ok_or(FatalError::StartupOutOfOrder)?;
        let mut lock = Self::lock()?;
        state::set_flags(lock.borrow_mut(), StateFlags::SYS_RUNNING);

        // The port takes over the CPU Lock state from here
        mem::forget(lock);

        // Safety: CPU Lock active, the kernel is fully initialized
        unsafe { Traits::dispatch_first_task(int_stack) }
    }
}

/// The body of the idle task.
fn idle_task_body<Traits: KernelTraits>(_: usize) {
    loop {
        let hook = klock::lock_cpu::<Traits>()
            .ok()
            .and_then(|lock| *Traits::state().idle_hook.read(&*lock));
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Start the kernel. Never returns.
    ///
    /// Creates and activates the idle task on `idle_stack`, calls
    /// `create_user_tasks` to let the application create its tasks, and then
    /// hands the processor to the highest-priority one. The idle task calls
    /// `idle_hook` repeatedly whenever nothing else is runnable.
    ///
    /// Any startup failure is a [`FatalError`].
    pub fn start(
        idle_stack: &'static mut [usize],
        int_stack: &'static mut [usize],
        create_user_tasks: fn(),
        idle_hook: fn(),
    ) -> ! {
        let mut startup = Startup::<Traits>::new();
        match run_startup(&mut startup, idle_stack, int_stack, create_user_tasks, idle_hook) {
            Ok(()) => match startup.launch() {
                Ok(never) => match never {},
                Err(e) => fatal::<Traits>(e),
            },
            Err(e) => {
                log::debug!("startup failed in phase {:?}", startup.phase());
                fatal::<Traits>(e)
            }
        }
    }
}

fn run_startup<Traits: KernelTraits>(
    startup: &mut Startup<Traits>,
    idle_stack: &'static mut [usize],
    int_stack: &'static mut [usize],
    create_user_tasks: fn(),
    idle_hook: fn(),
) -> Result<(), FatalError> {
    startup.initialize(StackRegion::new(int_stack))?;
    {
        let mut lock = Startup::<Traits>::lock()?;
        Traits::state()
            .idle_hook
            .replace(&mut *lock, Some(idle_hook));
    }
    startup.create_idle_task(StackRegion::new(idle_stack))?;
    startup.activate_idle_task()?;
    startup.create_user_tasks(create_user_tasks)
}

/// Implements `PortToKernel::shutdown`. The clock and the dynamic tick
/// callbacks are left alone; the next startup handles them.
pub(crate) fn shutdown<Traits: KernelTraits>(mut lock: klock::CpuLockTokenRefMut<'_, Traits>) {
    let state = Traits::state();
    state.reset(lock.borrow_mut());
    state.task_ready_queue.reset(lock.borrow_mut().into());
    task::reset_pool(lock.borrow_mut());
    log::debug!("kernel shut down");
}
