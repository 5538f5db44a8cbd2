#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use kite_kernel::{
    KernelTraits, PortThreading, PortToKernel, StackRegion, System, TaskAttr, TaskCb, TaskId,
    TickError,
};
use spin::Mutex as SpinMutex;
use std::{
    convert::Infallible,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate kite_kernel;

/// The default size of the idle task stack and the interrupt stack, in
/// words.
pub const DEFAULT_STACK_LEN: usize = 256;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance:
    KernelTraits + PortThreading<PortTaskState = TaskState> + PortToKernel
{
    fn port_state() -> &'static State;
}

type Scenario = Box<dyn FnOnce() + Send>;

/// The unwinding payload used to leave [`run`] once the scenario completes.
#[derive(Debug)]
pub struct Shutdown;

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `PortThreading`.
#[doc(hidden)]
pub struct State {
    cpu_lock: AtomicBool,
    /// `true` while a simulated interrupt handler is running.
    in_interrupt: AtomicBool,
    /// A dispatch requested by an interrupt handler, performed when the
    /// handler returns.
    dispatch_pending: AtomicBool,
    int_stack: SpinMutex<Option<StackRegion>>,
    scenario: SpinMutex<Option<Scenario>>,
    /// Serializes [`run`] calls on the same kernel instance.
    run_lock: Mutex<()>,
}

/// The port-specific part of a task control block.
#[derive(Debug)]
pub struct TaskState {
    /// Accessed with CPU Lock active, so `SpinMutex` is sufficient.
    tsm: SpinMutex<Tsm>,
}

impl kite_kernel::Init for TaskState {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

/// Task state machine
///
/// These don't exactly align with the task states defined in the kernel.
#[derive(Debug, Clone, Copy)]
enum Tsm {
    /// The task's context state is not initialized.
    Uninit,
    /// `initialize_task_state` has prepared the task's initial context.
    Initialized {
        entry_point: fn(usize),
        entry_param: usize,
    },
}

impl TaskState {
    pub const fn new() -> Self {
        Self {
            tsm: SpinMutex::new(Tsm::Uninit),
        }
    }

    /// Forget the task's context. Called before every boot because task
    /// control blocks outlive a simulated system.
    fn reset(&self) {
        *self.tsm.lock() = Tsm::Uninit;
    }

    /// Get the entry point and parameter of the task's initial context.
    pub fn entry(&self) -> Option<(fn(usize), usize)> {
        match *self.tsm.lock() {
            Tsm::Uninit => None,
            Tsm::Initialized {
                entry_point,
                entry_param,
            } => Some((entry_point, entry_param)),
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::missing_safety_doc)]
impl State {
    pub const fn new() -> Self {
        Self {
            cpu_lock: AtomicBool::new(false),
            in_interrupt: AtomicBool::new(false),
            dispatch_pending: AtomicBool::new(false),
            int_stack: SpinMutex::new(None),
            scenario: SpinMutex::new(None),
            run_lock: Mutex::new(()),
        }
    }

    fn reset(&self) {
        self.cpu_lock.store(false, Ordering::SeqCst);
        self.in_interrupt.store(false, Ordering::SeqCst);
        self.dispatch_pending.store(false, Ordering::SeqCst);
        *self.int_stack.lock() = None;
        *self.scenario.lock() = None;
    }

    pub unsafe fn dispatch_first_task<Traits: PortInstance>(
        &'static self,
        int_stack: StackRegion,
    ) -> ! {
        log::trace!("dispatch_first_task");
        assert!(self.is_cpu_lock_active());

        *self.int_stack.lock() = Some(int_stack);

        // Safety: CPU Lock active
        unsafe { Traits::choose_running_task() };
        // Safety: CPU Lock active
        unsafe { self.leave_cpu_lock() };

        log::debug!(
            "first task is {:?}",
            System::<Traits>::current_task().ok().flatten()
        );

        let scenario = self.scenario.lock().take();
        if let Some(scenario) = scenario {
            scenario();
        }

        log::debug!("scenario complete, shutting down");
        panic::resume_unwind(Box::new(Shutdown))
    }

    pub unsafe fn yield_cpu<Traits: PortInstance>(&self) {
        log::trace!("yield_cpu");
        assert!(!self.is_cpu_lock_active());

        if self.in_interrupt.load(Ordering::SeqCst) {
            self.dispatch_pending.store(true, Ordering::SeqCst);
        } else {
            self.dispatch::<Traits>();
        }
    }

    fn dispatch<Traits: PortInstance>(&self) {
        // Safety: CPU Lock inactive
        unsafe { self.enter_cpu_lock() };
        // Safety: CPU Lock active
        unsafe { Traits::choose_running_task() };
        // Safety: CPU Lock active
        unsafe { self.leave_cpu_lock() };
    }

    pub unsafe fn enter_cpu_lock(&self) {
        log::trace!("enter_cpu_lock");
        let was_active = self.cpu_lock.swap(true, Ordering::SeqCst);
        assert!(!was_active);
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");
        self.cpu_lock.store(false, Ordering::SeqCst);
    }

    pub unsafe fn initialize_task_state<Traits: PortInstance>(
        &self,
        task: &'static TaskCb<Traits>,
        attr: &TaskAttr,
        stack: StackRegion,
    ) {
        log::trace!("initialize_task_state {task:p} (stack top = {:p})", stack.top());
        assert!(self.is_cpu_lock_active());

        *task.port_task_state.tsm.lock() = Tsm::Initialized {
            entry_point: attr.entry_point,
            entry_param: attr.entry_param,
        };
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.load(Ordering::SeqCst)
    }

    pub fn is_interrupt_context(&self) -> bool {
        self.in_interrupt.load(Ordering::SeqCst)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a task stack of `len` words that lives until the process exits.
pub fn leak_stack(len: usize) -> &'static mut [usize] {
    Box::leak(vec![0usize; len].into_boxed_slice())
}

/// The boot parameters of [`run_with`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub idle_stack_len: usize,
    pub int_stack_len: usize,
    pub idle_hook: fn(),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_stack_len: DEFAULT_STACK_LEN,
            int_stack_len: DEFAULT_STACK_LEN,
            idle_hook: || {},
        }
    }
}

/// Boot the kernel instance `Traits` with the default [`Config`].
///
/// See [`run_with`].
pub fn run<Traits: PortInstance>(create_user_tasks: fn(), scenario: impl FnOnce() + Send + 'static) {
    run_with::<Traits>(Config::default(), create_user_tasks, scenario)
}

/// Boot the kernel instance `Traits`, then run `scenario` in the context of
/// the first dispatched task.
///
/// The simulation doesn't execute task bodies. `scenario` stands for
/// whatever code runs on the processor: it calls kernel services, raises
/// simulated interrupts with [`in_interrupt`] and [`pend_tick`], and
/// observes the scheduling decisions. Returns when `scenario` returns. A
/// panic, including a fatal kernel error, is propagated to the caller.
///
/// Calls on the same `Traits` are serialized. Every call starts from a
/// freshly initialized kernel and shuts it down before returning, after
/// which the instance reports [`kite_kernel::Context::None`].
pub fn run_with<Traits: PortInstance>(
    config: Config,
    create_user_tasks: fn(),
    scenario: impl FnOnce() + Send + 'static,
) {
    let _ = env_logger::try_init();

    let state = Traits::port_state();
    let _run_guard = state.run_lock.lock().unwrap_or_else(PoisonError::into_inner);

    state.reset();
    for task_cb in Traits::task_cb_pool() {
        task_cb.port_task_state.reset();
    }
    *state.scenario.lock() = Some(Box::new(scenario));

    // The closure mustn't capture a `&'static mut`
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> Infallible {
        System::<Traits>::start(
            leak_stack(config.idle_stack_len),
            leak_stack(config.int_stack_len),
            create_user_tasks,
            config.idle_hook,
        )
    }));

    state.reset();
    // Safety: CPU Lock inactive, and nothing is running on the instance
    // anymore
    unsafe {
        state.enter_cpu_lock();
        Traits::shutdown();
        state.leave_cpu_lock();
    }

    match result {
        Ok(never) => match never {},
        Err(payload) if payload.is::<Shutdown>() => {}
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Run `f` as a simulated interrupt handler. A dispatch requested by `f` is
/// performed after it returns.
pub fn in_interrupt<Traits: PortInstance, R>(f: impl FnOnce() -> R) -> R {
    let state = Traits::port_state();
    let nested = state.in_interrupt.swap(true, Ordering::SeqCst);
    assert!(!nested, "nested interrupts are not supported");

    let ret = f();

    state.in_interrupt.store(false, Ordering::SeqCst);
    if state.dispatch_pending.swap(false, Ordering::SeqCst) {
        log::trace!("performing the dispatch requested by the interrupt handler");
        state.dispatch::<Traits>();
    }
    ret
}

/// Simulate a timer interrupt that calls [`System::process_tick`].
pub fn pend_tick<Traits: PortInstance>() -> Result<(), TickError> {
    in_interrupt::<Traits, _>(System::<Traits>::process_tick)
}

/// Get the entry point and parameter the port prepared for the task `id`, or
/// `None` if the task was never activated.
pub fn task_entry<Traits: PortInstance>(id: TaskId) -> Option<(fn(usize), usize)> {
    Traits::task_cb_pool()
        .get(id.get() - 1)
        .and_then(|task_cb| task_cb.port_task_state.entry())
}

/// Get the interrupt stack handed to the port by the kernel.
pub fn int_stack<Traits: PortInstance>() -> Option<StackRegion> {
    *Traits::port_state().int_stack.lock()
}

/// Instantiate the port on a new type `$SystemTraits`.
///
/// The type still needs [`kite_kernel::KernelCfg1`] and
/// [`kite_kernel::build!`] to become a complete kernel instance.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::kite_kernel::{
                KernelTraits, PortThreading, StackRegion, TaskAttr, TaskCb,
            };
            use $crate::{PortInstance, State, TaskState};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            // Assume `$SystemTraits: KernelTraits`
            unsafe impl PortThreading for $SystemTraits {
                type PortTaskState = TaskState;

                unsafe fn dispatch_first_task(int_stack: StackRegion) -> ! {
                    unsafe { PORT_STATE.dispatch_first_task::<Self>(int_stack) }
                }

                unsafe fn yield_cpu() {
                    unsafe { PORT_STATE.yield_cpu::<Self>() }
                }

                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                unsafe fn initialize_task_state(
                    task: &'static TaskCb<Self>,
                    attr: &TaskAttr,
                    stack: StackRegion,
                ) where
                    Self: KernelTraits,
                {
                    unsafe { PORT_STATE.initialize_task_state::<Self>(task, attr, stack) }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }

                fn is_interrupt_context() -> bool {
                    PORT_STATE.is_interrupt_context()
                }
            }
        }
    };
}
