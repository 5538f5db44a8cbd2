//! Tasks
use core::{fmt, mem, num::NonZeroUsize, ptr::NonNull, sync::atomic::Ordering};

use crate::{
    cfg::STACK_FILL_VALUE,
    error::{
        fatal, ActivateTaskError, CreateTaskError, FatalError, NoAccessError, QueryTaskError,
        ResultCode, WaitError,
    },
    klock::{self, CpuLockCell, CpuLockGuard, CpuLockTokenRefMut},
    profiler::Profiler,
    state,
    utils::{
        intrusive_list::{Link, ListAccessorCell},
        Init,
    },
    wait::WaitQueue,
    KernelCfg1, KernelTraits, PortThreading, System,
};

pub mod readyqueue;
use self::readyqueue::Queue as _;

/// Identifies a task. `TaskId` *n* refers to the *n*-th task control block
/// of [`KernelCfg2::task_cb_pool`]. `TaskId` 1 is the idle task.
///
/// [`KernelCfg2::task_cb_pool`]: crate::KernelCfg2::task_cb_pool
pub type TaskId = NonZeroUsize;

/// The ID of the idle task.
pub const IDLE_TASK_ID: TaskId = TaskId::MIN;

/// A task stack owned by the kernel.
///
/// Stacks grow downward, so the word at the lowest address is the limit
/// word checked for overflow.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    ptr: NonNull<usize>,
    len: usize,
}

// Safety: `StackRegion` is created from a `&'static mut [usize]`, so the
// region is exclusively owned by the kernel and the task using it
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    /// Take ownership of `stack`.
    pub fn new(stack: &'static mut [usize]) -> Self {
        Self {
            len: stack.len(),
            ptr: NonNull::from(stack).cast(),
        }
    }

    /// Get the lowest address of the region.
    #[inline]
    pub fn as_ptr(self) -> *mut usize {
        self.ptr.as_ptr()
    }

    /// Get the address one past the highest word of the region, i.e., the
    /// initial stack pointer.
    #[inline]
    pub fn top(self) -> *mut usize {
        self.ptr.as_ptr().wrapping_add(self.len)
    }

    /// Get the size of the region in words.
    #[inline]
    pub fn len(self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Write [`STACK_FILL_VALUE`] to every word of the region.
    pub(crate) fn fill(self) {
        for i in 0..self.len {
            // Safety: `i` is in bounds of the region we own
            unsafe { self.ptr.as_ptr().add(i).write_volatile(STACK_FILL_VALUE) };
        }
    }

    /// Get the number of words at the bottom of the region that still hold
    /// [`STACK_FILL_VALUE`].
    pub(crate) fn unused_words(self) -> usize {
        (0..self.len)
            // Safety: `i` is in bounds of the region we own
            .take_while(|&i| unsafe { self.ptr.as_ptr().add(i).read_volatile() } == STACK_FILL_VALUE)
            .count()
    }

    /// Return `false` if the limit word was overwritten.
    pub(crate) fn limit_intact(self) -> bool {
        // Safety: The region is non-empty, so the first word is in bounds
        self.is_empty() || unsafe { self.ptr.as_ptr().read_volatile() } == STACK_FILL_VALUE
    }
}

impl fmt::Debug for StackRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StackRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// The static properties of a task.
#[derive(Clone, Copy)]
pub struct TaskAttr {
    /// The body of the task.
    pub entry_point: fn(usize),
    /// The parameter passed to `entry_point`.
    pub entry_param: usize,
    /// The priority level. Lower values mean higher priorities.
    pub priority: usize,
}

impl fmt::Debug for TaskAttr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskAttr")
            .field("entry_point", &(self.entry_point as *const ()))
            .field("entry_param", &self.entry_param)
            .field("priority", &self.priority)
            .finish()
    }
}

bitflags::bitflags! {
    /// Options for [`System::create_task`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u8 {
        /// Activate the task right after creating it.
        const START = 1 << 0;
        /// Create the idle task. Only valid for `TaskId` 1 at the lowest
        /// priority level, and only used by the kernel itself.
        const IDLE = 1 << 1;
    }
}

/// Task state machine
///
/// The running task is not a separate state: it is the Runnable task
/// referenced by the scheduler's "running task" pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskSt {
    /// The task control block has not been created.
    Unused,
    /// Created but not activated yet.
    Dormant,
    /// In a ready queue.
    Runnable,
    /// Blocked on a wait queue.
    Waiting,
}

impl Init for TaskSt {
    const INIT: Self = Self::Unused;
}

/// The reason a task is (or was last) waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitReason {
    None,
    Sleep,
    Semaphore,
    Event,
    QueueSend,
    QueueReceive,
    MutexCeiling,
    MutexInherit,
    FixedMemory,
}

impl WaitReason {
    /// The number of variants.
    pub const COUNT: usize = 9;
}

impl Init for WaitReason {
    const INIT: Self = Self::None;
}

type ProfilerData<Traits> = <<Traits as KernelCfg1>::Profiler as Profiler<Traits>>::PerTaskData;

/// *Task control block* - the state data of a task.
#[repr(C)]
pub struct TaskCb<Traits: KernelCfg1 + PortThreading> {
    /// Get a reference to `PortTaskState` in the task control block.
    ///
    /// This is guaranteed to be placed at the beginning of the struct so that
    /// assembler code can refer to this easily.
    pub port_task_state: Traits::PortTaskState,

    pub(crate) attr: CpuLockCell<Traits, Option<TaskAttr>>,

    pub(crate) stack: CpuLockCell<Traits, Option<StackRegion>>,

    pub(crate) st: CpuLockCell<Traits, TaskSt>,

    pub(crate) priority: CpuLockCell<Traits, usize>,

    pub(crate) wait_reason: CpuLockCell<Traits, WaitReason>,

    /// The completion code of the last wait.
    pub(crate) wait_result: CpuLockCell<Traits, Option<ResultCode>>,

    /// Ticks consumed in the current time slice.
    pub(crate) tslice_count: CpuLockCell<Traits, u32>,

    /// Links the task into a ready queue or a wait queue. A task is never in
    /// both.
    pub(crate) queue_link: CpuLockCell<Traits, Option<Link>>,

    /// Links the task into the staging queue while it's Dormant.
    pub(crate) create_link: CpuLockCell<Traits, Option<Link>>,

    pub(crate) waiting_on: CpuLockCell<Traits, Option<&'static WaitQueue<Traits>>>,

    pub(crate) profiler_data: CpuLockCell<Traits, ProfilerData<Traits>>,
}

impl<Traits: KernelCfg1 + PortThreading> Init for TaskCb<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        port_task_state: Init::INIT,
        attr: CpuLockCell::new(None),
        stack: CpuLockCell::new(None),
        st: Init::INIT,
        priority: Init::INIT,
        wait_reason: Init::INIT,
        wait_result: CpuLockCell::new(None),
        tslice_count: Init::INIT,
        queue_link: CpuLockCell::new(None),
        create_link: CpuLockCell::new(None),
        waiting_on: CpuLockCell::new(None),
        profiler_data: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for TaskCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("self", &(self as *const _))
            .field("port_task_state", &self.port_task_state)
            .field("attr", &self.attr)
            .field("st", &self.st)
            .field("priority", &self.priority)
            .field("wait_reason", &self.wait_reason)
            .finish_non_exhaustive()
    }
}

impl<Traits: KernelTraits> TaskCb<Traits> {
    /// Get the index of this task control block in the pool.
    pub(crate) fn index(&self) -> usize {
        let offset_bytes =
            self as *const TaskCb<_> as usize - Traits::task_cb_pool().as_ptr() as usize;
        offset_bytes / mem::size_of::<TaskCb<Traits>>()
    }

    /// Get the ID of this task.
    pub fn id(&self) -> TaskId {
        TaskId::MIN.saturating_add(self.index())
    }
}

/// Get a `ListAccessorCell` used to access the staging queue.
macro_rules! staging_accessor {
    ($key:expr) => {
        ListAccessorCell::new(
            &Traits::state().staging_queue,
            Traits::task_cb_pool(),
            |task_cb: &'static TaskCb<Traits>| &task_cb.create_link,
            $key,
        )
    };
}

/// These associate functions implement the task-related portion of
/// [`System`].
impl<Traits: KernelTraits> System<Traits> {
    /// Get the [`TaskCb`] for the specified ID.
    #[inline]
    pub(crate) fn task_cb(id: TaskId) -> Result<&'static TaskCb<Traits>, NoAccessError> {
        Traits::task_cb_pool()
            .get(id.get() - 1)
            .ok_or(NoAccessError::NoAccess)
    }

    /// Create a task in the Dormant state.
    ///
    /// The task control block for `id` must be unused. `stack` is filled with
    /// [`STACK_FILL_VALUE`] and owned by the task from now on. With
    /// [`CreateOptions::START`], the task is activated immediately.
    pub fn create_task(
        id: TaskId,
        attr: TaskAttr,
        stack: &'static mut [usize],
        options: CreateOptions,
    ) -> Result<(), CreateTaskError> {
        state::expect_non_interrupt_context::<Traits>()?;
        let mut lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        create(lock.borrow_mut(), task_cb, attr, StackRegion::new(stack), options)?;
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Transition a Dormant task to Runnable.
    pub fn activate_task(id: TaskId) -> Result<(), ActivateTaskError> {
        state::expect_non_interrupt_context::<Traits>()?;
        let mut lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        activate(lock.borrow_mut(), task_cb)?;
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Block the running task on `queue` for `reason`.
    ///
    /// The task leaves its ready queue and the scheduler picks the next one.
    /// Once the wait completes, [`Self::task_wait_result`] tells how.
    pub fn wait_current(
        queue: &'static WaitQueue<Traits>,
        reason: WaitReason,
    ) -> Result<(), WaitError> {
        state::expect_task_context::<Traits>()?;
        let mut lock = klock::lock_cpu::<Traits>()?;
        let state = Traits::state();

        let Some(running_task) = state.running_task(lock.borrow_mut()) else {
            return Err(WaitError::BadContext);
        };
        if running_task.index() == 0 || *running_task.st.read(&*lock) != TaskSt::Runnable {
            return Err(WaitError::BadObjectState);
        }

        make_non_runnable(lock.borrow_mut(), running_task);
        running_task.st.replace(&mut *lock, TaskSt::Waiting);
        running_task.wait_reason.replace(&mut *lock, reason);
        running_task.wait_result.replace(&mut *lock, None);
        queue.push_back(lock.borrow_mut(), running_task);

        log::trace!("task {} waits for {reason:?}", running_task.id());

        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Get the completion code of the last wait of the task `id`. `None`
    /// while the task is still waiting or has never waited.
    pub fn task_wait_result(id: TaskId) -> Result<Option<ResultCode>, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        Ok(*task_cb.wait_result.read(&*lock))
    }

    /// Get the task that currently owns the processor.
    pub fn current_task() -> Result<Option<TaskId>, QueryTaskError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(Traits::state()
            .running_task(lock.borrow_mut())
            .map(|task_cb| task_cb.id()))
    }

    /// Get the body of the task that currently owns the processor.
    pub fn current_task_entry_point() -> Result<Option<fn(usize)>, QueryTaskError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let running_task = Traits::state().running_task(lock.borrow_mut());
        Ok(running_task.and_then(|task_cb| task_cb.attr.read(&*lock).map(|a| a.entry_point)))
    }

    /// Get the task the scheduler will switch to at the next dispatch.
    pub fn next_task_to_run() -> Result<Option<TaskId>, QueryTaskError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(Traits::state()
            .next_task_to_run(lock.borrow_mut())
            .map(|task_cb| task_cb.id()))
    }

    pub fn task_priority(id: TaskId) -> Result<usize, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        if *task_cb.st.read(&*lock) == TaskSt::Unused {
            Err(QueryTaskError::BadObjectState)
        } else {
            Ok(*task_cb.priority.read(&*lock))
        }
    }

    pub fn task_state(id: TaskId) -> Result<TaskSt, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        Ok(*task_cb.st.read(&*lock))
    }

    /// Get the number of tasks created but never activated.
    pub fn created_task_count() -> usize {
        Traits::state().created_task_count.load(Ordering::Relaxed)
    }

    /// Count the tasks in the staging queue by walking it.
    pub fn staging_queue_len() -> Result<usize, QueryTaskError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        Ok(staging_accessor!(lock.borrow_mut()).iter().count())
    }

    /// Get the number of words of the task's stack that were never written.
    pub fn task_stack_unused(id: TaskId) -> Result<usize, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        let task_cb = Self::task_cb(id)?;
        task_cb
            .stack
            .read(&*lock)
            .map(StackRegion::unused_words)
            .ok_or(QueryTaskError::BadObjectState)
    }

    /// Get the number of words of the interrupt stack that were never
    /// written.
    pub fn interrupt_stack_unused() -> Result<usize, QueryTaskError> {
        let lock = klock::lock_cpu::<Traits>()?;
        Traits::state()
            .int_stack
            .read(&*lock)
            .map(StackRegion::unused_words)
            .ok_or(QueryTaskError::BadObjectState)
    }

    /// Call `f` with each task in the ready queue of `priority`, from head to
    /// tail. CPU Lock is active while `f` runs.
    pub fn for_each_ready_task(
        priority: usize,
        mut f: impl FnMut(TaskId),
    ) -> Result<(), QueryTaskError> {
        if priority >= Traits::NUM_TASK_PRIORITY_LEVELS {
            return Err(QueryTaskError::BadParam);
        }
        let mut lock = klock::lock_cpu::<Traits>()?;
        Traits::state().task_ready_queue.for_each(
            lock.borrow_mut().into(),
            priority,
            |task_cb| f(task_cb.id()),
        );
        Ok(())
    }

    /// Check the ready queue invariants: every level's bit is set iff its
    /// queue is non-empty, every queued task is Runnable at that level, and
    /// the next task to run heads the highest non-empty level.
    pub fn is_ready_queue_consistent() -> Result<bool, QueryTaskError> {
        let mut lock = klock::lock_cpu::<Traits>()?;
        let queue = &Traits::state().task_ready_queue;
        if !queue.is_consistent(lock.borrow_mut().into()) {
            return Ok(false);
        }
        let expected = highest_ready_task(lock.borrow_mut());
        let next = Traits::state().next_task_to_run(lock.borrow_mut());
        Ok(ptr_from_option_ref(expected) == ptr_from_option_ref(next))
    }
}

/// Return every task control block to the Unused state.
pub(crate) fn reset_pool<Traits: KernelTraits>(mut lock: CpuLockTokenRefMut<'_, Traits>) {
    for task_cb in Traits::task_cb_pool() {
        task_cb.attr.replace(&mut *lock, None);
        task_cb.stack.replace(&mut *lock, None);
        task_cb.st.replace(&mut *lock, TaskSt::Unused);
        task_cb.priority.replace(&mut *lock, 0);
        task_cb.wait_reason.replace(&mut *lock, WaitReason::None);
        task_cb.wait_result.replace(&mut *lock, None);
        task_cb.tslice_count.replace(&mut *lock, 0);
        task_cb.queue_link.replace(&mut *lock, None);
        task_cb.create_link.replace(&mut *lock, None);
        task_cb.waiting_on.replace(&mut *lock, None);
        task_cb.profiler_data.replace(&mut *lock, Init::INIT);
    }
}

/// Implements [`System::create_task`] and the idle task creation.
pub(crate) fn create<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
    attr: TaskAttr,
    stack: StackRegion,
    options: CreateOptions,
) -> Result<(), CreateTaskError> {
    let idle_priority = Traits::NUM_TASK_PRIORITY_LEVELS - 1;
    let is_idle_slot = task_cb.index() == 0;
    let valid_priority = if options.contains(CreateOptions::IDLE) {
        is_idle_slot && attr.priority == idle_priority
    } else {
        !is_idle_slot && attr.priority < idle_priority
    };
    if !valid_priority || stack.is_empty() {
        return Err(CreateTaskError::BadParam);
    }

    if *task_cb.st.read(&*lock) != TaskSt::Unused {
        return Err(CreateTaskError::BadObjectState);
    }

    stack.fill();

    task_cb.attr.replace(&mut *lock, Some(attr));
    task_cb.stack.replace(&mut *lock, Some(stack));
    task_cb.priority.replace(&mut *lock, attr.priority);
    task_cb.wait_reason.replace(&mut *lock, WaitReason::None);
    task_cb.wait_result.replace(&mut *lock, None);
    task_cb.tslice_count.replace(&mut *lock, 0);
    task_cb.st.replace(&mut *lock, TaskSt::Dormant);

    if let Err(e) = staging_accessor!(lock.borrow_mut()).push_back(task_cb.index()) {
        fatal::<Traits>(e.into());
    }
    Traits::state()
        .created_task_count
        .fetch_add(1, Ordering::Relaxed);

    log::debug!(
        "task {} created at priority {} with {} stack words",
        task_cb.id(),
        attr.priority,
        stack.len()
    );

    if options.contains(CreateOptions::START) {
        activate_dormant(lock, task_cb);
    }

    Ok(())
}

/// Implements [`System::activate_task`].
pub(crate) fn activate<Traits: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
) -> Result<(), ActivateTaskError> {
    if *task_cb.st.read(&*lock) != TaskSt::Dormant {
        return Err(ActivateTaskError::BadObjectState);
    }
    activate_dormant(lock, task_cb);
    Ok(())
}

fn activate_dormant<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
) {
    // Leave the staging queue
    if let Err(e) = staging_accessor!(lock.borrow_mut()).remove(task_cb.index()) {
        fatal::<Traits>(e.into());
    }
    Traits::state()
        .created_task_count
        .fetch_sub(1, Ordering::Relaxed);

    task_cb.tslice_count.replace(&mut *lock, 0);

    if let (Some(attr), Some(stack)) = (*task_cb.attr.read(&*lock), *task_cb.stack.read(&*lock)) {
        // Safety: CPU Lock active, the task is in the Dormant state
        unsafe { Traits::initialize_task_state(task_cb, &attr, stack) };
    }

    make_runnable(lock.borrow_mut(), task_cb);

    log::debug!(
        "task {} activated at priority {}",
        task_cb.id(),
        task_cb.priority.read(&*lock)
    );
}

/// Link `task_cb` to the tail of its ready queue and make it the next task to
/// run if it outranks the current decision.
pub(crate) fn make_runnable<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
) {
    let state = Traits::state();
    let priority = *task_cb.priority.read(&*lock);

    task_cb.st.replace(&mut *lock, TaskSt::Runnable);
    state
        .task_ready_queue
        .push_back_task(lock.borrow_mut().into(), task_cb, priority);

    let preempts = match state.next_task_to_run(lock.borrow_mut()) {
        Some(next) => priority < *next.priority.read(&*lock),
        None => true,
    };
    if preempts {
        state.next_task_to_run.replace(&mut *lock, Some(task_cb));
    }
}

/// Unlink `task_cb` from its ready queue. The caller decides the task's new
/// state.
pub(crate) fn make_non_runnable<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
) {
    let state = Traits::state();
    let priority = *task_cb.priority.read(&*lock);

    state
        .task_ready_queue
        .remove_task(lock.borrow_mut().into(), task_cb, priority);
    task_cb.tslice_count.replace(&mut *lock, 0);

    let next = state.next_task_to_run(lock.borrow_mut());
    if ptr_from_option_ref(next) == task_cb as *const _ {
        refresh_next_task_to_run(lock);
    }
}

/// Complete the wait of `task_cb` with the completion code `code` and make
/// it runnable.
pub(crate) fn complete_wait<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    task_cb: &'static TaskCb<Traits>,
    code: ResultCode,
) {
    debug_assert_eq!(*task_cb.st.read(&*lock), TaskSt::Waiting);

    if let Some(queue) = *task_cb.waiting_on.read(&*lock) {
        queue.remove(lock.borrow_mut(), task_cb);
    }

    task_cb.wait_result.replace(&mut *lock, Some(code));
    task_cb.wait_reason.replace(&mut *lock, WaitReason::None);
    make_runnable(lock, task_cb);
}

/// Get the head of the highest-priority non-empty ready queue.
fn highest_ready_task<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
) -> Option<&'static TaskCb<Traits>> {
    let queue = &Traits::state().task_ready_queue;
    let priority = queue.highest_ready_priority(lock.borrow_mut().into())?;
    queue.front_task(lock.into(), priority)
}

/// Set the next task to run to the head of the highest-priority non-empty
/// ready queue.
pub(crate) fn refresh_next_task_to_run<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
) {
    let next = highest_ready_task(lock.borrow_mut());
    Traits::state().next_task_to_run.replace(&mut *lock, next);
}

/// Relinquish CPU Lock. After that, if the scheduler has picked a task other
/// than the running one, call `PortThreading::yield_cpu`.
///
/// System services that change the scheduling decision should call this
/// before returning to the caller. Nothing is dispatched before the system
/// starts.
pub(crate) fn unlock_cpu_and_check_preemption<Traits: KernelTraits>(
    mut lock: CpuLockGuard<Traits>,
) {
    let state = Traits::state();
    let dispatch = state::is_running::<Traits>()
        && ptr_from_option_ref(state.running_task(lock.borrow_mut()))
            != ptr_from_option_ref(state.next_task_to_run(lock.borrow_mut()));

    // Relinquish CPU Lock
    drop(lock);

    if dispatch {
        log::trace!("requesting dispatch");
        // Safety: CPU Lock inactive
        unsafe { Traits::yield_cpu() };
    }
}

/// Implements `PortToKernel::choose_running_task`.
pub(crate) fn choose_next_running_task<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
) {
    let state = Traits::state();
    let prev = state.running_task(lock.borrow_mut());
    let next = state.next_task_to_run(lock.borrow_mut());

    if ptr_from_option_ref(prev) == ptr_from_option_ref(next) {
        return;
    }

    state.running_task.replace(&mut *lock, next);

    let Some(prev) = prev else { return };

    if let Some(next) = next {
        log::trace!("switching from task {} to task {}", prev.id(), next.id());
        if let Err(e) =
            <Traits::Profiler as Profiler<Traits>>::on_switch(lock.borrow_mut(), prev, next)
        {
            fatal::<Traits>(e);
        }
    }

    // The outgoing task's stack is at rest now
    if let Some(stack) = *prev.stack.read(&*lock) {
        if !stack.limit_intact() {
            fatal::<Traits>(FatalError::StackOverflow(prev.id()));
        }
    }
}

#[inline]
fn ptr_from_option_ref<T>(x: Option<&T>) -> *const T {
    if let Some(x) = x {
        x
    } else {
        core::ptr::null()
    }
}
