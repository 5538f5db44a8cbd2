//! Deleting a wait queue releases every waiter with `Deleted`.
use kite_kernel::{
    NoProfiler, ResultCode, StaticTick, System, TaskSt, WaitError, WaitQueue, WaitReason,
    IDLE_TASK_ID,
};
use kite_port_std::{in_interrupt, run};

use crate::{create_task, current, id, ready_tasks};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 4,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

static QUEUE: WaitQueue<SystemTraits> = WaitQueue::new();

fn create_tasks() {
    create_task::<SystemTraits>(2, 1, true);
    create_task::<SystemTraits>(3, 1, true);
    create_task::<SystemTraits>(4, 1, true);
}

/// Block every user task on `QUEUE`, leaving the idle task running.
fn block_all() {
    for n in 2..=4 {
        assert_eq!(current::<SystemTraits>(), n);
        Sys::wait_current(&QUEUE, WaitReason::Semaphore).unwrap();
        assert_eq!(Sys::task_state(id(n)), Ok(TaskSt::Waiting));
        assert_eq!(Sys::task_wait_result(id(n)), Ok(None));
    }
    assert_eq!(Sys::current_task(), Ok(Some(IDLE_TASK_ID)));
    assert_eq!(QUEUE.len(), Ok(3));
    assert_eq!(ready_tasks::<SystemTraits>(1), [] as [usize; 0]);
}

#[test]
fn releases_every_waiter() {
    run::<SystemTraits>(create_tasks, || {
        block_all();

        // The idle task must never block
        assert_eq!(
            Sys::wait_current(&QUEUE, WaitReason::Sleep),
            Err(WaitError::BadObjectState)
        );

        QUEUE.notify_deleted().unwrap();

        assert_eq!(QUEUE.is_empty(), Ok(true));
        for n in 2..=4 {
            assert_eq!(Sys::task_state(id(n)), Ok(TaskSt::Runnable));
            assert_eq!(Sys::task_wait_result(id(n)), Ok(Some(ResultCode::Deleted)));
        }
        // FIFO order is preserved
        assert_eq!(ready_tasks::<SystemTraits>(1), [2, 3, 4]);
        assert_eq!(current::<SystemTraits>(), 2);
        assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
    });
}

#[test]
fn empty_queue_is_a_no_op() {
    run::<SystemTraits>(create_tasks, || {
        QUEUE.notify_deleted().unwrap();
        assert_eq!(QUEUE.is_empty(), Ok(true));
        assert_eq!(current::<SystemTraits>(), 2);
    });
}

#[test]
fn dispatch_is_deferred_until_the_handler_returns() {
    run::<SystemTraits>(create_tasks, || {
        block_all();

        in_interrupt::<SystemTraits, _>(|| {
            QUEUE.notify_deleted().unwrap();
            assert_eq!(Sys::current_task(), Ok(Some(IDLE_TASK_ID)));
            assert_eq!(Sys::next_task_to_run(), Ok(Some(id(2))));
        });

        assert_eq!(current::<SystemTraits>(), 2);
    });
}

#[test]
fn waiting_requires_a_task_context() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(
            in_interrupt::<SystemTraits, _>(|| Sys::wait_current(&QUEUE, WaitReason::Event)),
            Err(WaitError::BadContext)
        );
        assert_eq!(current::<SystemTraits>(), 2);
    });
}
