//! Run time and wait time accounting by the context-switch profiler.
use kite_kernel::{StaticTick, System, TickProfiler, WaitQueue, WaitReason, IDLE_TASK_ID};
use kite_port_std::{pend_tick, run};

use crate::{create_task, current, id};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = StaticTick<SystemTraits, 4>,
    profiler = TickProfiler,
);

type Sys = System<SystemTraits>;

static QUEUE: WaitQueue<SystemTraits> = WaitQueue::new();

fn tick(n: usize) {
    for _ in 0..n {
        pend_tick::<SystemTraits>().unwrap();
    }
}

#[test]
fn accounts_run_and_wait_time() {
    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 2, true);
        },
        || {
            // idle -> 2 at tick 0
            assert_eq!(current::<SystemTraits>(), 2);
            tick(3);

            // 2 -> 3 at tick 3
            Sys::wait_current(&QUEUE, WaitReason::Semaphore).unwrap();
            assert_eq!(current::<SystemTraits>(), 3);
            tick(2);

            // 3 -> 2 at tick 5
            QUEUE.notify_deleted().unwrap();
            assert_eq!(current::<SystemTraits>(), 2);

            let t2 = Sys::task_timing(id(2)).unwrap();
            assert_eq!(t2.total_run_time, 3);
            assert_eq!(t2.max_consecutive_run_time, 3);
            assert_eq!(t2.got_running_count, 2);
            assert_eq!(t2.total_wait_time[WaitReason::Semaphore as usize], 2);
            assert_eq!(t2.max_consecutive_wait_time[WaitReason::Semaphore as usize], 2);
            assert_eq!(t2.total_wait_time[WaitReason::None as usize], 0);

            let t3 = Sys::task_timing(id(3)).unwrap();
            assert_eq!(t3.total_run_time, 2);
            assert_eq!(t3.got_running_count, 1);
            // Preempted tasks wait with no reason
            assert_eq!(t3.total_wait_time[WaitReason::None as usize], 3);

            let idle = Sys::task_timing(IDLE_TASK_ID).unwrap();
            assert_eq!(idle.total_run_time, 0);
            assert_eq!(idle.got_running_count, 0);
        },
    );
}
