//! The ready queue stays consistent under arbitrary sequences of scheduling
//! operations.
use kite_kernel::{NoProfiler, StaticTick, System, WaitError, WaitQueue, WaitReason};
use kite_port_std::{pend_tick, run};
use quickcheck_macros::quickcheck;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::create_task;

const NUM_TASKS: usize = 8;

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 8,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

fn is_consistent() -> bool {
    Sys::is_ready_queue_consistent() == Ok(true)
        && Sys::current_task().unwrap() == Sys::next_task_to_run().unwrap()
}

/// Apply `op` with the argument `arg`. Return `false` if the kernel rejected
/// an operation that should've succeeded.
fn apply(queue: &'static WaitQueue<SystemTraits>, next_task: &mut usize, op: u8, arg: u8) -> bool {
    let priority = arg as usize % 3;
    match op % 5 {
        0 => {
            if *next_task <= NUM_TASKS {
                create_task::<SystemTraits>(*next_task, priority, true);
                *next_task += 1;
            }
            true
        }
        1 => match Sys::wait_current(queue, WaitReason::Semaphore) {
            // Only the idle task is refused
            Ok(()) | Err(WaitError::BadObjectState) => true,
            Err(e) => {
                log::error!("wait_current failed: {e:?}");
                false
            }
        },
        2 => queue.notify_deleted().is_ok(),
        3 => Sys::set_time_slice(priority, (arg >> 4) as u16).is_ok(),
        _ => (0..arg % 4).all(|_| pend_tick::<SystemTraits>().is_ok()),
    }
}

#[quickcheck]
fn stays_consistent(ops: Vec<(u8, u8)>) -> bool {
    let ok = Arc::new(AtomicBool::new(true));
    let ok2 = Arc::clone(&ok);

    run::<SystemTraits>(
        || {},
        move || {
            let queue: &'static WaitQueue<SystemTraits> = Box::leak(Box::new(WaitQueue::new()));
            let mut next_task = 2;

            for (op, arg) in ops {
                if !apply(queue, &mut next_task, op, arg) || !is_consistent() {
                    log::error!("inconsistent after op ({op}, {arg})");
                    ok2.store(false, Ordering::Relaxed);
                    return;
                }
            }
        },
    );

    ok.load(Ordering::Relaxed)
}
