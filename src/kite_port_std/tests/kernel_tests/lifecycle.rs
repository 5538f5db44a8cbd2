//! The idle task and the system state flags.
use kite_kernel::{
    klock, state, NoProfiler, StateFlags, StaticTick, System, IDLE_TASK_ID,
};
use kite_port_std::{run, run_with, task_entry, Config};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::create_task;

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 2,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

static IDLE_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Stops the idle loop on the third call.
fn idle_hook() {
    if IDLE_HOOK_CALLS.fetch_add(1, Ordering::Relaxed) == 2 {
        panic!("idle hook called 3 times");
    }
}

#[test]
fn idle_task_calls_hook_repeatedly() {
    let config = Config {
        idle_hook,
        ..Config::default()
    };
    run_with::<SystemTraits>(config, || {}, || {
        IDLE_HOOK_CALLS.store(0, Ordering::Relaxed);

        // Nothing else was created, so the idle task is running
        assert_eq!(Sys::current_task(), Ok(Some(IDLE_TASK_ID)));
        let (entry_point, entry_param) = task_entry::<SystemTraits>(IDLE_TASK_ID).unwrap();

        let payload = panic::catch_unwind(AssertUnwindSafe(|| entry_point(entry_param)))
            .unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"idle hook called 3 times"));
        assert_eq!(IDLE_HOOK_CALLS.load(Ordering::Relaxed), 3);
    });
}

#[test]
fn flag_updates_return_previous_flags() {
    run::<SystemTraits>(
        || create_task::<SystemTraits>(2, 1, true),
        || {
            let mut lock = klock::lock_cpu::<SystemTraits>().unwrap();

            let prev = state::set_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
            assert_eq!(prev, StateFlags::SYS_RUNNING);

            // Setting a bit that is already set
            let prev = state::set_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
            assert_eq!(prev, StateFlags::SYS_RUNNING | StateFlags::DEADLOCK);

            let prev = state::clear_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
            assert_eq!(prev, StateFlags::SYS_RUNNING | StateFlags::DEADLOCK);

            // Clearing a bit that is already clear
            let prev = state::clear_flags(lock.borrow_mut(), StateFlags::DEADLOCK);
            assert_eq!(prev, StateFlags::SYS_RUNNING);

            drop(lock);
            assert_eq!(Sys::state_flags(), StateFlags::SYS_RUNNING);
        },
    );
}
