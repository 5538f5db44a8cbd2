//! Deadlock bookkeeping on behalf of a mutex implementation.
use kite_kernel::{MutexId, NoProfiler, StateFlags, StaticTick, System, TaskId};
use kite_port_std::run;
use std::sync::Mutex;

use crate::{create_task, id};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

static REPORTS: Mutex<Vec<(bool, usize, usize)>> = Mutex::new(Vec::new());

fn on_deadlock(active: bool, mutex: MutexId, task: TaskId) {
    REPORTS.lock().unwrap().push((active, mutex.get(), task.get()));
}

fn mutex(n: usize) -> MutexId {
    MutexId::new(n).unwrap()
}

fn is_deadlocked() -> bool {
    Sys::state_flags().contains(StateFlags::DEADLOCK)
}

#[test]
fn tracks_nested_deadlocks() {
    run::<SystemTraits>(
        || create_task::<SystemTraits>(2, 1, true),
        || {
            Sys::set_deadlock_callback(on_deadlock).unwrap();
            assert_eq!(Sys::deadlock_count(), 0);
            assert!(!is_deadlocked());

            Sys::report_deadlock(true, mutex(1), id(2)).unwrap();
            assert_eq!(Sys::deadlock_count(), 1);
            assert!(is_deadlocked());

            Sys::report_deadlock(true, mutex(2), id(3)).unwrap();
            assert_eq!(Sys::deadlock_count(), 2);
            assert!(is_deadlocked());

            Sys::report_deadlock(false, mutex(2), id(3)).unwrap();
            assert_eq!(Sys::deadlock_count(), 1);
            assert!(is_deadlocked());

            Sys::report_deadlock(false, mutex(1), id(2)).unwrap();
            assert_eq!(Sys::deadlock_count(), 0);
            assert!(!is_deadlocked());

            // The counter saturates, but the callback still hears about it
            Sys::report_deadlock(false, mutex(1), id(2)).unwrap();
            assert_eq!(Sys::deadlock_count(), 0);
            assert!(!is_deadlocked());

            assert_eq!(
                *REPORTS.lock().unwrap(),
                [
                    (true, 1, 2),
                    (true, 2, 3),
                    (false, 2, 3),
                    (false, 1, 2),
                    (false, 1, 2),
                ]
            );
        },
    );
}
