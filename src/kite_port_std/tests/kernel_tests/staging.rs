//! Tasks stay in the staging queue from creation until their first
//! activation.
use kite_kernel::{NoProfiler, StaticTick, System};
use kite_port_std::run;

use crate::{create_task, current, id};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 5,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

fn assert_staged(n: usize) {
    assert_eq!(Sys::created_task_count(), n);
    assert_eq!(Sys::staging_queue_len(), Ok(n));
}

#[test]
fn counter_matches_queue() {
    run::<SystemTraits>(
        || {
            assert_staged(0);
            create_task::<SystemTraits>(2, 2, true);
            assert_staged(0);
            create_task::<SystemTraits>(3, 2, false);
            create_task::<SystemTraits>(4, 1, false);
            create_task::<SystemTraits>(5, 0, false);
            assert_staged(3);
            Sys::activate_task(id(3)).unwrap();
            assert_staged(2);
        },
        || {
            assert_eq!(current::<SystemTraits>(), 2);
            assert_staged(2);

            // A higher-priority task preempts right away
            Sys::activate_task(id(4)).unwrap();
            assert_staged(1);
            assert_eq!(current::<SystemTraits>(), 4);

            Sys::activate_task(id(5)).unwrap();
            assert_staged(0);
            assert_eq!(current::<SystemTraits>(), 5);
            assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
        },
    );
}
