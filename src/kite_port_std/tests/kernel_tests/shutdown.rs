//! Returning from `run` shuts the kernel down, and the next boot doesn't see
//! anything left over from the previous one.
use kite_kernel::{Context, NoProfiler, StateFlags, StaticTick, System, TickError};
use kite_port_std::{pend_tick, run, task_entry};

use crate::{create_task, current, id};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

// A single test, so that nothing boots the instance between `run` and the
// checks that follow it
#[test]
fn shutdown_and_reboot() {
    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 2, true);
        },
        || {
            assert_eq!(current::<SystemTraits>(), 2);
            pend_tick::<SystemTraits>().unwrap();
            pend_tick::<SystemTraits>().unwrap();
            assert!(task_entry::<SystemTraits>(id(3)).is_some());
        },
    );

    assert_eq!(Sys::context(), Context::None);
    assert_eq!(Sys::state_flags(), StateFlags::empty());
    assert_eq!(Sys::current_task(), Ok(None));
    assert_eq!(Sys::next_task_to_run(), Ok(None));
    assert_eq!(Sys::created_task_count(), 0);

    // A stopped kernel doesn't accept ticks
    assert_eq!(
        kite_port_std::in_interrupt::<SystemTraits, _>(Sys::process_tick),
        Err(TickError::BadContext)
    );
    assert_eq!(Sys::time(), Ok(2));

    // Task 3 is only created this time, so the port must not know its
    // context from the previous boot
    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 2, false);
        },
        || {
            assert_eq!(Sys::time(), Ok(0));
            assert!(task_entry::<SystemTraits>(id(2)).is_some());
            assert!(task_entry::<SystemTraits>(id(3)).is_none());
        },
    );
}
