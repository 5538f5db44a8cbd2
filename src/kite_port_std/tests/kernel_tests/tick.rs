//! The tick processor only runs in an interrupt context of a running system.
use kite_kernel::{NoProfiler, StaticTick, System, TickError};
use kite_port_std::{in_interrupt, pend_tick, run};

use crate::{create_task, current};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

fn create_tasks() {
    // The system isn't running yet, so even an interrupt handler can't tick
    assert_eq!(Sys::process_tick(), Err(TickError::BadContext));
    assert_eq!(
        in_interrupt::<SystemTraits, _>(Sys::process_tick),
        Err(TickError::BadContext)
    );
    assert_eq!(Sys::time(), Ok(0));

    create_task::<SystemTraits>(2, 1, true);
    create_task::<SystemTraits>(3, 2, true);
}

#[test]
fn rejected_outside_interrupt_context() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(Sys::process_tick(), Err(TickError::BadContext));
        assert_eq!(Sys::time(), Ok(0));
        assert_eq!(current::<SystemTraits>(), 2);
    });
}

#[test]
fn advances_clock() {
    run::<SystemTraits>(create_tasks, || {
        for expected in 1..=5 {
            pend_tick::<SystemTraits>().unwrap();
            assert_eq!(Sys::time(), Ok(expected));
        }

        // No time slices are configured, so nothing moves
        assert_eq!(current::<SystemTraits>(), 2);
        assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
    });
}

#[test]
fn time_restarts_on_boot() {
    run::<SystemTraits>(create_tasks, || {
        pend_tick::<SystemTraits>().unwrap();
    });
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(Sys::time(), Ok(0));
    });
}
