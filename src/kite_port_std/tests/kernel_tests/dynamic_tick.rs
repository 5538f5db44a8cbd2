//! The dynamic tick mode delegates the clock and the timer to the
//! application.
use kite_kernel::{
    DynamicTick, NoProfiler, SetCallbackError, SetTimeSliceError, System, TickCount,
};
use kite_port_std::{pend_tick, run};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{create_task, current};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = DynamicTick<SystemTraits>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

static CLOCK: AtomicU32 = AtomicU32::new(0);
static SCHEDULED: AtomicU32 = AtomicU32::new(0);

fn schedule(timeout: TickCount) {
    SCHEDULED.store(timeout, Ordering::Relaxed);
}

fn get_tick() -> TickCount {
    CLOCK.load(Ordering::Relaxed)
}

#[test]
fn clock_and_timer_are_delegated() {
    Sys::set_dyn_tick_callbacks(schedule, get_tick).unwrap();

    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 1, true);
        },
        || {
            CLOCK.store(42, Ordering::Relaxed);
            assert_eq!(Sys::time(), Ok(42));

            Sys::schedule_next_tick(10).unwrap();
            assert_eq!(SCHEDULED.load(Ordering::Relaxed), 10);

            // No time slicing in this mode
            assert_eq!(
                Sys::set_time_slice(1, 1),
                Err(SetTimeSliceError::NotSupported)
            );
            for _ in 0..5 {
                pend_tick::<SystemTraits>().unwrap();
            }
            assert_eq!(current::<SystemTraits>(), 2);
            assert_eq!(Sys::time(), Ok(42));

            assert_eq!(
                Sys::set_dyn_tick_callbacks(schedule, get_tick),
                Err(SetCallbackError::BadObjectState)
            );
        },
    );
}
