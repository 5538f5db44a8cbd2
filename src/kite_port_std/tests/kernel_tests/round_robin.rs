//! Round-robin time slicing among tasks of the same priority.
use kite_kernel::{NoProfiler, SetTimeSliceError, StaticTick, System, MAX_TIME_SLICE, NO_TIME_SLICE};
use kite_port_std::{in_interrupt, pend_tick, run};

use crate::{create_task, current, ready_tasks};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 4,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

fn tick(n: usize) {
    for _ in 0..n {
        pend_tick::<SystemTraits>().unwrap();
    }
}

fn three_sliced_tasks() {
    create_task::<SystemTraits>(2, 1, true);
    create_task::<SystemTraits>(3, 1, true);
    create_task::<SystemTraits>(4, 1, true);
    Sys::set_time_slice(1, 2).unwrap();
}

#[test]
fn rotates_after_quota_is_exceeded() {
    run::<SystemTraits>(three_sliced_tasks, || {
        assert_eq!(current::<SystemTraits>(), 2);

        // The quota is 2, so the third tick rotates the level
        tick(2);
        assert_eq!(current::<SystemTraits>(), 2);
        tick(1);
        assert_eq!(current::<SystemTraits>(), 3);
        assert_eq!(ready_tasks::<SystemTraits>(1), [3, 4, 2]);

        tick(3);
        assert_eq!(current::<SystemTraits>(), 4);
        tick(3);
        assert_eq!(current::<SystemTraits>(), 2);
        assert_eq!(ready_tasks::<SystemTraits>(1), [2, 3, 4]);
        assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
    });
}

#[test]
fn disabling_the_quota_stops_rotation() {
    run::<SystemTraits>(three_sliced_tasks, || {
        tick(3);
        assert_eq!(current::<SystemTraits>(), 3);

        Sys::set_time_slice(1, NO_TIME_SLICE).unwrap();
        tick(20);
        assert_eq!(current::<SystemTraits>(), 3);
    });
}

#[test]
fn lone_task_is_never_rotated() {
    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 2, true);
            Sys::set_time_slice(1, 1).unwrap();
        },
        || {
            tick(10);
            assert_eq!(current::<SystemTraits>(), 2);
            assert_eq!(ready_tasks::<SystemTraits>(1), [2]);
            assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
        },
    );
}

#[test]
fn unsliced_level_is_never_rotated() {
    run::<SystemTraits>(
        || {
            create_task::<SystemTraits>(2, 1, true);
            create_task::<SystemTraits>(3, 1, true);
        },
        || {
            tick(10);
            assert_eq!(current::<SystemTraits>(), 2);
            assert_eq!(ready_tasks::<SystemTraits>(1), [2, 3]);
        },
    );
}

#[test]
fn set_time_slice_validates_parameters() {
    run::<SystemTraits>(three_sliced_tasks, || {
        // The idle level can't be sliced
        assert_eq!(Sys::set_time_slice(3, 1), Err(SetTimeSliceError::BadParam));
        assert_eq!(Sys::set_time_slice(4, 1), Err(SetTimeSliceError::BadParam));
        assert_eq!(
            Sys::set_time_slice(0, MAX_TIME_SLICE + 1),
            Err(SetTimeSliceError::BadParam)
        );
        assert_eq!(Sys::set_time_slice(0, MAX_TIME_SLICE), Ok(()));
        assert_eq!(
            in_interrupt::<SystemTraits, _>(|| Sys::set_time_slice(1, 5)),
            Err(SetTimeSliceError::BadContext)
        );
    });
}
