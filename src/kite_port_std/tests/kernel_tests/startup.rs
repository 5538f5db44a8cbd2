//! Startup creates the idle task, runs the application's task creation, and
//! dispatches the highest-priority task.
use kite_kernel::{
    ActivateTaskError, Context, CreateOptions, CreateTaskError, NoProfiler, StateFlags,
    StaticTick, System, TaskAttr, TaskSt, IDLE_TASK_ID,
};
use kite_port_std::{in_interrupt, leak_stack, run, run_with, task_entry, Config, DEFAULT_STACK_LEN};

use crate::{create_task, current, id, ready_tasks, task_body};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 5,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

fn attr(priority: usize) -> TaskAttr {
    TaskAttr {
        entry_point: task_body,
        entry_param: 0,
        priority,
    }
}

fn create_tasks() {
    assert_eq!(Sys::context(), Context::None);
    assert!(!Sys::state_flags().contains(StateFlags::SYS_RUNNING));

    // The idle task is already there
    assert_eq!(Sys::task_state(IDLE_TASK_ID), Ok(TaskSt::Runnable));
    assert_eq!(Sys::task_priority(IDLE_TASK_ID), Ok(3));
    assert_eq!(Sys::current_task(), Ok(Some(IDLE_TASK_ID)));

    create_task::<SystemTraits>(2, 2, true);
    create_task::<SystemTraits>(3, 0, true);
    create_task::<SystemTraits>(4, 1, true);
    create_task::<SystemTraits>(5, 1, false);

    // Nothing is dispatched before the system starts
    assert_eq!(Sys::current_task(), Ok(Some(IDLE_TASK_ID)));
    assert_eq!(Sys::next_task_to_run(), Ok(Some(id(3))));
}

#[test]
fn dispatches_highest_priority_task() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(current::<SystemTraits>(), 3);
        assert_eq!(Sys::context(), Context::Task);
        assert!(Sys::state_flags().contains(StateFlags::SYS_RUNNING));
        assert!(!Sys::state_flags().contains(StateFlags::DEADLOCK));

        assert_eq!(ready_tasks::<SystemTraits>(0), [3]);
        assert_eq!(ready_tasks::<SystemTraits>(1), [4]);
        assert_eq!(ready_tasks::<SystemTraits>(2), [2]);
        assert_eq!(ready_tasks::<SystemTraits>(3), [1]);
        assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));

        assert_eq!(Sys::task_state(id(5)), Ok(TaskSt::Dormant));
        assert!(Sys::current_task_entry_point().unwrap().is_some());
    });
}

#[test]
fn lower_priority_activation_doesnt_preempt() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(current::<SystemTraits>(), 3);

        // Queued behind the task of the same priority
        Sys::activate_task(id(5)).unwrap();
        assert_eq!(current::<SystemTraits>(), 3);
        assert_eq!(ready_tasks::<SystemTraits>(1), [4, 5]);
        assert_eq!(
            Sys::activate_task(id(5)),
            Err(ActivateTaskError::BadObjectState)
        );
        assert_eq!(Sys::is_ready_queue_consistent(), Ok(true));
    });
}

#[test]
fn port_state_is_initialized_on_activation() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(task_entry::<SystemTraits>(id(2)).map(|(_, param)| param), Some(2));
        assert!(task_entry::<SystemTraits>(IDLE_TASK_ID).is_some());
        assert!(task_entry::<SystemTraits>(id(5)).is_none());
    });
}

#[test]
fn stacks_are_filled() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(Sys::task_stack_unused(id(2)), Ok(64));
        assert_eq!(Sys::task_stack_unused(IDLE_TASK_ID), Ok(DEFAULT_STACK_LEN));
        assert_eq!(Sys::interrupt_stack_unused(), Ok(DEFAULT_STACK_LEN));
        assert_eq!(
            kite_port_std::int_stack::<SystemTraits>().map(|s| s.len()),
            Some(DEFAULT_STACK_LEN)
        );
    });
}

#[test]
fn create_task_validates_parameters() {
    run::<SystemTraits>(create_tasks, || {
        // Slot 0 is reserved for the idle task
        assert_eq!(
            Sys::create_task(IDLE_TASK_ID, attr(1), leak_stack(16), CreateOptions::empty()),
            Err(CreateTaskError::BadParam)
        );
        // So is the lowest priority level
        assert_eq!(
            Sys::create_task(id(5), attr(3), leak_stack(16), CreateOptions::empty()),
            Err(CreateTaskError::BadParam)
        );
        assert_eq!(
            Sys::create_task(id(5), attr(1), leak_stack(0), CreateOptions::empty()),
            Err(CreateTaskError::BadParam)
        );
        assert_eq!(
            Sys::create_task(id(5), attr(1), leak_stack(16), CreateOptions::IDLE),
            Err(CreateTaskError::BadParam)
        );
        assert_eq!(
            Sys::create_task(id(6), attr(1), leak_stack(16), CreateOptions::empty()),
            Err(CreateTaskError::NoAccess)
        );
        assert_eq!(
            Sys::create_task(id(2), attr(1), leak_stack(16), CreateOptions::empty()),
            Err(CreateTaskError::BadObjectState)
        );
        assert_eq!(
            in_interrupt::<SystemTraits, _>(|| {
                Sys::create_task(id(5), attr(1), leak_stack(16), CreateOptions::empty())
            }),
            Err(CreateTaskError::BadContext)
        );
        assert_eq!(
            in_interrupt::<SystemTraits, _>(|| Sys::activate_task(id(5))),
            Err(ActivateTaskError::BadContext)
        );
    });
}

#[test]
#[should_panic(expected = "failed to create the idle task")]
fn idle_task_needs_a_stack() {
    let config = Config {
        idle_stack_len: 0,
        ..Config::default()
    };
    run_with::<SystemTraits>(config, create_tasks, || unreachable!());
}
