//! A task whose stack-limit word was overwritten halts the system when it's
//! switched out.
use kite_kernel::{CreateOptions, NoProfiler, StaticTick, System, TaskAttr};
use kite_port_std::run;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::{create_task, current, id, task_body};

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 3,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
);

type Sys = System<SystemTraits>;

/// The lowest word of task 2's stack.
static STACK_LIMIT: AtomicPtr<usize> = AtomicPtr::new(std::ptr::null_mut());

fn create_tasks() {
    let stack = kite_port_std::leak_stack(32);
    STACK_LIMIT.store(stack.as_mut_ptr(), Ordering::Relaxed);
    let attr = TaskAttr {
        entry_point: task_body,
        entry_param: 0,
        priority: 2,
    };
    Sys::create_task(id(2), attr, stack, CreateOptions::START).unwrap();
    create_task::<SystemTraits>(3, 1, false);
}

#[test]
#[should_panic(expected = "stack overflow in task 2")]
fn detected_on_switch() {
    run::<SystemTraits>(create_tasks, || {
        assert_eq!(current::<SystemTraits>(), 2);
        assert_eq!(Sys::task_stack_unused(id(2)), Ok(32));

        // Simulate the task running off the end of its stack
        unsafe { STACK_LIMIT.load(Ordering::Relaxed).write_volatile(0) };
        assert_eq!(Sys::task_stack_unused(id(2)), Ok(0));

        // Preempting task 2 checks its stack
        Sys::activate_task(id(3)).unwrap();
    });
}
