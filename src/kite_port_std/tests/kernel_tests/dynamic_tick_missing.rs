//! The dynamic tick mode can't start without its callbacks.
use kite_kernel::{DynamicTick, NoProfiler};
use kite_port_std::run;

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 2,
    tick = DynamicTick<SystemTraits>,
    profiler = NoProfiler,
);

#[test]
#[should_panic(expected = "dynamic tick callbacks were not set before startup")]
fn halts_startup() {
    run::<SystemTraits>(|| unreachable!(), || unreachable!());
}
