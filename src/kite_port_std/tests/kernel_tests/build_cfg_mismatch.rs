//! Startup halts when the application was built for a different kernel
//! configuration.
use kite_kernel::{BuildCfg, NoProfiler, StaticTick};
use kite_port_std::run;

define_system!(
    SystemTraits,
    levels = 4,
    num_tasks = 2,
    tick = StaticTick<SystemTraits, 4>,
    profiler = NoProfiler,
    app_build_cfg = BuildCfg {
        profiler: true,
        ..BuildCfg::of::<SystemTraits>()
    },
);

#[test]
#[should_panic(expected = "build configuration mismatch in field `profiler`")]
fn halts_startup() {
    run::<SystemTraits>(|| unreachable!(), || unreachable!());
}
