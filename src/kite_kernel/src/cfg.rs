//! Kernel configuration constants and the build-configuration descriptor
use crate::{tick::TickMode, KernelCfg1, KernelTraits};

/// The word written over every task stack and the interrupt stack at
/// creation. A stack-limit word that no longer holds this value means the
/// stack has overflowed.
pub const STACK_FILL_VALUE: usize = 0xFEED_FACE;

/// Time-slice quota meaning "never rotate this priority level".
pub const NO_TIME_SLICE: u16 = 0;

/// The largest accepted time-slice quota, in ticks.
pub const MAX_TIME_SLICE: u16 = 0xFFFE;

/// Describes the compile-time options a kernel instance was built with.
///
/// An application built separately from the kernel can report the options
/// it was compiled against through [`KernelCfg2::app_build_cfg`]. Startup
/// compares the two field by field and halts with
/// [`FatalError::BuildCfgMismatch`] naming the first differing field.
///
/// [`KernelCfg2::app_build_cfg`]: crate::KernelCfg2::app_build_cfg
/// [`FatalError::BuildCfgMismatch`]: crate::FatalError::BuildCfgMismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildCfg {
    pub priorities: usize,
    pub debug: bool,
    pub profiler: bool,
    pub dynamic_tick: bool,
    pub deadlock_detect: bool,
    pub max_time_slice: u16,
}

impl BuildCfg {
    /// Get the build configuration of the kernel instance `Traits`.
    pub const fn of<Traits: KernelTraits>() -> Self {
        Self {
            priorities: <Traits as KernelCfg1>::NUM_TASK_PRIORITY_LEVELS,
            debug: cfg!(debug_assertions),
            profiler: <Traits::Profiler as crate::profiler::Profiler<Traits>>::ENABLED,
            dynamic_tick: <Traits::TickMode as TickMode<Traits>>::DYNAMIC,
            deadlock_detect: cfg!(feature = "deadlock_detect"),
            max_time_slice: MAX_TIME_SLICE,
        }
    }

    /// Compare `self` (the kernel's configuration) against `app` and return
    /// the name of the first field that differs.
    pub fn mismatch(&self, app: &Self) -> Option<&'static str> {
        if self.priorities != app.priorities {
            Some("priorities")
        } else if self.debug != app.debug {
            Some("debug")
        } else if self.profiler != app.profiler {
            Some("profiler")
        } else if self.dynamic_tick != app.dynamic_tick {
            Some("dynamic_tick")
        } else if self.deadlock_detect != app.deadlock_detect {
            Some("deadlock_detect")
        } else if self.max_time_slice != app.max_time_slice {
            Some("max_time_slice")
        } else {
            None
        }
    }
}
