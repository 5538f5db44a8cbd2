//! Error types
//!
//! Recoverable errors are reported through per-operation enums whose
//! discriminants are shared with [`ResultCode`]. Conditions the kernel can't
//! recover from are reported as a [`FatalError`] and never return.
use core::{fmt, mem::transmute};

use crate::{task::TaskId, PortThreading};

macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use kite_kernel::ResultCode;
            /// assert_eq!(ResultCode::BadObjectState.as_str(), "BadObjectState");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that kernel operations can
    /// produce, and the completion codes delivered to waiting tasks.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The operation is not supported by the current kernel configuration.
        NotSupported = -9,
        /// A parameter is invalid in a way that is no covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified object identifier is out of range.
        NoAccess = -18,
        /// The current context disallows the operation.
        BadContext = -25,
        /// The target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// The object the task was waiting on was deleted.
        Deleted = -51,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

define_error! {
    mod tick_error {}
    /// Error type for [`System::process_tick`].
    ///
    /// [`System::process_tick`]: crate::System::process_tick
    pub enum TickError {
        /// The system is not running, or the caller is not an interrupt
        /// handler.
        BadContext,
    }
}

define_error! {
    mod set_time_slice_error {}
    /// Error type for [`System::set_time_slice`].
    ///
    /// [`System::set_time_slice`]: crate::System::set_time_slice
    pub enum SetTimeSliceError {
        /// The caller is an interrupt handler, or CPU Lock is active.
        BadContext,
        /// The priority is the idle level or out of range, or the quota
        /// exceeds [`MAX_TIME_SLICE`](crate::cfg::MAX_TIME_SLICE).
        BadParam,
        /// The kernel uses the dynamic tick mode, which has no time slicing.
        NotSupported,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`System::create_task`].
    ///
    /// [`System::create_task`]: crate::System::create_task
    pub enum CreateTaskError {
        /// The task ID is out of range.
        NoAccess,
        /// The caller is an interrupt handler, or CPU Lock is active.
        BadContext,
        /// The priority, the stack, or the creation options are invalid.
        BadParam,
        /// The task control block is already in use.
        BadObjectState,
    }
}

define_error! {
    mod activate_task_error {}
    /// Error type for [`System::activate_task`].
    ///
    /// [`System::activate_task`]: crate::System::activate_task
    pub enum ActivateTaskError {
        /// The task ID is out of range.
        NoAccess,
        /// The caller is an interrupt handler, or CPU Lock is active.
        BadContext,
        /// The task is not in the Dormant state.
        BadObjectState,
    }
}

define_error! {
    mod wait_error {}
    /// Error type for [`System::wait_current`].
    ///
    /// [`System::wait_current`]: crate::System::wait_current
    pub enum WaitError {
        /// The caller is not a running task, or CPU Lock is active.
        BadContext,
        /// The running task is the idle task, which must never block.
        BadObjectState,
    }
}

define_error! {
    mod query_task_error {}
    /// Error type for task queries such as [`System::task_state`].
    ///
    /// [`System::task_state`]: crate::System::task_state
    pub enum QueryTaskError {
        /// The task ID is out of range.
        NoAccess,
        /// CPU Lock is active.
        BadContext,
        /// The priority level is out of range.
        BadParam,
        /// The task is in a state where the queried value is unavailable.
        BadObjectState,
    }
}

define_error! {
    mod time_error {}
    /// Error type for [`System::time`].
    ///
    /// [`System::time`]: crate::System::time
    pub enum TimeError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod wait_queue_error {}
    /// Error type for the methods of [`WaitQueue`].
    ///
    /// [`WaitQueue`]: crate::wait::WaitQueue
    pub enum WaitQueueError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod report_deadlock_error {}
    /// Error type for `System::report_deadlock` (`deadlock_detect` feature).
    pub enum ReportDeadlockError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod set_callback_error {}
    /// Error type for the callback registration methods such as
    /// [`System::set_dyn_tick_callbacks`].
    ///
    /// [`System::set_dyn_tick_callbacks`]: crate::System::set_dyn_tick_callbacks
    pub enum SetCallbackError {
        /// CPU Lock is active.
        BadContext,
        /// The system has already started.
        BadObjectState,
    }
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        define_suberror! {
            @into
            #[into(ResultCode)]
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_suberror! {
    /// `BadContext`
    #[into(TickError)]
    #[into(SetTimeSliceError)]
    #[into(CreateTaskError)]
    #[into(ActivateTaskError)]
    #[into(WaitError)]
    #[into(QueryTaskError)]
    #[into(WaitQueueError)]
    #[into(SetCallbackError)]
    #[into(TimeError)]
    #[into(ReportDeadlockError)]
    pub enum BadContextError {
        BadContext,
    }
}

define_suberror! {
    /// `NoAccess`
    #[into(CreateTaskError)]
    #[into(ActivateTaskError)]
    #[into(QueryTaskError)]
    pub enum NoAccessError {
        NoAccess,
    }
}

/// An unrecoverable condition detected by the kernel.
///
/// Fatal errors are logged and then handed to
/// [`PortThreading::fatal_error`], which never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalError {
    /// The kernel was configured for the dynamic tick mode, but the tick
    /// callbacks weren't registered before startup.
    DynTickCallbacksMissing,
    /// The build configuration supplied by the application differs from the
    /// kernel's in the named field.
    BuildCfgMismatch(&'static str),
    /// The configured number of priority levels exceeds the width of the
    /// ready bitmap, or is less than two.
    TooManyPriorityLevels,
    /// The idle task couldn't be created.
    IdleTaskCreation,
    /// The idle task couldn't be activated.
    IdleTaskActivation,
    /// A startup phase was invoked out of order.
    StartupOutOfOrder,
    /// A wait queue still had tasks after every waiter was notified.
    WaitQueueNotEmpty,
    /// The profiler's per-task running flag didn't toggle as expected.
    ProfilerRunningFlag,
    /// The sentinel word at the limit of the task's stack was overwritten.
    StackOverflow(TaskId),
    /// A kernel queue is structurally corrupted.
    InconsistentQueue,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DynTickCallbacksMissing => {
                f.write_str("dynamic tick callbacks were not set before startup")
            }
            Self::BuildCfgMismatch(field) => {
                write!(f, "build configuration mismatch in field `{field}`")
            }
            Self::TooManyPriorityLevels => {
                f.write_str("priority level count doesn't fit the ready bitmap")
            }
            Self::IdleTaskCreation => f.write_str("failed to create the idle task"),
            Self::IdleTaskActivation => f.write_str("failed to activate the idle task"),
            Self::StartupOutOfOrder => f.write_str("startup phase invoked out of order"),
            Self::WaitQueueNotEmpty => {
                f.write_str("wait queue is not empty after notifying all waiters")
            }
            Self::ProfilerRunningFlag => f.write_str("profiler running flag is inconsistent"),
            Self::StackOverflow(task) => write!(f, "stack overflow in task {task}"),
            Self::InconsistentQueue => f.write_str("kernel queue is inconsistent"),
        }
    }
}

/// Log `e` and halt the system through the port.
#[cold]
pub(crate) fn fatal<Traits: PortThreading>(e: FatalError) -> ! {
    log::error!("fatal kernel error: {e}");
    Traits::fatal_error(e)
}

impl From<crate::utils::intrusive_list::InconsistentError> for FatalError {
    fn from(_: crate::utils::intrusive_list::InconsistentError) -> Self {
        Self::InconsistentQueue
    }
}
