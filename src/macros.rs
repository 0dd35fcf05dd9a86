//! Logging macros that record the call site.
//!
//! Each macro takes a [`crate::Logger`] (or a reference to one) followed by
//! `format!`-style arguments. The caller block, when enabled, carries the file,
//! line and enclosing function of the macro invocation.

#[doc(hidden)]
#[macro_export]
macro_rules! __caller_info {
    () => {{
        fn __telelog_here() {}
        $crate::CallerInfo::new(
            ::std::file!(),
            ::std::line!(),
            $crate::format::enclosing_function(::std::any::type_name_of_val(&__telelog_here)),
        )
    }};
}

/// Log at an explicit [`crate::Severity`].
#[macro_export]
macro_rules! log {
    ($logger:expr, $severity:expr, $($arg:tt)+) => {
        $logger.log_args($severity, ::std::format_args!($($arg)+), $crate::__caller_info!())
    };
}

/// Log at fatal level, then terminate per the logger's fatal action.
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($arg:tt)+) => {
        $logger.fatal_args(::std::format_args!($($arg)+), $crate::__caller_info!())
    };
}

#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Severity::Error, $($arg)+)
    };
}

#[macro_export]
macro_rules! warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Severity::Warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Severity::Info, $($arg)+)
    };
}

/// Dispatched only when the logger's debug mode is on.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log!($logger, $crate::Severity::Debug, $($arg)+)
    };
}
