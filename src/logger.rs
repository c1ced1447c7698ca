//! Scheduler logging
//!
//! The kernel `k*` macro family, routed through the `log` facade so the
//! host kernel decides where scheduler messages end up (serial, ring
//! buffer, test harness). Every record uses the `sched` target.

use core::sync::atomic::{AtomicU8, Ordering};

/// Log target used for every scheduler record.
pub const LOG_TARGET: &str = "sched";

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::TRACE.priority());

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    ERROR,
    WARN,
    INFO,
    DEBUG,
    TRACE,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::ERROR => "ERROR",
            LogLevel::WARN => "WARN",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::TRACE => "TRACE",
        }
    }

    pub const fn priority(self) -> u8 {
        self as u8
    }

    pub const fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::ERROR => log::Level::Error,
            LogLevel::WARN => log::Level::Warn,
            LogLevel::INFO => log::Level::Info,
            LogLevel::DEBUG => log::Level::Debug,
            LogLevel::TRACE => log::Level::Trace,
        }
    }
}

/// Cap scheduler verbosity independently of the global `log` filter.
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::ERROR,
        1 => LogLevel::WARN,
        2 => LogLevel::INFO,
        3 => LogLevel::DEBUG,
        _ => LogLevel::TRACE,
    }
}

#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level.priority() <= LOG_LEVEL.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        let level: $crate::logger::LogLevel = $level;
        if $crate::logger::enabled(level) {
            ::log::log!(target: $crate::logger::LOG_TARGET, level.to_log_level(), $($arg)*);
        }
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}

/// Fatal invariant check. Logs and panics when debug assertions are on,
/// compiles to nothing otherwise.
#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {
        $crate::kassert!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {{
        if cfg!(debug_assertions) && !$cond {
            $crate::kerror!("assertion failed: {}", format_args!($($arg)+));
            panic!("sched assertion failed: {}", format_args!($($arg)+));
        }
    }};
}
