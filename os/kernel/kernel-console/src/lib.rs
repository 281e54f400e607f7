//! # Kernel Console
//!
//! Diagnostic output for the kernel core. The simulated machine has no UART,
//! so the console is the host's standard error stream.
//!
//! Two entry points exist:
//!
//! * [`ConsoleLogger`], a [`log::Log`] implementation that every other crate
//!   reaches through the `log` macros. Records are printed as
//!   `[LEVEL] target: message`.
//! * [`console_trace!`], an unbuffered `format_args!` sink used by the panic
//!   path and `procdump`, where going through the logger's level filter is
//!   not wanted.
//!
//! ## Feature Gating
//!
//! With the `enabled` feature (default) the sink writes to stderr. Without it
//! both the trace macro and the logger become no-ops.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_console::ConsoleLogger;
//! use log::{LevelFilter, info};
//!
//! ConsoleLogger::new(LevelFilter::Debug).init().expect("logger initialization");
//! info!("bcache ready");
//! ```

mod logger;

pub use logger::ConsoleLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use std::fmt;
    use std::io::Write;

    /// Write formatted output to the console in one locked call, so lines
    /// from different CPUs do not interleave.
    #[doc(hidden)]
    #[inline]
    pub fn console_write(args: fmt::Arguments) {
        let stderr = std::io::stderr();
        let mut sink = stderr.lock();
        // Best-effort; a closed console is not an error the kernel can act on.
        let _ = sink.write_fmt(args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use std::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn console_write(_: fmt::Arguments) {}
}

/// Print to the kernel console without going through the logger.
#[macro_export]
macro_rules! console_trace {
    ($($arg:tt)*) => {{
        $crate::console_fmt::console_write(::core::format_args!($($arg)*));
    }};
}
