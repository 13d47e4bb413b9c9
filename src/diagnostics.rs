//! Injected diagnostics for geometry code.
//!
//! Components never log through a global on their own. Every builder and
//! loader takes a `&dyn Diagnostics` and reports through it; pass
//! [`NoopDiagnostics`] to stay silent or [`LogDiagnostics`] to forward into
//! the `log` facade under a fixed target.

use std::fmt;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
}

/// Observer for diagnostic events emitted while building or querying.
pub trait Diagnostics: Send + Sync {
    /// Receives one event. `component` names the emitting module.
    fn event(&self, level: Level, component: &'static str, message: fmt::Arguments<'_>);

    fn trace(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.event(Level::Trace, component, message);
    }

    fn debug(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.event(Level::Debug, component, message);
    }

    fn info(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.event(Level::Info, component, message);
    }

    fn warn(&self, component: &'static str, message: fmt::Arguments<'_>) {
        self.event(Level::Warn, component, message);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn event(&self, _level: Level, _component: &'static str, _message: fmt::Arguments<'_>) {}
}

/// Forwards events to the `log` crate.
#[derive(Debug, Clone)]
pub struct LogDiagnostics {
    target: &'static str,
}

impl LogDiagnostics {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogDiagnostics {
    fn default() -> Self {
        Self::new("limbreach")
    }
}

impl Diagnostics for LogDiagnostics {
    fn event(&self, level: Level, component: &'static str, message: fmt::Arguments<'_>) {
        let level = match level {
            Level::Trace => log::Level::Trace,
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
        };
        log::log!(target: self.target, level, "[{}] {}", component, message);
    }
}
