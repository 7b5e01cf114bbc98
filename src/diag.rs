//! Diagnostics sinks: where line-tagged errors and notes end up.
//!
//! Reporting never changes control flow; failures still travel as
//! [`ProtocolError`](crate::error::ProtocolError) values.

use std::cell::RefCell;

pub trait Diagnostics {
    fn error(&self, line: u32, file: &str, message: &str);

    /// Non-fatal findings (unused variables) and verbose traces.
    fn note(&self, _line: u32, _file: &str, _message: &str) {}
}

/// Forwards everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn error(&self, line: u32, file: &str, message: &str) {
        log::error!("'{}' line {}: {}", file, line, message);
    }

    fn note(&self, line: u32, file: &str, message: &str) {
        log::debug!("'{}' line {}: {}", file, line, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Note,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: u32,
    pub file: String,
    pub message: String,
}

/// Keeps every message in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    messages: RefCell<Vec<Diagnostic>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Diagnostic> {
        self.messages.borrow().clone()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.messages
            .borrow()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .cloned()
            .collect()
    }

    fn push(&self, severity: Severity, line: u32, file: &str, message: &str) {
        self.messages.borrow_mut().push(Diagnostic {
            severity,
            line,
            file: file.to_string(),
            message: message.to_string(),
        });
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn error(&self, line: u32, file: &str, message: &str) {
        self.push(Severity::Error, line, file, message);
    }

    fn note(&self, line: u32, file: &str, message: &str) {
        self.push(Severity::Note, line, file, message);
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for std::rc::Rc<D> {
    fn error(&self, line: u32, file: &str, message: &str) {
        (**self).error(line, file, message)
    }

    fn note(&self, line: u32, file: &str, message: &str) {
        (**self).note(line, file, message)
    }
}
