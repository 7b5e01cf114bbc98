//! Errors raised while reading, parsing and compiling protocol files.

use std::fmt;

/// Source position of a diagnostic: protocol file name and line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Location {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.file, self.line)
    }
}

/// Flat classification of a [`ProtocolError`], with context layers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileNotFound,
    InvalidFile,
    Io,
    Syntax,
    Undefined,
    Range,
    Garbage,
    UnusedHandler,
    TooDeep,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Can't find readable file '{name}' in '{path}'")]
    FileNotFound { name: String, path: String },
    #[error("Protocol file '{0}' is invalid (see above)")]
    InvalidFile(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("{at}: {message}")]
    Syntax { at: Location, message: String },
    #[error("{at}: {message}")]
    Undefined { at: Location, message: String },
    #[error("{at}: {message}")]
    Range { at: Location, message: String },
    #[error("{at}: {message}")]
    Garbage { at: Location, message: String },
    #[error("{at}: {message}")]
    UnusedHandler { at: Location, message: String },
    #[error("{at}: {message}")]
    TooDeep { at: Location, message: String },
    /// An inner error annotated with the enclosing construct (handler, protocol, assignment).
    #[error("{source}\n{at}: {context}")]
    Context {
        at: Location,
        context: String,
        #[source]
        source: Box<ProtocolError>,
    },
}

impl ProtocolError {
    pub fn syntax(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::Syntax {
            at,
            message: message.into(),
        }
    }

    pub fn undefined(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::Undefined {
            at,
            message: message.into(),
        }
    }

    pub fn range(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::Range {
            at,
            message: message.into(),
        }
    }

    pub fn garbage(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::Garbage {
            at,
            message: message.into(),
        }
    }

    pub fn unused_handler(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::UnusedHandler {
            at,
            message: message.into(),
        }
    }

    pub fn too_deep(at: Location, message: impl Into<String>) -> Self {
        ProtocolError::TooDeep {
            at,
            message: message.into(),
        }
    }

    /// Wrap `self` with a note about the construct it occurred in.
    pub fn context(self, at: Location, context: impl Into<String>) -> Self {
        ProtocolError::Context {
            at,
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::FileNotFound { .. } => ErrorKind::FileNotFound,
            ProtocolError::InvalidFile(_) => ErrorKind::InvalidFile,
            ProtocolError::Io(_) => ErrorKind::Io,
            ProtocolError::Syntax { .. } => ErrorKind::Syntax,
            ProtocolError::Undefined { .. } => ErrorKind::Undefined,
            ProtocolError::Range { .. } => ErrorKind::Range,
            ProtocolError::Garbage { .. } => ErrorKind::Garbage,
            ProtocolError::UnusedHandler { .. } => ErrorKind::UnusedHandler,
            ProtocolError::TooDeep { .. } => ErrorKind::TooDeep,
            ProtocolError::Context { source, .. } => source.kind(),
        }
    }

    /// Location of the innermost positioned error, if any.
    pub fn location(&self) -> Option<&Location> {
        match self {
            ProtocolError::Syntax { at, .. }
            | ProtocolError::Undefined { at, .. }
            | ProtocolError::Range { at, .. }
            | ProtocolError::Garbage { at, .. }
            | ProtocolError::UnusedHandler { at, .. }
            | ProtocolError::TooDeep { at, .. } => Some(at),
            ProtocolError::Context { at, source, .. } => source.location().or(Some(at)),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.location().map(|at| at.line)
    }
}
