use std::fmt;

/// The main error type for interpolation and tree scanning.
#[derive(Debug, Clone, PartialEq)]
pub enum StrataError {
    /// Raised when a referenced name resolves nowhere in the scope chain
    /// nor the process environment. `path` is the breadcrumb of mapping
    /// keys (and, innermost, the literal string) that led to the reference,
    /// accumulated innermost-first while the error propagates.
    UndefinedVariable {
        name: String,
        path: Vec<String>,
    },
    /// Raised when a variable's own definition references itself, directly
    /// or transitively, before completing.
    CyclicDefinition {
        name: String,
    },
    /// Raised when a `defines` entry is present but is not a mapping.
    InvalidDefines {
        path: Vec<String>,
    },
    /// Filesystem failures from the timestamp subsystem.
    Io {
        message: String,
        path: String,
    },
}

impl StrataError {
    pub(crate) fn undefined(name: impl Into<String>) -> Self {
        StrataError::UndefinedVariable {
            name: name.into(),
            path: Vec::new(),
        }
    }

    /// Prepends a breadcrumb segment on errors that carry a path; other
    /// variants pass through untouched.
    pub(crate) fn push_path_segment(mut self, segment: &str) -> Self {
        match &mut self {
            StrataError::UndefinedVariable { path, .. }
            | StrataError::InvalidDefines { path } => {
                path.insert(0, segment.to_string());
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for StrataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrataError::UndefinedVariable { name, path } => {
                write!(f, "undefined variable '{}' in {}", name, path.join("/"))
            }
            StrataError::CyclicDefinition { name } => {
                write!(f, "cyclic reference found in definition of '{}'", name)
            }
            StrataError::InvalidDefines { path } => {
                write!(f, "'defines' entry in {} is not a mapping", path.join("/"))
            }
            StrataError::Io { message, path } => {
                write!(f, "i/o error on '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for StrataError {}
