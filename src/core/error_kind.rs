//! Classification of execution failures
//!
//! Failures raised by learner or test programs are reported by the runtime under
//! their type name. The common ones are modeled explicitly so callers can branch
//! on them (syntax problem vs. failed assertion); anything else is kept verbatim
//! in `ErrorKind::Other`. `Timeout`, `Cancelled` and `Crashed` are produced by the
//! sandbox itself, never by the program.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    SyntaxError,
    IndentationError,
    NameError,
    TypeError,
    ValueError,
    AssertionError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    ImportError,
    ModuleNotFoundError,
    RecursionError,
    MemoryError,
    EofError,
    SystemExit,
    /// Wall-clock or CPU time budget exhausted
    Timeout,
    /// The request owning the run went away
    Cancelled,
    /// Interpreter died without producing a report (signal, os._exit, ...)
    Crashed,
    Other(String),
}

impl ErrorKind {
    /// Map a runtime type name to a kind
    pub fn from_name(name: &str) -> Self {
        match name {
            "SyntaxError" => ErrorKind::SyntaxError,
            "IndentationError" => ErrorKind::IndentationError,
            "NameError" => ErrorKind::NameError,
            "TypeError" => ErrorKind::TypeError,
            "ValueError" => ErrorKind::ValueError,
            "AssertionError" => ErrorKind::AssertionError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "IndexError" => ErrorKind::IndexError,
            "KeyError" => ErrorKind::KeyError,
            "AttributeError" => ErrorKind::AttributeError,
            "ImportError" => ErrorKind::ImportError,
            "ModuleNotFoundError" => ErrorKind::ModuleNotFoundError,
            "RecursionError" => ErrorKind::RecursionError,
            "MemoryError" => ErrorKind::MemoryError,
            "EOFError" => ErrorKind::EofError,
            "SystemExit" => ErrorKind::SystemExit,
            "Timeout" => ErrorKind::Timeout,
            "Cancelled" => ErrorKind::Cancelled,
            "Crashed" => ErrorKind::Crashed,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::IndentationError => "IndentationError",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::ModuleNotFoundError => "ModuleNotFoundError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::EofError => "EOFError",
            ErrorKind::SystemExit => "SystemExit",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Crashed => "Crashed",
            ErrorKind::Other(name) => name,
        }
    }

    /// Whether the program could not even be compiled
    pub fn is_syntax(&self) -> bool {
        matches!(self, ErrorKind::SyntaxError | ErrorKind::IndentationError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(name: String) -> Self {
        ErrorKind::from_name(&name)
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
