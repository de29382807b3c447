//! Error taxonomy for the lexer, parser and interpreter.

use std::fmt;

use thiserror::Error;

/// A source location attached to an error: an optional file name plus an
/// optional line number. Both are `None` for errors raised on an in-memory
/// chunk with no attached path (e.g. `Vm::run_string` called directly).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    file: Option<String>,
    line: Option<u32>,
}

impl Location {
    /// A location with neither a file nor a line attached.
    pub const fn unknown() -> Self {
        Self {
            file: None,
            line: None,
        }
    }

    /// A location with only a line attached.
    pub fn at_line(line: u32) -> Self {
        Self {
            file: None,
            line: Some(line),
        }
    }

    /// Attach a file name, keeping the current line (if any).
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// The file this error was raised in, if known.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// The line this error was raised on, if known.
    pub const fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}"),
            (Some(file), None) => write!(f, "{file}"),
            (None, Some(line)) => write!(f, "line {line}"),
            (None, None) => Ok(()),
        }
    }
}

/// Top-level error type returned across the lexer/parser/interpreter boundary.
///
/// Each variant carries a human-readable message and a [`Location`]; there is
/// no stack trace, matching the embedding contract in the design (the host
/// collaborator is responsible for pretty-printing with optional color).
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed token (e.g. a numeric literal with no digits after `0x`).
    #[error("{location}: {message}")]
    Lex { message: String, location: Location },

    /// A syntax error, or a violation of a static constraint the parser
    /// enforces (too many locals, unknown identifier, invalid operand shape).
    #[error("{location}: {message}")]
    Parse { message: String, location: Location },

    /// A failure raised while executing already-compiled bytecode (type
    /// mismatch, stack exhaustion, unknown function/package).
    #[error("{location}: {message}")]
    Runtime { message: String, location: Location },
}

impl Error {
    pub fn lex(message: impl Into<String>, location: Location) -> Self {
        Self::Lex {
            message: message.into(),
            location,
        }
    }

    pub fn parse(message: impl Into<String>, location: Location) -> Self {
        Self::Parse {
            message: message.into(),
            location,
        }
    }

    pub fn runtime(message: impl Into<String>, location: Location) -> Self {
        Self::Runtime {
            message: message.into(),
            location,
        }
    }

    /// The bare description, with no file/line prefix — what the CLI
    /// collaborator prints after `error: `.
    pub fn description(&self) -> &str {
        match self {
            Self::Lex { message, .. } | Self::Parse { message, .. } | Self::Runtime { message, .. } => message,
        }
    }

    /// The file this error occurred in, if any was attached.
    pub fn file(&self) -> Option<&str> {
        self.location().file()
    }

    /// The line this error occurred on, if any was attached.
    pub fn line(&self) -> Option<u32> {
        self.location().line()
    }

    const fn location(&self) -> &Location {
        match self {
            Self::Lex { location, .. } | Self::Parse { location, .. } | Self::Runtime { location, .. } => location,
        }
    }
}

/// Convenience alias used throughout the lexer and parser.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_file_and_line() {
        let err = Error::parse("too many locals", Location::at_line(3).with_file("main.tl"));
        assert_eq!(err.to_string(), "main.tl:3: too many locals");
    }

    #[test]
    fn display_with_no_location() {
        let err = Error::runtime("stack overflow", Location::unknown());
        assert_eq!(err.to_string(), ": stack overflow");
    }
}
