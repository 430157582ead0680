//! Diagnostics
//!
//! Error types shared by the compiler passes. Every stage surfaces failures
//! as [`Diagnostic`] values to the driver; the core never exits the process.

use std::fmt;

use thiserror::Error;

/// Result type used throughout the compilation pipeline.
pub type Result<T> = std::result::Result<T, Diagnostic>;

/// Compilation stage that reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Lexical analysis.
    Lex,
    /// Syntax analysis.
    Parse,
    /// Semantic resolution.
    Resolution,
    /// An invariant violation in a later pass. These are compiler bugs, not
    /// user errors.
    Internal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Resolution => "resolution",
            Stage::Internal => "internal",
        };
        write!(f, "{stage}")
    }
}

/// Fatal diagnostic produced by a compiler stage.
///
/// Errors are fatal within a stage; no stage attempts local recovery, and
/// stages after the failing one are not executed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Unmatched character, malformed numeric literal, or unterminated block
    /// comment.
    #[error("lex error: line {line}: {message}")]
    Lex {
        /// 1-indexed source line.
        line: usize,
        /// Human-readable description.
        message: String,
    },
    /// Token mismatch or illegal construct.
    #[error("parse error: line {line}: {message}")]
    Parse {
        /// 1-indexed source line.
        line: usize,
        /// Human-readable description.
        message: String,
    },
    /// The token stream ended where more input was required.
    #[error("parse error: expected {expected} at end of input")]
    UnexpectedEof {
        /// Description of what the parser was looking for.
        expected: String,
    },
    /// Undeclared variable, duplicate declaration, invalid assignment target,
    /// or `break`/`continue` outside a loop.
    #[error("resolution error: line {line}: {message}")]
    Resolution {
        /// 1-indexed source line.
        line: usize,
        /// Human-readable description.
        message: String,
    },
    /// An invariant violation in a later pass (a compiler bug).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<fmt::Error> for Diagnostic {
    fn from(_: fmt::Error) -> Diagnostic {
        Diagnostic::Internal("formatting emitted assembly failed".into())
    }
}

impl Diagnostic {
    /// Returns the stage that reported this diagnostic.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Diagnostic::Lex { .. } => Stage::Lex,
            Diagnostic::Parse { .. } | Diagnostic::UnexpectedEof { .. } => Stage::Parse,
            Diagnostic::Resolution { .. } => Stage::Resolution,
            Diagnostic::Internal(_) => Stage::Internal,
        }
    }

    /// Returns the source line the diagnostic points at, where one is known.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            Diagnostic::Lex { line, .. }
            | Diagnostic::Parse { line, .. }
            | Diagnostic::Resolution { line, .. } => Some(*line),
            Diagnostic::UnexpectedEof { .. } | Diagnostic::Internal(_) => None,
        }
    }
}
