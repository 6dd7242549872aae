//! User-facing diagnostics and the reporting seam shared by all passes.
//!
//! Resolution distinguishes three failure classes: user errors (bad source),
//! deferred errors (observed under a `try` frame and recoverable), and
//! internal inconsistencies (always fatal, raised with `panic!` carrying the
//! offending node id). Only the first two flow through this module; passes
//! push them into a [`Reporter`] so a single compile surfaces as many errors
//! as possible.
//!
//! Names and types are rendered to strings at construction time so the error
//! values stay self-contained once the arena moves on.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// A source position: interned file name index plus 1-based line.
///
/// Synthesized nodes inherit the location of the construct that produced
/// them, so every diagnostic has somewhere real to point.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct Loc {
    /// Interned file name (see [`crate::intern::Interner`]).
    pub file: u32,
    /// 1-based source line; 0 for compiler-synthesized code.
    pub line: u32,
}

impl Loc {
    /// A location for nodes with no source counterpart.
    pub const UNKNOWN: Self = Self { file: 0, line: 0 };
}

/// Result alias for resolution steps that may unwind to a `try` frame.
pub type ResolveResult<T> = Result<T, ResolveFailure>;

/// An unresolved or ambiguous call observed during resolution.
///
/// This is the unwinding payload: raised as `Err`, it pops resolution frames
/// until the innermost `try` frame catches it, or reaches the resolver's
/// top level where it becomes a reported [`UserError`].
#[derive(Debug, Clone)]
pub struct ResolveFailure {
    pub error: UserError,
}

impl ResolveFailure {
    pub fn new(error: UserError) -> Self {
        Self { error }
    }
}

/// Source-level errors the middle end can attribute to user code.
#[derive(Debug, Clone)]
pub enum UserError {
    /// No visible function matched the call.
    UnresolvedCall { name: String, args: String, loc: Loc },
    /// More than one candidate survived disambiguation.
    AmbiguousCall { name: String, candidates: Vec<String>, loc: Loc },
    /// An actual's type cannot dispatch to the matched formal.
    TypeMismatch { expected: String, found: String, loc: Loc },
    /// Assignment target is not an lvalue.
    InvalidLvalue { loc: Loc },
    /// A cast with no legal conversion between the types.
    IllegalCast { from: String, to: String, loc: Loc },
    /// A param tuple index outside the tuple's arity.
    InvalidTupleIndex { index: i64, size: u32, loc: Loc },
    /// `nil` assigned to a non-class variable.
    NilAssignment { ty: String, loc: Loc },
    /// A user-invoked `compilerError` primitive fired.
    UserDiagnostic { message: String, loc: Loc },
}

impl UserError {
    /// The source location this error points at.
    #[must_use]
    pub fn loc(&self) -> Loc {
        match self {
            Self::UnresolvedCall { loc, .. }
            | Self::AmbiguousCall { loc, .. }
            | Self::TypeMismatch { loc, .. }
            | Self::InvalidLvalue { loc }
            | Self::IllegalCast { loc, .. }
            | Self::InvalidTupleIndex { loc, .. }
            | Self::NilAssignment { loc, .. }
            | Self::UserDiagnostic { loc, .. } => *loc,
        }
    }
}

impl Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedCall { name, args, .. } => {
                write!(f, "unresolved call '{name}({args})'")
            }
            Self::AmbiguousCall { name, candidates, .. } => {
                write!(f, "ambiguous call '{name}'; candidates: {}", candidates.join(", "))
            }
            Self::TypeMismatch { expected, found, .. } => {
                write!(f, "type mismatch: expected '{expected}', found '{found}'")
            }
            Self::InvalidLvalue { .. } => write!(f, "illegal lvalue in assignment"),
            Self::IllegalCast { from, to, .. } => {
                write!(f, "illegal cast from '{from}' to '{to}'")
            }
            Self::InvalidTupleIndex { index, size, .. } => {
                write!(f, "tuple index {index} out of bounds for {size}-tuple")
            }
            Self::NilAssignment { ty, .. } => {
                write!(f, "type mismatch: assigning nil to non-class type '{ty}'")
            }
            Self::UserDiagnostic { message, .. } => f.write_str(message),
        }
    }
}

/// Quietable warnings.
#[derive(Debug, Clone, IntoStaticStr)]
pub enum Warning {
    /// A scalar function was promoted over an aggregate actual.
    Promotion { callee: String, loc: Loc },
    /// `.locale` queried on an expression already known to be local.
    LocalLocaleQuery { loc: Loc },
    /// `compilerWarning` depth exceeded the call stack.
    DiagnosticDepth { loc: Loc },
    /// A deprecated language feature was used.
    Deprecated { feature: String, loc: Loc },
    /// A user-invoked `compilerWarning` primitive fired.
    UserDiagnostic { message: String, loc: Loc },
}

impl Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promotion { callee, .. } => {
                write!(f, "promotion on call to '{callee}'")
            }
            Self::LocalLocaleQuery { .. } => {
                write!(f, "querying the locale of a local expression")
            }
            Self::DiagnosticDepth { .. } => {
                write!(f, "compiler diagnostic depth exceeds call stack")
            }
            Self::Deprecated { feature, .. } => write!(f, "'{feature}' is deprecated"),
            Self::UserDiagnostic { message, .. } => f.write_str(message),
        }
    }
}

/// Collects diagnostics across all passes.
///
/// Errors do not abort the pass that found them; the resolver keeps going so
/// one compile reports everything it can. The driver checks
/// [`Reporter::has_errors`] between phases and stops before codegen.
#[derive(Debug, Default)]
pub struct Reporter {
    errors: Vec<UserError>,
    warnings: Vec<Warning>,
    /// Candidate-ranking traces requested via `explain_call_line`.
    explain: Vec<String>,
    quiet: bool,
}

impl Reporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress warnings (errors are always kept).
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn error(&mut self, error: UserError) {
        self.errors.push(error);
    }

    pub fn warning(&mut self, warning: Warning) {
        if !self.quiet {
            self.warnings.push(warning);
        }
    }

    /// Records one line of candidate-ranking explanation output.
    pub fn explain(&mut self, line: String) {
        self.explain.push(line);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[UserError] {
        &self.errors
    }

    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    #[must_use]
    pub fn explanations(&self) -> &[String] {
        &self.explain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_keeps_errors_in_order() {
        let mut reporter = Reporter::new();
        reporter.error(UserError::InvalidLvalue { loc: Loc::UNKNOWN });
        reporter.error(UserError::UnresolvedCall {
            name: "f".into(),
            args: "int32".into(),
            loc: Loc { file: 1, line: 3 },
        });
        assert_eq!(reporter.errors().len(), 2);
        assert_eq!(reporter.errors()[1].loc().line, 3);
    }

    #[test]
    fn quiet_drops_warnings_only() {
        let mut reporter = Reporter::new();
        reporter.set_quiet(true);
        reporter.warning(Warning::LocalLocaleQuery { loc: Loc::UNKNOWN });
        reporter.error(UserError::InvalidLvalue { loc: Loc::UNKNOWN });
        assert!(reporter.warnings().is_empty());
        assert!(reporter.has_errors());
    }
}
