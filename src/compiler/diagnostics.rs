//! Diagnostics produced by contract inference and resolution.

use crate::compiler::ast::{NodeId, Span};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// An inference or resolution failure. Every variant carries the source
/// location of the site that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ContractError {
    /// The same capability is invoked with two different argument counts on
    /// one binding. Fatal for the enclosing function.
    #[error("`{binding}` invokes `{name}` with {first} and with {second} arguments")]
    ConflictingArity {
        binding: String,
        name: String,
        first: usize,
        second: usize,
        span: Span,
    },

    /// No candidate type satisfies a required capability at a required position.
    #[error("{reason}")]
    UnsatisfiableContract {
        capability: Option<String>,
        reason: String,
        span: Span,
    },

    /// A capability resolved, but its result fails a downstream requirement.
    #[error("{reason} (via {path})", path = .chain.join(" -> "))]
    UnsatisfiableReturnContract {
        chain: Vec<String>,
        capability: String,
        reason: String,
        span: Span,
    },

    /// A capability is used on an intersection but missing from some members.
    #[error("`{capability}` is not provided by every member of `{intersection}` (missing on {names})", names = .missing.join(", "))]
    IntersectionMemberMismatch {
        capability: String,
        intersection: String,
        missing: Vec<String>,
        span: Span,
    },

    /// A dyn value is cast to a type that never flowed into it.
    #[error("cannot cast dyn value to `{target}`: it only ever held {held}", held = .retained.join(", "))]
    UncastableDyn {
        target: String,
        retained: Vec<String>,
        span: Span,
    },

    /// Mutually recursive contracts did not reach a fixpoint.
    #[error("return type of `{function}` did not converge after {iterations} iterations")]
    UnresolvedRecursiveContract {
        function: String,
        iterations: usize,
        span: Span,
    },

    /// More than one concrete type satisfies a contract with no tie-break.
    #[error("`{binding}` is satisfied equally by {names}", names = .candidates.join(", "))]
    AmbiguousOverloadResolution {
        binding: String,
        candidates: Vec<String>,
        span: Span,
    },
}

impl ContractError {
    pub fn span(&self) -> Span {
        match self {
            ContractError::ConflictingArity { span, .. }
            | ContractError::UnsatisfiableContract { span, .. }
            | ContractError::UnsatisfiableReturnContract { span, .. }
            | ContractError::IntersectionMemberMismatch { span, .. }
            | ContractError::UncastableDyn { span, .. }
            | ContractError::UnresolvedRecursiveContract { span, .. }
            | ContractError::AmbiguousOverloadResolution { span, .. } => *span,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            ContractError::ConflictingArity { .. } => DiagnosticKind::ConflictingArity,
            ContractError::UnsatisfiableContract { .. } => DiagnosticKind::UnsatisfiableContract,
            ContractError::UnsatisfiableReturnContract { .. } => {
                DiagnosticKind::UnsatisfiableReturnContract
            }
            ContractError::IntersectionMemberMismatch { .. } => {
                DiagnosticKind::IntersectionMemberMismatch
            }
            ContractError::UncastableDyn { .. } => DiagnosticKind::UncastableDyn,
            ContractError::UnresolvedRecursiveContract { .. } => {
                DiagnosticKind::UnresolvedRecursiveContract
            }
            ContractError::AmbiguousOverloadResolution { .. } => {
                DiagnosticKind::AmbiguousOverloadResolution
            }
        }
    }

    /// Capability chain of a return-link failure.
    pub fn chain(&self) -> Option<&[String]> {
        match self {
            ContractError::UnsatisfiableReturnContract { chain, .. } => Some(chain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DiagnosticKind {
    ConflictingArity,
    UnsatisfiableContract,
    UnsatisfiableReturnContract,
    IntersectionMemberMismatch,
    UncastableDyn,
    UnresolvedRecursiveContract,
    AmbiguousOverloadResolution,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A [`ContractError`] attributed to the function it was found in.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub function: Option<String>,
    pub node: Option<NodeId>,
    pub error: ContractError,
}

impl Diagnostic {
    pub fn new(severity: Severity, function: Option<String>, error: ContractError) -> Self {
        Self {
            severity,
            function,
            node: None,
            error,
        }
    }

    pub fn at(mut self, node: Option<NodeId>) -> Self {
        self.node = node;
        self
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.error.kind()
    }

    pub fn span(&self) -> Span {
        self.error.span()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Order diagnostics by location and drop duplicates reported by more than
/// one evaluation of the same function. A duplicate keeps the higher severity.
pub fn normalize(mut diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    diagnostics.sort_by(|a, b| {
        (a.span(), a.kind(), &a.function)
            .cmp(&(b.span(), b.kind(), &b.function))
            .then(b.severity.cmp(&a.severity))
    });
    diagnostics.dedup_by(|later, earlier| {
        later.span() == earlier.span()
            && later.kind() == earlier.kind()
            && later.function == earlier.function
    });
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsatisfiable(line: usize) -> ContractError {
        ContractError::UnsatisfiableContract {
            capability: Some("plus/2".to_string()),
            reason: "`bool` does not implement `plus/2`".to_string(),
            span: Span::new(line, 1),
        }
    }

    #[test]
    fn test_return_contract_message_includes_chain() {
        let err = ContractError::UnsatisfiableReturnContract {
            chain: vec!["giver".into(), "gift/1".into(), "iter/1".into()],
            capability: "iter/1".into(),
            reason: "`int` does not implement `iter/1`".into(),
            span: Span::new(3, 5),
        };
        assert_eq!(
            err.to_string(),
            "`int` does not implement `iter/1` (via giver -> gift/1 -> iter/1)"
        );
        assert_eq!(err.kind(), DiagnosticKind::UnsatisfiableReturnContract);
        assert_eq!(err.span(), Span::new(3, 5));
    }

    #[test]
    fn test_normalize_dedups_and_keeps_error() {
        let f = Some("main".to_string());
        let diagnostics = vec![
            Diagnostic::new(Severity::Warning, f.clone(), unsatisfiable(4)),
            Diagnostic::new(Severity::Error, f.clone(), unsatisfiable(2)),
            Diagnostic::new(Severity::Error, f.clone(), unsatisfiable(4)),
        ];
        let normalized = normalize(diagnostics);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].span().line, 2);
        assert_eq!(normalized[1].severity, Severity::Error);
    }

    #[test]
    fn test_same_site_in_different_functions_is_kept() {
        let diagnostics = vec![
            Diagnostic::new(Severity::Error, Some("a".into()), unsatisfiable(1)),
            Diagnostic::new(Severity::Error, Some("b".into()), unsatisfiable(1)),
        ];
        assert_eq!(normalize(diagnostics).len(), 2);
    }
}
