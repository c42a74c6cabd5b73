//! Structured error types for the Velella engine.

use thiserror::Error;

/// Unified error type for all Velella operations.
#[derive(Debug, Error)]
pub enum VelellaError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed Newick string or alignment data)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values, mismatched models)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Numerical failure (probability mass off unity, degenerate distribution)
    #[error("numerical error: {0}")]
    Numerical(String),

    /// An iterative solver exhausted its iteration budget.
    ///
    /// Kept separate from [`VelellaError::Numerical`] so callers can tell a
    /// non-converging solve apart from a genuinely ill-conditioned one.
    #[error("no convergence: {0}")]
    NoConvergence(String),
}

/// Convenience alias used throughout the Velella workspace.
pub type Result<T> = std::result::Result<T, VelellaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = VelellaError::InvalidInput("negative branch length -0.5".into());
        assert_eq!(
            err.to_string(),
            "invalid input: negative branch length -0.5"
        );
    }

    #[test]
    fn no_convergence_is_distinguishable() {
        let err = VelellaError::NoConvergence("Newton iteration (30 steps)".into());
        assert!(matches!(err, VelellaError::NoConvergence(_)));
        assert!(!matches!(err, VelellaError::Numerical(_)));
    }
}
