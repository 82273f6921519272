//! Enums and error types shared across the solver pipeline.
//!
//! This module defines the type-level vocabulary every pipeline stage reads:
//! the active constraint formulation ([`SolverMode`]), the iterative solver
//! selection ([`SolverKind`]), the convergence test ([`ConvergenceCriterion`]),
//! and the ingestion error type ([`SetupError`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Constraint formulation for the current step.
///
/// The mode fixes the row count of every Jacobian block and the length of the
/// unknown vector, so all components must read the *same* value from
/// [`SolverSettings`](crate::SolverSettings) for a given step. It is never
/// re-derived locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverMode {
    /// Normal impulses only (1 unknown per contact). Friction blocks are not
    /// allocated.
    Normal,
    /// Normal + two tangential impulses projected onto the Coulomb cone
    /// (3 unknowns per contact).
    #[default]
    Sliding,
    /// Sliding plus torsional (spin) and rolling resistance
    /// (6 unknowns per contact).
    Spinning,
}

impl SolverMode {
    /// Number of constraint rows each contact contributes in this mode.
    #[must_use]
    pub const fn unknowns_per_contact(self) -> usize {
        match self {
            Self::Normal => 1,
            Self::Sliding => 3,
            Self::Spinning => 6,
        }
    }

    /// Whether the tangential (sliding friction) block is allocated.
    #[must_use]
    pub const fn has_tangential(self) -> bool {
        matches!(self, Self::Sliding | Self::Spinning)
    }

    /// Whether the spin/rolling block is allocated.
    #[must_use]
    pub const fn has_spinning(self) -> bool {
        matches!(self, Self::Spinning)
    }
}

/// Which global iterative solver runs the cone-complementarity solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverKind {
    /// Accelerated projected gradient (Nesterov momentum with adaptive
    /// Lipschitz estimation). The primary solver.
    #[default]
    Apgd,
    /// Projected minimal-residual iteration with a nonlinear gradient-mapping
    /// correction.
    MinRes,
    /// Projected Gauss-Seidel sweep. Simple fallback, no acceleration.
    Pgs,
}

/// Convergence test used by the iterative solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConvergenceCriterion {
    /// Fixed-point residual `‖x − Project(x − ε·g)‖/ε` (projected gradient
    /// norm) below tolerance.
    #[default]
    Residual,
    /// Change of the best-candidate objective value between accepted
    /// iterates below tolerance.
    ObjectiveDelta,
}

/// Per-iteration diagnostics recorded by the iterative solvers.
///
/// Retained across steps only as history; nothing in the solve reads it back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStat {
    /// Best residual seen so far (monotone non-increasing for APGD).
    pub residual: f64,
    /// Objective value `γᵀ(½Nγ − r)` of the current candidate.
    pub objective: f64,
}

/// Errors raised at the ingestion boundary.
///
/// Malformed input is rejected before it can reach the solve; numerical
/// degeneracy *inside* the solve is handled by substitution and never
/// surfaces as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    /// A contact references a body index outside the body arrays.
    #[error("contact {contact} references body {body}, but only {num_bodies} bodies are loaded")]
    BodyIndexOutOfRange {
        /// Offending contact index.
        contact: usize,
        /// Out-of-range body index.
        body: usize,
        /// Number of bodies currently loaded.
        num_bodies: usize,
    },
    /// A contact pairs a body with itself.
    #[error("contact {contact} pairs body {body} with itself")]
    SelfContact {
        /// Offending contact index.
        contact: usize,
        /// The repeated body index.
        body: usize,
    },
    /// A contact normal is non-finite or too far from unit length.
    #[error("contact {contact} has a non-unit or non-finite normal")]
    InvalidNormal {
        /// Offending contact index.
        contact: usize,
    },
    /// A contact depth is NaN or infinite.
    #[error("contact {contact} has a non-finite depth")]
    NonFiniteDepth {
        /// Offending contact index.
        contact: usize,
    },
    /// A bilateral row references a body index outside the body arrays.
    #[error(
        "bilateral row {row} references body {body}, but only {num_bodies} bodies are loaded"
    )]
    BilateralBodyOutOfRange {
        /// Offending bilateral row index.
        row: usize,
        /// Out-of-range body index.
        body: usize,
        /// Number of bodies currently loaded.
        num_bodies: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknowns_per_contact() {
        assert_eq!(SolverMode::Normal.unknowns_per_contact(), 1);
        assert_eq!(SolverMode::Sliding.unknowns_per_contact(), 3);
        assert_eq!(SolverMode::Spinning.unknowns_per_contact(), 6);
    }

    #[test]
    fn test_block_availability() {
        assert!(!SolverMode::Normal.has_tangential());
        assert!(SolverMode::Sliding.has_tangential());
        assert!(!SolverMode::Sliding.has_spinning());
        assert!(SolverMode::Spinning.has_tangential());
        assert!(SolverMode::Spinning.has_spinning());
    }
}
