//! Parallel cone-complementarity contact solver core.
//!
//! Given rigid-body states and the contacts reported by an (external)
//! collision pipeline, this crate assembles the contact-constraint system
//! and computes the impulses that keep bodies from interpenetrating while
//! respecting Coulomb friction — optionally with rolling/spinning
//! resistance and cohesion — then recovers the corrected velocities for the
//! (external) integrator. The constrained problem is the cone
//! complementarity problem: minimize `½·γᵀNγ − γᵀr` with every contact's
//! impulse inside its friction cone, where `N = D·M⁻¹·Dᵀ + E` is applied
//! matrix-free.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        DataManager                            │
//! │  body arrays · contact arrays · sparse blocks · settings      │
//! └──────────────┬──────────────────────────────┬─────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │    constraint (builder)  │   │    solver (APGD/MinRes/PGS)  │
//! │  frames → D, E, b, r     │──▶│  N·x matvec + Project(γ)     │
//! │  cone projection         │   │  + local per-contact solve   │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! Per-step control flow: the caller loads bodies/contacts/bilaterals into
//! the store, then [`CcpSolver::run_step`] assembles the system, runs the
//! configured solver to convergence or its iteration cap, and writes the
//! corrected velocities back into the store.
//!
//! # Quick start
//!
//! ```
//! use ccp_solver::{BodyState, CcpSolver, ContactPoint, DataManager};
//! use nalgebra::Vector3;
//!
//! let mut data = DataManager::new();
//! data.set_bodies(&[BodyState::default(), BodyState::default()]);
//! data.set_contacts(&[ContactPoint {
//!     body_a: 0,
//!     body_b: 1,
//!     point_a: Vector3::zeros(),
//!     point_b: Vector3::zeros(),
//!     normal: Vector3::z(),
//!     depth: -0.01,
//!     effective_radius: 0.1,
//! }])?;
//!
//! let mut solver = CcpSolver::new();
//! let report = solver.run_step(&mut data, 0.01);
//! assert!(report.converged);
//! # Ok::<(), ccp_solver::SetupError>(())
//! ```
//!
//! Out of scope by design: collision detection, body integration and
//! sleeping, penalty-based contact, and any rendering or I/O.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,      // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::module_name_repetitions,   // SolverMode/SolverKind etc. read better qualified
    clippy::doc_markdown,              // Not all technical terms need backticks
    clippy::too_many_lines             // Solver loops naturally have many steps
)]

// Core type definitions and the shared state store.
pub mod types;

// Typed accessors over the segmented constraint vector.
pub mod layout;

// Pure math: sparse matvec, polynomial roots, small solves.
pub(crate) mod linalg;

// Constraint assembly and the friction-cone projection.
pub mod constraint;

// Iterative solvers, the matrix-free operator and the step driver.
pub mod solver;

pub use layout::BlockLayout;
pub use types::{
    BilateralRow, BodyState, ContactPoint, ConvergenceCriterion, DataManager, IterationStat,
    SetupError, SolveReport, SolverKind, SolverMode, SolverSettings, Timers,
};

pub use constraint::jacobian::orthogonalize;
pub use constraint::projection::{cone_generalized, cone_single, project, project_single};
pub use solver::{
    ApgdSolver, CcpSolver, ConeProjector, MinResSolver, Operator, PgsSolver, Projector,
    SchurOperator,
};
