//! Iterative solvers for the cone-constrained complementarity problem.
//!
//! Every global solver minimizes `½·γᵀNγ − γᵀr` over the cone-feasible set,
//! touching the system only through two interfaces: the matrix-free
//! [`Operator`] applying `N = D·M⁻¹·Dᵀ + E` and the [`Projector`] mapping an
//! iterate back onto the feasible set. That narrow seam is what lets the
//! solvers be exercised against synthetic operators in tests.
//!
//! `gamma` has a single writer per step: the dispatcher hands each solver a
//! private copy of the unknowns and writes the result back once, by call
//! sequencing rather than locking.

pub mod apgd;
pub mod local;
pub mod minres;
pub mod pgs;

use std::time::Instant;

use nalgebra::DVector;
use rayon::prelude::*;

use crate::constraint::{self, projection};
use crate::linalg::spmv;
use crate::types::{DataManager, SolveReport, SolverKind};

pub use apgd::ApgdSolver;
pub use minres::MinResSolver;
pub use pgs::PgsSolver;

/// Matrix-free symmetric positive semidefinite operator.
///
/// `apply` is internally parallel and fully completes before it returns, so
/// consecutive applications are naturally serialized — no solver iteration
/// starts before the previous product has been reduced.
pub trait Operator {
    /// Dimension of the (square) operator.
    fn dim(&self) -> usize;
    /// `y = N·x`.
    fn apply(&mut self, x: &DVector<f64>, y: &mut DVector<f64>);
}

/// Nonlinear projection onto the feasible set.
pub trait Projector {
    /// Project `gamma` in place.
    fn project(&self, gamma: &mut DVector<f64>);
}

/// The Schur-complement operator `N·x = D·(M⁻¹Dᵀ·x) + E∘x`, applied
/// block-by-block against the assembled sparse system. `N` is never
/// materialized.
pub struct SchurOperator<'a> {
    data: &'a DataManager,
    /// Body-DOF scratch for the `M⁻¹Dᵀ·x` half of the product, reused
    /// across applications.
    tmp: DVector<f64>,
}

impl<'a> SchurOperator<'a> {
    /// Borrow the assembled system from the store.
    #[must_use]
    pub fn new(data: &'a DataManager) -> Self {
        let tmp = DVector::zeros(data.num_bodies * 6);
        Self { data, tmp }
    }
}

impl Operator for SchurOperator<'_> {
    fn dim(&self) -> usize {
        self.data.num_constraints
    }

    fn apply(&mut self, x: &DVector<f64>, y: &mut DVector<f64>) {
        let data = self.data;
        let layout = data.layout;
        let xs = x.as_slice();

        // First half: accumulate M⁻¹Dᵀ·x into body-DOF space.
        self.tmp.fill(0.0);
        let tmp = self.tmp.as_mut_slice();
        spmv(&data.m_inv_d_n, &xs[layout.normal_range()], tmp, true);
        if layout.mode().has_tangential() {
            spmv(&data.m_inv_d_t, &xs[layout.tangential_range()], tmp, true);
        }
        if layout.mode().has_spinning() {
            spmv(&data.m_inv_d_s, &xs[layout.spinning_range()], tmp, true);
        }
        spmv(&data.m_inv_d_b, &xs[layout.bilateral_range()], tmp, true);

        // Second half: back through D, then the compliance diagonal.
        let ys = y.as_mut_slice();
        spmv(&data.d_n_t, tmp, &mut ys[layout.normal_range()], false);
        if layout.mode().has_tangential() {
            spmv(&data.d_t_t, tmp, &mut ys[layout.tangential_range()], false);
        }
        if layout.mode().has_spinning() {
            spmv(&data.d_s_t, tmp, &mut ys[layout.spinning_range()], false);
        }
        spmv(&data.d_b_t, tmp, &mut ys[layout.bilateral_range()], false);

        let e = data.e.as_slice();
        ys.par_iter_mut().enumerate().for_each(|(i, yi)| {
            *yi += e[i] * xs[i];
        });
    }
}

/// The friction-cone projection backed by the store's per-contact material
/// arrays.
pub struct ConeProjector<'a> {
    data: &'a DataManager,
}

impl<'a> ConeProjector<'a> {
    /// Borrow the contact materials from the store.
    #[must_use]
    pub fn new(data: &'a DataManager) -> Self {
        Self { data }
    }
}

impl Projector for ConeProjector<'_> {
    fn project(&self, gamma: &mut DVector<f64>) {
        projection::project(self.data, gamma);
    }
}

/// Objective value `γᵀ(½·Nγ − r)` given a precomputed product `n_gamma = N·γ`.
pub(crate) fn objective_from_product(
    gamma: &DVector<f64>,
    n_gamma: &DVector<f64>,
    r: &DVector<f64>,
) -> f64 {
    let mut obj = 0.0;
    for i in 0..gamma.len() {
        obj += gamma[i] * (0.5 * n_gamma[i] - r[i]);
    }
    obj
}

/// The step driver: owns the solver instances (and their working vectors,
/// which persist across steps as pure working-set allocations) and runs the
/// assemble → solve → recover sequence on a [`DataManager`].
#[derive(Default)]
pub struct CcpSolver {
    apgd: ApgdSolver,
    minres: MinResSolver,
    pgs: PgsSolver,
}

impl CcpSolver {
    /// Create a driver with empty working sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one full constraint step: recompute the counters, assemble the
    /// sparse system, run the configured solver to convergence or its
    /// iteration cap, and recover the corrected velocities.
    ///
    /// Non-convergence is reported, not raised: the best candidate found is
    /// kept and the report carries the achieved residual.
    pub fn run_step(&mut self, data: &mut DataManager, h: f64) -> SolveReport {
        let setup_start = Instant::now();
        data.configure_step(h);
        constraint::assemble(data);
        data.timers.setup = setup_start.elapsed();

        // Mode/layout consistency is a precondition, never recovered from
        // mid-solve.
        assert_eq!(
            data.gamma.len(),
            data.num_constraints,
            "constraint vector length disagrees with the recomputed counters"
        );
        assert_eq!(
            data.d_n_t.nrows(),
            data.num_contacts,
            "normal Jacobian block does not match the contact count"
        );

        let solve_start = Instant::now();
        let report = if data.num_constraints == 0 {
            SolveReport {
                converged: true,
                ..SolveReport::default()
            }
        } else {
            let settings = data.settings;
            let b = data.r.clone();
            let mut x = data.gamma.clone();

            let report = match settings.solver {
                SolverKind::Apgd => {
                    let mut op = SchurOperator::new(data);
                    let projector = ConeProjector::new(data);
                    self.apgd
                        .solve(&mut op, &projector, &b, &mut x, &settings, data.layout)
                }
                SolverKind::MinRes => {
                    let mut op = SchurOperator::new(data);
                    let projector = ConeProjector::new(data);
                    self.minres.solve(&mut op, &projector, &b, &mut x, &settings)
                }
                SolverKind::Pgs => self.pgs.solve(data, &b, &mut x, &settings),
            };
            data.gamma.copy_from(&x);
            report
        };
        data.timers.solve = solve_start.elapsed();

        constraint::recover_velocities(data);
        constraint::build_sliding_speed(data);
        if data.settings.warm_start {
            data.store_warm_start();
        }

        if !report.converged && data.num_constraints > 0 {
            tracing::debug!(
                iterations = report.iterations,
                residual = report.residual,
                "constraint solve stopped at the iteration cap"
            );
        }

        data.report = report.clone();
        report
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! Synthetic operator/projector pair for exercising the global solvers
    //! independently of the assembled contact system.

    use super::{Operator, Projector};
    use nalgebra::DVector;

    /// `N = diag(d)`: the constrained minimum of the test problem is
    /// componentwise `max(r/d, 0)` under [`ClampProjector`].
    pub struct DiagonalOperator {
        diag: Vec<f64>,
    }

    impl DiagonalOperator {
        pub fn new(diag: Vec<f64>) -> Self {
            Self { diag }
        }
    }

    impl Operator for DiagonalOperator {
        fn dim(&self) -> usize {
            self.diag.len()
        }

        fn apply(&mut self, x: &DVector<f64>, y: &mut DVector<f64>) {
            for i in 0..self.diag.len() {
                y[i] = self.diag[i] * x[i];
            }
        }
    }

    /// Feasible set = the non-negative orthant.
    pub struct ClampProjector;

    impl Projector for ClampProjector {
        fn project(&self, gamma: &mut DVector<f64>) {
            for g in gamma.iter_mut() {
                *g = g.max(0.0);
            }
        }
    }
}
