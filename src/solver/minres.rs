//! Projected minimal-residual iteration.
//!
//! A preconditioner-free MinRes-flavored descent over the same operator as
//! the other solvers, with the cone projection applied as a nonlinear
//! gradient-mapping step (finite-difference directional correction) rather
//! than a true Krylov projection — it approximates a projected Krylov
//! method instead of implementing one exactly. The reported residual is the
//! norm of the projected gradient mapping.

use nalgebra::DVector;

use crate::solver::{objective_from_product, Operator, Projector};
use crate::types::{IterationStat, SolveReport, SolverSettings};

/// Finite-difference step of the gradient-mapping residual.
const GRAD_DIFFSTEP: f64 = 0.01;

/// Breakdown threshold for the Rayleigh-quotient and conjugate-direction
/// denominators.
const BREAKDOWN_EPS: f64 = 1e-30;

/// Working vectors for the projected MinRes solve, reused across steps.
#[derive(Default)]
pub struct MinResSolver {
    ml: DVector<f64>,
    mr: DVector<f64>,
    mp: DVector<f64>,
    mz: DVector<f64>,
    mz_old: DVector<f64>,
    mn_mr: DVector<f64>,
    mn_mr_old: DVector<f64>,
    mn_p: DVector<f64>,
    mtmp: DVector<f64>,
}

impl MinResSolver {
    fn resize(&mut self, n: usize) {
        for v in [
            &mut self.ml,
            &mut self.mr,
            &mut self.mp,
            &mut self.mz,
            &mut self.mz_old,
            &mut self.mn_mr,
            &mut self.mn_mr_old,
            &mut self.mn_p,
            &mut self.mtmp,
        ] {
            if v.len() != n {
                *v = DVector::zeros(n);
            }
        }
    }

    /// Gradient mapping at `ml`: `mr ← (Project(ml + ε·(r − N·ml)) − ml)/ε`.
    /// `mtmp` must hold `N·ml` on entry.
    fn gradient_mapping<P: Projector>(&mut self, project: &P, r: &DVector<f64>) {
        self.mr.copy_from(r);
        self.mr -= &self.mtmp;
        self.mr *= GRAD_DIFFSTEP;
        self.mr += &self.ml;
        project.project(&mut self.mr);
        self.mr -= &self.ml;
        self.mr /= GRAD_DIFFSTEP;
    }

    /// Minimize `½·γᵀNγ − γᵀr` over the feasible set, starting from `x`.
    pub fn solve<O: Operator, P: Projector>(
        &mut self,
        op: &mut O,
        project: &P,
        r: &DVector<f64>,
        x: &mut DVector<f64>,
        settings: &SolverSettings,
    ) -> SolveReport {
        let n = op.dim();
        debug_assert_eq!(x.len(), n);
        self.resize(n);
        let mut history = Vec::with_capacity(settings.max_iterations);

        let rel_tol_b = r.amax() * settings.tolerance;
        let abs_tol = settings.tolerance;
        let threshold = rel_tol_b.max(abs_tol);

        self.ml.copy_from(x);

        // Initial projected gradient mapping and search direction.
        op.apply(&self.ml, &mut self.mtmp);
        self.gradient_mapping(project, r);
        self.mp.copy_from(&self.mr);
        self.mz.copy_from(&self.mr);
        op.apply(&self.mz, &mut self.mn_mr);
        op.apply(&self.mp, &mut self.mn_p);

        let mut residual = f64::INFINITY;
        let mut objective = 0.0;
        let mut converged = false;
        let mut iterations = 0;

        for _iter in 0..settings.max_iterations {
            iterations += 1;

            // Rayleigh-quotient step length α = ⟨z, N·z⟩ / ⟨N·p, N·p⟩.
            let z_nz = self.mz.dot(&self.mn_mr);
            let mut np_np = self.mn_p.dot(&self.mn_p);
            if np_np.abs() < BREAKDOWN_EPS {
                tracing::debug!(numerator = z_nz, "Rayleigh quotient alpha breakdown");
                np_np = 1e-12;
            }
            let alpha = z_nz / np_np;

            self.ml.axpy(alpha, &self.mp, 1.0);
            project.project(&mut self.ml);

            // Projected gradient mapping at the new iterate.
            op.apply(&self.ml, &mut self.mtmp);
            objective = objective_from_product(&self.ml, &self.mtmp, r);
            self.gradient_mapping(project, r);

            residual = self.mr.norm();
            history.push(IterationStat {
                residual,
                objective,
            });
            if residual < threshold {
                converged = true;
                break;
            }

            // Polak-Ribière conjugate-direction update,
            // β = ⟨z, N·z − N·z_old⟩ / ⟨z_old, N·z_old⟩, with a restart
            // (β = 0) when either quantity degenerates.
            self.mz_old.copy_from(&self.mz);
            self.mz.copy_from(&self.mr);
            self.mn_mr_old.copy_from(&self.mn_mr);
            op.apply(&self.mz, &mut self.mn_mr);

            self.mtmp.copy_from(&self.mn_mr);
            self.mtmp -= &self.mn_mr_old;
            let numerator = self.mz.dot(&self.mtmp);
            let denominator = self.mz_old.dot(&self.mn_mr_old);
            let beta = if denominator.abs() < BREAKDOWN_EPS || numerator.abs() < BREAKDOWN_EPS {
                tracing::debug!(numerator, denominator, "conjugate direction restart");
                0.0
            } else {
                numerator / denominator
            };

            // p ← z + β·p, and track N·p incrementally.
            self.mtmp.copy_from(&self.mp);
            self.mtmp *= beta;
            self.mp.copy_from(&self.mz);
            self.mp += &self.mtmp;
            self.mn_p *= beta;
            self.mn_p += &self.mn_mr;
        }

        x.copy_from(&self.ml);
        SolveReport {
            iterations,
            residual,
            objective,
            converged,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::tests_support::{ClampProjector, DiagonalOperator};
    use approx::assert_relative_eq;

    #[test]
    fn test_minres_solves_diagonal_clamped_system() {
        let mut op = DiagonalOperator::new(vec![2.0, 1.0, 4.0]);
        let projector = ClampProjector;
        let r = DVector::from_vec(vec![2.0, -3.0, 8.0]);
        let mut x = DVector::zeros(3);

        let settings = SolverSettings {
            tolerance: 1e-8,
            max_iterations: 300,
            ..SolverSettings::default()
        };
        let mut solver = MinResSolver::default();
        let report = solver.solve(&mut op, &projector, &r, &mut x, &settings);

        assert!(report.converged);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(x[2], 2.0, epsilon = 1e-6);
    }
}
