//! Projected Gauss-Seidel — the unaccelerated baseline.
//!
//! A sequential-in-math sweep over the constraint blocks: each contact's
//! rows get a diagonal-scaled update against the *current* impulses, the
//! block is projected, and the body-velocity accumulator `u = M⁻¹Dᵀγ` is
//! patched incrementally so the next block sees the update. Cost is
//! O(sweeps × nnz) with no acceleration; it exists as a robust fallback,
//! and unlike the gradient solvers it works on the assembled blocks
//! directly (the incremental sweep needs row-level access that the
//! matrix-free operator interface does not expose).

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;

use crate::constraint::projection;
use crate::types::{DataManager, IterationStat, SolveReport, SolverSettings};

/// Working vectors for the Gauss-Seidel sweep, reused across steps.
#[derive(Default)]
pub struct PgsSolver {
    /// Body-velocity accumulator `u = M⁻¹Dᵀγ`.
    u: DVector<f64>,
    /// Per-row diagonal of `N` (including compliance).
    diag: DVector<f64>,
}

/// Dot of one block row against a body-DOF vector.
fn row_dot(m: &CsrMatrix<f64>, row: usize, v: &DVector<f64>) -> f64 {
    let offsets = m.row_offsets();
    let cols = m.col_indices();
    let vals = m.values();
    let mut sum = 0.0;
    for k in offsets[row]..offsets[row + 1] {
        sum += vals[k] * v[cols[k]];
    }
    sum
}

/// Diagonal entry of `N` for one block row: `Σ val²·M⁻¹[dof]`.
fn row_diag(m: &CsrMatrix<f64>, row: usize, minv: &DVector<f64>) -> f64 {
    let offsets = m.row_offsets();
    let cols = m.col_indices();
    let vals = m.values();
    let mut sum = 0.0;
    for k in offsets[row]..offsets[row + 1] {
        sum += vals[k] * vals[k] * minv[cols[k]];
    }
    sum
}

/// Resolve a global constraint row to its Jacobian block and block-local
/// row index.
fn block_row(data: &DataManager, row: usize) -> (&CsrMatrix<f64>, usize) {
    let layout = data.layout;
    if layout.normal_range().contains(&row) {
        (&data.d_n_t, row)
    } else if layout.tangential_range().contains(&row) {
        (&data.d_t_t, row - layout.tangential_range().start)
    } else if layout.spinning_range().contains(&row) {
        (&data.d_s_t, row - layout.spinning_range().start)
    } else {
        (&data.d_b_t, row - layout.bilateral_range().start)
    }
}

/// Patch the accumulator for an impulse change on one row:
/// `u += M⁻¹·D_rowᵀ·Δγ`.
fn scatter_row(m: &CsrMatrix<f64>, row: usize, delta: f64, minv: &DVector<f64>, u: &mut DVector<f64>) {
    if delta == 0.0 {
        return;
    }
    let offsets = m.row_offsets();
    let cols = m.col_indices();
    let vals = m.values();
    for k in offsets[row]..offsets[row + 1] {
        u[cols[k]] += minv[cols[k]] * vals[k] * delta;
    }
}

impl PgsSolver {
    /// Run the projected Gauss-Seidel sweep on the assembled system.
    /// Convergence is the ∞-norm of the per-sweep impulse change.
    pub fn solve(
        &mut self,
        data: &DataManager,
        r: &DVector<f64>,
        x: &mut DVector<f64>,
        settings: &SolverSettings,
    ) -> SolveReport {
        let layout = data.layout;
        let num_rows = data.num_constraints;
        let nb6 = data.num_bodies * 6;
        if self.u.len() != nb6 {
            self.u = DVector::zeros(nb6);
        }
        if self.diag.len() != num_rows {
            self.diag = DVector::zeros(num_rows);
        }
        let mut history = Vec::with_capacity(settings.max_iterations);

        // Diagonal of N, in parallel; zero diagonals (both bodies fixed)
        // freeze their row instead of dividing by zero.
        let e = &data.e;
        let minv = &data.minv_diag;
        self.diag
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, d)| {
                let (m, local) = block_row(data, row);
                *d = row_diag(m, local, minv) + e[row];
            });

        // Start feasible, then build u = M⁻¹Dᵀγ for the starting impulses.
        projection::project(data, x);
        self.u.fill(0.0);
        for row in 0..num_rows {
            let (m, local) = block_row(data, row);
            scatter_row(m, local, x[row], minv, &mut self.u);
        }

        let upc = layout.mode().unknowns_per_contact();
        let mut rows_of_contact = Vec::with_capacity(upc);

        let mut residual = f64::INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        for _sweep in 0..settings.max_iterations {
            iterations += 1;
            let mut max_delta = 0.0_f64;

            for i in 0..data.num_contacts {
                rows_of_contact.clear();
                rows_of_contact.push(layout.normal(i));
                if layout.mode().has_tangential() {
                    rows_of_contact.push(layout.tangential(i, 0));
                    rows_of_contact.push(layout.tangential(i, 1));
                }
                if layout.mode().has_spinning() {
                    for k in 0..3 {
                        rows_of_contact.push(layout.spinning(i, k));
                    }
                }

                // Diagonal-scaled update of the whole block, then project.
                let mut old = [0.0_f64; 6];
                for (slot, &row) in rows_of_contact.iter().enumerate() {
                    old[slot] = x[row];
                    if self.diag[row] <= 0.0 {
                        continue;
                    }
                    let (m, local) = block_row(data, row);
                    let q = row_dot(m, local, &self.u) + e[row] * x[row] - r[row];
                    x[row] -= q / self.diag[row];
                }
                projection::project_single(data, i, x);

                for (slot, &row) in rows_of_contact.iter().enumerate() {
                    let delta = x[row] - old[slot];
                    max_delta = max_delta.max(delta.abs());
                    let (m, local) = block_row(data, row);
                    scatter_row(m, local, delta, minv, &mut self.u);
                }
            }

            // Bilateral rows: plain Gauss-Seidel, no projection.
            for row in layout.bilateral_range() {
                if self.diag[row] <= 0.0 {
                    continue;
                }
                let (m, local) = block_row(data, row);
                let q = row_dot(m, local, &self.u) - r[row];
                let delta = -q / self.diag[row];
                x[row] += delta;
                max_delta = max_delta.max(delta.abs());
                scatter_row(m, local, delta, minv, &mut self.u);
            }

            // Objective from the maintained accumulator:
            // (N·γ)_row = D_row·u + E∘γ.
            let mut obj = 0.0;
            for row in 0..num_rows {
                let (m, local) = block_row(data, row);
                let n_gamma = row_dot(m, local, &self.u) + e[row] * x[row];
                obj += x[row] * (0.5 * n_gamma - r[row]);
            }

            residual = max_delta;
            history.push(IterationStat {
                residual,
                objective: obj,
            });
            if max_delta < settings.tolerance {
                converged = true;
                break;
            }
        }

        let objective = history.last().map_or(0.0, |stat| stat.objective);
        SolveReport {
            iterations,
            residual,
            objective,
            converged,
            history,
        }
    }
}
