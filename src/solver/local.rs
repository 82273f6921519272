//! Local exact solver: per-contact 3-DOF friction subproblems.
//!
//! Builds each contact's dense 3×3 Delassus operator (the restriction of
//! `N` to that contact's normal + two tangential rows) and solves the local
//! cone-constrained problem in isolation from all other contacts — either
//! by a short projected relaxation sweep, or by the closed-form quartic
//! arising from the KKT stationarity conditions when the solution lies on
//! the cone surface. Diagnostic/experimental relative to the global
//! solvers; the primary pipeline does not depend on it.

use rayon::prelude::*;

use crate::constraint::projection::project_sliding_block;
use crate::linalg::{polynomial_real_roots, solve_2x2, MIN_VAL};
use crate::types::DataManager;

/// Squared-update threshold that stops the local relaxation early.
const RELAX_EPS: f64 = 1e-6;

/// Gather one contact's 3×3 Delassus operator and local right-hand side.
///
/// The three rows (normal, two tangentials) share the same 12-column
/// support — the two touching bodies' DOF blocks — so the operator reduces
/// to inverse-mass-weighted dot products of the stored row values.
fn local_system(data: &DataManager, i: usize) -> ([[f64; 3]; 3], [f64; 3]) {
    let layout = data.layout;

    let gather = |m: &nalgebra_sparse::CsrMatrix<f64>, row: usize| -> (Vec<usize>, Vec<f64>) {
        let offsets = m.row_offsets();
        let range = offsets[row]..offsets[row + 1];
        (
            m.col_indices()[range.clone()].to_vec(),
            m.values()[range].to_vec(),
        )
    };

    let (cols, vn) = gather(&data.d_n_t, i);
    let (_, vt0) = gather(&data.d_t_t, i * 2);
    let (_, vt1) = gather(&data.d_t_t, i * 2 + 1);
    let rows = [&vn, &vt0, &vt1];

    let mut n = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in r..3 {
            let mut sum = 0.0;
            for (k, &col) in cols.iter().enumerate() {
                sum += rows[r][k] * data.minv_diag[col] * rows[c][k];
            }
            n[r][c] = sum;
            n[c][r] = sum;
        }
    }
    // Compliance sits on the diagonal of N.
    n[0][0] += data.e[layout.normal(i)];
    n[1][1] += data.e[layout.tangential(i, 0)];
    n[2][2] += data.e[layout.tangential(i, 1)];

    let rb = [
        data.r[layout.normal(i)],
        data.r[layout.tangential(i, 0)],
        data.r[layout.tangential(i, 1)],
    ];
    (n, rb)
}

/// Fixed-sweep projected relaxation of one local system.
///
/// Jacobi-scaled Gauss-Seidel with `D⁻¹ = 3/tr(N)`, projecting onto the
/// offset cone after every sweep, stopping early when the squared update
/// falls below 1e-6.
fn relax_local(
    n: &[[f64; 3]; 3],
    rb: &[f64; 3],
    mu: f64,
    coh: f64,
    sweeps: usize,
) -> [f64; 3] {
    let trace = n[0][0] + n[1][1] + n[2][2];
    if trace.abs() < MIN_VAL {
        return [0.0; 3];
    }
    let dinv = 3.0 / trace;
    let omega = 1.0;

    let mut ml = [0.0_f64; 3];
    let mut ml_old = [0.0_f64; 3];
    let mut ml_prev = [0.0_f64; 3];

    for _ in 0..sweeps {
        for row in 0..3 {
            let dot = n[row][0] * ml_old[0] + n[row][1] * ml_old[1] + n[row][2] * ml_old[2];
            ml[row] -= omega * dinv * (dot - rb[row]);
            ml_old[row] = ml[row];
        }

        let mut tang = [ml[1], ml[2]];
        project_sliding_block(&mut ml[0], &mut tang, mu, coh);
        ml[1] = tang[0];
        ml[2] = tang[1];

        let resid = [ml[0] - ml_prev[0], ml[1] - ml_prev[1], ml[2] - ml_prev[2]];
        if resid[0] * resid[0] + resid[1] * resid[1] + resid[2] * resid[2] < RELAX_EPS {
            break;
        }
        ml_prev = ml;
    }
    ml
}

/// Run the projected relaxation on every contact's 3-DOF subproblem and
/// write the results into `gamma`. Contacts are independent, so the loop is
/// flat-parallel. No-op outside the friction modes (the subproblem is the
/// normal + two tangentials).
pub fn relax_contacts(data: &mut DataManager) {
    if data.num_contacts == 0 || !data.layout.mode().has_tangential() {
        return;
    }
    let sweeps = data.settings.local_solver_sweeps;

    let solutions: Vec<[f64; 3]> = (0..data.num_contacts)
        .into_par_iter()
        .map(|i| {
            let (n, rb) = local_system(data, i);
            relax_local(
                &n,
                &rb,
                data.contact_friction[i].x,
                data.contact_cohesion[i],
                sweeps,
            )
        })
        .collect();

    let layout = data.layout;
    for (i, ml) in solutions.iter().enumerate() {
        data.gamma[layout.normal(i)] = ml[0];
        data.gamma[layout.tangential(i, 0)] = ml[1];
        data.gamma[layout.tangential(i, 1)] = ml[2];
    }
}

/// Closed-form solve of the cone-surface (boundary) case for one local
/// system: condenses the KKT stationarity conditions into a quartic in the
/// cone multiplier ν, takes the smallest positive real root, back-solves a
/// 2×2 system for the tangential impulses and recovers the normal from the
/// surface condition `γₙ = ‖γₜ‖/μ`.
///
/// Returns `None` when the system is degenerate (vanishing leading pivot,
/// zero friction, singular 2×2 back-solve) or no positive real root exists;
/// callers fall back to a zero impulse.
#[allow(clippy::many_single_char_names, clippy::similar_names)]
fn boundary_from_local(n: &[[f64; 3]; 3], rb: &[f64; 3], mu: f64) -> Option<[f64; 3]> {
    if mu < MIN_VAL {
        return None;
    }
    let w0 = n[0][0];
    if w0.abs() < MIN_VAL {
        return None;
    }
    let inv_w0 = 1.0 / w0;
    let a = n[0][1];
    let b = n[0][2];

    let q = rb[0];
    let q1 = a * q * inv_w0 - rb[1];
    let q2 = b * q * inv_w0 - rb[2];

    // Schur-condensed tangential subsystem.
    let l1 = n[1][1] - a * a * inv_w0;
    let l2 = n[2][2] - b * b * inv_w0;
    let l12 = n[1][2] - a * b * inv_w0;

    let mu2 = mu * mu;
    let (w0_sq, q_sq, q1_sq, q2_sq) = (w0 * w0, q * q, q1 * q1, q2 * q2);
    let (a_sq, b_sq, l1_sq, l2_sq) = (a * a, b * b, l1 * l1, l2 * l2);
    let l12_2 = l12 * l12;
    let l12_3 = l12_2 * l12;
    let l12_4 = l12_2 * l12_2;

    // Quartic in ν, leading coefficient first.
    let cg = [
        -mu2 * q_sq,
        -2.0 * mu2 * q * a * q1 - 2.0 * mu2 * q * b * q2 - (2.0 * l1 + 2.0 * l2) * mu2 * q_sq,
        2.0 * mu2 * q * b * q1 * l12
            + w0_sq * q2_sq
            + 2.0 * mu2 * q_sq * l12_2
            - 2.0 * mu2 * b * a * q1 * q2
            + 2.0 * mu2 * q * a * q2 * l12
            - (l1_sq + 4.0 * l1 * l2 + l2_sq) * mu2 * q_sq
            + w0_sq * q1_sq
            - b_sq * mu2 * q2_sq
            - 2.0 * (l1 + 2.0 * l2) * a * mu2 * q * q1
            - mu2 * a_sq * q1_sq
            - 2.0 * (2.0 * l1 + l2) * b * mu2 * q * q2,
        2.0 * b * mu2 * q * q2 * l12_2
            + 2.0 * (l1 + l2) * mu2 * q_sq * l12_2
            - 4.0 * w0_sq * q1 * q2 * l12
            - 2.0 * (l1_sq + 2.0 * l1 * l2) * b * mu2 * q * q2
            + 2.0 * (l1 + l2) * a * mu2 * q * q2 * l12
            - (2.0 * l1_sq * l2 + 2.0 * l1 * l2_sq) * mu2 * q_sq
            + 2.0 * (l1 + l2) * b * mu2 * q * q1 * l12
            + 2.0 * a * b * mu2 * q2_sq * l12
            + 2.0 * l1 * w0_sq * q2_sq
            + 2.0 * b_sq * mu2 * q1 * q2 * l12
            - 2.0 * l2 * a_sq * mu2 * q1_sq
            - 2.0 * (l1 + l2) * a * b * mu2 * q1 * q2
            - 2.0 * (2.0 * l1 * l2 + l2_sq) * a * mu2 * q * q1
            + 2.0 * mu2 * a_sq * q1 * q2 * l12
            + 2.0 * mu2 * b * a * q1_sq * l12
            + 2.0 * mu2 * q * a * q1 * l12_2
            + 2.0 * l2 * w0_sq * q1_sq
            - 2.0 * l1 * b_sq * mu2 * q2_sq,
        -b_sq * mu2 * q1_sq * l12_2
            - a_sq * mu2 * q2_sq * l12_2
            - l1_sq * b_sq * mu2 * q2_sq
            - l1_sq * l2_sq * mu2 * q_sq
            - l2_sq * a_sq * mu2 * q1_sq
            + l2_sq * w0_sq * q1_sq
            + l1_sq * w0_sq * q2_sq
            + w0_sq * q1_sq * l12_2
            - 2.0 * b * mu2 * q * q1 * l12_3
            - 2.0 * a * mu2 * q * q2 * l12_3
            + 2.0 * l1 * l2 * b * mu2 * q * q1 * l12
            + 2.0 * l1 * l2 * a * mu2 * q * q2 * l12
            - 2.0 * l1 * l2 * a * b * mu2 * q1 * q2
            - 2.0 * a * b * mu2 * q1 * q2 * l12_2
            + 2.0 * l2 * a * b * mu2 * q1_sq * l12
            + 2.0 * l2 * a_sq * mu2 * q1 * q2 * l12
            + 2.0 * l1 * b * mu2 * q * q2 * l12_2
            + 2.0 * l1 * b_sq * mu2 * q1 * q2 * l12
            + 2.0 * l1 * a * b * mu2 * q2_sq * l12
            - 2.0 * l1 * l2_sq * a * mu2 * q * q1
            - 2.0 * l1_sq * l2 * b * mu2 * q * q2
            + 2.0 * l2 * a * mu2 * q * q1 * l12_2
            - mu2 * q_sq * l12_4
            + w0_sq * q2_sq * l12_2
            - 2.0 * l2 * w0_sq * q1 * q2 * l12
            - 2.0 * l1 * w0_sq * q1 * q2 * l12
            + 2.0 * l1 * l2 * mu2 * q_sq * l12_2,
    ];

    // Smallest positive real root governs the cone radius.
    let nu = polynomial_real_roots(cg)
        .into_iter()
        .filter(|root| *root > 0.0)
        .fold(None::<f64>, |acc, root| {
            Some(acc.map_or(root, |best| best.min(root)))
        })?;

    let (g1, g2) = solve_2x2(l1 + nu, l12, l12, l2 + nu, -q1, -q2)?;
    let g0 = (g1 * g1 + g2 * g2).sqrt() / mu;
    Some([g0, g1, g2])
}

/// Solve the boundary (cone-surface) case for contact `index` against the
/// assembled system. `None` means degenerate or no positive root; the
/// caller decides whether to keep the previous impulse or zero it.
#[must_use]
pub fn solve_boundary(data: &DataManager, index: usize) -> Option<[f64; 3]> {
    if !data.layout.mode().has_tangential() {
        return None;
    }
    let (n, rb) = local_system(data, index);
    let result = boundary_from_local(&n, &rb, data.contact_friction[index].x);
    if result.is_none() {
        tracing::debug!(contact = index, "local boundary solve degenerate");
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_relax_local_frictionless_matches_direct_solve() {
        // Diagonal system, no friction: normal impulse converges to
        // max(r/n00, 0), tangentials are forced to zero.
        let n = [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]];
        let rb = [1.0, 0.4, -0.2];
        let ml = relax_local(&n, &rb, 0.0, 0.0, 50);
        assert_relative_eq!(ml[0], 0.5, epsilon = 1e-3);
        assert_eq!(ml[1], 0.0);
        assert_eq!(ml[2], 0.0);
    }

    #[test]
    fn test_relax_local_result_is_cone_feasible() {
        let n = [[2.0, 0.1, 0.0], [0.1, 2.0, 0.0], [0.0, 0.0, 2.0]];
        let rb = [1.0, 5.0, -3.0];
        let mu = 0.3;
        let ml = relax_local(&n, &rb, mu, 0.0, 50);
        let t = (ml[1] * ml[1] + ml[2] * ml[2]).sqrt();
        assert!(t <= mu * ml[0] + 1e-9);
    }

    #[test]
    fn test_boundary_identity_system() {
        // N = I, r = (1, 2, 0), μ = 0.5: the condensed quartic is
        // −¼ν⁴ − ν³ + 5/2·ν² + 7ν + 15/4 with real roots {−5, −1, −1, 3};
        // the smallest positive root ν = 3 gives γₜ = −q1/(λ1+ν) and the
        // surface condition sets γₙ = ‖γₜ‖/μ.
        let n = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let rb = [1.0, 2.0, 0.0];
        let g = boundary_from_local(&n, &rb, 0.5).unwrap();
        assert_relative_eq!(g[1], 0.5, epsilon = 1e-9);
        assert_relative_eq!(g[2], 0.0, epsilon = 1e-9);
        // On the cone surface, with the sliding velocity u = N·γ − r
        // anti-parallel to the tangential impulse.
        let t = (g[1] * g[1] + g[2] * g[2]).sqrt();
        assert_relative_eq!(t, 0.5 * g[0], epsilon = 1e-9);
        let u_t = g[1] - rb[1];
        assert!(u_t * g[1] < 0.0);
    }

    #[test]
    fn test_boundary_degenerate_cases() {
        let n = [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(boundary_from_local(&n, &[1.0, 1.0, 0.0], 0.5).is_none());

        let n = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(boundary_from_local(&n, &[1.0, 1.0, 0.0], 0.0).is_none());
    }
}
