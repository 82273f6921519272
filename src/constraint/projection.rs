//! Friction-cone projection operators.
//!
//! The nonlinear heart of the solve: after every gradient-type step the
//! impulse vector is mapped back onto the feasible set, per contact and
//! embarrassingly parallel. Cohesion offsets the normal channel before the
//! cone test (`γₙ ← γₙ − cohesion`): a normal impulse that cannot overcome
//! the cohesion is released to zero, and whatever survives is cone-feasible
//! in the stored variables. With zero cohesion this is the exact Coulomb
//! cone projection (and a fixed point on feasible input).
//!
//! Degeneracy policy: a normal impulse below 1e-15 in magnitude counts as
//! fully separating and zeroes the whole block instead of dividing by it.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::linalg::MIN_VAL;
use crate::types::{DataManager, SolverMode};

/// Project `(γₙ, γᵤ, γᵥ)` onto the Coulomb cone `‖(γᵤ,γᵥ)‖ ≤ μ·γₙ`.
///
/// Three cases:
/// - inside the cone: untouched;
/// - inside the polar (anti-)cone, or `|γₙ|` numerically zero: the whole
///   block is zeroed (fully slipping/separating);
/// - otherwise: orthogonal projection onto the cone surface,
///   `γₙ' = (‖t‖·μ + γₙ)/(μ² + 1)`, tangentials rescaled by `γₙ'·μ/‖t‖`.
///
/// Returns `true` only when the surface projection ran.
pub fn cone_generalized(gamma_n: &mut f64, gamma_u: &mut f64, gamma_v: &mut f64, mu: f64) -> bool {
    let f_tang = (*gamma_u * *gamma_u + *gamma_v * *gamma_v).sqrt();

    // Inside the upper cone: keep untouched.
    if f_tang < mu * *gamma_n {
        return false;
    }

    // Inside the lower (polar) cone: reset normal, u, v to zero.
    if f_tang < -(1.0 / mu) * *gamma_n || gamma_n.abs() < MIN_VAL {
        *gamma_n = 0.0;
        *gamma_u = 0.0;
        *gamma_v = 0.0;
        return false;
    }

    // Remaining case: project orthogonally onto the cone surface.
    *gamma_n = (f_tang * mu + *gamma_n) / (mu * mu + 1.0);
    let tproj_div_t = *gamma_n * mu / f_tang;
    *gamma_u *= tproj_div_t;
    *gamma_v *= tproj_div_t;
    true
}

/// Single-axis cone for the torsional channel: `|γₛ| ≤ μ·γₙ`.
///
/// The normal impulse is owned by the sliding cone and acts here as a fixed
/// radius, so the channel clamps rather than tilting the cone axis; a
/// numerically zero radius zeroes the channel.
pub fn cone_single(gamma_n: f64, gamma_s: &mut f64, mu: f64) {
    if gamma_n.abs() < MIN_VAL {
        *gamma_s = 0.0;
        return;
    }
    let radius = mu * gamma_n;
    if gamma_s.abs() > radius {
        *gamma_s = gamma_s.signum() * radius;
    }
}

/// Two-axis variant of [`cone_single`] for the rolling pair:
/// `‖(γₜᵤ,γₜᵥ)‖ ≤ μ·γₙ` with the normal impulse as a fixed radius.
pub fn cone_clamp_pair(gamma_n: f64, gamma_tu: &mut f64, gamma_tv: &mut f64, mu: f64) {
    if gamma_n.abs() < MIN_VAL {
        *gamma_tu = 0.0;
        *gamma_tv = 0.0;
        return;
    }
    let radius = mu * gamma_n;
    let f_tang = (*gamma_tu * *gamma_tu + *gamma_tv * *gamma_tv).sqrt();
    if f_tang > radius && f_tang > MIN_VAL {
        let scale = radius / f_tang;
        *gamma_tu *= scale;
        *gamma_tv *= scale;
    }
}

/// Normal-only projection: `γₙ' = max(0, γₙ − cohesion)`; any friction
/// components present are zeroed.
fn project_contact_normal(gamma_n: &mut f64, tangential: &mut [f64], spinning: &mut [f64], coh: f64) {
    *gamma_n = (*gamma_n - coh).max(0.0);
    for g in tangential.iter_mut().chain(spinning.iter_mut()) {
        *g = 0.0;
    }
}

/// Sliding projection: the 3-DOF block onto the offset Coulomb cone.
///
/// With zero sliding friction this degenerates to the pure normal clamp.
/// Also used by the local per-contact solver on its dense subproblem.
pub(crate) fn project_sliding_block(gamma_n: &mut f64, tangential: &mut [f64], mu: f64, coh: f64) {
    let mut gn = *gamma_n - coh;
    if mu == 0.0 {
        *gamma_n = gn.max(0.0);
        tangential[0] = 0.0;
        tangential[1] = 0.0;
        return;
    }
    let (t0, t1) = tangential.split_at_mut(1);
    cone_generalized(&mut gn, &mut t0[0], &mut t1[0], mu);
    *gamma_n = gn;
}

/// Spin-block projection: torsion against `μ_spin`, rolling pair against
/// `μ_roll`, both with the (already projected) normal impulse as radius.
/// A zero sub-coefficient forces its channel to zero.
fn project_contact_spinning(gamma_n: f64, spinning: &mut [f64], mu_roll: f64, mu_spin: f64) {
    let gn = gamma_n.abs();

    if mu_spin == 0.0 {
        spinning[0] = 0.0;
    } else {
        cone_single(gn, &mut spinning[0], mu_spin);
    }

    if mu_roll == 0.0 {
        spinning[1] = 0.0;
        spinning[2] = 0.0;
    } else {
        let (tu, tv) = {
            let (a, b) = spinning.split_at_mut(2);
            (&mut a[1], &mut b[0])
        };
        cone_clamp_pair(gn, tu, tv, mu_roll);
    }
}

/// Project one contact's segment of `gamma` in place, dispatching on the
/// step's mode. Used by the sweep-type solvers that touch one contact at a
/// time.
pub fn project_single(data: &DataManager, i: usize, gamma: &mut DVector<f64>) {
    let layout = data.layout;
    let fric = data.contact_friction[i];
    let coh = data.contact_cohesion[i];

    match layout.mode() {
        SolverMode::Normal => {
            let n = layout.normal(i);
            gamma[n] = (gamma[n] - coh).max(0.0);
        }
        SolverMode::Sliding => {
            let (n, t0, t1) = (layout.normal(i), layout.tangential(i, 0), layout.tangential(i, 1));
            let mut gn = gamma[n];
            let mut tang = [gamma[t0], gamma[t1]];
            project_sliding_block(&mut gn, &mut tang, fric.x, coh);
            gamma[n] = gn;
            gamma[t0] = tang[0];
            gamma[t1] = tang[1];
        }
        SolverMode::Spinning => {
            let (n, t0, t1) = (layout.normal(i), layout.tangential(i, 0), layout.tangential(i, 1));
            let mut gn = gamma[n];
            let mut tang = [gamma[t0], gamma[t1]];
            project_sliding_block(&mut gn, &mut tang, fric.x, coh);
            gamma[n] = gn;
            gamma[t0] = tang[0];
            gamma[t1] = tang[1];

            let mut spin = [
                gamma[layout.spinning(i, 0)],
                gamma[layout.spinning(i, 1)],
                gamma[layout.spinning(i, 2)],
            ];
            project_contact_spinning(gn, &mut spin, fric.y, fric.z);
            for k in 0..3 {
                gamma[layout.spinning(i, k)] = spin[k];
            }
        }
    }
}

/// Project the whole impulse vector onto the feasible set, per contact in
/// parallel. Bilateral rows are unconstrained and pass through untouched.
pub fn project(data: &DataManager, gamma: &mut DVector<f64>) {
    let nc = data.num_contacts;
    if nc == 0 {
        return;
    }
    let fric = &data.contact_friction;
    let coh = &data.contact_cohesion;

    match data.layout.mode() {
        SolverMode::Normal => {
            gamma.as_mut_slice()[..nc]
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, gn)| {
                    project_contact_normal(gn, &mut [], &mut [], coh[i]);
                });
        }
        SolverMode::Sliding => {
            let (normal, rest) = gamma.as_mut_slice().split_at_mut(nc);
            let tangential = &mut rest[..nc * 2];
            normal
                .par_iter_mut()
                .zip(tangential.par_chunks_mut(2))
                .enumerate()
                .for_each(|(i, (gn, tang))| {
                    project_sliding_block(gn, tang, fric[i].x, coh[i]);
                });
        }
        SolverMode::Spinning => {
            let (normal, rest) = gamma.as_mut_slice().split_at_mut(nc);
            let (tangential, rest) = rest.split_at_mut(nc * 2);
            let spinning = &mut rest[..nc * 3];
            normal
                .par_iter_mut()
                .zip(tangential.par_chunks_mut(2))
                .zip(spinning.par_chunks_mut(3))
                .enumerate()
                .for_each(|(i, ((gn, tang), spin))| {
                    project_sliding_block(gn, tang, fric[i].x, coh[i]);
                    project_contact_spinning(*gn, spin, fric[i].y, fric[i].z);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cone_inside_untouched() {
        let (mut gn, mut gu, mut gv) = (10.0, 1.0, 1.0);
        let projected = cone_generalized(&mut gn, &mut gu, &mut gv, 0.5);
        assert!(!projected);
        assert_relative_eq!(gn, 10.0);
        assert_relative_eq!(gu, 1.0);
    }

    #[test]
    fn test_cone_anti_cone_zeroed() {
        // Deep in the polar cone: strongly negative normal, small tangent.
        let (mut gn, mut gu, mut gv) = (-10.0, 1.0, 0.0);
        cone_generalized(&mut gn, &mut gu, &mut gv, 0.5);
        assert_eq!((gn, gu, gv), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_cone_degenerate_normal_zeroed() {
        let (mut gn, mut gu, mut gv) = (1e-16, 3.0, 4.0);
        cone_generalized(&mut gn, &mut gu, &mut gv, 0.5);
        assert_eq!((gn, gu, gv), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_cone_surface_projection_feasible() {
        let mu = 0.5;
        let (mut gn, mut gu, mut gv) = (1.0, 3.0, 4.0);
        let projected = cone_generalized(&mut gn, &mut gu, &mut gv, mu);
        assert!(projected);
        let t = (gu * gu + gv * gv).sqrt();
        assert_relative_eq!(t, mu * gn, epsilon = 1e-12);
        // Tangential direction is preserved.
        assert_relative_eq!(gu / gv, 3.0 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cone_single_clamps_to_radius() {
        let mut gs = 5.0;
        cone_single(2.0, &mut gs, 0.25);
        assert_relative_eq!(gs, 0.5);

        let mut gs = -5.0;
        cone_single(2.0, &mut gs, 0.25);
        assert_relative_eq!(gs, -0.5);

        let mut gs = 0.1;
        cone_single(2.0, &mut gs, 0.25);
        assert_relative_eq!(gs, 0.1);
    }

    #[test]
    fn test_cone_single_zero_radius() {
        let mut gs = 5.0;
        cone_single(0.0, &mut gs, 0.25);
        assert_eq!(gs, 0.0);
    }

    #[test]
    fn test_clamp_pair_scales_radially() {
        let (mut tu, mut tv) = (3.0, 4.0);
        cone_clamp_pair(2.0, &mut tu, &mut tv, 0.5);
        let t = (tu * tu + tv * tv).sqrt();
        assert_relative_eq!(t, 1.0, epsilon = 1e-12);
        assert_relative_eq!(tu / tv, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_sliding_zero_friction_degenerates_to_clamp() {
        let mut gn = 1.0;
        let mut tang = [5.0, -2.0];
        project_sliding_block(&mut gn, &mut tang, 0.0, 2.0);
        // 1 − 2 < 0 clamps to zero, friction zeroed.
        assert_eq!(gn, 0.0);
        assert_eq!(tang, [0.0, 0.0]);
    }
}
