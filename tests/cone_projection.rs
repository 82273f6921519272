//! Feasibility and fixed-point properties of the friction-cone projection.
//!
//! The projection is the solver's nonlinear core; these tests pin down the
//! contract every iterative solver relies on: projected impulses are
//! cone-feasible, feasible points are fixed points, and the degenerate
//! channels (zero friction, cohesion exceeding the normal impulse) collapse
//! the way the builders expect.

use approx::assert_relative_eq;
use ccp_solver::{project, BodyState, ContactPoint, DataManager, SolverMode};
use nalgebra::{DVector, Vector3};

const EPS: f64 = 1e-12;

/// Two bodies, `n` head-on contacts along +Z, system assembled so the
/// per-contact materials are combined and the layout is live.
fn assembled_pair(
    mode: SolverMode,
    num_contacts: usize,
    friction: Vector3<f64>,
    cohesion: f64,
) -> DataManager {
    let mut data = DataManager::new();
    let body = BodyState {
        friction,
        cohesion,
        ..BodyState::default()
    };
    data.set_bodies(&[body.clone(), body]);

    let contacts: Vec<ContactPoint> = (0..num_contacts)
        .map(|i| ContactPoint {
            body_a: 0,
            body_b: 1,
            point_a: Vector3::new(i as f64, 0.0, 0.0),
            point_b: Vector3::new(i as f64, 0.0, 0.0),
            normal: Vector3::z(),
            depth: -0.01,
            effective_radius: 0.1,
        })
        .collect();
    data.set_contacts(&contacts).unwrap();
    data.settings.mode = mode;
    data.configure_step(0.01);
    ccp_solver::constraint::assemble(&mut data);
    data
}

/// A deliberately awkward spread of impulse candidates: interior, surface,
/// anti-cone, tensile, and near-degenerate points.
fn candidate_values(i: usize) -> [f64; 6] {
    match i % 5 {
        0 => [1.0, 0.1, -0.1, 0.02, 0.01, -0.01],
        1 => [1.0, 5.0, -3.0, 2.0, 1.5, -0.5],
        2 => [-4.0, 0.5, 0.5, -1.0, 0.3, 0.3],
        3 => [1e-16, 2.0, 2.0, 1.0, -1.0, 1.0],
        _ => [0.3, -0.4, 0.2, -0.6, 0.05, 0.4],
    }
}

fn fill_candidates(data: &DataManager, gamma: &mut DVector<f64>) {
    let layout = data.layout;
    for i in 0..data.num_contacts {
        let vals = candidate_values(i);
        gamma[layout.normal(i)] = vals[0];
        if layout.mode().has_tangential() {
            gamma[layout.tangential(i, 0)] = vals[1];
            gamma[layout.tangential(i, 1)] = vals[2];
        }
        if layout.mode().has_spinning() {
            for k in 0..3 {
                gamma[layout.spinning(i, k)] = vals[3 + k];
            }
        }
    }
}

#[test]
fn sliding_projection_is_cone_feasible() {
    let mu = 0.5;
    let cohesion = 0.3;
    let data = assembled_pair(SolverMode::Sliding, 5, Vector3::new(mu, 0.0, 0.0), cohesion);
    let mut gamma = DVector::zeros(data.num_constraints);
    fill_candidates(&data, &mut gamma);

    project(&data, &mut gamma);

    let layout = data.layout;
    for i in 0..data.num_contacts {
        let gn = gamma[layout.normal(i)];
        let gu = gamma[layout.tangential(i, 0)];
        let gv = gamma[layout.tangential(i, 1)];
        let t = (gu * gu + gv * gv).sqrt();
        assert!(t <= mu * gn + EPS, "contact {i}: ‖t‖ = {t} > μ·γₙ = {}", mu * gn);
        assert!(gn >= -cohesion - EPS, "contact {i}: γₙ = {gn} below −cohesion");
    }
}

#[test]
fn spinning_projection_is_cone_feasible() {
    let (mu, mu_roll, mu_spin) = (0.5, 0.1, 0.05);
    let data = assembled_pair(
        SolverMode::Spinning,
        5,
        Vector3::new(mu, mu_roll, mu_spin),
        0.0,
    );
    let mut gamma = DVector::zeros(data.num_constraints);
    fill_candidates(&data, &mut gamma);

    project(&data, &mut gamma);

    let layout = data.layout;
    for i in 0..data.num_contacts {
        let gn = gamma[layout.normal(i)];
        let gu = gamma[layout.tangential(i, 0)];
        let gv = gamma[layout.tangential(i, 1)];
        let gs = gamma[layout.spinning(i, 0)];
        let gtu = gamma[layout.spinning(i, 1)];
        let gtv = gamma[layout.spinning(i, 2)];

        assert!((gu * gu + gv * gv).sqrt() <= mu * gn + EPS);
        assert!(gs.abs() <= mu_spin * gn + EPS, "contact {i}: spin channel infeasible");
        assert!(
            (gtu * gtu + gtv * gtv).sqrt() <= mu_roll * gn + EPS,
            "contact {i}: rolling channel infeasible"
        );
    }
}

#[test]
fn projection_is_idempotent() {
    // A feasible point is a fixed point. (Cohesion shifts the normal
    // channel before every cone test, so the fixed-point guarantee is for
    // cohesionless materials; cohesive release is covered separately.)
    for mode in [SolverMode::Normal, SolverMode::Sliding, SolverMode::Spinning] {
        let data = assembled_pair(mode, 5, Vector3::new(0.4, 0.08, 0.02), 0.0);
        let mut gamma = DVector::zeros(data.num_constraints);
        fill_candidates(&data, &mut gamma);

        project(&data, &mut gamma);
        let once = gamma.clone();
        project(&data, &mut gamma);

        for k in 0..gamma.len() {
            assert_relative_eq!(gamma[k], once[k], epsilon = EPS);
        }
    }
}

#[test]
fn zero_friction_zeroes_tangentials() {
    let cohesion = 0.25;
    let data = assembled_pair(SolverMode::Sliding, 5, Vector3::zeros(), cohesion);
    let mut gamma = DVector::zeros(data.num_constraints);
    fill_candidates(&data, &mut gamma);

    project(&data, &mut gamma);

    let layout = data.layout;
    for i in 0..data.num_contacts {
        let expected = (candidate_values(i)[0] - cohesion).max(0.0);
        assert_relative_eq!(gamma[layout.normal(i)], expected, epsilon = EPS);
        assert_eq!(gamma[layout.tangential(i, 0)], 0.0);
        assert_eq!(gamma[layout.tangential(i, 1)], 0.0);
    }
}

#[test]
fn cohesion_clamps_small_normal_impulse_to_zero() {
    // μ = 0, cohesion = 2, γₙ = 1: 1 − 2 < 0 clamps to zero.
    let data = assembled_pair(SolverMode::Sliding, 1, Vector3::zeros(), 2.0);
    let mut gamma = DVector::zeros(data.num_constraints);
    gamma[0] = 1.0;

    project(&data, &mut gamma);

    assert_eq!(gamma[0], 0.0);
    assert_eq!(gamma[1], 0.0);
    assert_eq!(gamma[2], 0.0);
}

#[test]
fn normal_mode_clamps_each_contact() {
    // One unknown per contact: negative normal impulses release to zero,
    // positive ones pass through.
    let data = assembled_pair(SolverMode::Normal, 3, Vector3::new(0.5, 0.0, 0.0), 0.0);
    assert_eq!(data.num_constraints, 3);

    let mut gamma = DVector::from_vec(vec![1.5, -0.5, 0.0]);
    project(&data, &mut gamma);

    assert_relative_eq!(gamma[0], 1.5);
    assert_eq!(gamma[1], 0.0);
    assert_eq!(gamma[2], 0.0);
}
