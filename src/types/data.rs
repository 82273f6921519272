//! The shared state store.
//!
//! [`DataManager`] is the single source of truth for everything the solver
//! pipeline touches: per-body arrays, per-contact arrays, the assembled
//! sparse system, solver configuration and the last solve's diagnostics.
//! Rather than passing individual arrays between the builder and the
//! solvers, every component receives a borrow of this one context object.
//! Lifecycle is one per simulation; per-step arrays are resized in place.
//!
//! The store itself carries no business logic: ingestion validates and
//! scatters input, [`DataManager::configure_step`] recomputes the counters
//! and resizes the per-step vectors, and everything else happens in the
//! `constraint` and `solver` modules.

use std::collections::HashMap;
use std::time::Duration;

use nalgebra::{DVector, UnitQuaternion, Vector3, Vector4};
use nalgebra_sparse::CsrMatrix;

use crate::linalg::empty_csr;
use serde::{Deserialize, Serialize};

use crate::layout::BlockLayout;
use crate::types::{
    BilateralRow, BodyState, ContactPoint, ConvergenceCriterion, IterationStat, SetupError,
    SolverKind, SolverMode,
};

/// Tolerance on `‖normal‖ − 1` accepted at ingestion.
const NORMAL_UNIT_EPS: f64 = 1e-6;

/// Solver configuration, externally supplied; nothing in the core hard-codes
/// these knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Constraint formulation for the step. Every component reads this one
    /// field; the mode is never re-derived.
    pub mode: SolverMode,
    /// Which global iterative solver runs.
    pub solver: SolverKind,
    /// Convergence tolerance (meaning depends on `criterion`).
    pub tolerance: f64,
    /// Iteration cap for the global solvers.
    pub max_iterations: usize,
    /// Convergence test selection.
    pub criterion: ConvergenceCriterion,
    /// Compliance time constant. When positive, the right-hand side uses the
    /// compliant `depth/(h+alpha)` form instead of clamped Baumgarte.
    pub alpha: f64,
    /// Cap on the Baumgarte recovery speed. Negative disables the clamp.
    pub contact_recovery_speed: f64,
    /// Seed `gamma` from the previous step's impulses for persisting pairs.
    pub warm_start: bool,
    /// Sweep cap for the local per-contact relaxation solver.
    pub local_solver_sweeps: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            mode: SolverMode::Sliding,
            solver: SolverKind::Apgd,
            tolerance: 1e-4,
            max_iterations: 150,
            criterion: ConvergenceCriterion::Residual,
            alpha: 0.0,
            contact_recovery_speed: 0.6,
            warm_start: false,
            local_solver_sweeps: 20,
        }
    }
}

/// Result of one constraint solve.
#[derive(Debug, Clone, Default)]
pub struct SolveReport {
    /// Iterations actually run.
    pub iterations: usize,
    /// Final reported residual (best candidate for APGD).
    pub residual: f64,
    /// Objective value `γᵀ(½Nγ − r)` of the returned iterate.
    pub objective: f64,
    /// Whether the tolerance was met before the iteration cap.
    pub converged: bool,
    /// Per-iteration residual/objective history.
    pub history: Vec<IterationStat>,
}

/// Wall-clock accumulation per pipeline phase, reset every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timers {
    /// System assembly (frames, Jacobians, compliance, right-hand side).
    pub setup: Duration,
    /// Iterative solve.
    pub solve: Duration,
}

/// Warm-start cache entry: the impulse segment of one persisting body pair.
#[derive(Debug, Clone, Copy, Default)]
struct CachedImpulse {
    normal: f64,
    tangential: [f64; 2],
    spinning: [f64; 3],
}

/// Process-wide mutable state for the contact solver pipeline.
///
/// All arrays are indexed by body id or contact id. Body arrays are
/// populated once per step by [`DataManager::set_bodies`] and are read-only
/// during the solve; contact arrays are rebuilt from scratch every step.
#[derive(Debug)]
pub struct DataManager {
    // ==================== Body arrays (index = body id) ====================
    /// Body reference-point positions, world frame.
    pub pos: Vec<Vector3<f64>>,
    /// Body orientations.
    pub rot: Vec<UnitQuaternion<f64>>,
    /// Generalized velocities, 6 per body: linear (world) then angular
    /// (body frame). Holds the corrected velocities after a solve.
    pub v: DVector<f64>,
    /// Step-scaled external forces `h·f`, same packing as `v`. Filled during
    /// assembly from the per-body force/torque inputs.
    pub hf: DVector<f64>,
    /// Inverse masses; zero for fixed bodies.
    pub inv_mass: Vec<f64>,
    /// Inverse inertia diagonals, body frame.
    pub inv_inertia: Vec<Vector3<f64>>,
    /// Active flags. Inactive bodies contribute zero inverse mass.
    pub active: Vec<bool>,
    /// Collide flags, carried for the external contract.
    pub collide: Vec<bool>,
    /// Per-body friction triplets: sliding, rolling, spinning.
    pub friction: Vec<Vector3<f64>>,
    /// Per-body cohesion.
    pub cohesion: Vec<f64>,
    /// Per-body compliance quadruples: normal, tangential, rolling, spinning.
    pub compliance: Vec<Vector4<f64>>,

    // ==================== Contact arrays (index = contact id) ====================
    /// Body index pairs (A, B).
    pub bids: Vec<[usize; 2]>,
    /// Contact point on A as a world-frame offset from A's reference point.
    pub cpta: Vec<Vector3<f64>>,
    /// Contact point on B as a world-frame offset from B's reference point.
    pub cptb: Vec<Vector3<f64>>,
    /// Unit contact normals, A → B.
    pub norm: Vec<Vector3<f64>>,
    /// Signed gaps; negative while interpenetrating.
    pub depth: Vec<f64>,
    /// Effective contact radii from the narrow phase.
    pub erad: Vec<f64>,
    /// Combined per-contact friction triplets (sliding, rolling, spinning),
    /// precomputed in parallel before assembly.
    pub contact_friction: Vec<Vector3<f64>>,
    /// Combined per-contact cohesion.
    pub contact_cohesion: Vec<f64>,

    // ==================== Bilateral constraints ====================
    /// Pre-linearized bilateral rows for the step.
    pub bilaterals: Vec<BilateralRow>,

    // ==================== Assembled sparse system ====================
    // The Jacobian is stored transposed (rows = constraint rows), split per
    // block so each block's rows have a uniform nonzero count; the sparsity
    // structure is finalized before the parallel value fill.
    /// Normal block `Dₙᵀ` (1 row per contact).
    pub d_n_t: CsrMatrix<f64>,
    /// Tangential block `Dₜᵀ` (2 rows per contact; empty in `Normal` mode).
    pub d_t_t: CsrMatrix<f64>,
    /// Spin block `Dₛᵀ` (3 rows per contact; `Spinning` mode only).
    pub d_s_t: CsrMatrix<f64>,
    /// Bilateral block `D_bᵀ` (1 row per bilateral).
    pub d_b_t: CsrMatrix<f64>,
    /// `M⁻¹·Dₙ` (6·n_bodies × n_contacts).
    pub m_inv_d_n: CsrMatrix<f64>,
    /// `M⁻¹·Dₜ`.
    pub m_inv_d_t: CsrMatrix<f64>,
    /// `M⁻¹·Dₛ`.
    pub m_inv_d_s: CsrMatrix<f64>,
    /// `M⁻¹·D_b`.
    pub m_inv_d_b: CsrMatrix<f64>,
    /// Per-DOF inverse mass diagonal (6 per body): `[1/m ×3, I⁻¹ diag ×3]`,
    /// zeroed for inactive bodies.
    pub minv_diag: DVector<f64>,
    /// Compliance vector `E` (diagonal regularization), constraint layout.
    pub e: DVector<f64>,
    /// Stabilization terms `b`, constraint layout (normal + bilateral rows).
    pub b: DVector<f64>,
    /// Solver right-hand side `r = −b − D·M⁻¹k`, constraint layout.
    pub r: DVector<f64>,
    /// `M⁻¹k = v + M⁻¹·hf`, body-DOF layout.
    pub m_inv_k: DVector<f64>,
    /// Constraint impulses (the unknowns), constraint layout.
    pub gamma: DVector<f64>,
    /// Sliding-speed diagnostic `s_i = μ·‖tangential relative velocity‖`,
    /// one entry per contact, filled after the solve in friction modes.
    pub s: DVector<f64>,

    // ==================== Counters ====================
    /// Number of bodies loaded this step.
    pub num_bodies: usize,
    /// Number of contacts loaded this step.
    pub num_contacts: usize,
    /// Number of bilateral rows loaded this step.
    pub num_bilaterals: usize,
    /// `num_contacts · (1|3|6)` for the active mode.
    pub num_unilaterals: usize,
    /// `num_unilaterals + num_bilaterals`.
    pub num_constraints: usize,
    /// Segment map over the constraint vectors, rebuilt by
    /// [`DataManager::configure_step`].
    pub layout: BlockLayout,
    /// Step length the system was assembled for.
    pub step_size: f64,

    // ==================== Configuration / diagnostics ====================
    /// Externally supplied solver configuration.
    pub settings: SolverSettings,
    /// Diagnostics of the last solve.
    pub report: SolveReport,
    /// Per-phase wall-clock timers for the last step.
    pub timers: Timers,

    /// Reaction impulses of the previous step, keyed by body pair. Only
    /// consulted when `settings.warm_start` is set.
    warm_cache: HashMap<(usize, usize), CachedImpulse>,
}

impl Default for DataManager {
    fn default() -> Self {
        Self {
            pos: Vec::new(),
            rot: Vec::new(),
            v: DVector::zeros(0),
            hf: DVector::zeros(0),
            inv_mass: Vec::new(),
            inv_inertia: Vec::new(),
            active: Vec::new(),
            collide: Vec::new(),
            friction: Vec::new(),
            cohesion: Vec::new(),
            compliance: Vec::new(),
            bids: Vec::new(),
            cpta: Vec::new(),
            cptb: Vec::new(),
            norm: Vec::new(),
            depth: Vec::new(),
            erad: Vec::new(),
            contact_friction: Vec::new(),
            contact_cohesion: Vec::new(),
            bilaterals: Vec::new(),
            d_n_t: empty_csr(0, 0),
            d_t_t: empty_csr(0, 0),
            d_s_t: empty_csr(0, 0),
            d_b_t: empty_csr(0, 0),
            m_inv_d_n: empty_csr(0, 0),
            m_inv_d_t: empty_csr(0, 0),
            m_inv_d_s: empty_csr(0, 0),
            m_inv_d_b: empty_csr(0, 0),
            minv_diag: DVector::zeros(0),
            e: DVector::zeros(0),
            b: DVector::zeros(0),
            r: DVector::zeros(0),
            m_inv_k: DVector::zeros(0),
            gamma: DVector::zeros(0),
            s: DVector::zeros(0),
            num_bodies: 0,
            num_contacts: 0,
            num_bilaterals: 0,
            num_unilaterals: 0,
            num_constraints: 0,
            layout: BlockLayout::empty(),
            step_size: 0.0,
            settings: SolverSettings::default(),
            report: SolveReport::default(),
            timers: Timers::default(),
            warm_cache: HashMap::new(),
        }
    }
}

impl DataManager {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the per-body arrays for this step.
    ///
    /// Inactive bodies keep whatever velocity they carry; their inverse mass
    /// is zeroed when the mass operator diagonal is built.
    pub fn set_bodies(&mut self, bodies: &[BodyState]) {
        let n = bodies.len();
        self.num_bodies = n;

        self.pos.clear();
        self.rot.clear();
        self.inv_mass.clear();
        self.inv_inertia.clear();
        self.active.clear();
        self.collide.clear();
        self.friction.clear();
        self.cohesion.clear();
        self.compliance.clear();

        self.v = DVector::zeros(n * 6);
        self.hf = DVector::zeros(n * 6);

        for (i, body) in bodies.iter().enumerate() {
            self.pos.push(body.pos);
            self.rot.push(body.rot);
            self.inv_mass.push(body.inv_mass);
            self.inv_inertia.push(body.inv_inertia);
            self.active.push(body.active);
            self.collide.push(body.collide);
            self.friction.push(body.friction);
            self.cohesion.push(body.cohesion);
            self.compliance.push(body.compliance);

            for k in 0..3 {
                self.v[i * 6 + k] = body.lin_vel[k];
                self.v[i * 6 + 3 + k] = body.ang_vel[k];
                // hf picks up the step scale in configure_step; stash raw
                // force/torque here.
                self.hf[i * 6 + k] = body.force[k];
                self.hf[i * 6 + 3 + k] = body.torque[k];
            }
        }
    }

    /// Load the contact arrays for this step.
    ///
    /// Contacts with non-negative depth (separated pairs) are filtered here,
    /// so the builder only ever sees penetrating contacts. Returns an error
    /// for malformed records; nothing is partially ingested on failure.
    ///
    /// # Errors
    ///
    /// [`SetupError`] when a contact references an unknown body, pairs a
    /// body with itself, or carries a non-finite normal or depth.
    pub fn set_contacts(&mut self, contacts: &[ContactPoint]) -> Result<(), SetupError> {
        for (i, c) in contacts.iter().enumerate() {
            for body in [c.body_a, c.body_b] {
                if body >= self.num_bodies {
                    return Err(SetupError::BodyIndexOutOfRange {
                        contact: i,
                        body,
                        num_bodies: self.num_bodies,
                    });
                }
            }
            if c.body_a == c.body_b {
                return Err(SetupError::SelfContact {
                    contact: i,
                    body: c.body_a,
                });
            }
            let norm_len = c.normal.norm();
            if !norm_len.is_finite() || (norm_len - 1.0).abs() > NORMAL_UNIT_EPS {
                return Err(SetupError::InvalidNormal { contact: i });
            }
            if !c.depth.is_finite() {
                return Err(SetupError::NonFiniteDepth { contact: i });
            }
        }

        self.bids.clear();
        self.cpta.clear();
        self.cptb.clear();
        self.norm.clear();
        self.depth.clear();
        self.erad.clear();

        for c in contacts.iter().filter(|c| c.depth < 0.0) {
            self.bids.push([c.body_a, c.body_b]);
            self.cpta.push(c.point_a - self.pos[c.body_a]);
            self.cptb.push(c.point_b - self.pos[c.body_b]);
            self.norm.push(c.normal);
            self.depth.push(c.depth);
            self.erad.push(c.effective_radius);
        }
        self.num_contacts = self.bids.len();
        Ok(())
    }

    /// Load the bilateral rows for this step.
    ///
    /// # Errors
    ///
    /// [`SetupError::BilateralBodyOutOfRange`] when a row references an
    /// unknown body.
    pub fn set_bilaterals(&mut self, rows: &[BilateralRow]) -> Result<(), SetupError> {
        for (j, row) in rows.iter().enumerate() {
            for body in [row.body_a, row.body_b] {
                if body >= self.num_bodies {
                    return Err(SetupError::BilateralBodyOutOfRange {
                        row: j,
                        body,
                        num_bodies: self.num_bodies,
                    });
                }
            }
        }
        self.bilaterals = rows.to_vec();
        self.num_bilaterals = rows.len();
        Ok(())
    }

    /// Recompute the counters and resize every per-step vector for the
    /// active mode. Runs once per step, before any other component.
    pub fn configure_step(&mut self, h: f64) {
        self.step_size = h;
        self.num_unilaterals = self.num_contacts * self.settings.mode.unknowns_per_contact();
        self.num_constraints = self.num_unilaterals + self.num_bilaterals;
        self.layout = BlockLayout::new(self.settings.mode, self.num_contacts, self.num_bilaterals);

        let nc = self.num_constraints;
        self.e = DVector::zeros(nc);
        self.b = DVector::zeros(nc);
        self.r = DVector::zeros(nc);
        self.gamma = DVector::zeros(nc);
        self.s = DVector::zeros(self.num_contacts);
        self.m_inv_k = DVector::zeros(self.num_bodies * 6);
        self.minv_diag = DVector::zeros(self.num_bodies * 6);

        // hf was stashed as raw force/torque by set_bodies.
        self.hf *= h;

        self.contact_friction.clear();
        self.contact_cohesion.clear();

        if self.settings.warm_start {
            self.apply_warm_start();
        }
    }

    /// Seed `gamma` from the previous step's impulses for persisting pairs.
    fn apply_warm_start(&mut self) {
        let layout = self.layout;
        for i in 0..self.num_contacts {
            let key = (self.bids[i][0], self.bids[i][1]);
            let Some(cached) = self.warm_cache.get(&key) else {
                continue;
            };
            self.gamma[layout.normal(i)] = cached.normal;
            if layout.mode().has_tangential() {
                self.gamma[layout.tangential(i, 0)] = cached.tangential[0];
                self.gamma[layout.tangential(i, 1)] = cached.tangential[1];
            }
            if layout.mode().has_spinning() {
                for k in 0..3 {
                    self.gamma[layout.spinning(i, k)] = cached.spinning[k];
                }
            }
        }
    }

    /// Record the solved impulses for next step's warm start.
    pub(crate) fn store_warm_start(&mut self) {
        self.warm_cache.clear();
        let layout = self.layout;
        for i in 0..self.num_contacts {
            let mut cached = CachedImpulse {
                normal: self.gamma[layout.normal(i)],
                ..CachedImpulse::default()
            };
            if layout.mode().has_tangential() {
                cached.tangential = [
                    self.gamma[layout.tangential(i, 0)],
                    self.gamma[layout.tangential(i, 1)],
                ];
            }
            if layout.mode().has_spinning() {
                for k in 0..3 {
                    cached.spinning[k] = self.gamma[layout.spinning(i, k)];
                }
            }
            self.warm_cache
                .insert((self.bids[i][0], self.bids[i][1]), cached);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn two_bodies() -> Vec<BodyState> {
        vec![BodyState::default(), BodyState::default()]
    }

    #[test]
    fn test_set_contacts_rejects_bad_body_index() {
        let mut data = DataManager::new();
        data.set_bodies(&two_bodies());
        let err = data
            .set_contacts(&[ContactPoint {
                body_a: 0,
                body_b: 7,
                point_a: Vector3::zeros(),
                point_b: Vector3::zeros(),
                normal: Vector3::z(),
                depth: -0.01,
                effective_radius: 0.1,
            }])
            .unwrap_err();
        assert!(matches!(err, SetupError::BodyIndexOutOfRange { body: 7, .. }));
    }

    #[test]
    fn test_set_contacts_filters_separated_pairs() {
        let mut data = DataManager::new();
        data.set_bodies(&two_bodies());
        data.set_contacts(&[
            ContactPoint {
                body_a: 0,
                body_b: 1,
                point_a: Vector3::zeros(),
                point_b: Vector3::zeros(),
                normal: Vector3::z(),
                depth: 0.05,
                effective_radius: 0.1,
            },
            ContactPoint {
                body_a: 0,
                body_b: 1,
                point_a: Vector3::zeros(),
                point_b: Vector3::zeros(),
                normal: Vector3::z(),
                depth: -0.05,
                effective_radius: 0.1,
            },
        ])
        .unwrap();
        assert_eq!(data.num_contacts, 1);
        assert_eq!(data.depth[0], -0.05);
    }

    #[test]
    fn test_configure_step_counters_consistent() {
        let mut data = DataManager::new();
        data.set_bodies(&two_bodies());
        data.set_contacts(&[ContactPoint {
            body_a: 0,
            body_b: 1,
            point_a: Vector3::zeros(),
            point_b: Vector3::zeros(),
            normal: Vector3::z(),
            depth: -0.01,
            effective_radius: 0.1,
        }])
        .unwrap();
        data.settings.mode = SolverMode::Spinning;
        data.configure_step(0.01);

        assert_eq!(data.num_unilaterals, 6);
        assert_eq!(data.num_constraints, 6);
        assert_eq!(data.gamma.len(), 6);
        assert_eq!(data.layout.mode(), SolverMode::Spinning);
    }
}
