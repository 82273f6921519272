//! Contact and bilateral-constraint input records.
//!
//! Contacts arrive fresh from collision detection every step and are
//! discarded at step end; bilateral rows come pre-linearized from the joint
//! layer. Both are scattered into dense arrays by the store.

use nalgebra::Vector3;

/// One detected contact point, as reported by the narrow phase.
///
/// The normal points from body A toward body B; depth is negative while the
/// bodies interpenetrate. Non-penetrating pairs are filtered at ingestion.
#[derive(Debug, Clone)]
pub struct ContactPoint {
    /// Index of body A.
    pub body_a: usize,
    /// Index of body B.
    pub body_b: usize,
    /// Contact point on A, world frame.
    pub point_a: Vector3<f64>,
    /// Contact point on B, world frame.
    pub point_b: Vector3<f64>,
    /// Unit contact normal, A → B.
    pub normal: Vector3<f64>,
    /// Signed gap; negative while interpenetrating.
    pub depth: f64,
    /// Effective contact radius from the narrow phase, used by rolling
    /// resistance models downstream. Stored, not consumed by the solve.
    pub effective_radius: f64,
}

/// One pre-linearized bilateral (equality) constraint row.
///
/// The joint layer supplies the two 6-DOF Jacobian blocks (linear part in
/// world frame, angular part in each body's frame, matching the contact
/// Jacobian convention) and the velocity-level right-hand side.
#[derive(Debug, Clone)]
pub struct BilateralRow {
    /// Index of body A.
    pub body_a: usize,
    /// Index of body B.
    pub body_b: usize,
    /// Jacobian block for body A: `[linear | angular]`.
    pub jac_a: [f64; 6],
    /// Jacobian block for body B: `[linear | angular]`.
    pub jac_b: [f64; 6],
    /// Velocity-level correction term for this row.
    pub rhs: f64,
}
