//! Per-body input record.
//!
//! One [`BodyState`] is pushed per rigid body each step by the (external)
//! body-update pass. The store scatters it into dense per-body arrays; the
//! solver never touches body objects directly.

use nalgebra::{UnitQuaternion, Vector3, Vector4};

/// Rigid-body state and material parameters for one step.
///
/// Angular quantities (velocity, torque, inverse inertia) are expressed in
/// the body frame; the Jacobian's angular columns are generated in the same
/// frame, which keeps the inverse mass operator a pure per-DOF scale.
#[derive(Debug, Clone)]
pub struct BodyState {
    /// World-frame position of the body reference point.
    pub pos: Vector3<f64>,
    /// World-frame orientation.
    pub rot: UnitQuaternion<f64>,
    /// Linear velocity, world frame.
    pub lin_vel: Vector3<f64>,
    /// Angular velocity, body frame.
    pub ang_vel: Vector3<f64>,
    /// External force, world frame. Scaled by the step length during
    /// assembly.
    pub force: Vector3<f64>,
    /// External torque, body frame. Scaled by the step length during
    /// assembly.
    pub torque: Vector3<f64>,
    /// Inverse mass. Zero for fixed bodies.
    pub inv_mass: f64,
    /// Inverse inertia tensor diagonal, body frame. Zero for fixed bodies.
    pub inv_inertia: Vector3<f64>,
    /// Inactive bodies keep their velocities; their inverse mass is treated
    /// as zero regardless of the stored value.
    pub active: bool,
    /// Whether collision detection considers this body. Carried for the
    /// external contract; the solver itself only consumes contacts it is
    /// given.
    pub collide: bool,
    /// Friction coefficients: sliding (x), rolling (y), spinning (z).
    pub friction: Vector3<f64>,
    /// Cohesion. Contacts combine the two bodies' values by minimum.
    pub cohesion: f64,
    /// Compliance quadruple: normal (x), tangential (y), rolling (z),
    /// spinning (w). Zero means rigid in that channel.
    pub compliance: Vector4<f64>,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            pos: Vector3::zeros(),
            rot: UnitQuaternion::identity(),
            lin_vel: Vector3::zeros(),
            ang_vel: Vector3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
            inv_mass: 1.0,
            inv_inertia: Vector3::new(1.0, 1.0, 1.0),
            active: true,
            collide: true,
            friction: Vector3::new(0.5, 0.0, 0.0),
            cohesion: 0.0,
            compliance: Vector4::zeros(),
        }
    }
}

impl BodyState {
    /// A fixed (infinite-mass) body at the given pose.
    #[must_use]
    pub fn fixed(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            pos,
            rot,
            inv_mass: 0.0,
            inv_inertia: Vector3::zeros(),
            ..Self::default()
        }
    }
}
