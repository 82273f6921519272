//! Contact frame construction and per-body Jacobian kernels.
//!
//! The contact frame is a right-handed orthonormal basis (U, V, W) built
//! from the contact normal by Gram-Schmidt against a fixed reference axis.
//! The Jacobian kernels rotate the frame axes into a body's local frame and
//! cross them with the local contact offset, producing the angular-velocity
//! sensitivity rows that pair with the ±axis linear entries.

use nalgebra::{UnitQuaternion, Vector3};

/// Threshold below which the primary reference axis counts as parallel to
/// the normal and the fallback axis is used instead.
const SINGULAR_EPS: f64 = 1e-4;

/// Build a right-handed orthonormal frame `(u, v, w)` from a unit normal.
///
/// The reference axis is (0, 1, 0); when the cross product with it nearly
/// vanishes (normal close to ±Y) the reference switches to (1, 0, 0).
/// Deterministic, no randomness.
#[must_use]
pub fn orthogonalize(u: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let mut reference = Vector3::new(0.0, 1.0, 0.0);
    let mut w = u.cross(&reference);
    let mut w_len = w.norm();
    if w_len < SINGULAR_EPS {
        reference = Vector3::new(1.0, 0.0, 0.0);
        w = u.cross(&reference);
        w_len = w.norm();
    }
    w /= w_len;
    let v = w.cross(u);
    (v, w)
}

/// Angular sensitivity rows for the translational constraint directions.
///
/// Rotates each frame axis into the body frame and crosses it with the
/// body-local contact offset: `Tᵢ = (R⁻¹·axisᵢ) × s_local`. `offset` is the
/// world-frame offset of the contact point from the body reference point.
#[must_use]
pub fn compute_jacobian(
    rot: &UnitQuaternion<f64>,
    u: &Vector3<f64>,
    v: &Vector3<f64>,
    w: &Vector3<f64>,
    offset: &Vector3<f64>,
) -> [Vector3<f64>; 3] {
    let s_local = rot.inverse_transform_vector(offset);
    [
        rot.inverse_transform_vector(u).cross(&s_local),
        rot.inverse_transform_vector(v).cross(&s_local),
        rot.inverse_transform_vector(w).cross(&s_local),
    ]
}

/// Angular sensitivity rows for the spin/rolling constraint directions:
/// the frame axes expressed in the body frame, `Tᵢ = R⁻¹·axisᵢ`.
#[must_use]
pub fn compute_jacobian_rolling(
    rot: &UnitQuaternion<f64>,
    u: &Vector3<f64>,
    v: &Vector3<f64>,
    w: &Vector3<f64>,
) -> [Vector3<f64>; 3] {
    [
        rot.inverse_transform_vector(u),
        rot.inverse_transform_vector(v),
        rot.inverse_transform_vector(w),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_right_handed(u: &Vector3<f64>, v: &Vector3<f64>, w: &Vector3<f64>) {
        assert_relative_eq!(u.dot(v), 0.0, epsilon = 1e-12);
        assert_relative_eq!(u.dot(w), 0.0, epsilon = 1e-12);
        assert_relative_eq!(v.dot(w), 0.0, epsilon = 1e-12);
        assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(w.norm(), 1.0, epsilon = 1e-12);
        // u = v × w closes the right-handed triad.
        let cross = v.cross(w);
        assert_relative_eq!(cross.x, u.x, epsilon = 1e-12);
        assert_relative_eq!(cross.y, u.y, epsilon = 1e-12);
        assert_relative_eq!(cross.z, u.z, epsilon = 1e-12);
    }

    #[test]
    fn test_orthogonalize_generic_normal() {
        let u = Vector3::new(1.0, 2.0, 3.0).normalize();
        let (v, w) = orthogonalize(&u);
        assert_right_handed(&u, &v, &w);
    }

    #[test]
    fn test_orthogonalize_degenerate_reference() {
        // Normal parallel to the primary reference axis: the fallback axis
        // must kick in and still produce a clean frame.
        let u = Vector3::new(0.0, 1.0, 0.0);
        let (v, w) = orthogonalize(&u);
        assert_right_handed(&u, &v, &w);

        let u = Vector3::new(0.0, -1.0, 0.0);
        let (v, w) = orthogonalize(&u);
        assert_right_handed(&u, &v, &w);
    }

    #[test]
    fn test_jacobian_identity_rotation() {
        let rot = UnitQuaternion::identity();
        let u = Vector3::z();
        let (v, w) = orthogonalize(&u);
        let offset = Vector3::new(0.0, 0.0, 0.5);

        let t = compute_jacobian(&rot, &u, &v, &w, &offset);
        // Offset along the normal: the normal row has no lever arm.
        assert_relative_eq!(t[0].norm(), 0.0, epsilon = 1e-12);
        // Tangential rows have lever arms of half a meter.
        assert_relative_eq!(t[1].norm(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(t[2].norm(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rolling_jacobian_is_rotated_frame() {
        let rot = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7);
        let u = Vector3::z();
        let (v, w) = orthogonalize(&u);
        let t = compute_jacobian_rolling(&rot, &u, &v, &w);
        assert_relative_eq!(
            (t[0] - rot.inverse_transform_vector(&u)).norm(),
            0.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(t[1].norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(t[2].norm(), 1.0, epsilon = 1e-12);
    }
}
