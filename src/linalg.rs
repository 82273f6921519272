//! Pure math routines: sparse matvec, closed-form polynomial roots, 2×2 solve.
//!
//! No pipeline state lives here. The matvec helpers are the single place the
//! crate multiplies a CSR block against a vector segment; they parallelize
//! over output rows, so each invocation is a synchronization point between
//! solver iterations.

use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

/// Minimum magnitude treated as nonzero throughout the solver.
pub(crate) const MIN_VAL: f64 = 1e-15;

/// Imaginary-part magnitude below which a root counts as real.
const IMAG_EPS: f64 = 1e-10;

// ============================================================================
// Sparse matvec
// ============================================================================

/// An empty CSR matrix of the given shape.
pub(crate) fn empty_csr(nrows: usize, ncols: usize) -> CsrMatrix<f64> {
    CsrMatrix::from(&CooMatrix::new(nrows, ncols))
}

/// `y = M·x` (or `y += M·x` when `accumulate`), parallel over output rows.
///
/// `x` and `y` are raw segments of the flat constraint/body buffers; callers
/// pass the slices selected by the block layout.
pub(crate) fn spmv(m: &CsrMatrix<f64>, x: &[f64], y: &mut [f64], accumulate: bool) {
    debug_assert_eq!(m.ncols(), x.len());
    debug_assert_eq!(m.nrows(), y.len());

    let offsets = m.row_offsets();
    let cols = m.col_indices();
    let vals = m.values();

    y.par_iter_mut().enumerate().for_each(|(r, yr)| {
        let mut sum = 0.0;
        for k in offsets[r]..offsets[r + 1] {
            sum += vals[k] * x[cols[k]];
        }
        if accumulate {
            *yr += sum;
        } else {
            *yr = sum;
        }
    });
}

/// Infinity norm of a slice.
pub(crate) fn norm_inf(x: &[f64]) -> f64 {
    x.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

// ============================================================================
// Small dense solves
// ============================================================================

/// Solve the 2×2 system `[[a00,a01],[a10,a11]]·[x,y]ᵀ = [b0,b1]ᵀ`.
///
/// Returns `None` when the determinant vanishes; callers treat that as a
/// degenerate contact and fall back to a zero impulse.
#[must_use]
pub(crate) fn solve_2x2(a00: f64, a01: f64, a10: f64, a11: f64, b0: f64, b1: f64) -> Option<(f64, f64)> {
    let det = a00 * a11 - a10 * a01;
    if det == 0.0 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some((
        (b0 * a11 - b1 * a01) * inv_det,
        (a00 * b1 - a10 * b0) * inv_det,
    ))
}

// ============================================================================
// Closed-form polynomial roots
// ============================================================================

/// Real roots of `a·x² + b·x + c`.
fn quadratic_roots(a: f64, b: f64, c: f64, out: &mut Vec<f64>) {
    if a == 0.0 {
        if b != 0.0 {
            out.push(-c / b);
        }
        return;
    }
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return;
    }
    let sq = disc.sqrt();
    out.push((-b + sq) / (2.0 * a));
    out.push((-b - sq) / (2.0 * a));
}

/// Real roots of `a·x³ + b·x² + c·x + d` (`a ≠ 0`), Cardano with the
/// trigonometric branch for three real roots.
fn cubic_roots(a: f64, b: f64, c: f64, d: f64, out: &mut Vec<f64>) {
    let b = b / a;
    let c = c / a;
    let d = d / a;

    // Depressed cubic t³ + p·t + q with x = t − b/3.
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = -b / 3.0;

    let disc = q * q / 4.0 + p * p * p / 27.0;
    if disc > 0.0 {
        // One real root.
        let sq = disc.sqrt();
        let t = (-q / 2.0 + sq).cbrt() + (-q / 2.0 - sq).cbrt();
        out.push(t + shift);
    } else if p.abs() < MIN_VAL {
        // Triple root.
        out.push((-q).cbrt() + shift);
    } else {
        // Three real roots.
        let m = 2.0 * (-p / 3.0).sqrt();
        let cos_arg = (3.0 * q / (p * m)).clamp(-1.0, 1.0);
        let theta = cos_arg.acos() / 3.0;
        for k in 0..3 {
            out.push(m * (theta - 2.0 * std::f64::consts::PI * f64::from(k) / 3.0).cos() + shift);
        }
    }
}

/// Real roots of `c0·x⁴ + c1·x³ + c2·x² + c3·x + c4` (`c0 ≠ 0`) via Ferrari's
/// resolvent-cubic factorization. Complex conjugate pairs (imaginary part
/// above `IMAG_EPS` in the factor discriminants) never reach the output.
fn quartic_roots(c0: f64, c1: f64, c2: f64, c3: f64, c4: f64, out: &mut Vec<f64>) {
    let a = c1 / c0;
    let b = c2 / c0;
    let c = c3 / c0;
    let d = c4 / c0;

    // Depressed quartic y⁴ + p·y² + q·y + r with x = y − a/4.
    let a2 = a * a;
    let p = b - 3.0 * a2 / 8.0;
    let q = c - a * b / 2.0 + a2 * a / 8.0;
    let r = d - a * c / 4.0 + a2 * b / 16.0 - 3.0 * a2 * a2 / 256.0;
    let shift = -a / 4.0;

    if q.abs() < IMAG_EPS {
        // Biquadratic: z² + p·z + r with z = y².
        let mut z = Vec::with_capacity(2);
        quadratic_roots(1.0, p, r, &mut z);
        for zi in z {
            if zi >= 0.0 {
                let y = zi.sqrt();
                out.push(y + shift);
                out.push(-y + shift);
            }
        }
        return;
    }

    // Resolvent cubic z³ + 2p·z² + (p² − 4r)·z − q² = 0. At z = 0 the value
    // is −q² < 0, so a positive real root exists; the largest is the most
    // stable choice for the square root below.
    let mut resolvent = Vec::with_capacity(3);
    cubic_roots(1.0, 2.0 * p, p * p - 4.0 * r, -q * q, &mut resolvent);
    let Some(z0) = resolvent
        .into_iter()
        .filter(|z| *z > 0.0)
        .fold(None::<f64>, |acc, z| Some(acc.map_or(z, |a| a.max(z))))
    else {
        return;
    };

    // y⁴ + p·y² + q·y + r = (y² + w·y + s − t)(y² − w·y + s + t)
    let w = z0.sqrt();
    let s = (p + z0) / 2.0;
    let t = q / (2.0 * w);
    quadratic_roots(1.0, w, s - t, out);
    quadratic_roots(1.0, -w, s + t, out);
    for root in out.iter_mut() {
        *root += shift;
    }
}

/// Real roots of `p[0]·x⁴ + p[1]·x³ + p[2]·x² + p[3]·x + p[4]`.
///
/// A nearly-vanishing leading coefficient (`|p[1]/p[0]| > 1e7`) drops the
/// quartic term, and the degree keeps falling through cubic, quadratic and
/// linear forms until a nonzero leading coefficient is found.
#[must_use]
pub(crate) fn polynomial_real_roots(p: [f64; 5]) -> Vec<f64> {
    let mut p = p;
    if p[0] != 0.0 && (p[1] / p[0]).abs() > 1e7 {
        p[0] = 0.0;
    }

    let mut roots = Vec::with_capacity(4);
    if p[0] != 0.0 {
        quartic_roots(p[0], p[1], p[2], p[3], p[4], &mut roots);
    } else if p[1] != 0.0 {
        cubic_roots(p[1], p[2], p[3], p[4], &mut roots);
    } else if p[2] != 0.0 {
        quadratic_roots(p[2], p[3], p[4], &mut roots);
    } else if p[3] != 0.0 {
        roots.push(-p[4] / p[3]);
    }
    roots.retain(|r| r.is_finite());
    roots
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;

    fn sorted(mut v: Vec<f64>) -> Vec<f64> {
        v.sort_by(f64::total_cmp);
        v
    }

    #[test]
    fn test_spmv_matches_dense() {
        let mut coo = CooMatrix::new(2, 3);
        coo.push(0, 0, 1.0);
        coo.push(0, 2, 2.0);
        coo.push(1, 1, -3.0);
        let m = CsrMatrix::from(&coo);

        let x = [1.0, 2.0, 3.0];
        let mut y = [0.0, 10.0];
        spmv(&m, &x, &mut y, false);
        assert_relative_eq!(y[0], 7.0);
        assert_relative_eq!(y[1], -6.0);

        spmv(&m, &x, &mut y, true);
        assert_relative_eq!(y[0], 14.0);
        assert_relative_eq!(y[1], -12.0);
    }

    #[test]
    fn test_solve_2x2() {
        let (x, y) = solve_2x2(2.0, 1.0, 1.0, 3.0, 5.0, 10.0).unwrap();
        assert_relative_eq!(2.0 * x + y, 5.0, epsilon = 1e-12);
        assert_relative_eq!(x + 3.0 * y, 10.0, epsilon = 1e-12);
        assert!(solve_2x2(1.0, 2.0, 2.0, 4.0, 1.0, 1.0).is_none());
    }

    #[test]
    fn test_quadratic_real_roots() {
        let roots = sorted(polynomial_real_roots([0.0, 0.0, 1.0, -3.0, 2.0]));
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-12);

        // Complex pair: no real roots.
        assert!(polynomial_real_roots([0.0, 0.0, 1.0, 0.0, 1.0]).is_empty());
    }

    #[test]
    fn test_cubic_three_real_roots() {
        // (x − 1)(x − 2)(x − 3) = x³ − 6x² + 11x − 6
        let roots = sorted(polynomial_real_roots([0.0, 1.0, -6.0, 11.0, -6.0]));
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cubic_single_real_root() {
        // x³ − 1 has one real root.
        let roots = polynomial_real_roots([0.0, 1.0, 0.0, 0.0, -1.0]);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quartic_four_real_roots() {
        // (x² − 1)(x² − 4) = x⁴ − 5x² + 4
        let roots = sorted(polynomial_real_roots([1.0, 0.0, -5.0, 0.0, 4.0]));
        assert_eq!(roots.len(), 4);
        for (root, expected) in roots.iter().zip([-2.0, -1.0, 1.0, 2.0]) {
            assert_relative_eq!(*root, expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_quartic_mixed_roots() {
        // (x² + 1)(x − 1)(x − 2) = x⁴ − 3x³ + 3x² − 3x + 2: two real roots.
        let roots = sorted(polynomial_real_roots([1.0, -3.0, 3.0, -3.0, 2.0]));
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn test_quartic_leading_coefficient_guard() {
        // Tiny quartic coefficient relative to the cubic one degrades to the
        // cubic (x − 1)(x − 2)(x − 3).
        let roots = sorted(polynomial_real_roots([1e-12, 1.0, -6.0, 11.0, -6.0]));
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-9);
    }
}
