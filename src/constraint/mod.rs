//! Constraint system assembly.
//!
//! Consumes the step's contact geometry and produces the sparse Jacobian
//! blocks, the compliance vector `E`, the stabilization terms `b` and the
//! solver right-hand side `r = −b − D·M⁻¹k`. Assembly is data-parallel over
//! contacts; the only ordering requirement is that the sparsity-declaration
//! pass finishes before the parallel value fill, because the CSR storage
//! layout is finalized exactly once.
//!
//! Also hosts the friction-cone projection operator ([`projection`]) and the
//! post-solve velocity recovery.

pub mod jacobian;
pub mod projection;

use nalgebra::{DVector, Vector3, Vector4};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::linalg::{empty_csr, spmv};
use crate::types::DataManager;
use jacobian::{compute_jacobian, compute_jacobian_rolling, orthogonalize};

/// Per-contact Jacobian entries, produced in one parallel pass and scattered
/// into the CSR blocks in the next.
struct ContactJacobian {
    /// Contact frame: normal, tangent 1, tangent 2.
    u: Vector3<f64>,
    v: Vector3<f64>,
    w: Vector3<f64>,
    /// Angular sensitivities for body A, translational rows.
    t_a: [Vector3<f64>; 3],
    /// Angular sensitivities for body B, translational rows.
    t_b: [Vector3<f64>; 3],
    /// Angular sensitivities for body A, spin rows (Spinning mode).
    spin_a: [Vector3<f64>; 3],
    /// Angular sensitivities for body B, spin rows.
    spin_b: [Vector3<f64>; 3],
}

/// Assemble the full constraint system for the step.
///
/// Expects [`DataManager::configure_step`] to have run. After this call the
/// sparse blocks, `E`, `b` and `r` are ready and any of the solvers may run.
pub fn assemble(data: &mut DataManager) {
    combine_materials(data);
    let jacobians = compute_contact_jacobians(data);
    generate_sparsity(data);
    fill_jacobian(data, &jacobians);
    build_mass_operator(data);
    build_b(data);
    build_e(data);
    build_rhs(data);
}

/// Combine the two bodies' material parameters into per-contact values,
/// in parallel. Friction and cohesion combine by minimum (the weaker
/// surface governs).
fn combine_materials(data: &mut DataManager) {
    let (fric, coh): (Vec<_>, Vec<_>) = data
        .bids
        .par_iter()
        .map(|&[a, b]| {
            let fa = data.friction[a];
            let fb = data.friction[b];
            (fa.inf(&fb), data.cohesion[a].min(data.cohesion[b]))
        })
        .unzip();
    data.contact_friction = fric;
    data.contact_cohesion = coh;
}

/// Build every contact's frame and Jacobian entries, in parallel. No
/// cross-contact dependency exists, so the loop is flat.
fn compute_contact_jacobians(data: &DataManager) -> Vec<ContactJacobian> {
    let spinning = data.layout.mode().has_spinning();
    (0..data.num_contacts)
        .into_par_iter()
        .map(|i| {
            let u = data.norm[i];
            let (v, w) = orthogonalize(&u);
            let [a, b] = data.bids[i];

            let t_a = compute_jacobian(&data.rot[a], &u, &v, &w, &data.cpta[i]);
            let t_b = compute_jacobian(&data.rot[b], &u, &v, &w, &data.cptb[i]);

            let (spin_a, spin_b) = if spinning {
                (
                    compute_jacobian_rolling(&data.rot[a], &u, &v, &w),
                    compute_jacobian_rolling(&data.rot[b], &u, &v, &w),
                )
            } else {
                ([Vector3::zeros(); 3], [Vector3::zeros(); 3])
            };

            ContactJacobian {
                u,
                v,
                w,
                t_a,
                t_b,
                spin_a,
                spin_b,
            }
        })
        .collect()
}

/// Append one row's nonzero positions for a body pair: the full 6-DOF block
/// of each body (translational rows).
fn append_pair_row(coo: &mut CooMatrix<f64>, row: usize, a: usize, b: usize) {
    for body in [a, b] {
        for k in 0..6 {
            coo.push(row, body * 6 + k, 0.0);
        }
    }
}

/// Declare the nonzero structure of every Jacobian block and finalize the
/// CSR storage. Must complete, in full, before [`fill_jacobian`] runs:
/// the value fill writes concurrently into rows of the finalized layout.
fn generate_sparsity(data: &mut DataManager) {
    let nb6 = data.num_bodies * 6;
    let nc = data.num_contacts;
    let mode = data.layout.mode();

    let mut coo_n = CooMatrix::new(nc, nb6);
    for (i, &[a, b]) in data.bids.iter().enumerate() {
        append_pair_row(&mut coo_n, i, a, b);
    }
    data.d_n_t = CsrMatrix::from(&coo_n);

    if mode.has_tangential() {
        let mut coo_t = CooMatrix::new(nc * 2, nb6);
        for (i, &[a, b]) in data.bids.iter().enumerate() {
            append_pair_row(&mut coo_t, i * 2, a, b);
            append_pair_row(&mut coo_t, i * 2 + 1, a, b);
        }
        data.d_t_t = CsrMatrix::from(&coo_t);
    } else {
        data.d_t_t = empty_csr(0, nb6);
    }

    if mode.has_spinning() {
        // Spin rows only touch the angular DOFs.
        let mut coo_s = CooMatrix::new(nc * 3, nb6);
        for (i, &[a, b]) in data.bids.iter().enumerate() {
            for row in i * 3..i * 3 + 3 {
                for body in [a, b] {
                    for k in 3..6 {
                        coo_s.push(row, body * 6 + k, 0.0);
                    }
                }
            }
        }
        data.d_s_t = CsrMatrix::from(&coo_s);
    } else {
        data.d_s_t = empty_csr(0, nb6);
    }

    let mut coo_b = CooMatrix::new(data.num_bilaterals, nb6);
    for (j, row) in data.bilaterals.iter().enumerate() {
        append_pair_row(&mut coo_b, j, row.body_a, row.body_b);
    }
    data.d_b_t = CsrMatrix::from(&coo_b);
}

/// Scatter a 6-entry block pair into one CSR row. The CSR layout sorts
/// columns, so the lower body index owns the first half of the row.
fn write_pair_blocks(chunk: &mut [f64], a: usize, b: usize, block_a: [f64; 6], block_b: [f64; 6]) {
    let (first, second) = if a < b {
        (block_a, block_b)
    } else {
        (block_b, block_a)
    };
    chunk[..6].copy_from_slice(&first);
    chunk[6..12].copy_from_slice(&second);
}

/// Pack a linear direction and an angular sensitivity into a 6-entry block.
fn pack_block(linear: Vector3<f64>, angular: Vector3<f64>) -> [f64; 6] {
    [linear.x, linear.y, linear.z, angular.x, angular.y, angular.z]
}

/// Fill the pre-registered nonzeros of every block, rows in parallel. Each
/// block's rows carry a uniform nonzero count, so the value buffer splits
/// into disjoint per-row chunks.
fn fill_jacobian(data: &mut DataManager, jacobians: &[ContactJacobian]) {
    let bids = &data.bids;
    let mode = data.layout.mode();

    data.d_n_t
        .values_mut()
        .par_chunks_mut(12)
        .enumerate()
        .for_each(|(i, chunk)| {
            let jac = &jacobians[i];
            let [a, b] = bids[i];
            write_pair_blocks(
                chunk,
                a,
                b,
                pack_block(-jac.u, jac.t_a[0]),
                pack_block(jac.u, -jac.t_b[0]),
            );
        });

    if mode.has_tangential() {
        data.d_t_t
            .values_mut()
            .par_chunks_mut(12)
            .enumerate()
            .for_each(|(row, chunk)| {
                let i = row / 2;
                let axis = row % 2 + 1; // 1 = V, 2 = W
                let jac = &jacobians[i];
                let [a, b] = bids[i];
                let dir = if axis == 1 { jac.v } else { jac.w };
                write_pair_blocks(
                    chunk,
                    a,
                    b,
                    pack_block(-dir, jac.t_a[axis]),
                    pack_block(dir, -jac.t_b[axis]),
                );
            });
    }

    if mode.has_spinning() {
        data.d_s_t
            .values_mut()
            .par_chunks_mut(6)
            .enumerate()
            .for_each(|(row, chunk)| {
                let i = row / 3;
                let axis = row % 3;
                let jac = &jacobians[i];
                let [a, b] = bids[i];
                let block_a = -jac.spin_a[axis];
                let block_b = jac.spin_b[axis];
                let (first, second) = if a < b {
                    (block_a, block_b)
                } else {
                    (block_b, block_a)
                };
                chunk[..3].copy_from_slice(first.as_slice());
                chunk[3..6].copy_from_slice(second.as_slice());
            });
    }

    // Bilateral rows come pre-linearized; scatter them as-is.
    let bilaterals = &data.bilaterals;
    data.d_b_t
        .values_mut()
        .par_chunks_mut(12)
        .enumerate()
        .for_each(|(j, chunk)| {
            let row = &bilaterals[j];
            write_pair_blocks(chunk, row.body_a, row.body_b, row.jac_a, row.jac_b);
        });
}

/// Build the per-DOF inverse mass diagonal and the `M⁻¹·D` blocks.
///
/// The inverse inertia is diagonal in the body frame and the Jacobian's
/// angular columns live in the same frame, so `M⁻¹` reduces to a row scale
/// of each transposed block.
fn build_mass_operator(data: &mut DataManager) {
    for i in 0..data.num_bodies {
        if !data.active[i] {
            continue; // minv_diag stays zero: the body cannot be pushed.
        }
        for k in 0..3 {
            data.minv_diag[i * 6 + k] = data.inv_mass[i];
            data.minv_diag[i * 6 + 3 + k] = data.inv_inertia[i][k];
        }
    }

    data.m_inv_d_n = scaled_transpose(&data.d_n_t, &data.minv_diag);
    data.m_inv_d_t = scaled_transpose(&data.d_t_t, &data.minv_diag);
    data.m_inv_d_s = scaled_transpose(&data.d_s_t, &data.minv_diag);
    data.m_inv_d_b = scaled_transpose(&data.d_b_t, &data.minv_diag);
}

/// `M⁻¹·Dᵀ` for one block: transpose of the stored row-major block with
/// each DOF row scaled by the inverse mass diagonal, built in one pass.
fn scaled_transpose(d_t: &CsrMatrix<f64>, minv_diag: &DVector<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(d_t.ncols(), d_t.nrows());
    let offsets = d_t.row_offsets();
    let cols = d_t.col_indices();
    let vals = d_t.values();
    for r in 0..d_t.nrows() {
        for k in offsets[r]..offsets[r + 1] {
            coo.push(cols[k], r, vals[k] * minv_diag[cols[k]]);
        }
    }
    CsrMatrix::from(&coo)
}

/// Baumgarte-type stabilization term for the normal rows, plus the supplied
/// bilateral correction terms.
///
/// With a positive compliance time constant the soft form `depth/(h+α)` is
/// used; otherwise the penetration recovery speed is capped (a negative cap
/// disables the clamp). Separated contacts never reach this point.
fn build_b(data: &mut DataManager) {
    let layout = data.layout;
    for (j, row) in data.bilaterals.iter().enumerate() {
        data.b[layout.bilateral(j)] = row.rhs;
    }

    if data.num_contacts == 0 {
        return;
    }

    let h = data.step_size;
    let alpha = data.settings.alpha;
    let recovery = data.settings.contact_recovery_speed;
    let inv_h = 1.0 / h;
    let inv_hpa = 1.0 / (h + alpha);

    let depth = &data.depth;
    data.b.as_mut_slice()[layout.normal_range()]
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, bi)| {
            *bi = if alpha > 0.0 {
                inv_hpa * depth[i]
            } else if recovery < 0.0 {
                inv_h * depth[i]
            } else {
                (inv_h * depth[i]).max(-recovery)
            };
        });
}

/// Compliance vector `E`: per-channel arithmetic mean of the two bodies'
/// compliance, zero if either body is rigid in that channel, scaled by
/// `1/(h·(h+α))` to act as a diagonal regularizer in impulse space.
fn build_e(data: &mut DataManager) {
    if data.num_contacts == 0 {
        return;
    }
    let layout = data.layout;
    let h = data.step_size;
    let inv_hhpa = 1.0 / (h * (h + data.settings.alpha));

    let combine = |ca: f64, cb: f64| {
        if ca == 0.0 || cb == 0.0 {
            0.0
        } else {
            (ca + cb) * 0.5 * inv_hhpa
        }
    };

    for (i, &[a, b]) in data.bids.iter().enumerate() {
        let ca: Vector4<f64> = data.compliance[a];
        let cb: Vector4<f64> = data.compliance[b];

        data.e[layout.normal(i)] = combine(ca.x, cb.x);
        if layout.mode().has_tangential() {
            let tangential = combine(ca.y, cb.y);
            data.e[layout.tangential(i, 0)] = tangential;
            data.e[layout.tangential(i, 1)] = tangential;
        }
        if layout.mode().has_spinning() {
            let rolling = combine(ca.z, cb.z);
            data.e[layout.spinning(i, 0)] = combine(ca.w, cb.w);
            data.e[layout.spinning(i, 1)] = rolling;
            data.e[layout.spinning(i, 2)] = rolling;
        }
    }
}

/// `M⁻¹k = v + M⁻¹·hf`, then `r = −b − D·M⁻¹k` over every active block.
fn build_rhs(data: &mut DataManager) {
    for k in 0..data.num_bodies * 6 {
        data.m_inv_k[k] = data.v[k] + data.minv_diag[k] * data.hf[k];
    }

    let layout = data.layout;
    let m_inv_k = data.m_inv_k.as_slice();
    let r = data.r.as_mut_slice();

    spmv(&data.d_n_t, m_inv_k, &mut r[layout.normal_range()], false);
    if layout.mode().has_tangential() {
        spmv(&data.d_t_t, m_inv_k, &mut r[layout.tangential_range()], false);
    }
    if layout.mode().has_spinning() {
        spmv(&data.d_s_t, m_inv_k, &mut r[layout.spinning_range()], false);
    }
    spmv(&data.d_b_t, m_inv_k, &mut r[layout.bilateral_range()], false);

    let b = data.b.as_slice();
    r.par_iter_mut().enumerate().for_each(|(i, ri)| {
        *ri = -b[i] - *ri;
    });
}

/// Recover the corrected velocities from the solved impulses:
/// `v⁺ = M⁻¹k + M⁻¹Dᵀ·γ`. Writes the result back into the store's velocity
/// array for the (external) integrator to consume.
pub fn recover_velocities(data: &mut DataManager) {
    let layout = data.layout;
    data.v.copy_from(&data.m_inv_k);

    let gamma = data.gamma.as_slice();
    let v = data.v.as_mut_slice();

    spmv(&data.m_inv_d_n, &gamma[layout.normal_range()], v, true);
    if layout.mode().has_tangential() {
        spmv(&data.m_inv_d_t, &gamma[layout.tangential_range()], v, true);
    }
    if layout.mode().has_spinning() {
        spmv(&data.m_inv_d_s, &gamma[layout.spinning_range()], v, true);
    }
    spmv(&data.m_inv_d_b, &gamma[layout.bilateral_range()], v, true);
}

/// Sliding-speed diagnostic: `s_i = μ_i·‖(Dₜ·v⁺)_i‖`, the friction-scaled
/// tangential relative speed at the corrected velocities. Meaningful only
/// in the friction modes; [`recover_velocities`] must have run.
pub fn build_sliding_speed(data: &mut DataManager) {
    if data.num_contacts == 0 || !data.layout.mode().has_tangential() {
        return;
    }

    let mut tangential_vel = DVector::zeros(data.num_contacts * 2);
    spmv(
        &data.d_t_t,
        data.v.as_slice(),
        tangential_vel.as_mut_slice(),
        false,
    );

    let fric = &data.contact_friction;
    let tv = tangential_vel.as_slice();
    data.s
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, si)| {
            let sv = tv[i * 2];
            let sw = tv[i * 2 + 1];
            *si = (sv * sv + sw * sw).sqrt() * fric[i].x;
        });
}
