//! Row-major GEMM wrapper over the BLAS backend.
//!
//! All matrix products in the crate go through `sgemm_wrapper`, keeping the
//! unsafe FFI surface in one place.

use cblas::{sgemm, Layout, Transpose};

/// Computes `c = alpha * op(a) * op(b) + beta * c` for row-major matrices.
///
/// # Arguments
///
/// * `m` - Rows of op(a) and of c
/// * `n` - Columns of op(b) and of c
/// * `k` - Columns of op(a) / rows of op(b)
/// * `a`, `lda` - Left matrix and its leading dimension (row stride)
/// * `b`, `ldb` - Right matrix and its leading dimension
/// * `c`, `ldc` - Output matrix and its leading dimension
/// * `transpose_a`, `transpose_b` - Whether to transpose a / b
/// * `alpha`, `beta` - Scaling factors
///
/// # Panics
///
/// Panics if any buffer is too small for the requested dimensions.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_wrapper(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) {
    assert!(c.len() >= m * ldc, "output buffer too small for {}x{}", m, n);
    let a_rows = if transpose_a { k } else { m };
    let b_rows = if transpose_b { n } else { k };
    assert!(a.len() >= a_rows * lda, "left buffer too small");
    assert!(b.len() >= b_rows * ldb, "right buffer too small");

    let trans_a = if transpose_a {
        Transpose::Ordinary
    } else {
        Transpose::None
    };
    let trans_b = if transpose_b {
        Transpose::Ordinary
    } else {
        Transpose::None
    };

    unsafe {
        sgemm(
            Layout::RowMajor,
            trans_a,
            trans_b,
            m as i32,
            n as i32,
            k as i32,
            alpha,
            a,
            lda as i32,
            b,
            ldb as i32,
            beta,
            c,
            ldc as i32,
        );
    }
}

/// Add a bias vector to each row of a row-major matrix.
pub fn add_bias(data: &mut [f32], rows: usize, cols: usize, bias: &[f32]) {
    assert_eq!(bias.len(), cols, "bias length mismatch in add_bias");
    for row in data.chunks_exact_mut(cols).take(rows) {
        for (value, b) in row.iter_mut().zip(bias) {
            *value += *b;
        }
    }
}
