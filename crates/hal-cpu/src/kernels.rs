//! Reference f32 kernels.
//!
//! Straightforward loops written for correctness rather than peak
//! performance. Only the matrix product is spread over the thread pool.

use hal_core::{GraphError, Result};
use rayon::prelude::*;
use rayon::ThreadPool;

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(GraphError::Other(format!("{what}: len {got}, expected {expected}")).into());
    }
    Ok(())
}

/// C = A @ B for row-major `a` [m, k] and `b` [k, n]. Output rows are
/// computed in parallel on `pool`.
pub fn matmul(
    pool: &ThreadPool,
    a: &[f32],
    b: &[f32],
    m: usize,
    k: usize,
    n: usize,
) -> Result<Vec<f32>> {
    check_len("matmul a", a.len(), m * k)?;
    check_len("matmul b", b.len(), k * n)?;

    let mut c = vec![0.0f32; m * n];
    if n == 0 {
        return Ok(c);
    }
    pool.install(|| {
        c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            let a_row = &a[i * k..(i + 1) * k];
            for (p, &av) in a_row.iter().enumerate() {
                let b_row = &b[p * n..(p + 1) * n];
                for (out, &bv) in row.iter_mut().zip(b_row) {
                    *out += av * bv;
                }
            }
        });
    });
    Ok(c)
}

pub fn add(a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
    check_len("add", b.len(), a.len())?;
    Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
}

pub fn mul(a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
    check_len("mul", b.len(), a.len())?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).collect())
}

pub fn scale(a: &[f32], s: f32) -> Vec<f32> {
    a.iter().map(|x| x * s).collect()
}

/// For each row of `hidden_size` elements:
///   rms = sqrt(mean(x^2) + eps)
///   out[i] = x[i] * weight[i] / rms
pub fn rms_norm(x: &[f32], weight: &[f32], eps: f32, hidden_size: usize) -> Result<Vec<f32>> {
    check_len("rms_norm weight", weight.len(), hidden_size)?;
    if hidden_size == 0 || x.len() % hidden_size != 0 {
        return Err(GraphError::Other(format!(
            "rms_norm: len {} is not a multiple of row size {hidden_size}",
            x.len()
        ))
        .into());
    }

    let mut out = vec![0.0f32; x.len()];
    for (row, dst) in x.chunks_exact(hidden_size).zip(out.chunks_exact_mut(hidden_size)) {
        let mean_sq = row.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
        let rms = (mean_sq + eps).sqrt();
        for ((o, &v), &w) in dst.iter_mut().zip(row).zip(weight) {
            *o = v * w / rms;
        }
    }
    Ok(out)
}

/// Softmax over consecutive rows of `row_len` elements.
pub fn softmax(x: &[f32], row_len: usize) -> Result<Vec<f32>> {
    if row_len == 0 || x.len() % row_len != 0 {
        return Err(GraphError::Other(format!(
            "softmax: len {} is not a multiple of row size {row_len}",
            x.len()
        ))
        .into());
    }

    let mut out = vec![0.0f32; x.len()];
    for (row, dst) in x.chunks_exact(row_len).zip(out.chunks_exact_mut(row_len)) {
        // subtract the max for numerical stability
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for (o, &v) in dst.iter_mut().zip(row) {
            *o = (v - max).exp();
            sum += *o;
        }
        dst.iter_mut().for_each(|o| *o /= sum);
    }
    Ok(out)
}

/// x * sigmoid(x)
pub fn silu(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v / (1.0 + (-v).exp())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_matmul_identity() {
        // 2x2 identity @ [1,2;3,4]
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = matmul(&pool(), &a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let c = matmul(&pool(), &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        // [1,2,3] @ [1;1;1] = [6]
        let c = matmul(&pool(), &[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], 1, 3, 1).unwrap();
        assert_eq!(c, vec![6.0]);
        assert!(matmul(&pool(), &[1.0], &[1.0, 2.0], 1, 1, 1).is_err());
    }

    #[test]
    fn test_add_mul_scale() {
        assert_eq!(add(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), vec![4.0, 6.0]);
        assert_eq!(mul(&[2.0, 3.0], &[4.0, 5.0]).unwrap(), vec![8.0, 15.0]);
        assert_eq!(scale(&[1.0, 2.0, 3.0], 2.0), vec![2.0, 4.0, 6.0]);
        assert!(add(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_silu() {
        let r = silu(&[0.0, 1.0]);
        assert_relative_eq!(r[0], 0.0);
        // 1 / (1 + exp(-1))
        assert_relative_eq!(r[1], 0.731_058_6, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_rows() {
        let r = softmax(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0], 3).unwrap();
        assert_relative_eq!(r[..3].iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(r[0] < r[1] && r[1] < r[2]);
        for v in &r[3..] {
            assert_relative_eq!(*v, 1.0 / 3.0, epsilon = 1e-6);
        }
        assert!(softmax(&[1.0, 2.0], 3).is_err());
    }

    #[test]
    fn test_rms_norm() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let w = vec![1.0, 1.0, 1.0, 2.0];
        let r = rms_norm(&x, &w, 1e-5, 4).unwrap();
        let rms = (7.5f32 + 1e-5).sqrt();
        assert_relative_eq!(r[0], 1.0 / rms, epsilon = 1e-5);
        assert_relative_eq!(r[3], 8.0 / rms, epsilon = 1e-5);
        assert!(rms_norm(&x, &w[..3], 1e-5, 4).is_err());
    }
}
