use std::ops::{Index, IndexMut};

use crate::error::ModelError;

/// Dense row-major square matrix of `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SquareMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn size(&self) -> usize { self.n }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.n..(i + 1) * self.n]
    }
}

impl Index<(usize, usize)> for SquareMatrix {
    type Output = f64;
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.n + j]
    }
}

impl IndexMut<(usize, usize)> for SquareMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.n + j]
    }
}

const MAX_JACOBI_SWEEPS: usize = 100;

/// Spectral decomposition of a time-reversible rate matrix.
///
/// A reversible `Q` with stationary distribution `π` symmetrizes as
/// `B = D^{1/2} Q D^{-1/2}` (`D = diag(π)`), whose eigensystem yields
/// `P(t) = D^{-1/2} · U · exp(Λt) · Uᵀ · D^{1/2}` in closed form for any `t`.
#[derive(Debug, Clone)]
pub struct Eigen {
    values: Vec<f64>,
    /// Eigenvector matrix `U`: column `k` holds the eigenvector of `values[k]`.
    vectors: SquareMatrix,
    sqrt_pi: Vec<f64>,
    inv_sqrt_pi: Vec<f64>,
}

impl Eigen {
    pub fn decompose(q: &SquareMatrix, freqs: &[f64]) -> Result<Self, ModelError> {
        let n = q.size();
        let sqrt_pi: Vec<f64> = freqs.iter().map(|&f| f.sqrt()).collect();
        let inv_sqrt_pi: Vec<f64> = sqrt_pi.iter().map(|&f| 1.0 / f).collect();

        let mut b = SquareMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                b[(i, j)] = sqrt_pi[i] * q[(i, j)] * inv_sqrt_pi[j];
            }
        }
        // Force exact symmetry against frequency round-off.
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (b[(i, j)] + b[(j, i)]);
                b[(i, j)] = avg;
                b[(j, i)] = avg;
            }
        }

        let (values, vectors) = jacobi(&mut b)?;
        Ok(Self { values, vectors, sqrt_pi, inv_sqrt_pi })
    }

    /// Transition probability matrix `P(t)`. Rows are clamped and
    /// renormalized to cancel round-off drift.
    pub fn p_matrix(&self, t: f64) -> SquareMatrix {
        let n = self.values.len();
        let exp_vals: Vec<f64> = self.values.iter().map(|&l| (l * t).exp()).collect();

        let mut p = SquareMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.vectors[(i, k)] * exp_vals[k] * self.vectors[(j, k)];
                }
                p[(i, j)] = sum * self.inv_sqrt_pi[i] * self.sqrt_pi[j];
            }
            let row = p.row_mut(i);
            for v in row.iter_mut() {
                if *v < 0.0 { *v = 0.0 }
            }
            let total: f64 = row.iter().sum();
            for v in row.iter_mut() { *v /= total }
        }
        p
    }
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix. Returns
/// `(eigenvalues, eigenvectors)` with eigenvector `k` in column `k`.
fn jacobi(a: &mut SquareMatrix) -> Result<(Vec<f64>, SquareMatrix), ModelError> {
    let n = a.size();
    let mut v = SquareMatrix::zeros(n);
    for i in 0..n { v[(i, i)] = 1.0 }

    for _sweep in 0..MAX_JACOBI_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| a[(i, j)] * a[(i, j)])
            .sum();
        if off < 1e-24 {
            let values = (0..n).map(|i| a[(i, i)]).collect();
            return Ok((values, v))
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[(p, q)].abs() < 1e-30 {
                    continue
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * a[(p, q)]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }
    Err(ModelError::EigenNonConvergence(MAX_JACOBI_SWEEPS))
}
