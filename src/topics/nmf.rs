// Non-negative matrix factorization, V ≈ W·H, by multiplicative updates.
//
// V is the sparse TF-IDF document/term matrix (n × m), W the document/topic
// weights (n × k), H the topic/term weights (k × m). Updates follow Lee and
// Seung for the Frobenius loss:
//
//   H ← H ∘ (WᵀV) / (WᵀW·H)
//   W ← W ∘ (V·Hᵀ) / (W·H·Hᵀ)
//
// Factors are dense ndarray matrices. V stays sparse and only its non-zeros
// are touched, so one iteration costs O(nnz·k + k²·(n + m)). Initialisation draws from a seeded StdRng; the same
// input and seed always give the same factors.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Guards the multiplicative denominators against division by zero.
const EPS: f64 = 1e-10;

/// Reconstruction error is checked every this many iterations.
const CHECK_EVERY: usize = 10;

#[derive(Debug, Clone)]
pub struct NmfConfig {
    pub rank: usize,
    pub max_iter: usize,
    /// Stop when the relative error improvement between checks drops below this.
    pub tol: f64,
    pub seed: u64,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            rank: 5,
            max_iter: 300,
            tol: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NmfError {
    #[error("matrix is empty")]
    Empty,
    #[error("rank must be positive")]
    ZeroRank,
    #[error("factorization diverged at iteration {0}")]
    NonFinite(usize),
}

#[derive(Debug, Clone)]
pub struct NmfFit {
    /// n × k
    pub w: Array2<f64>,
    /// k × m
    pub h: Array2<f64>,
    pub iterations: usize,
    /// Frobenius norm of V − W·H at the last check.
    pub error: f64,
}

impl NmfFit {
    /// Highest-weight topic for each document. Ties go to the lower index.
    pub fn assignments(&self) -> Vec<usize> {
        self.w
            .axis_iter(Axis(0))
            .map(|row| {
                let mut best = 0;
                for (t, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = t;
                    }
                }
                best
            })
            .collect()
    }

    /// Term indices of topic `t` ordered by weight, zero weights excluded.
    pub fn top_terms(&self, t: usize, limit: usize) -> Vec<usize> {
        let row = self.h.row(t);
        let mut order: Vec<usize> = (0..row.len()).filter(|&j| row[j] > 0.0).collect();
        order.sort_by(|&a, &b| {
            row[b]
                .partial_cmp(&row[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        order.truncate(limit);
        order
    }
}

/// Factorize the sparse matrix given as rows of (column, value).
pub fn factorize(rows: &[Vec<(usize, f64)>], n_terms: usize, config: &NmfConfig) -> Result<NmfFit, NmfError> {
    let n = rows.len();
    let m = n_terms;
    let k = config.rank;
    if n == 0 || m == 0 {
        return Err(NmfError::Empty);
    }
    if k == 0 {
        return Err(NmfError::ZeroRank);
    }

    let total: f64 = rows.iter().flatten().map(|(_, v)| v).sum();
    let v_norm_sq: f64 = rows.iter().flatten().map(|(_, v)| v * v).sum();
    let scale = (total / (n * m) as f64 / k as f64).sqrt();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut w = Array2::from_shape_fn((n, k), |_| scale * rng.random::<f64>());
    let mut h = Array2::from_shape_fn((k, m), |_| scale * rng.random::<f64>());

    let initial_error = reconstruction_error(rows, &w, &h, v_norm_sq);
    let mut previous_error = initial_error;
    let mut iterations = 0;

    for iter in 1..=config.max_iter {
        iterations = iter;

        // H update
        let wtv = sparse_wt_v(rows, &w, m);
        let denom = w.t().dot(&w).dot(&h) + EPS;
        h = h * wtv / denom;

        // W update
        let vht = sparse_v_ht(rows, &h);
        let denom = w.dot(&h.dot(&h.t())) + EPS;
        w = w * vht / denom;

        if iter % CHECK_EVERY == 0 || iter == config.max_iter {
            let error = reconstruction_error(rows, &w, &h, v_norm_sq);
            if !error.is_finite() {
                return Err(NmfError::NonFinite(iter));
            }
            if initial_error > 0.0 && (previous_error - error) / initial_error < config.tol {
                previous_error = error;
                break;
            }
            previous_error = error;
        }
    }

    if !w.iter().chain(h.iter()).all(|x| x.is_finite()) {
        return Err(NmfError::NonFinite(iterations));
    }

    Ok(NmfFit {
        w,
        h,
        iterations,
        error: previous_error,
    })
}

/// WᵀV (k × m) over the non-zeros of V.
fn sparse_wt_v(rows: &[Vec<(usize, f64)>], w: &Array2<f64>, m: usize) -> Array2<f64> {
    let mut out = Array2::zeros((w.ncols(), m));
    for (i, row) in rows.iter().enumerate() {
        let wi = w.row(i);
        for &(j, v) in row {
            out.column_mut(j).scaled_add(v, &wi);
        }
    }
    out
}

/// V·Hᵀ (n × k) over the non-zeros of V.
fn sparse_v_ht(rows: &[Vec<(usize, f64)>], h: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), h.nrows()));
    for (i, row) in rows.iter().enumerate() {
        let mut oi = out.row_mut(i);
        for &(j, v) in row {
            oi.scaled_add(v, &h.column(j));
        }
    }
    out
}

/// ‖V − WH‖ via ‖V‖² − 2⟨V, WH⟩ + ⟨WᵀW, HHᵀ⟩, touching only non-zeros of V.
fn reconstruction_error(rows: &[Vec<(usize, f64)>], w: &Array2<f64>, h: &Array2<f64>, v_norm_sq: f64) -> f64 {
    let mut cross = 0.0;
    for (i, row) in rows.iter().enumerate() {
        let wi = w.row(i);
        for &(j, v) in row {
            cross += v * wi.dot(&h.column(j));
        }
    }
    let model_sq = (w.t().dot(w) * h.dot(&h.t())).sum();
    (v_norm_sq - 2.0 * cross + model_sq).max(0.0).sqrt()
}
