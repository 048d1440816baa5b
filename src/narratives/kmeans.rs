// k-means over unit vectors through linfa-clustering, with an elbow search
// for k.
//
// Distances are squared Euclidean; on unit vectors that is 2 − 2·cos, so the
// partition matches a cosine one. Pools larger than one batch are fitted
// incrementally, one contiguous batch at a time, until linfa reports
// convergence. All randomness comes from one seeded Xoshiro256Plus, so the
// same points and seed give the same clustering.

use linfa::prelude::*;
use linfa_clustering::{IncrKMeansError, KMeans};
use ndarray::{s, Array1, Array2};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use thiserror::Error;

/// Relative centroid movement linfa treats as converged.
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub k: usize,
    pub batch_size: usize,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 8,
            batch_size: 256,
            max_iter: 200,
            seed: 42,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("no points to cluster")]
    Empty,
    #[error("k must be positive")]
    ZeroK,
    #[error("points have inconsistent dimensions")]
    Ragged,
    #[error("k-means fit failed: {0}")]
    Fit(String),
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// One centroid per row.
    pub centroids: Array2<f64>,
    /// Centroid index per input point.
    pub labels: Vec<usize>,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

impl KMeansFit {
    pub fn k(&self) -> usize {
        self.centroids.nrows()
    }
}

/// Stack equally sized points into a row matrix.
fn to_matrix(points: &[Vec<f64>]) -> Result<Array2<f64>, ClusterError> {
    let dim = points.first().map(Vec::len).ok_or(ClusterError::Empty)?;
    if points.iter().any(|p| p.len() != dim) {
        return Err(ClusterError::Ragged);
    }
    let flat: Vec<f64> = points.iter().flatten().copied().collect();
    Array2::from_shape_vec((points.len(), dim), flat).map_err(|e| ClusterError::Fit(e.to_string()))
}

/// Number of distinct rows. k-means++ cannot seed more centroids than this.
fn distinct_rows(records: &Array2<f64>) -> usize {
    let mut rows: Vec<Vec<u64>> = records
        .rows()
        .into_iter()
        .map(|r| r.iter().map(|x| x.to_bits()).collect())
        .collect();
    rows.sort_unstable();
    rows.dedup();
    rows.len()
}

fn inertia(records: &Array2<f64>, centroids: &Array2<f64>, labels: &[usize]) -> f64 {
    records
        .rows()
        .into_iter()
        .zip(labels)
        .map(|(point, &c)| {
            point
                .iter()
                .zip(centroids.row(c).iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
        })
        .sum()
}

/// Every point in one cluster at their common position.
fn single_cluster(records: &Array2<f64>) -> KMeansFit {
    let centroid = records.row(0).to_owned().insert_axis(ndarray::Axis(0));
    let labels = vec![0; records.nrows()];
    let inertia = inertia(records, &centroid, &labels);
    KMeansFit {
        centroids: centroid,
        labels,
        inertia,
    }
}

/// Cluster `points` into at most `config.k` groups (never more than there are
/// distinct points).
pub fn fit(points: &[Vec<f64>], config: &KMeansConfig) -> Result<KMeansFit, ClusterError> {
    if config.k == 0 {
        return Err(ClusterError::ZeroK);
    }
    let records = to_matrix(points)?;
    let n = records.nrows();
    let batch = config.batch_size.max(1).min(n);

    // The first batch seeds the centroids, so it bounds k.
    let seedable = distinct_rows(&records.slice(s![0..batch, ..]).to_owned());
    let k = config.k.min(seedable);
    if k <= 1 {
        return Ok(single_cluster(&records));
    }

    let params = KMeans::params_with_rng(k, Xoshiro256Plus::seed_from_u64(config.seed))
        .max_n_iterations(config.max_iter.max(1) as u64)
        .tolerance(TOLERANCE);

    let model = if batch >= n {
        let dataset = DatasetBase::new(records.clone(), Array1::from_elem(n, ()));
        params.fit(&dataset).map_err(|e| ClusterError::Fit(e.to_string()))?
    } else {
        let starts: Vec<usize> = (0..n).step_by(batch).collect();
        let mut model = None;
        let mut converged = None;
        for &start in starts.iter().cycle().take(config.max_iter.max(1)) {
            let end = (start + batch).min(n);
            let chunk = records.slice(s![start..end, ..]).to_owned();
            let dataset = DatasetBase::new(chunk, Array1::from_elem(end - start, ()));
            let step: Result<_, IncrKMeansError<_>> = params.fit_with(model.take(), &dataset);
            match step {
                Ok(m) => {
                    converged = Some(m);
                    break;
                }
                Err(IncrKMeansError::NotConverged(m)) => model = Some(m),
                Err(e) => return Err(ClusterError::Fit(e.to_string())),
            }
        }
        converged.or(model).ok_or(ClusterError::Empty)?
    };

    let predicted: Array1<usize> = model.predict(&records);
    let labels: Vec<usize> = predicted.iter().copied().collect();
    let centroids = model.centroids().clone();
    let inertia = inertia(&records, &centroids, &labels);
    Ok(KMeansFit {
        centroids,
        labels,
        inertia,
    })
}

/// Pick k in `1..=max_k` at the knee of the inertia curve: the candidate
/// farthest from the straight line joining the first and last points.
pub fn elbow_k(points: &[Vec<f64>], max_k: usize, config: &KMeansConfig) -> Result<usize, ClusterError> {
    let max_k = max_k.min(points.len()).max(1);
    if max_k <= 2 {
        return Ok(max_k);
    }

    let mut inertias = Vec::with_capacity(max_k);
    for k in 1..=max_k {
        let fit = fit(points, &KMeansConfig { k, ..config.clone() })?;
        inertias.push(fit.inertia);
    }
    Ok(knee(&inertias) + 1)
}

/// Index of the point farthest from the chord between the curve's endpoints.
fn knee(curve: &[f64]) -> usize {
    let last = curve.len() - 1;
    let (x0, y0) = (0.0, curve[0]);
    let (x1, y1) = (last as f64, curve[last]);
    let norm = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    if norm <= f64::EPSILON {
        return 0;
    }

    let mut best = (0, 0.0);
    for (i, &y) in curve.iter().enumerate() {
        let x = i as f64;
        let d = ((y1 - y0) * x - (x1 - x0) * y + x1 * y0 - y1 * x0).abs() / norm;
        if d > best.1 {
            best = (i, d);
        }
    }
    best.0
}
