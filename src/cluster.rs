//! One-dimensional k-means over per-student features.
//!
//! Initialization is deterministic. Run `r` of `n_init` starts from the sorted distinct
//! feature values at an evenly spaced position, then adds the distinct value farthest from
//! every centroid chosen so far. The run with the lowest inertia wins, and earlier runs win
//! ties, so the same input always produces the same partition.

use thiserror::Error;
use tracing::trace;

pub const MAX_CLUSTERS: usize = 3;

/// Inverted scores are shifted by this so that higher features mean better grades.
const INVERSION_BASE: f64 = 6.0;

/// Values closer than this are the same point. Averages of different score sets can land
/// a few ulps apart while being equal at any reported precision.
pub const POINT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    #[error("n_init must be > 0")]
    ZeroInit,

    #[error("max_iterations must be > 0")]
    ZeroIterations,

    #[error("cannot cluster an empty set of points")]
    Empty,

    #[error("feature values must be finite")]
    NonFinite,

    #[error("k ({k}) must be between 1 and the number of distinct points ({distinct})")]
    InvalidK { k: usize, distinct: usize },

    #[error("no tier mapping exists for {0} clusters")]
    UnsupportedClusterCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansConfig {
    /// Number of differently seeded runs; the lowest-inertia run is kept.
    pub n_init: usize,
    /// Cap on Lloyd iterations per run.
    pub max_iterations: usize,
}

impl KMeansConfig {
    pub fn new(n_init: usize, max_iterations: usize) -> Result<Self, ClusterError> {
        if n_init == 0 {
            return Err(ClusterError::ZeroInit);
        }
        if max_iterations == 0 {
            return Err(ClusterError::ZeroIterations);
        }
        Ok(Self {
            n_init,
            max_iterations,
        })
    }
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_init: 10,
            max_iterations: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub labels: Vec<usize>,
    pub centroids: Vec<f64>,
    pub inertia: f64,
    pub iterations: usize,
}

/// Inverts canonical averages (lower is better) and min-max scales them to [0, 1].
///
/// A group with no spread maps every student to 0.5.
pub fn clustering_features(averages: &[f64]) -> Vec<f64> {
    let inverted: Vec<f64> = averages.iter().map(|avg| INVERSION_BASE - avg).collect();
    let min = inverted.iter().copied().fold(f64::INFINITY, f64::min);
    let max = inverted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if !range.is_finite() || range.abs() <= POINT_TOLERANCE {
        return vec![0.5; inverted.len()];
    }

    inverted.iter().map(|value| (value - min) / range).collect()
}

pub fn cluster_count(features: &[f64]) -> usize {
    MAX_CLUSTERS.min(distinct_sorted(features).len())
}

fn distinct_sorted(points: &[f64]) -> Vec<f64> {
    let mut values = points.to_vec();
    values.sort_by(f64::total_cmp);
    values.dedup_by(|later, kept| (*later - *kept).abs() <= POINT_TOLERANCE);
    values
}

pub fn kmeans(points: &[f64], k: usize, config: &KMeansConfig) -> Result<Partition, ClusterError> {
    if points.is_empty() {
        return Err(ClusterError::Empty);
    }
    if points.iter().any(|p| !p.is_finite()) {
        return Err(ClusterError::NonFinite);
    }
    KMeansConfig::new(config.n_init, config.max_iterations)?;

    let distinct = distinct_sorted(points);
    if k == 0 || k > distinct.len() {
        return Err(ClusterError::InvalidK {
            k,
            distinct: distinct.len(),
        });
    }

    let mut best: Option<Partition> = None;
    for run in 0..config.n_init {
        let seeds = initial_centroids(&distinct, k, run, config.n_init);
        let partition = lloyd(points, seeds, config.max_iterations);
        trace!(
            run,
            inertia = partition.inertia,
            iterations = partition.iterations,
            "k-means run finished"
        );
        if best
            .as_ref()
            .map_or(true, |current| partition.inertia < current.inertia)
        {
            best = Some(partition);
        }
    }

    best.ok_or(ClusterError::ZeroInit)
}

fn initial_centroids(distinct: &[f64], k: usize, run: usize, n_init: usize) -> Vec<f64> {
    let last = distinct.len() - 1;
    let first = if n_init <= 1 {
        0
    } else {
        let span = n_init - 1;
        (run * last + span / 2) / span
    };

    let mut centroids = Vec::with_capacity(k);
    centroids.push(distinct[first]);

    while centroids.len() < k {
        let mut farthest = 0;
        let mut farthest_distance = f64::NEG_INFINITY;
        for (i, value) in distinct.iter().enumerate() {
            let distance = centroids
                .iter()
                .map(|c: &f64| (value - c).abs())
                .fold(f64::INFINITY, f64::min);
            if distance > farthest_distance {
                farthest = i;
                farthest_distance = distance;
            }
        }
        centroids.push(distinct[farthest]);
    }

    centroids
}

fn nearest(point: f64, centroids: &[f64]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (j, centroid) in centroids.iter().enumerate() {
        let distance = (point - centroid).powi(2);
        if distance < best_distance {
            best = j;
            best_distance = distance;
        }
    }
    best
}

fn lloyd(points: &[f64], mut centroids: Vec<f64>, max_iterations: usize) -> Partition {
    let k = centroids.len();
    let mut labels: Vec<usize> = Vec::new();
    let mut iterations = 0;

    for iteration in 0..max_iterations {
        iterations = iteration + 1;

        let assigned: Vec<usize> = points.iter().map(|&p| nearest(p, &centroids)).collect();
        if assigned == labels {
            break;
        }
        labels = assigned;

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&point, &label) in points.iter().zip(labels.iter()) {
            sums[label] += point;
            counts[label] += 1;
        }
        for (j, centroid) in centroids.iter_mut().enumerate() {
            // An emptied cluster keeps its previous centroid.
            if counts[j] > 0 {
                *centroid = sums[j] / counts[j] as f64;
            }
        }
    }

    let inertia: f64 = points
        .iter()
        .zip(labels.iter())
        .map(|(&point, &label)| (point - centroids[label]).powi(2))
        .sum();

    Partition {
        labels,
        centroids,
        inertia,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_invert_and_scale_to_unit_range() {
        let features = clustering_features(&[1.0, 3.0, 5.0]);
        assert_eq!(features, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn identical_averages_map_to_midpoint() {
        assert_eq!(clustering_features(&[2.25, 2.25, 2.25]), vec![0.5, 0.5, 0.5]);
        assert_eq!(cluster_count(&[0.5, 0.5, 0.5]), 1);
    }

    #[test]
    fn float_noise_between_equal_averages_is_no_spread() {
        use crate::normalize::percentage_to_canonical;

        // 91% and 77% average to 1.64, as does a lone 84%, up to rounding error.
        let averages = [
            (percentage_to_canonical(91.0) + percentage_to_canonical(77.0)) / 2.0,
            percentage_to_canonical(84.0),
        ];
        assert_eq!(clustering_features(&averages), vec![0.5, 0.5]);
        assert_eq!(cluster_count(&[0.3, 0.3 + 4e-16, 0.9]), 2);
    }

    #[test]
    fn cluster_count_is_bounded_by_students_and_distinct_values() {
        assert_eq!(cluster_count(&[0.0, 1.0]), 2);
        assert_eq!(cluster_count(&[0.0, 0.2, 0.6, 1.0]), 3);
        assert_eq!(cluster_count(&[0.0, 0.0, 1.0, 1.0]), 2);
    }

    #[test]
    fn separates_well_spaced_groups() {
        let points = [0.0, 0.05, 0.1, 0.5, 0.55, 0.95, 1.0];
        let partition = kmeans(&points, 3, &KMeansConfig::default()).unwrap();

        let labels = &partition.labels;
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[5], labels[6]);
        assert_ne!(labels[0], labels[3]);
        assert_ne!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[5]);

        let mut centroids = partition.centroids.clone();
        centroids.sort_by(f64::total_cmp);
        assert!((centroids[0] - 0.05).abs() < 1e-9);
        assert!((centroids[1] - 0.525).abs() < 1e-9);
        assert!((centroids[2] - 0.975).abs() < 1e-9);
    }

    #[test]
    fn identical_input_gives_identical_partition() {
        let points = [0.3, 0.9, 0.1, 0.45, 0.8, 0.0, 1.0, 0.62];
        let config = KMeansConfig::default();
        let first = kmeans(&points, 3, &config).unwrap();
        let second = kmeans(&points, 3, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn more_runs_never_increase_inertia() {
        let points = [0.0, 0.1, 0.2, 0.48, 0.5, 0.52, 0.9, 1.0];
        let single = kmeans(&points, 3, &KMeansConfig::new(1, 300).unwrap()).unwrap();
        let many = kmeans(&points, 3, &KMeansConfig::new(10, 300).unwrap()).unwrap();
        assert!(many.inertia <= single.inertia);
    }

    #[test]
    fn single_cluster_centroid_is_the_mean() {
        let partition = kmeans(&[0.2, 0.4], 1, &KMeansConfig::default()).unwrap();
        assert_eq!(partition.labels, vec![0, 0]);
        assert!((partition.centroids[0] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn rejects_invalid_input() {
        let config = KMeansConfig::default();
        assert_eq!(kmeans(&[], 1, &config), Err(ClusterError::Empty));
        assert_eq!(
            kmeans(&[0.5, 0.5], 2, &config),
            Err(ClusterError::InvalidK { k: 2, distinct: 1 })
        );
        assert_eq!(kmeans(&[f64::NAN], 1, &config), Err(ClusterError::NonFinite));
        assert_eq!(KMeansConfig::new(0, 10), Err(ClusterError::ZeroInit));
        assert_eq!(KMeansConfig::new(10, 0), Err(ClusterError::ZeroIterations));
    }
}
