use crate::cluster::{self, ClusterError, KMeansConfig};
use crate::models::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub cluster: usize,
    pub tier: Tier,
}

/// Maps each cluster index to a tier by centroid rank; the highest centroid is the best tier.
pub fn tier_labels(centroids: &[f64]) -> Result<Vec<Tier>, ClusterError> {
    let ladder: &[Tier] = match centroids.len() {
        1 => &[Tier::B],
        2 => &[Tier::C, Tier::A],
        3 => &[Tier::C, Tier::B, Tier::A],
        other => return Err(ClusterError::UnsupportedClusterCount(other)),
    };

    let mut ranked: Vec<usize> = (0..centroids.len()).collect();
    ranked.sort_by(|&a, &b| centroids[a].total_cmp(&centroids[b]).then(a.cmp(&b)));

    let mut tiers = vec![Tier::B; centroids.len()];
    for (rank, &cluster) in ranked.iter().enumerate() {
        tiers[cluster] = ladder[rank];
    }
    Ok(tiers)
}

/// Clusters canonical averages and returns one assignment per input, in input order.
///
/// Returns `None` when fewer than two values are given, since a lone student has nothing
/// to be ranked against.
pub fn assign_tiers(
    averages: &[f64],
    config: &KMeansConfig,
) -> Result<Option<Vec<ClusterAssignment>>, ClusterError> {
    if averages.len() < 2 {
        return Ok(None);
    }

    let features = cluster::clustering_features(averages);
    let k = cluster::cluster_count(&features);
    let partition = cluster::kmeans(&features, k, config)?;
    let tiers = tier_labels(&partition.centroids)?;

    Ok(Some(
        partition
            .labels
            .iter()
            .map(|&cluster| ClusterAssignment {
                cluster,
                tier: tiers[cluster],
            })
            .collect(),
    ))
}
