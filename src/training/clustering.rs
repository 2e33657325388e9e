//! Clustering algorithms: KMeans, DBSCAN and agglomerative clustering
//!
//! These are unsupervised models: `fit` ignores any target and `predict`
//! assigns cluster labels to new rows.

use super::knn::{minkowski, DistanceMetric};
use super::{check_features, check_predict, parse_hyperparameters, Model, Scorer};
use crate::error::{PlanError, Result};
use crate::plan::Parameters;
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

fn euclidean_sq(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index and squared distance of the nearest centroid
fn nearest_centroid(row: ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::MAX);
    for (c, centroid) in centroids.rows().into_iter().enumerate() {
        let d = euclidean_sq(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn metric_exponent(model: &str, metric: DistanceMetric) -> Result<f64> {
    match metric {
        DistanceMetric::Euclidean => Ok(2.0),
        DistanceMetric::Manhattan => Ok(1.0),
        DistanceMetric::Minkowski => Err(PlanError::Construction {
            model: model.to_string(),
            reason: "metric must be 'euclidean' or 'manhattan'".to_string(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  K-Means Clustering
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub tol: f64,
    /// Independent k-means++ restarts; the lowest inertia wins
    pub n_init: usize,
    pub random_state: Option<u64>,
    pub init: Option<String>,
    pub algorithm: Option<String>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            max_iter: 300,
            tol: 1e-4,
            n_init: 1,
            random_state: None,
            init: None,
            algorithm: None,
        }
    }
}

/// K-Means clustering with k-means++ initialization
#[derive(Debug, Clone)]
pub struct KMeans {
    pub config: KMeansConfig,
    /// Fitted cluster centroids (n_clusters × n_features)
    centroids: Option<Array2<f64>>,
    labels: Option<Array1<f64>>,
    /// Sum of squared distances to the nearest centroid
    inertia: Option<f64>,
    n_iter: usize,
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Self {
        Self {
            config,
            centroids: None,
            labels: None,
            inertia: None,
            n_iter: 0,
        }
    }

    pub fn with_clusters(n_clusters: usize) -> Self {
        Self::new(KMeansConfig {
            n_clusters,
            ..Default::default()
        })
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.config.random_state = Some(seed);
        self
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        let config: KMeansConfig = parse_hyperparameters("KMeans", params)?;
        if config.n_clusters == 0 || config.n_init == 0 || config.max_iter == 0 {
            return Err(PlanError::Construction {
                model: "KMeans".to_string(),
                reason: "n_clusters, n_init and max_iter must be at least 1".to_string(),
            });
        }
        Ok(Self::new(config))
    }

    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.centroids.as_ref()
    }

    /// Labels assigned during fit
    pub fn labels(&self) -> Option<&Array1<f64>> {
        self.labels.as_ref()
    }

    pub fn inertia(&self) -> Option<f64> {
        self.inertia
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// K-means++ initialization: pick centroids spread apart
    fn kmeans_pp_init(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
        let n_samples = x.nrows();
        let mut centroids = Array2::zeros((k, x.ncols()));
        centroids.row_mut(0).assign(&x.row(rng.gen_range(0..n_samples)));

        for c in 1..k {
            let dists: Vec<f64> = x
                .rows()
                .into_iter()
                .map(|row| {
                    (0..c)
                        .map(|j| euclidean_sq(row, centroids.row(j)))
                        .fold(f64::MAX, f64::min)
                })
                .collect();

            // Weighted random selection proportional to D²
            let total: f64 = dists.iter().sum();
            let chosen = if total <= 0.0 {
                rng.gen_range(0..n_samples)
            } else {
                let r = rng.gen::<f64>() * total;
                let mut cumulative = 0.0;
                dists
                    .iter()
                    .position(|&d| {
                        cumulative += d;
                        cumulative >= r
                    })
                    .unwrap_or(n_samples - 1)
            };
            centroids.row_mut(c).assign(&x.row(chosen));
        }

        centroids
    }

    /// One Lloyd run from a k-means++ start: (centroids, labels, inertia, iterations)
    fn lloyd(&self, x: &Array2<f64>, rng: &mut ChaCha8Rng) -> (Array2<f64>, Array1<f64>, f64, usize) {
        let n_samples = x.nrows();
        let k = self.config.n_clusters;
        let mut centroids = Self::kmeans_pp_init(x, k, rng);
        let mut labels = Array1::<f64>::from_elem(n_samples, -1.0);
        let mut iterations = 0;

        for _ in 0..self.config.max_iter {
            iterations += 1;
            let new_labels: Array1<f64> = (0..n_samples)
                .into_par_iter()
                .map(|i| nearest_centroid(x.row(i), &centroids).0 as f64)
                .collect::<Vec<_>>()
                .into();
            let changed = new_labels.iter().zip(labels.iter()).filter(|(a, b)| a != b).count();
            labels = new_labels;

            let mut new_centroids = Array2::<f64>::zeros(centroids.dim());
            let mut counts = vec![0usize; k];
            for (row, &label) in x.rows().into_iter().zip(labels.iter()) {
                let c = label as usize;
                counts[c] += 1;
                new_centroids.row_mut(c).scaled_add(1.0, &row);
            }
            for c in 0..k {
                if counts[c] > 0 {
                    new_centroids.row_mut(c).mapv_inplace(|v| v / counts[c] as f64);
                } else {
                    // Empty cluster: restart from a random sample
                    new_centroids.row_mut(c).assign(&x.row(rng.gen_range(0..n_samples)));
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            centroids = new_centroids;

            if changed == 0 || shift <= self.config.tol {
                break;
            }
        }

        // Final assignment against the last centroids
        let mut inertia = 0.0;
        for (i, row) in x.rows().into_iter().enumerate() {
            let (c, d) = nearest_centroid(row, &centroids);
            labels[i] = c as f64;
            inertia += d;
        }
        (centroids, labels, inertia, iterations)
    }
}

impl Model for KMeans {
    fn name(&self) -> &'static str {
        "KMeans"
    }

    fn fit(&mut self, x: &Array2<f64>, _y: Option<&Array1<f64>>) -> Result<()> {
        check_features(self.name(), x)?;
        if x.nrows() < self.config.n_clusters {
            return Err(PlanError::fit(
                self.name(),
                format!(
                    "n_samples ({}) < n_clusters ({})",
                    x.nrows(),
                    self.config.n_clusters
                ),
            ));
        }

        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut best: Option<(Array2<f64>, Array1<f64>, f64, usize)> = None;
        for _ in 0..self.config.n_init {
            let run = self.lloyd(x, &mut rng);
            if best.as_ref().map_or(true, |b| run.2 < b.2) {
                best = Some(run);
            }
        }

        if let Some((centroids, labels, inertia, n_iter)) = best {
            debug!(clusters = self.config.n_clusters, inertia, n_iter, "KMeans fitted");
            self.centroids = Some(centroids);
            self.labels = Some(labels);
            self.inertia = Some(inertia);
            self.n_iter = n_iter;
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let centroids = self.centroids.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, centroids.ncols())?;
        let labels: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| nearest_centroid(x.row(i), centroids).0 as f64)
            .collect();
        Ok(Array1::from_vec(labels))
    }

    fn scorer(&self) -> Option<&dyn Scorer> {
        Some(self)
    }
}

/// Negative inertia of `x` against the fitted centroids
impl Scorer for KMeans {
    fn score(&self, x: &Array2<f64>, _y: Option<&Array1<f64>>) -> Result<f64> {
        let centroids = self.centroids.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, centroids.ncols())?;
        if x.nrows() == 0 {
            return Err(PlanError::ScoreUnavailable("no samples to score".to_string()));
        }
        let inertia: f64 = x.rows().into_iter().map(|row| nearest_centroid(row, centroids).1).sum();
        Ok(-inertia)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  DBSCAN Clustering
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DBSCANConfig {
    /// Maximum distance between neighbors
    pub eps: f64,
    /// Minimum points (including the point itself) to form a dense region
    pub min_samples: usize,
    pub metric: DistanceMetric,
    pub algorithm: Option<String>,
    pub leaf_size: Option<usize>,
    pub n_jobs: Option<i64>,
}

impl Default for DBSCANConfig {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_samples: 5,
            metric: DistanceMetric::Euclidean,
            algorithm: None,
            leaf_size: None,
            n_jobs: None,
        }
    }
}

/// DBSCAN (Density-Based Spatial Clustering of Applications with Noise)
///
/// Points are classified as core, border, or noise:
/// - Core: has ≥ min_samples neighbors within eps radius
/// - Border: within eps of a core point but not core itself
/// - Noise: neither core nor border (label = -1)
#[derive(Debug, Clone)]
pub struct DBSCAN {
    pub config: DBSCANConfig,
    p: f64,
    labels: Option<Array1<f64>>,
    /// Core samples and their cluster labels, used by `predict`
    core_samples: Option<Array2<f64>>,
    core_labels: Vec<f64>,
    n_clusters_found: usize,
}

impl DBSCAN {
    pub fn new(config: DBSCANConfig) -> Result<Self> {
        let p = metric_exponent("DBSCAN", config.metric)?;
        if !(config.eps > 0.0) || config.min_samples == 0 {
            return Err(PlanError::Construction {
                model: "DBSCAN".to_string(),
                reason: "eps must be positive and min_samples at least 1".to_string(),
            });
        }
        Ok(Self {
            config,
            p,
            labels: None,
            core_samples: None,
            core_labels: Vec::new(),
            n_clusters_found: 0,
        })
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        Self::new(parse_hyperparameters("DBSCAN", params)?)
    }

    pub fn labels(&self) -> Option<&Array1<f64>> {
        self.labels.as_ref()
    }

    /// Number of clusters found (excluding noise)
    pub fn n_clusters(&self) -> usize {
        self.n_clusters_found
    }

    pub fn n_noise(&self) -> usize {
        self.labels
            .as_ref()
            .map_or(0, |labels| labels.iter().filter(|&&l| l < 0.0).count())
    }

    fn region_query(&self, x: &Array2<f64>, point_idx: usize) -> Vec<usize> {
        let row = x.row(point_idx);
        (0..x.nrows())
            .filter(|&i| minkowski(row, x.row(i), self.p) <= self.config.eps)
            .collect()
    }
}

impl Model for DBSCAN {
    fn name(&self) -> &'static str {
        "DBSCAN"
    }

    fn fit(&mut self, x: &Array2<f64>, _y: Option<&Array1<f64>>) -> Result<()> {
        check_features(self.name(), x)?;
        let n_samples = x.nrows();

        // Pre-compute neighbor lists for all points (parallelized)
        let neighbors: Vec<Vec<usize>> = (0..n_samples)
            .into_par_iter()
            .map(|i| self.region_query(x, i))
            .collect();
        let is_core: Vec<bool> = neighbors.iter().map(|n| n.len() >= self.config.min_samples).collect();

        let mut labels = vec![-1i64; n_samples];
        let mut cluster_id: i64 = 0;

        for i in 0..n_samples {
            if labels[i] != -1 || !is_core[i] {
                continue;
            }

            // Expand cluster from core point i
            labels[i] = cluster_id;
            let mut queue: Vec<usize> = neighbors[i].clone();
            let mut head = 0;
            while head < queue.len() {
                let q = queue[head];
                head += 1;
                if labels[q] == -1 {
                    labels[q] = cluster_id;
                }
                if !is_core[q] {
                    continue;
                }
                for &neighbor in &neighbors[q] {
                    if labels[neighbor] == -1 {
                        labels[neighbor] = cluster_id;
                        queue.push(neighbor);
                    }
                }
            }
            cluster_id += 1;
        }

        let core: Vec<usize> = (0..n_samples).filter(|&i| is_core[i]).collect();
        let mut core_samples = Array2::zeros((core.len(), x.ncols()));
        for (row, &idx) in core.iter().enumerate() {
            core_samples.row_mut(row).assign(&x.row(idx));
        }

        self.core_labels = core.iter().map(|&i| labels[i] as f64).collect();
        self.core_samples = Some(core_samples);
        self.labels = Some(labels.iter().map(|&l| l as f64).collect());
        self.n_clusters_found = cluster_id as usize;
        debug!(
            clusters = self.n_clusters_found,
            noise = self.n_noise(),
            "DBSCAN fitted"
        );
        Ok(())
    }

    /// Label of the nearest core sample within `eps`, -1 otherwise
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let core = self.core_samples.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, core.ncols())?;
        let labels: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mut best_label = -1.0;
                let mut best_dist = f64::MAX;
                for (j, sample) in core.rows().into_iter().enumerate() {
                    let d = minkowski(row, sample, self.p);
                    if d <= self.config.eps && d < best_dist {
                        best_dist = d;
                        best_label = self.core_labels[j];
                    }
                }
                best_label
            })
            .collect();
        Ok(Array1::from_vec(labels))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Agglomerative Clustering
// ═══════════════════════════════════════════════════════════════════════════

/// Upper bound on samples for the dense distance matrix
const MAX_AGGLOMERATIVE_SAMPLES: usize = 5_000;

/// Cluster-to-cluster distance used when merging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum increase of within-cluster variance
    #[default]
    Ward,
    Complete,
    Average,
    Single,
}

impl Linkage {
    /// Lance-Williams update of d(k, i ∪ j)
    fn update(self, d_ki: f64, d_kj: f64, d_ij: f64, n_i: f64, n_j: f64, n_k: f64) -> f64 {
        match self {
            Linkage::Single => d_ki.min(d_kj),
            Linkage::Complete => d_ki.max(d_kj),
            Linkage::Average => (n_i * d_ki + n_j * d_kj) / (n_i + n_j),
            Linkage::Ward => ((n_i + n_k) * d_ki + (n_j + n_k) * d_kj - n_k * d_ij) / (n_i + n_j + n_k),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgglomerativeConfig {
    /// 2 when neither this nor `distance_threshold` is set
    pub n_clusters: Option<usize>,
    /// Stop merging at this linkage distance instead of a cluster count
    pub distance_threshold: Option<f64>,
    pub linkage: Linkage,
    pub metric: DistanceMetric,
    pub compute_full_tree: Option<Value>,
}

impl Default for AgglomerativeConfig {
    fn default() -> Self {
        Self {
            n_clusters: None,
            distance_threshold: None,
            linkage: Linkage::Ward,
            metric: DistanceMetric::Euclidean,
            compute_full_tree: None,
        }
    }
}

/// Where the merge tree is cut
#[derive(Debug, Clone, Copy, PartialEq)]
enum TreeCut {
    Clusters(usize),
    Threshold(f64),
}

/// Bottom-up hierarchical clustering (nearest-neighbor chain)
#[derive(Debug, Clone)]
pub struct AgglomerativeClustering {
    pub config: AgglomerativeConfig,
    cut: TreeCut,
    p: f64,
    labels: Option<Array1<f64>>,
    /// Mean of each cluster, used by `predict`
    centroids: Option<Array2<f64>>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

impl AgglomerativeClustering {
    pub fn new(config: AgglomerativeConfig) -> Result<Self> {
        let construction = |reason: &str| PlanError::Construction {
            model: "AgglomerativeClustering".to_string(),
            reason: reason.to_string(),
        };
        let p = metric_exponent("AgglomerativeClustering", config.metric)?;
        if config.linkage == Linkage::Ward && config.metric != DistanceMetric::Euclidean {
            return Err(construction("ward linkage requires the euclidean metric"));
        }
        let cut = match (config.n_clusters, config.distance_threshold) {
            (Some(_), Some(_)) => {
                return Err(construction(
                    "set either n_clusters or distance_threshold, not both (use n_clusters: null)",
                ))
            }
            (Some(0), None) => return Err(construction("n_clusters must be at least 1")),
            (Some(k), None) => TreeCut::Clusters(k),
            (None, Some(t)) if !(t >= 0.0) => {
                return Err(construction("distance_threshold must be non-negative"))
            }
            (None, Some(t)) => TreeCut::Threshold(t),
            (None, None) => TreeCut::Clusters(2),
        };
        Ok(Self {
            config,
            cut,
            p,
            labels: None,
            centroids: None,
        })
    }

    pub fn from_params(params: &Parameters) -> Result<Self> {
        Self::new(parse_hyperparameters("AgglomerativeClustering", params)?)
    }

    pub fn labels(&self) -> Option<&Array1<f64>> {
        self.labels.as_ref()
    }

    fn distance_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| match self.config.linkage {
                        Linkage::Ward => euclidean_sq(x.row(i), x.row(j)),
                        _ => minkowski(x.row(i), x.row(j), self.p),
                    })
                    .collect()
            })
            .collect();
        let mut d = Array2::zeros((n, n));
        for (i, row) in rows.into_iter().enumerate() {
            for (j, v) in row.into_iter().enumerate() {
                d[[i, j]] = v;
            }
        }
        d
    }

    /// Merge height on the scale of the input distances. Ward heights are
    /// tracked on squared distances.
    fn merge_distance(&self, height: f64) -> f64 {
        match self.config.linkage {
            Linkage::Ward => height.max(0.0).sqrt(),
            _ => height,
        }
    }

    /// Full merge sequence `(a, b, height)`, sorted by height
    fn merges(&self, x: &Array2<f64>) -> Vec<(usize, usize, f64)> {
        let n = x.nrows();
        let mut d = self.distance_matrix(x);
        let mut size = vec![1.0; n];
        let mut active = vec![true; n];
        let mut merges = Vec::with_capacity(n.saturating_sub(1));
        let mut chain: Vec<usize> = Vec::new();
        let mut remaining = n;

        while remaining > 1 {
            if chain.is_empty() {
                if let Some(start) = active.iter().position(|&a| a) {
                    chain.push(start);
                }
            }
            let (a, b) = loop {
                let a = chain[chain.len() - 1];
                let prev = if chain.len() >= 2 { Some(chain[chain.len() - 2]) } else { None };
                // Prefer the previous chain element on ties so the chain terminates
                let mut best = prev;
                let mut best_d = prev.map_or(f64::INFINITY, |p| d[[a, p]]);
                for j in 0..n {
                    if active[j] && j != a && d[[a, j]] < best_d {
                        best = Some(j);
                        best_d = d[[a, j]];
                    }
                }
                match best {
                    Some(b) if Some(b) == prev => break (a, b),
                    Some(b) => chain.push(b),
                    None => break (a, a),
                }
            };
            chain.truncate(chain.len().saturating_sub(2));
            if a == b {
                break;
            }

            let d_ab = d[[a, b]];
            let (keep, drop) = (a.min(b), a.max(b));
            for k in 0..n {
                if active[k] && k != a && k != b {
                    let updated = self.config.linkage.update(d[[k, a]], d[[k, b]], d_ab, size[a], size[b], size[k]);
                    d[[k, keep]] = updated;
                    d[[keep, k]] = updated;
                }
            }
            size[keep] = size[a] + size[b];
            active[drop] = false;
            remaining -= 1;
            merges.push((a, b, d_ab));
        }

        merges.sort_by(|x, y| x.2.total_cmp(&y.2));
        merges
    }
}

impl Model for AgglomerativeClustering {
    fn name(&self) -> &'static str {
        "AgglomerativeClustering"
    }

    fn fit(&mut self, x: &Array2<f64>, _y: Option<&Array1<f64>>) -> Result<()> {
        check_features(self.name(), x)?;
        let n = x.nrows();
        if let TreeCut::Clusters(k) = self.cut {
            if n < k {
                return Err(PlanError::fit(self.name(), format!("n_samples ({}) < n_clusters ({})", n, k)));
            }
        }
        if n > MAX_AGGLOMERATIVE_SAMPLES {
            return Err(PlanError::fit(
                self.name(),
                format!(
                    "{} samples exceed the distance matrix limit of {}",
                    n, MAX_AGGLOMERATIVE_SAMPLES
                ),
            ));
        }

        let merges = self.merges(x);
        let n_merges = match self.cut {
            TreeCut::Clusters(k) => n - k,
            TreeCut::Threshold(t) => merges.iter().take_while(|m| self.merge_distance(m.2) < t).count(),
        };
        let mut sets = UnionFind::new(n);
        for &(a, b, _) in &merges[..n_merges] {
            sets.union(a, b);
        }

        // Labels numbered in order of first appearance
        let mut roots: Vec<usize> = Vec::new();
        let mut labels = Array1::zeros(n);
        for i in 0..n {
            let root = sets.find(i);
            let label = match roots.iter().position(|&r| r == root) {
                Some(label) => label,
                None => {
                    roots.push(root);
                    roots.len() - 1
                }
            };
            labels[i] = label as f64;
        }

        let mut centroids = Array2::<f64>::zeros((roots.len(), x.ncols()));
        let mut counts = vec![0.0; roots.len()];
        for (row, &label) in x.rows().into_iter().zip(labels.iter()) {
            let c = label as usize;
            centroids.row_mut(c).scaled_add(1.0, &row);
            counts[c] += 1.0;
        }
        for (c, count) in counts.iter().enumerate() {
            centroids.row_mut(c).mapv_inplace(|v| v / count);
        }

        debug!(clusters = roots.len(), linkage = ?self.config.linkage, "Agglomerative clustering fitted");
        self.labels = Some(labels);
        self.centroids = Some(centroids);
        Ok(())
    }

    /// Nearest cluster mean
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let centroids = self.centroids.as_ref().ok_or(PlanError::ModelNotFitted)?;
        check_predict(x, centroids.ncols())?;
        Ok(x.rows()
            .into_iter()
            .map(|row| nearest_centroid(row, centroids).0 as f64)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn blobs() -> Array2<f64> {
        array![
            [1.0, 1.0],
            [1.5, 1.5],
            [1.2, 1.3],
            [8.0, 8.0],
            [8.5, 8.5],
            [8.2, 8.3]
        ]
    }

    fn assert_two_groups(labels: &Array1<f64>) {
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_kmeans_basic() {
        let mut model = KMeans::with_clusters(2).with_random_state(42);
        model.fit(&blobs(), None).unwrap();
        assert_two_groups(model.labels().unwrap());
        assert!(model.inertia().unwrap() > 0.0);
    }

    #[test]
    fn test_kmeans_predict_and_score() {
        let x = array![[0.0, 0.0], [0.5, 0.5], [10.0, 10.0], [10.5, 10.5]];
        let mut model = KMeans::with_clusters(2).with_random_state(7);
        model.fit(&x, None).unwrap();

        let labels = model.predict(&array![[0.1, 0.1], [10.1, 10.1]]).unwrap();
        assert_ne!(labels[0], labels[1]);

        let score = model.scorer().unwrap().score(&x, None).unwrap();
        assert!((score + model.inertia().unwrap()).abs() < 1e-12);
        assert!(score < 0.0);
    }

    #[test]
    fn test_kmeans_too_many_clusters() {
        let mut model = KMeans::with_clusters(8);
        let err = model.fit(&array![[0.0], [1.0]], None).unwrap_err();
        assert!(matches!(err, PlanError::Fit { .. }));
    }

    #[test]
    fn test_dbscan_basic() {
        let x = array![
            [1.0, 1.0],
            [1.1, 1.1],
            [1.2, 1.0],
            [1.0, 1.2],
            [8.0, 8.0],
            [8.1, 8.1],
            [8.2, 8.0],
            [8.0, 8.2],
            [50.0, 50.0]
        ];
        let mut model = DBSCAN::new(DBSCANConfig {
            min_samples: 3,
            ..Default::default()
        })
        .unwrap();
        model.fit(&x, None).unwrap();
        assert_eq!(model.n_clusters(), 2);
        assert_eq!(model.n_noise(), 1);
        let labels = model.labels().unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[4]);
        assert_eq!(labels[8], -1.0);
        assert!(model.scorer().is_none());
    }

    #[test]
    fn test_dbscan_predict() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [0.2, 0.0], [5.0, 5.0], [5.1, 5.1], [5.2, 5.0]];
        let mut model = DBSCAN::new(DBSCANConfig {
            min_samples: 2,
            ..Default::default()
        })
        .unwrap();
        model.fit(&x, None).unwrap();

        let labels = model.predict(&array![[0.05, 0.05], [5.05, 5.05], [100.0, 100.0]]).unwrap();
        assert_ne!(labels[0], labels[1]);
        assert_eq!(labels[2], -1.0);
    }

    #[test]
    fn test_agglomerative_linkages() {
        for linkage in [Linkage::Ward, Linkage::Complete, Linkage::Average, Linkage::Single] {
            let mut model = AgglomerativeClustering::new(AgglomerativeConfig {
                linkage,
                ..Default::default()
            })
            .unwrap();
            model.fit(&blobs(), None).unwrap();
            let labels = model.labels().unwrap();
            assert_two_groups(labels);
            assert_eq!(labels[0], 0.0);
            assert_eq!(model.predict(&array![[8.1, 8.1]]).unwrap()[0], labels[3]);
            assert!(model.scorer().is_none());
        }
    }

    #[test]
    fn test_agglomerative_single_cluster() {
        let mut model = AgglomerativeClustering::new(AgglomerativeConfig {
            n_clusters: Some(1),
            ..Default::default()
        })
        .unwrap();
        model.fit(&blobs(), None).unwrap();
        assert!(model.labels().unwrap().iter().all(|&l| l == 0.0));
    }

    #[test]
    fn test_agglomerative_distance_threshold() {
        for linkage in [Linkage::Ward, Linkage::Single] {
            let params = json!({"n_clusters": null, "distance_threshold": 3.0, "linkage": linkage});
            let mut model = AgglomerativeClustering::from_params(params.as_object().unwrap()).unwrap();
            model.fit(&blobs(), None).unwrap();
            assert_two_groups(model.labels().unwrap());
        }

        let params = json!({"n_clusters": null, "distance_threshold": 0.1, "linkage": "single"});
        let mut model = AgglomerativeClustering::from_params(params.as_object().unwrap()).unwrap();
        model.fit(&blobs(), None).unwrap();
        assert_eq!(model.labels().unwrap()[5], 5.0);
    }

    #[test]
    fn test_agglomerative_threshold_conflicts_with_count() {
        let params = json!({"n_clusters": 3, "distance_threshold": 1.0});
        let err = AgglomerativeClustering::from_params(params.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, PlanError::Construction { .. }));
        assert!(err.to_string().contains("distance_threshold"));

        let params = json!({"distance_threshold": 1.0});
        assert!(AgglomerativeClustering::from_params(params.as_object().unwrap()).is_ok());
    }

    #[test]
    fn test_ward_requires_euclidean() {
        let config = AgglomerativeConfig {
            metric: DistanceMetric::Manhattan,
            ..Default::default()
        };
        assert!(AgglomerativeClustering::new(config).is_err());
    }
}
