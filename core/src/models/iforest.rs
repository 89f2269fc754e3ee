use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::index, Rng};
use tracing::debug;

use super::{check_features, AnomalyModel, AnomalyScorer, Hyperparameters, ModelKind};
use crate::error::{OcmlError, Result};
use crate::metrics::percentile;
use crate::rng::seeded_rng;

const DEFAULT_MAX_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation Forest (Liu, Ting & Zhou, 2008).
///
/// Anomalies are isolated by fewer random splits than inliers, so the
/// average path length through the ensemble is the anomaly signal.
#[derive(Clone, Debug)]
pub struct IsolationForest {
    contamination: f64,
    n_estimators: usize,
    max_samples: Option<usize>,
    seed: u64,
    fitted: Option<Forest>,
}

#[derive(Clone, Debug)]
struct Forest {
    trees: Vec<Node>,
    sample_size: usize,
    n_features: usize,
    offset: f64,
}

#[derive(Clone, Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl IsolationForest {
    pub fn new(contamination: f64) -> Self {
        Self {
            contamination,
            n_estimators: 100,
            max_samples: None,
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_max_samples(mut self, max_samples: Option<usize>) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// `-2^(-E[h(x)] / c(ψ))`, in `[-1, 0]`; closer to zero is more normal.
    pub fn score_samples(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        let forest = self.fitted.as_ref().ok_or(OcmlError::NotFitted)?;
        check_features(forest.n_features, x)?;

        let normalizer = average_path_length(forest.sample_size);
        let n_trees = forest.trees.len() as f64;
        Ok(x.rows()
            .into_iter()
            .map(|point| {
                let total: f64 = forest
                    .trees
                    .iter()
                    .map(|tree| path_length(tree, &point, 0))
                    .sum();
                -(2f64).powf(-(total / n_trees) / normalizer)
            })
            .collect())
    }
}

impl AnomalyScorer for IsolationForest {
    fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        let offset = self.fitted.as_ref().ok_or(OcmlError::NotFitted)?.offset;
        Ok(self.score_samples(x)? - offset)
    }
}

impl AnomalyModel for IsolationForest {
    fn kind(&self) -> ModelKind {
        ModelKind::IsolationForest
    }

    fn fit(&mut self, x: &ArrayView2<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples == 0 || x.ncols() == 0 {
            return Err(OcmlError::EmptyDataset);
        }
        if n_samples < 2 {
            return Err(OcmlError::InvalidConfig(
                "isolation forest needs at least two samples".to_string(),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(OcmlError::InvalidConfig(
                "isolation forest training data must be finite".to_string(),
            ));
        }
        if self.n_estimators == 0 {
            return Err(OcmlError::InvalidConfig(
                "isolation forest needs at least one estimator".to_string(),
            ));
        }
        if !(0.0..=0.5).contains(&self.contamination) {
            return Err(OcmlError::InvalidConfig(format!(
                "contamination {} outside [0, 0.5]",
                self.contamination
            )));
        }

        let sample_size = self
            .max_samples
            .unwrap_or(DEFAULT_MAX_SAMPLES)
            .clamp(2, n_samples);
        let depth_limit = (sample_size as f64).log2().ceil() as usize;

        let mut rng = seeded_rng(self.seed);
        let trees = (0..self.n_estimators)
            .map(|_| {
                let rows = index::sample(&mut rng, n_samples, sample_size).into_vec();
                grow(x, rows, 0, depth_limit, &mut rng)
            })
            .collect();

        self.fitted = Some(Forest {
            trees,
            sample_size,
            n_features: x.ncols(),
            offset: 0.0,
        });

        let train_scores = self.score_samples(x)?;
        let offset = percentile(&train_scores.to_vec(), 100.0 * self.contamination)?;
        if let Some(forest) = self.fitted.as_mut() {
            forest.offset = offset;
        }

        debug!(
            n_samples,
            sample_size,
            n_estimators = self.n_estimators,
            offset,
            "fitted isolation forest"
        );
        Ok(())
    }

    fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters::IsolationForest {
            contamination: self.contamination,
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            seed: self.seed,
        }
    }
}

fn grow(x: &ArrayView2<f64>, rows: Vec<usize>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if depth >= limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    let spans: Vec<(usize, f64, f64)> = (0..x.ncols())
        .filter_map(|feature| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = x[[r, feature]];
                (lo.min(v), hi.max(v))
            });
            (lo < hi).then_some((feature, lo, hi))
        })
        .collect();
    if spans.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = spans[rng.gen_range(0..spans.len())];
    let threshold = split_point(lo, hi, rng.gen());
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| x[[r, feature]] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow(x, left, depth + 1, limit, rng)),
        right: Box::new(grow(x, right, depth + 1, limit, rng)),
    }
}

/// Point at fraction `u` of `[lo, hi]`; stays finite when `hi - lo` overflows.
fn split_point(lo: f64, hi: f64, u: f64) -> f64 {
    (lo * (1.0 - u) + hi * u).clamp(lo, hi)
}

fn path_length(node: &Node, point: &ArrayView1<f64>, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let next = if point[*feature] < *threshold { left } else { right };
            path_length(next, point, depth + 1)
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, Array2};

    use super::*;

    fn cluster_with_outlier() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..40 {
            let t = i as f64 * 0.15;
            rows.push([t.cos() * 0.3, t.sin() * 0.3]);
        }
        rows.push([6.0, -6.0]);
        Array2::from_shape_fn((rows.len(), 2), |(r, c)| rows[r][c])
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new(0.05).with_n_estimators(50).with_seed(7);
        forest.fit(&data.view()).unwrap();
        for score in forest.score_samples(&data.view()).unwrap() {
            assert!((-1.0..=0.0).contains(&score), "score {score}");
        }
    }

    #[test]
    fn isolated_point_scores_lowest() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new(0.05).with_n_estimators(100).with_seed(3);
        forest.fit(&data.view()).unwrap();
        let scores = forest.decision_function(&data.view()).unwrap();
        let outlier = scores[scores.len() - 1];
        assert!(scores.iter().take(40).all(|&s| s > outlier));
        assert!(outlier < 0.0);
    }

    #[test]
    fn offset_flags_about_contamination_share() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new(0.05).with_seed(11);
        forest.fit(&data.view()).unwrap();
        let flagged = forest
            .predict(&data.view())
            .unwrap()
            .iter()
            .filter(|&&p| p == -1)
            .count();
        assert!((1..=3).contains(&flagged), "flagged {flagged}");
    }

    #[test]
    fn same_seed_same_scores() {
        let data = cluster_with_outlier();
        let mut a = IsolationForest::new(0.05).with_seed(5);
        let mut b = IsolationForest::new(0.05).with_seed(5);
        a.fit(&data.view()).unwrap();
        b.fit(&data.view()).unwrap();
        assert_eq!(
            a.decision_function(&data.view()).unwrap(),
            b.decision_function(&data.view()).unwrap()
        );
    }

    #[test]
    fn unfitted_and_mismatched_inputs_fail() {
        let forest = IsolationForest::new(0.05);
        let point = array![[0.0, 0.0]];
        assert!(matches!(
            forest.decision_function(&point.view()),
            Err(OcmlError::NotFitted)
        ));

        let mut forest = IsolationForest::new(0.05).with_n_estimators(5);
        forest.fit(&cluster_with_outlier().view()).unwrap();
        let wide = array![[0.0, 0.0, 0.0]];
        assert!(matches!(
            forest.decision_function(&wide.view()),
            Err(OcmlError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn constant_data_still_fits() {
        let data = Array2::from_elem((10, 2), 1.0);
        let mut forest = IsolationForest::new(0.05).with_n_estimators(10);
        forest.fit(&data.view()).unwrap();
        let scores = forest.decision_function(&data.view()).unwrap();
        assert!(scores.iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn extreme_feature_spans_fit_without_overflow() {
        let data = array![[-1.0e308, 0.0], [1.0e308, 1.0], [0.0, 0.5]];
        let mut forest = IsolationForest::new(0.05).with_n_estimators(20).with_seed(1);
        forest.fit(&data.view()).unwrap();
        let scores = forest.decision_function(&data.view()).unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));

        for u in [0.0, 0.25, 0.5, 0.999] {
            let t = split_point(-1.0e308, 1.0e308, u);
            assert!(t.is_finite() && (-1.0e308..=1.0e308).contains(&t), "split {t}");
        }
        assert_eq!(split_point(2.0, 4.0, 0.5), 3.0);
    }

    #[test]
    fn non_finite_training_data_is_rejected() {
        let data = array![[0.0, 1.0], [f64::INFINITY, 0.0], [1.0, 1.0]];
        let mut forest = IsolationForest::new(0.05).with_n_estimators(5);
        assert!(matches!(
            forest.fit(&data.view()),
            Err(OcmlError::InvalidConfig(_))
        ));
    }

    #[test]
    fn path_length_normalizer_matches_known_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244).abs() < 1e-2);
    }
}
