use serde::{Deserialize, Serialize};

use crate::error::{OcmlError, Result};

/// Descriptive statistics of a batch of scores.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl ScoreSummary {
    pub fn describe(scores: &[f64]) -> Result<Self> {
        if scores.is_empty() {
            return Err(OcmlError::EmptyDataset);
        }
        let (min, max) = scores
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        Ok(Self {
            count: scores.len(),
            min,
            mean: scores.iter().sum::<f64>() / scores.len() as f64,
            max,
        })
    }
}

/// Separation between in-distribution and out-of-distribution scores.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeparationMetrics {
    pub roc_auc: f64,
    pub threshold: f64,
    /// Accuracy in percent at `threshold`.
    pub accuracy: f64,
}

impl SeparationMetrics {
    pub fn evaluate(inliers: &[f64], outliers: &[f64]) -> Result<Self> {
        let roc_auc = roc_auc(inliers, outliers)?;
        let (threshold, accuracy) = calibrate_accuracy(inliers, outliers)?;
        Ok(Self {
            roc_auc,
            threshold,
            accuracy,
        })
    }
}

/// Linear-interpolated percentile, `q` in `[0, 100]`.
pub fn percentile(values: &[f64], q: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(OcmlError::EmptyDataset);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Ok(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Probability that a random inlier scores above a random outlier, ties
/// counted as one half. Inliers are expected to score higher.
pub fn roc_auc(inliers: &[f64], outliers: &[f64]) -> Result<f64> {
    if inliers.is_empty() || outliers.is_empty() {
        return Err(OcmlError::EmptyDataset);
    }

    // Rank-sum (Mann-Whitney U) with average ranks for ties.
    let mut pooled: Vec<(f64, bool)> = inliers
        .iter()
        .map(|&s| (s, true))
        .chain(outliers.iter().map(|&s| (s, false)))
        .collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut inlier_rank_sum = 0.0;
    let mut start = 0;
    while start < pooled.len() {
        let mut end = start + 1;
        while end < pooled.len() && pooled[end].0 == pooled[start].0 {
            end += 1;
        }
        let average_rank = (start + end + 1) as f64 / 2.0;
        let tied_inliers = pooled[start..end].iter().filter(|(_, inlier)| *inlier).count();
        inlier_rank_sum += average_rank * tied_inliers as f64;
        start = end;
    }

    let n_in = inliers.len() as f64;
    let n_out = outliers.len() as f64;
    let u = inlier_rank_sum - n_in * (n_in + 1.0) / 2.0;
    Ok(u / (n_in * n_out))
}

/// Threshold that maximises accuracy when inliers are `score >= threshold`.
///
/// Returns the threshold and the accuracy in percent.
pub fn calibrate_accuracy(inliers: &[f64], outliers: &[f64]) -> Result<(f64, f64)> {
    if inliers.is_empty() || outliers.is_empty() {
        return Err(OcmlError::EmptyDataset);
    }
    let total = (inliers.len() + outliers.len()) as f64;

    let mut candidates: Vec<f64> = inliers.iter().chain(outliers.iter()).copied().collect();
    candidates.push(f64::INFINITY);
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    let mut best = (candidates[0], 0.0);
    for threshold in candidates {
        let correct = inliers.iter().filter(|&&s| s >= threshold).count()
            + outliers.iter().filter(|&&s| s < threshold).count();
        let accuracy = correct as f64 / total * 100.0;
        if accuracy > best.1 {
            best = (threshold, accuracy);
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_separated_scores_have_unit_auc() {
        let auc = roc_auc(&[0.5, 0.7, 0.9], &[-0.3, -0.1, 0.1]).unwrap();
        assert_eq!(auc, 1.0);
        let auc = roc_auc(&[-0.3, -0.1], &[0.5, 0.9]).unwrap();
        assert_eq!(auc, 0.0);
    }

    #[test]
    fn identical_scores_have_half_auc() {
        let auc = roc_auc(&[1.0, 1.0, 1.0], &[1.0, 1.0]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn partial_overlap_counts_pairs() {
        // Pairs (in, out): (2,1) win, (2,3) loss, (4,1) win, (4,3) win.
        let auc = roc_auc(&[2.0, 4.0], &[1.0, 3.0]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn calibrated_threshold_splits_clean_data() {
        let (threshold, accuracy) = calibrate_accuracy(&[0.4, 0.6], &[-0.5, 0.1]).unwrap();
        assert_eq!(accuracy, 100.0);
        assert!(threshold > 0.1 && threshold <= 0.4);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0).unwrap(), 1.0);
        assert_eq!(percentile(&values, 100.0).unwrap(), 5.0);
        assert_eq!(percentile(&values, 50.0).unwrap(), 3.0);
        assert!((percentile(&values, 5.0).unwrap() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn summary_and_empty_inputs() {
        let summary = ScoreSummary::describe(&[1.0, 2.0, 6.0]).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.max, 6.0);
        assert!(ScoreSummary::describe(&[]).is_err());
        assert!(roc_auc(&[], &[1.0]).is_err());
        assert!(percentile(&[], 5.0).is_err());
    }
}
