use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{check_features, AnomalyModel, AnomalyScorer, Hyperparameters, ModelKind};
use crate::error::{OcmlError, Result};

const UPPER_BOUND: f64 = 1.0;
const MIN_CURVATURE: f64 = 1e-12;
const BOUND_EPS: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kernel {
    /// `exp(-gamma * |x - x'|²)`
    Rbf,
}

/// RBF bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gamma {
    /// `1 / n_features`, resolved at fit time.
    Auto,
    Value(f64),
}

impl Gamma {
    fn resolve(&self, n_features: usize) -> f64 {
        match self {
            Self::Auto => 1.0 / n_features as f64,
            Self::Value(gamma) => *gamma,
        }
    }
}

/// ν-parameterised one-class SVM (Schölkopf et al., 2001) solved with SMO.
#[derive(Clone, Debug)]
pub struct OneClassSvm {
    nu: f64,
    gamma: Gamma,
    tolerance: f64,
    max_iter: usize,
    fitted: Option<SupportVectors>,
}

#[derive(Clone, Debug)]
struct SupportVectors {
    vectors: Array2<f64>,
    coefficients: Array1<f64>,
    rho: f64,
    gamma: f64,
}

impl OneClassSvm {
    pub fn new(nu: f64) -> Self {
        Self {
            nu,
            gamma: Gamma::Auto,
            tolerance: 1e-3,
            max_iter: 100_000,
            fitted: None,
        }
    }

    pub fn with_gamma(mut self, gamma: Gamma) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn support_vector_count(&self) -> usize {
        self.fitted.as_ref().map_or(0, |sv| sv.vectors.nrows())
    }

    /// Bandwidth actually used, once fitted.
    pub fn fitted_gamma(&self) -> Option<f64> {
        self.fitted.as_ref().map(|sv| sv.gamma)
    }
}

impl AnomalyScorer for OneClassSvm {
    fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        let sv = self.fitted.as_ref().ok_or(OcmlError::NotFitted)?;
        check_features(sv.vectors.ncols(), x)?;

        Ok(x.rows()
            .into_iter()
            .map(|point| {
                sv.vectors
                    .rows()
                    .into_iter()
                    .zip(sv.coefficients.iter())
                    .map(|(vector, alpha)| alpha * rbf(&vector, &point, sv.gamma))
                    .sum::<f64>()
                    - sv.rho
            })
            .collect())
    }
}

impl AnomalyModel for OneClassSvm {
    fn kind(&self) -> ModelKind {
        ModelKind::OneClassSvm
    }

    fn fit(&mut self, x: &ArrayView2<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 || x.ncols() == 0 {
            return Err(OcmlError::EmptyDataset);
        }
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(OcmlError::InvalidConfig(format!("nu {} outside (0, 1]", self.nu)));
        }
        let gamma = self.gamma.resolve(x.ncols());
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(OcmlError::InvalidConfig(format!("gamma {gamma} must be positive")));
        }

        let kernel = gram_matrix(x, gamma);

        // Σα = ν·l with every α in [0, 1]: saturate the first ⌊ν·l⌋ points.
        let budget = self.nu * n as f64;
        let saturated = (budget.floor() as usize).min(n);
        let mut alpha = Array1::<f64>::zeros(n);
        alpha.slice_mut(ndarray::s![..saturated]).fill(UPPER_BOUND);
        if saturated < n {
            alpha[saturated] = budget - saturated as f64;
        }
        let mut gradient = kernel.dot(&alpha);

        let mut iterations = 0;
        while iterations < self.max_iter {
            let Some((i, j, gap)) = working_set(&alpha, &gradient) else {
                break;
            };
            if gap < self.tolerance {
                break;
            }

            let curvature =
                (kernel[[i, i]] + kernel[[j, j]] - 2.0 * kernel[[i, j]]).max(MIN_CURVATURE);
            let room_i = UPPER_BOUND - alpha[i];
            let room_j = alpha[j];
            let step = (gradient[j] - gradient[i]) / curvature;

            let delta = if step >= room_i.min(room_j) {
                if room_i <= room_j {
                    alpha[i] = UPPER_BOUND;
                    alpha[j] -= room_i;
                    room_i
                } else {
                    alpha[i] += room_j;
                    alpha[j] = 0.0;
                    room_j
                }
            } else {
                alpha[i] += step;
                alpha[j] -= step;
                step
            };
            snap_to_bounds(&mut alpha[i]);
            snap_to_bounds(&mut alpha[j]);

            let column_i = kernel.column(i);
            let column_j = kernel.column(j);
            gradient.zip_mut_with(&(&column_i - &column_j), |g, diff| *g += delta * diff);
            iterations += 1;
        }
        if iterations == self.max_iter {
            warn!(iterations, "one-class svm stopped at the iteration cap");
        }

        let rho = compute_rho(&alpha, &gradient);
        let support: Vec<usize> = (0..n).filter(|&t| alpha[t] > 0.0).collect();
        let vectors = x.select(Axis(0), &support);
        let coefficients = alpha.select(Axis(0), &support);

        debug!(
            n_samples = n,
            support_vectors = support.len(),
            iterations,
            rho,
            gamma,
            "fitted one-class svm"
        );

        self.fitted = Some(SupportVectors {
            vectors,
            coefficients,
            rho,
            gamma,
        });
        Ok(())
    }

    fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters::OneClassSvm {
            nu: self.nu,
            kernel: Kernel::Rbf,
            gamma: self.gamma,
        }
    }
}

fn rbf(a: &ArrayView1<f64>, b: &ArrayView1<f64>, gamma: f64) -> f64 {
    let squared: f64 = a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum();
    (-gamma * squared).exp()
}

fn gram_matrix(x: &ArrayView2<f64>, gamma: f64) -> Array2<f64> {
    let n = x.nrows();
    let mut kernel = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        kernel[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let value = rbf(&x.row(i), &x.row(j), gamma);
            kernel[[i, j]] = value;
            kernel[[j, i]] = value;
        }
    }
    kernel
}

/// Maximal violating pair: `i` may still grow, `j` may still shrink.
fn working_set(alpha: &Array1<f64>, gradient: &Array1<f64>) -> Option<(usize, usize, f64)> {
    let mut up: Option<(usize, f64)> = None;
    let mut low: Option<(usize, f64)> = None;

    for (t, (&a, &g)) in alpha.iter().zip(gradient.iter()).enumerate() {
        if a < UPPER_BOUND && up.map_or(true, |(_, best)| -g > best) {
            up = Some((t, -g));
        }
        if a > 0.0 && low.map_or(true, |(_, best)| -g < best) {
            low = Some((t, -g));
        }
    }

    match (up, low) {
        (Some((i, m)), Some((j, big_m))) => Some((i, j, m - big_m)),
        _ => None,
    }
}

fn snap_to_bounds(value: &mut f64) {
    if *value >= UPPER_BOUND - BOUND_EPS {
        *value = UPPER_BOUND;
    } else if *value <= BOUND_EPS {
        *value = 0.0;
    }
}

fn compute_rho(alpha: &Array1<f64>, gradient: &Array1<f64>) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut free_count = 0usize;

    for (&a, &g) in alpha.iter().zip(gradient.iter()) {
        if a >= UPPER_BOUND {
            lower = lower.max(g);
        } else if a <= 0.0 {
            upper = upper.min(g);
        } else {
            free_sum += g;
            free_count += 1;
        }
    }

    if free_count > 0 {
        free_sum / free_count as f64
    } else {
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => (upper + lower) / 2.0,
            (true, false) => lower,
            (false, true) => upper,
            (false, false) => 0.0,
        }
    }
}
