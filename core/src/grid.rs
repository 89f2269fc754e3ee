//! Score surfaces over a square 2D domain.
//!
//! Grid points are laid out row-major with y as the outer axis and x as the
//! inner axis, the same orientation contour renderers expect: flat index
//! `k = i * resolution + j` holds `(x_coords[j], y_coords[i])`, and the
//! resulting surface satisfies `surface[[i, j]] == score(x_coords[j], y_coords[i])`.

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::error::{OcmlError, Result};
use crate::models::AnomalyScorer;

/// Square region `[min, max]²` of the input plane.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
}

impl Domain {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn validate(&self, resolution: usize) -> Result<()> {
        let non_degenerate = self.min.is_finite()
            && self.max.is_finite()
            && self.min < self.max
            && (self.max - self.min).is_finite();
        if resolution <= 1 || !non_degenerate {
            return Err(OcmlError::InvalidDomain {
                min: self.min,
                max: self.max,
                resolution,
            });
        }
        Ok(())
    }

    /// `resolution` evenly spaced values; the last one is exactly `max`.
    pub fn linspace(&self, resolution: usize) -> Result<Array1<f64>> {
        self.validate(resolution)?;
        let step = (self.max - self.min) / (resolution - 1) as f64;
        Ok(Array1::from_shape_fn(resolution, |i| {
            if i == resolution - 1 {
                self.max
            } else {
                self.min + step * i as f64
            }
        }))
    }
}

/// Result of evaluating a scorer over a grid.
#[derive(Clone, Debug)]
pub struct Contour {
    pub surface: Array2<f64>,
    pub x_coords: Array1<f64>,
    pub y_coords: Array1<f64>,
    /// The flat `resolution² × 2` grid that was scored.
    pub grid: Array2<f64>,
}

impl Contour {
    pub fn resolution(&self) -> usize {
        self.x_coords.len()
    }

    /// Smallest and largest surface value.
    pub fn score_range(&self) -> (f64, f64) {
        self.surface
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Cartesian product of the coordinates, y outer and x inner.
pub fn meshgrid(x_coords: &Array1<f64>, y_coords: &Array1<f64>) -> Array2<f64> {
    let nx = x_coords.len();
    Array2::from_shape_fn((nx * y_coords.len(), 2), |(k, axis)| {
        if axis == 0 {
            x_coords[k % nx]
        } else {
            y_coords[k / nx]
        }
    })
}

/// Evaluate `scorer` over `domain` at `resolution` points per axis with a
/// single batched call.
pub fn contour<S>(scorer: &S, domain: Domain, resolution: usize) -> Result<Contour>
where
    S: AnomalyScorer + ?Sized,
{
    let x_coords = domain.linspace(resolution)?;
    let y_coords = x_coords.clone();
    let grid = meshgrid(&x_coords, &y_coords);

    let scores = scorer
        .decision_function(&grid.view())
        .map_err(|err| match err {
            OcmlError::ScoringFailure(_) => err,
            other => OcmlError::ScoringFailure(other.to_string()),
        })?;

    let expected = resolution * resolution;
    if scores.len() != expected {
        return Err(OcmlError::ScoringFailure(format!(
            "scorer returned {} values for {} grid points",
            scores.len(),
            expected
        )));
    }
    if let Some(k) = scores.iter().position(|v| !v.is_finite()) {
        return Err(OcmlError::ScoringFailure(format!(
            "non-finite score at grid point ({}, {})",
            grid[[k, 0]],
            grid[[k, 1]]
        )));
    }

    let surface = scores
        .into_shape((resolution, resolution))
        .map_err(|err| OcmlError::ScoringFailure(err.to_string()))?;

    debug!(resolution, min = domain.min, max = domain.max, "evaluated score surface");

    Ok(Contour {
        surface,
        x_coords,
        y_coords,
        grid,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::ArrayView2;
    use proptest::prelude::*;

    use super::*;

    /// Scores a point by a fixed linear combination, so positions are easy to check.
    struct Plane;

    impl AnomalyScorer for Plane {
        fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
            Ok(x.rows().into_iter().map(|p| 10.0 * p[0] + p[1]).collect())
        }
    }

    struct Failing;

    impl AnomalyScorer for Failing {
        fn decision_function(&self, _x: &ArrayView2<f64>) -> Result<Array1<f64>> {
            Err(OcmlError::NotFitted)
        }
    }

    struct Short;

    impl AnomalyScorer for Short {
        fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
            Ok(Array1::zeros(x.nrows() - 1))
        }
    }

    struct NanAtOrigin;

    impl AnomalyScorer for NanAtOrigin {
        fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
            Ok(x.rows()
                .into_iter()
                .map(|p| if p[0] == 0.0 && p[1] == 0.0 { f64::NAN } else { 1.0 })
                .collect())
        }
    }

    #[test]
    fn three_point_grid_over_zero_two() {
        let contour = contour(&Plane, Domain::new(0.0, 2.0), 3).unwrap();

        assert_eq!(contour.x_coords.to_vec(), vec![0.0, 1.0, 2.0]);
        assert_eq!(contour.y_coords.to_vec(), vec![0.0, 1.0, 2.0]);
        assert_eq!(contour.grid.nrows(), 9);

        let mut points: Vec<(i64, i64)> = contour
            .grid
            .rows()
            .into_iter()
            .map(|p| (p[0] as i64, p[1] as i64))
            .collect();
        points.sort_unstable();
        points.dedup();
        assert_eq!(points.len(), 9);
    }

    #[test]
    fn grid_iterates_y_outer_x_inner() {
        let contour = contour(&Plane, Domain::new(0.0, 2.0), 3).unwrap();
        assert_eq!(contour.grid.row(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(contour.grid.row(1).to_vec(), vec![1.0, 0.0]);
        assert_eq!(contour.grid.row(3).to_vec(), vec![0.0, 1.0]);
        assert_eq!(contour.grid.row(8).to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn surface_matches_scorer_at_each_position() {
        let contour = contour(&Plane, Domain::new(-1.0, 1.0), 5).unwrap();
        assert_eq!(contour.surface.dim(), (5, 5));
        for i in 0..5 {
            for j in 0..5 {
                let expected = 10.0 * contour.x_coords[j] + contour.y_coords[i];
                assert_eq!(contour.surface[[i, j]], expected);
            }
        }
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        for (min, max, resolution) in [(0.0, 1.0, 1), (0.0, 1.0, 0), (1.0, 1.0, 10), (2.0, 1.0, 10)] {
            let err = contour(&Plane, Domain::new(min, max), resolution).unwrap_err();
            assert!(matches!(err, OcmlError::InvalidDomain { .. }), "{err}");
        }
        let err = contour(&Plane, Domain::new(f64::NAN, 1.0), 4).unwrap_err();
        assert!(matches!(err, OcmlError::InvalidDomain { .. }));
    }

    #[test]
    fn overflowing_width_is_rejected() {
        let domain = Domain::new(-1.0e308, 1.0e308);
        assert!(matches!(
            domain.linspace(3),
            Err(OcmlError::InvalidDomain { resolution: 3, .. })
        ));
        let coords = Domain::new(-1.0e307, 1.0e307).linspace(3).unwrap();
        assert_eq!(coords.to_vec(), vec![-1.0e307, 0.0, 1.0e307]);
    }

    #[test]
    fn scorer_failures_propagate() {
        let err = contour(&Failing, Domain::new(0.0, 1.0), 4).unwrap_err();
        assert!(matches!(err, OcmlError::ScoringFailure(msg) if msg.contains("not been fitted")));

        let err = contour(&Short, Domain::new(0.0, 1.0), 4).unwrap_err();
        assert!(matches!(err, OcmlError::ScoringFailure(_)));

        let err = contour(&NanAtOrigin, Domain::new(0.0, 1.0), 4).unwrap_err();
        assert!(matches!(err, OcmlError::ScoringFailure(msg) if msg.contains("non-finite")));
    }

    #[test]
    fn score_range_spans_surface() {
        let contour = contour(&Plane, Domain::new(0.0, 1.0), 2).unwrap();
        assert_eq!(contour.score_range(), (0.0, 11.0));
    }

    proptest! {
        #[test]
        fn linspace_hits_both_bounds(
            min in -100.0f64..100.0,
            width in 0.001f64..50.0,
            resolution in 2usize..400,
        ) {
            let max = min + width;
            let coords = Domain::new(min, max).linspace(resolution).unwrap();
            prop_assert_eq!(coords.len(), resolution);
            prop_assert_eq!(coords[0], min);
            prop_assert_eq!(coords[resolution - 1], max);
            for pair in coords.to_vec().windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}
