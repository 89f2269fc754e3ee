//! Sample sources: seeded 2D toy shapes and single-digit MNIST subsets.

use std::{f64::consts::PI, fmt, str::FromStr};

use burn_dataset::{
    vision::{MnistDataset, MnistItem},
    Dataset as _,
};
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng};
use tracing::info;

use crate::error::{OcmlError, Result};

const MNIST_SIDE: usize = 28;
pub const MNIST_FEATURES: usize = MNIST_SIDE * MNIST_SIDE;
pub const MNIST_CLASSES: u8 = 10;

/// Points plus optional labels; immutable once built.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub name: String,
    pub features: Array2<f64>,
    pub labels: Option<Array1<usize>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.features.nrows() == 0
    }

    /// Keep only the rows labelled `class`.
    pub fn filter_class(&self, class: usize) -> Result<Dataset> {
        let labels = self.labels.as_ref().ok_or_else(|| {
            OcmlError::InvalidConfig(format!("dataset {} has no labels to filter on", self.name))
        })?;
        let rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter_map(|(row, &label)| (label == class).then_some(row))
            .collect();
        if rows.is_empty() {
            return Err(OcmlError::EmptyDataset);
        }
        Ok(Dataset {
            name: format!("{}[class={}]", self.name, class),
            features: self.features.select(Axis(0), &rows),
            labels: Some(labels.select(Axis(0), &rows)),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ToyShape {
    Moons,
    Circles,
    Blobs,
    Spiral,
}

impl ToyShape {
    pub const ALL: [ToyShape; 4] = [Self::Moons, Self::Circles, Self::Blobs, Self::Spiral];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Moons => "moons",
            Self::Circles => "circles",
            Self::Blobs => "blobs",
            Self::Spiral => "spiral",
        }
    }
}

/// Which sample source a run draws from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatasetName {
    Toy(ToyShape),
    Mnist,
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toy(shape) => f.write_str(shape.label()),
            Self::Mnist => f.write_str("mnist"),
        }
    }
}

impl FromStr for DatasetName {
    type Err = OcmlError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "mnist" => Ok(Self::Mnist),
            other => ToyShape::ALL
                .into_iter()
                .find(|shape| shape.label() == other)
                .map(Self::Toy)
                .ok_or_else(|| OcmlError::UnknownDataset(other.to_string())),
        }
    }
}

/// Draw `n_samples` points of `shape` with Gaussian jitter of std `noise`.
pub fn generate_toy(shape: ToyShape, n_samples: usize, noise: f64, rng: &mut StdRng) -> Result<Dataset> {
    if n_samples == 0 {
        return Err(OcmlError::EmptyDataset);
    }

    let mut points = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    for index in 0..n_samples {
        let (point, label) = match shape {
            ToyShape::Moons => {
                let upper = index % 2 == 0;
                let t = rng.gen_range(0.0..PI);
                if upper {
                    ([t.cos(), t.sin()], 0)
                } else {
                    ([1.0 - t.cos(), 0.5 - t.sin()], 1)
                }
            }
            ToyShape::Circles => {
                let outer = index % 2 == 0;
                let t = rng.gen_range(0.0..2.0 * PI);
                let radius = if outer { 1.0 } else { 0.5 };
                ([radius * t.cos(), radius * t.sin()], usize::from(!outer))
            }
            ToyShape::Blobs => {
                const CENTERS: [[f64; 2]; 3] = [[-1.5, -1.5], [1.5, 1.5], [-1.5, 1.5]];
                let cluster = index % CENTERS.len();
                let spread = 0.35;
                (
                    [
                        CENTERS[cluster][0] + spread * standard_normal(rng),
                        CENTERS[cluster][1] + spread * standard_normal(rng),
                    ],
                    cluster,
                )
            }
            ToyShape::Spiral => {
                let arm = index % 2;
                let t = rng.gen_range(0.25..1.0);
                let angle = 3.0 * PI * t + arm as f64 * PI;
                let radius = 2.5 * t;
                ([radius * angle.cos(), radius * angle.sin()], arm)
            }
        };
        points.push([
            point[0] + noise * standard_normal(rng),
            point[1] + noise * standard_normal(rng),
        ]);
        labels.push(label);
    }

    Ok(Dataset {
        name: shape.label().to_string(),
        features: Array2::from_shape_fn((n_samples, 2), |(row, col)| points[row][col]),
        labels: Some(Array1::from(labels)),
    })
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// One MNIST digit against the rest.
#[derive(Clone, Debug)]
pub struct MnistSubset {
    pub class: u8,
    /// Training images of `class` only.
    pub train: Array2<f64>,
    pub test_inliers: Array2<f64>,
    pub test_outliers: Array2<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct MnistLimits {
    pub train: usize,
    pub test_inliers: usize,
    pub test_outliers: usize,
}

pub fn validate_mnist_class(class: usize) -> Result<u8> {
    u8::try_from(class)
        .ok()
        .filter(|&c| c < MNIST_CLASSES)
        .ok_or_else(|| {
            OcmlError::InvalidConfig(format!("mnist class {class} outside 0..{MNIST_CLASSES}"))
        })
}

/// Load the class-vs-rest subset, downloading MNIST on first use.
pub fn load_mnist_class(class: usize, limits: MnistLimits) -> Result<MnistSubset> {
    let class = validate_mnist_class(class)?;
    let train_split = MnistDataset::train();
    let test_split = MnistDataset::test();

    let train_images: Vec<MnistItem> = train_split
        .iter()
        .filter(|item| item.label == class)
        .take(limits.train)
        .collect();
    let (mut test_in, mut test_out) = (Vec::new(), Vec::new());
    for item in test_split.iter() {
        if item.label == class {
            if test_in.len() < limits.test_inliers {
                test_in.push(item);
            }
        } else if test_out.len() < limits.test_outliers {
            test_out.push(item);
        }
        if test_in.len() >= limits.test_inliers && test_out.len() >= limits.test_outliers {
            break;
        }
    }

    if train_images.is_empty() || test_in.is_empty() || test_out.is_empty() {
        return Err(OcmlError::EmptyDataset);
    }

    info!(
        class,
        train = train_images.len(),
        test_inliers = test_in.len(),
        test_outliers = test_out.len(),
        "loaded mnist class subset"
    );

    Ok(MnistSubset {
        class,
        train: images_to_features(train_images.iter().map(|item| &item.image))?,
        test_inliers: images_to_features(test_in.iter().map(|item| &item.image))?,
        test_outliers: images_to_features(test_out.iter().map(|item| &item.image))?,
    })
}

/// Flatten 28x28 images row by row into `[0, 1]` feature rows.
pub fn images_to_features<'a, I>(images: I) -> Result<Array2<f64>>
where
    I: ExactSizeIterator<Item = &'a [[f32; MNIST_SIDE]; MNIST_SIDE]>,
{
    let rows = images.len();
    let mut flat = Vec::with_capacity(rows * MNIST_FEATURES);
    for image in images {
        for row in image.iter() {
            flat.extend(row.iter().map(|&pixel| f64::from(pixel) / 255.0));
        }
    }
    let actual = flat.len() / rows.max(1);
    Array2::from_shape_vec((rows, MNIST_FEATURES), flat).map_err(|_| OcmlError::DimensionMismatch {
        expected: MNIST_FEATURES,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded_rng;

    #[test]
    fn names_parse() {
        assert_eq!("mnist".parse::<DatasetName>().unwrap(), DatasetName::Mnist);
        assert_eq!(
            "moons".parse::<DatasetName>().unwrap(),
            DatasetName::Toy(ToyShape::Moons)
        );
        assert!(matches!(
            "imagenet".parse::<DatasetName>(),
            Err(OcmlError::UnknownDataset(name)) if name == "imagenet"
        ));
    }

    #[test]
    fn toy_shapes_are_two_dimensional_and_seeded() {
        for shape in ToyShape::ALL {
            let a = generate_toy(shape, 64, 0.05, &mut seeded_rng(4)).unwrap();
            let b = generate_toy(shape, 64, 0.05, &mut seeded_rng(4)).unwrap();
            assert_eq!(a.features.dim(), (64, 2));
            assert_eq!(a.features, b.features);
            assert!(a.features.iter().all(|v| v.is_finite() && v.abs() < 5.0));
        }
    }

    #[test]
    fn circles_without_noise_lie_on_their_radius() {
        let data = generate_toy(ToyShape::Circles, 20, 0.0, &mut seeded_rng(1)).unwrap();
        let labels = data.labels.as_ref().unwrap();
        for (point, &label) in data.features.rows().into_iter().zip(labels.iter()) {
            let radius = (point[0] * point[0] + point[1] * point[1]).sqrt();
            let expected = if label == 0 { 1.0 } else { 0.5 };
            assert!((radius - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn class_filter_keeps_only_that_class() {
        let data = generate_toy(ToyShape::Blobs, 30, 0.0, &mut seeded_rng(2)).unwrap();
        let only = data.filter_class(1).unwrap();
        assert_eq!(only.len(), 10);
        assert!(only.labels.unwrap().iter().all(|&l| l == 1));
        assert!(matches!(data.filter_class(7), Err(OcmlError::EmptyDataset)));
    }

    #[test]
    fn mnist_images_flatten_row_major_and_scale() {
        let mut image = [[0f32; 28]; 28];
        image[0][1] = 255.0;
        image[1][0] = 51.0;
        let features = images_to_features([&image, &image].into_iter()).unwrap();
        assert_eq!(features.dim(), (2, MNIST_FEATURES));
        assert_eq!(features[[0, 1]], 1.0);
        assert!((features[[1, 28]] - 0.2).abs() < 1e-9);
        assert_eq!(features.row(0).sum(), features.row(1).sum());
    }

    #[test]
    fn mnist_class_bounds() {
        assert_eq!(validate_mnist_class(9).unwrap(), 9);
        assert!(validate_mnist_class(10).is_err());
        assert!(load_mnist_class(300, MnistLimits { train: 1, test_inliers: 1, test_outliers: 1 }).is_err());
    }
}
