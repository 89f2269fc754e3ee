//! Filled-contour figures of score surfaces, rendered in memory.
//!
//! A [`Figure`] is a single row of equally sized panels so several models can
//! be compared side by side. A panel holds either a model's level sets or a
//! histogram of its scores. Panels carry no text; titles belong to whatever
//! embeds the figure.

use std::{fs, ops::Range, path::Path};

use base64::Engine;
use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};
use ndarray::ArrayView2;
use plotters::prelude::*;
use tracing::debug;

use crate::error::{OcmlError, Result};
use crate::grid::Contour;

/// Number of filled bands between the surface minimum and maximum.
pub const CONTOUR_BANDS: usize = 20;
pub const DEFAULT_PANEL_SIZE: (u32, u32) = (500, 500);

const PALETTE: [(u8, u8, u8); 3] = [(68, 1, 84), (33, 145, 140), (253, 231, 37)];
const BOUNDARY: RGBColor = RGBColor(220, 30, 30);
const SAMPLE_MARKER_RADIUS: i32 = 2;
const HISTOGRAM_OPACITY: f64 = 0.6;

/// Which distribution a set of scores was drawn from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScoreSeries {
    InDistribution,
    OutDistribution,
}

impl ScoreSeries {
    pub fn label(self) -> &'static str {
        match self {
            Self::InDistribution => "in-distribution",
            Self::OutDistribution => "out-distribution",
        }
    }

    pub fn color(self) -> RGBColor {
        match self {
            Self::InDistribution => RGBColor(40, 160, 60),
            Self::OutDistribution => RGBColor(245, 150, 20),
        }
    }
}

/// Bar counts of one or more score series over a shared set of bins.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreHistogram {
    pub lo: f64,
    pub hi: f64,
    pub series: Vec<(ScoreSeries, Vec<usize>)>,
}

impl ScoreHistogram {
    /// Bins span the smallest to largest score across every series.
    pub fn new(series: &[(ScoreSeries, &[f64])], bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(OcmlError::Render("a histogram needs at least one bin".to_string()));
        }
        if series.is_empty() || series.iter().any(|(_, values)| values.is_empty()) {
            return Err(OcmlError::EmptyDataset);
        }
        let values = series.iter().flat_map(|(_, values)| values.iter().copied());
        if values.clone().any(|v| !v.is_finite()) {
            return Err(OcmlError::Render("cannot bin non-finite scores".to_string()));
        }
        let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        // A single repeated score still gets a visible bar.
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };

        let series = series
            .iter()
            .map(|&(kind, values)| (kind, histogram_counts(values, lo, hi, bins)))
            .collect();
        Ok(Self { lo, hi, series })
    }

    pub fn bins(&self) -> usize {
        self.series.first().map_or(0, |(_, counts)| counts.len())
    }

    pub fn bin_width(&self) -> f64 {
        (self.hi - self.lo) / self.bins() as f64
    }

    /// Bar heights as the share of each series falling into the bin.
    pub fn probabilities(&self) -> Vec<(ScoreSeries, Vec<f64>)> {
        self.series
            .iter()
            .map(|(kind, counts)| {
                let total = counts.iter().sum::<usize>().max(1) as f64;
                (*kind, counts.iter().map(|&c| c as f64 / total).collect())
            })
            .collect()
    }
}

/// Per-bin counts of `values` over `[lo, hi]`; the top edge belongs to the last bin.
pub fn histogram_counts(values: &[f64], lo: f64, hi: f64, bins: usize) -> Vec<usize> {
    let mut counts = vec![0; bins];
    if bins == 0 {
        return counts;
    }
    for &value in values.iter().filter(|v| (lo..=hi).contains(*v)) {
        counts[band_index(value, lo, hi, bins)] += 1;
    }
    counts
}

pub struct Figure {
    panels: usize,
    panel_size: (u32, u32),
    pixels: Vec<u8>,
}

impl Figure {
    pub fn new(panels: usize, panel_size: (u32, u32)) -> Result<Self> {
        if panels == 0 || panel_size.0 == 0 || panel_size.1 == 0 {
            return Err(OcmlError::Render(format!(
                "cannot build a figure of {panels} panels sized {}x{}",
                panel_size.0, panel_size.1
            )));
        }
        let width = panel_size.0 as usize * panels;
        Ok(Self {
            panels,
            panel_size,
            pixels: vec![255; width * panel_size.1 as usize * 3],
        })
    }

    pub fn width(&self) -> u32 {
        self.panel_size.0 * self.panels as u32
    }

    pub fn height(&self) -> u32 {
        self.panel_size.1
    }

    /// Packed RGB pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.panels {
            return Err(OcmlError::InvalidSlot {
                slot,
                panels: self.panels,
            });
        }
        Ok(())
    }

    /// Draw `contour` into panel `slot` and overlay `samples` (n x 2) as small markers.
    pub fn draw_contour(&mut self, slot: usize, contour: &Contour, samples: &ArrayView2<f64>) -> Result<()> {
        self.check_slot(slot)?;
        if samples.ncols() != 2 {
            return Err(OcmlError::DimensionMismatch {
                expected: 2,
                actual: samples.ncols(),
            });
        }

        let size = (self.width(), self.height());
        let resolution = contour.resolution();
        let (lo, hi) = contour.score_range();
        let x = &contour.x_coords;
        let y = &contour.y_coords;
        let surface = &contour.surface;

        {
            let root = BitMapBackend::with_buffer(&mut self.pixels, size).into_drawing_area();
            let areas = root.split_evenly((1, self.panels));
            let area = &areas[slot];
            area.fill(&WHITE).map_err(render_error)?;

            let x_range: Range<f64> = x[0]..x[resolution - 1];
            let y_range: Range<f64> = y[0]..y[resolution - 1];
            let mut chart = ChartBuilder::on(area)
                .margin(8)
                .build_cartesian_2d(x_range, y_range)
                .map_err(render_error)?;

            let cells = (0..resolution - 1).flat_map(|i| (0..resolution - 1).map(move |j| (i, j)));
            chart
                .draw_series(cells.map(|(i, j)| {
                    let corners = [
                        surface[[i, j]],
                        surface[[i + 1, j]],
                        surface[[i, j + 1]],
                        surface[[i + 1, j + 1]],
                    ];
                    let color = cell_color(&corners, lo, hi);
                    Rectangle::new([(x[j], y[i]), (x[j + 1], y[i + 1])], color.filled())
                }))
                .map_err(render_error)?;

            chart
                .draw_series(
                    samples
                        .rows()
                        .into_iter()
                        .map(|p| Circle::new((p[0], p[1]), SAMPLE_MARKER_RADIUS, BLACK.filled())),
                )
                .map_err(render_error)?;

            root.present().map_err(render_error)?;
        }

        debug!(slot, resolution, samples = samples.nrows(), "drew contour panel");
        Ok(())
    }

    /// Draw overlaid probability bars for every series of `histogram` into panel `slot`.
    pub fn draw_histogram(&mut self, slot: usize, histogram: &ScoreHistogram) -> Result<()> {
        self.check_slot(slot)?;

        let size = (self.width(), self.height());
        let probabilities = histogram.probabilities();
        let top = probabilities
            .iter()
            .flat_map(|(_, bars)| bars.iter().copied())
            .fold(0.0, f64::max);
        let width = histogram.bin_width();

        {
            let root = BitMapBackend::with_buffer(&mut self.pixels, size).into_drawing_area();
            let areas = root.split_evenly((1, self.panels));
            let area = &areas[slot];
            area.fill(&WHITE).map_err(render_error)?;

            let mut chart = ChartBuilder::on(area)
                .margin(8)
                .build_cartesian_2d(histogram.lo..histogram.hi, 0.0..top * 1.05)
                .map_err(render_error)?;

            for (kind, bars) in &probabilities {
                let style = kind.color().mix(HISTOGRAM_OPACITY).filled();
                chart
                    .draw_series(bars.iter().enumerate().filter(|(_, p)| **p > 0.0).map(|(bin, &p)| {
                        let left = histogram.lo + width * bin as f64;
                        Rectangle::new([(left, 0.0), (left + width, p)], style)
                    }))
                    .map_err(render_error)?;
            }

            root.present().map_err(render_error)?;
        }

        debug!(slot, bins = histogram.bins(), series = probabilities.len(), "drew histogram panel");
        Ok(())
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(self.width(), self.height(), &self.pixels)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| OcmlError::io("failed to create image directory", parent, err))?;
        }
        fs::write(path, self.to_png()?).map_err(|err| OcmlError::io("failed to write figure", path, err))
    }
}

/// Band of `value` within `[lo, hi]`, in `0..bands`.
pub fn band_index(value: f64, lo: f64, hi: f64, bands: usize) -> usize {
    if !(hi > lo) {
        return 0;
    }
    let position = ((value - lo) / (hi - lo)).clamp(0.0, 1.0);
    ((position * bands as f64) as usize).min(bands - 1)
}

/// Fill color of a band, from dark purple (lowest) to yellow (highest).
pub fn band_color(band: usize, bands: usize) -> RGBColor {
    let t = if bands > 1 {
        band as f64 / (bands - 1) as f64
    } else {
        0.0
    };
    let scaled = t * (PALETTE.len() - 1) as f64;
    let index = (scaled.floor() as usize).min(PALETTE.len() - 2);
    let frac = scaled - index as f64;
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (from, to) = (PALETTE[index], PALETTE[index + 1]);
    RGBColor(mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}

/// Cells whose corners straddle zero sit on the decision boundary.
fn cell_color(corners: &[f64; 4], lo: f64, hi: f64) -> RGBColor {
    let below = corners.iter().any(|&v| v < 0.0);
    let above = corners.iter().any(|&v| v >= 0.0);
    if below && above {
        return BOUNDARY;
    }
    let mean = corners.iter().sum::<f64>() / corners.len() as f64;
    band_color(band_index(mean, lo, hi, CONTOUR_BANDS), CONTOUR_BANDS)
}

fn render_error(err: impl std::fmt::Display) -> OcmlError {
    OcmlError::Render(err.to_string())
}

/// Encode packed RGB bytes as PNG.
pub fn encode_png(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>> {
    let expected_len = (width * height * 3) as usize;
    if pixels.len() != expected_len {
        return Err(OcmlError::Render(format!(
            "pixel buffer length {} does not match RGB image size {}x{}",
            pixels.len(),
            width,
            height
        )));
    }

    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(pixels, width, height, ColorType::Rgb8)
        .map_err(render_error)?;
    Ok(buffer)
}

pub fn encode_png_data_url(png: &[u8]) -> String {
    let base64 = base64::engine::general_purpose::STANDARD.encode(png);
    format!("data:image/png;base64,{base64}")
}
