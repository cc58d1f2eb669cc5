//! Raster charts for run artefacts: learning curves, confusion heatmaps and weight histograms.
//!
//! Charts carry no text. Axis labels, legends and titles live next to the image in the report.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

use crate::metrics::ConfusionMatrix;

pub const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
pub const VALIDATION_COLOR: Rgb<u8> = Rgb([214, 39, 40]);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const MARGIN: u32 = 40;
const GRID_LINES: u32 = 4;

// Endpoints of the "Blues" ramp.
const BLUES_LOW: [f32; 3] = [247.0, 251.0, 255.0];
const BLUES_HIGH: [f32; 3] = [8.0, 48.0, 107.0];

pub struct LineSeries<'a> {
    pub values: &'a [f32],
    pub color: Rgb<u8>,
}

/// Counts of values falling in equal-width bins over `[min, max]`. Values outside the range are
/// counted as clipped rather than binned.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub counts: Vec<usize>,
    pub clipped: usize,
}

impl Histogram {
    pub fn from_values(values: &[f32], bins: usize, min: f32, max: f32) -> Result<Self> {
        if bins == 0 {
            bail!("histogram needs at least one bin");
        }
        if !(min < max) {
            bail!("histogram range [{min}, {max}] is empty");
        }

        let mut counts = vec![0; bins];
        let mut clipped = 0;
        let width = (max - min) / bins as f32;
        for &value in values {
            if !value.is_finite() || value < min || value > max {
                clipped += 1;
                continue;
            }
            let bin = (((value - min) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }

        Ok(Self {
            min,
            max,
            counts,
            clipped,
        })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

struct Plot {
    image: RgbImage,
}

impl Plot {
    fn new(width: u32, height: u32) -> Result<Self> {
        if width <= 2 * MARGIN || height <= 2 * MARGIN {
            bail!("chart size {width}x{height} leaves no room for the plot area");
        }
        Ok(Self {
            image: RgbImage::from_pixel(width, height, BACKGROUND),
        })
    }

    fn inner_width(&self) -> f32 {
        (self.image.width() - 2 * MARGIN) as f32
    }

    fn inner_height(&self) -> f32 {
        (self.image.height() - 2 * MARGIN) as f32
    }

    /// Map fractions of the plot area (0..=1, origin bottom-left) to pixel coordinates.
    fn to_pixel(&self, fx: f32, fy: f32) -> (i64, i64) {
        let x = MARGIN as f32 + fx.clamp(0.0, 1.0) * self.inner_width();
        let y = (self.image.height() - MARGIN) as f32 - fy.clamp(0.0, 1.0) * self.inner_height();
        (x.round() as i64, y.round() as i64)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn thick_line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        for offset in -1..=1 {
            self.line((from.0, from.1 + offset), (to.0, to.1 + offset), color);
        }
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                self.put(x, y, color);
            }
        }
    }

    fn frame(&mut self) {
        for step in 1..=GRID_LINES {
            let f = step as f32 / GRID_LINES as f32;
            let left = self.to_pixel(0.0, f);
            let right = self.to_pixel(1.0, f);
            self.line(left, right, GRID);
        }
        let origin = self.to_pixel(0.0, 0.0);
        self.line(origin, self.to_pixel(1.0, 0.0), AXIS);
        self.line(origin, self.to_pixel(0.0, 1.0), AXIS);
    }
}

fn value_range(series: &[LineSeries<'_>]) -> Option<(f32, f32)> {
    let mut values = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite());
    let first = values.next()?;
    let (min, max) = values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (max - min).abs() < f32::EPSILON {
        Some((min - 1.0, max + 1.0))
    } else {
        let pad = (max - min) * 0.05;
        Some((min - pad, max + pad))
    }
}

/// Draw each series as a polyline over x = 1..=n, sharing one y axis.
pub fn render_line_chart(series: &[LineSeries<'_>], width: u32, height: u32) -> Result<RgbImage> {
    let mut plot = Plot::new(width, height)?;
    plot.frame();

    let Some((lo, hi)) = value_range(series) else {
        return Ok(plot.image);
    };
    let longest = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let x_span = longest.saturating_sub(1).max(1) as f32;

    for s in series {
        let points: Vec<_> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| plot.to_pixel(i as f32 / x_span, (v - lo) / (hi - lo)))
            .collect();
        for pair in points.windows(2) {
            plot.thick_line(pair[0], pair[1], s.color);
        }
        for &(x, y) in &points {
            plot.fill_rect(x - 2, y - 2, x + 2, y + 2, s.color);
        }
    }

    Ok(plot.image)
}

/// Interpolate the "Blues" ramp; `t` is clamped to [0, 1].
pub fn blues(t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = (BLUES_LOW[i] + (BLUES_HIGH[i] - BLUES_LOW[i]) * t).round() as u8;
    }
    Rgb(rgb)
}

/// One square cell per (true, predicted) pair, shaded by count relative to the largest cell.
pub fn render_confusion_heatmap(matrix: &ConfusionMatrix, cell: u32) -> Result<RgbImage> {
    let classes = matrix.classes() as u32;
    if classes == 0 || cell == 0 {
        bail!("confusion heatmap needs at least one class and a non-zero cell size");
    }

    let side = classes * cell;
    let mut image = RgbImage::from_pixel(side, side, BACKGROUND);
    let max = matrix.max_count().max(1) as f32;
    for row in 0..classes {
        for col in 0..classes {
            let count = matrix.get(row as usize, col as usize);
            let color = blues(count as f32 / max);
            for y in row * cell..(row + 1) * cell {
                for x in col * cell..(col + 1) * cell {
                    let border = x % cell == 0 || y % cell == 0;
                    image.put_pixel(x, y, if border { BACKGROUND } else { color });
                }
            }
        }
    }
    Ok(image)
}

pub fn render_histogram(histogram: &Histogram, width: u32, height: u32) -> Result<RgbImage> {
    let mut plot = Plot::new(width, height)?;
    plot.frame();

    let bins = histogram.counts.len();
    let tallest = histogram.counts.iter().copied().max().unwrap_or(0);
    if bins == 0 || tallest == 0 {
        return Ok(plot.image);
    }

    for (i, &count) in histogram.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let left = plot.to_pixel(i as f32 / bins as f32, 0.0);
        let right = plot.to_pixel((i + 1) as f32 / bins as f32, count as f32 / tallest as f32);
        plot.fill_rect(left.0, left.1, (right.0 - 1).max(left.0), right.1, TRAIN_COLOR);
    }
    Ok(plot.image)
}

pub fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to write chart to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_bins_and_clips() {
        let hist = Histogram::from_values(&[-1.0, -0.4, 0.0, 0.2, 1.0, 1.5, f32::NAN], 4, -1.0, 1.0)
            .unwrap();

        assert_eq!(hist.counts, vec![1, 1, 2, 1]);
        assert_eq!(hist.clipped, 2);
        assert_eq!(hist.total(), 5);
    }

    #[test]
    fn histogram_rejects_degenerate_setup() {
        assert!(Histogram::from_values(&[0.0], 0, -1.0, 1.0).is_err());
        assert!(Histogram::from_values(&[0.0], 3, 1.0, 1.0).is_err());
    }

    #[test]
    fn line_chart_draws_series_colors() {
        let train = [10.0, 50.0, 80.0];
        let val = [12.0, 40.0, 70.0];
        let image = render_line_chart(
            &[
                LineSeries {
                    values: &train,
                    color: TRAIN_COLOR,
                },
                LineSeries {
                    values: &val,
                    color: VALIDATION_COLOR,
                },
            ],
            200,
            150,
        )
        .unwrap();

        assert_eq!(image.dimensions(), (200, 150));
        assert!(image.pixels().any(|p| *p == TRAIN_COLOR));
        assert!(image.pixels().any(|p| *p == VALIDATION_COLOR));
    }

    #[test]
    fn single_point_series_still_renders() {
        let values = [0.5];
        let image = render_line_chart(
            &[LineSeries {
                values: &values,
                color: TRAIN_COLOR,
            }],
            120,
            120,
        )
        .unwrap();
        assert!(image.pixels().any(|p| *p == TRAIN_COLOR));
    }

    #[test]
    fn chart_too_small_is_an_error() {
        assert!(render_line_chart(&[], 50, 50).is_err());
    }

    #[test]
    fn heatmap_shades_largest_cell_darkest() {
        let matrix = ConfusionMatrix::from_labels(2, &[0, 0, 0, 1], &[0, 0, 0, 0]).unwrap();
        let image = render_confusion_heatmap(&matrix, 10).unwrap();

        assert_eq!(image.dimensions(), (20, 20));
        assert_eq!(*image.get_pixel(5, 5), blues(1.0));
        assert_eq!(*image.get_pixel(15, 15), blues(0.0));
    }

    #[test]
    fn histogram_chart_uses_bar_color() {
        let hist = Histogram::from_values(&[0.1, 0.1, -0.5], 10, -1.0, 1.0).unwrap();
        let image = render_histogram(&hist, 160, 120).unwrap();
        assert!(image.pixels().any(|p| *p == TRAIN_COLOR));
    }

    #[test]
    fn saves_png_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots/chart.png");
        let image = RgbImage::from_pixel(4, 4, BACKGROUND);

        save_png(&image, &path).unwrap();
        assert!(path.exists());
    }
}
