//! Exploratory plots written as standalone SVG files.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dataset::Dataset;

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 480.0;
const MARGIN: f64 = 60.0;

/// Histogram bin count for the price distribution.
pub const PRICE_BINS: usize = 50;

/// Writes the three EDA plots into `dir` and returns their paths.
pub fn write_plots(dir: &Path, dataset: &Dataset) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let price = dir.join("price_distribution.svg");
    fs::write(
        &price,
        histogram_svg("Sale price distribution", dataset.targets(), PRICE_BINS),
    )?;
    written.push(price);

    let (names, matrix) = correlation_matrix(dataset);
    let heatmap = dir.join("correlation_heatmap.svg");
    fs::write(&heatmap, heatmap_svg("Correlation of numeric features", &names, &matrix))?;
    written.push(heatmap);

    let points: Vec<(f64, f64)> = dataset
        .schema()
        .numeric_index("land_size")
        .map(|idx| {
            dataset
                .rows()
                .iter()
                .zip(dataset.targets())
                .filter_map(|(row, &price)| row.numeric[idx].map(|land| (land, price)))
                .collect()
        })
        .unwrap_or_default();
    let scatter = dir.join("price_vs_land_size.svg");
    fs::write(
        &scatter,
        scatter_svg("Price vs land size", "land_size (m²)", "price", &points),
    )?;
    written.push(scatter);

    debug!(dir = %dir.display(), plots = written.len(), "eda plots written");
    Ok(written)
}

/// Equal-width bin counts over `[min, max]`, plus the range.
pub fn histogram(values: &[f64], bins: usize) -> (Vec<usize>, f64, f64) {
    let bins = bins.max(1);
    let mut counts = vec![0; bins];
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (counts, 0.0, 0.0);
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    for v in finite {
        let idx = if span > 0.0 {
            (((v - min) / span) * bins as f64) as usize
        } else {
            0
        };
        counts[idx.min(bins - 1)] += 1;
    }
    (counts, min, max)
}

/// Pearson correlation over numeric features and price, using pairwise-complete rows.
pub fn correlation_matrix(dataset: &Dataset) -> (Vec<String>, Vec<Vec<f64>>) {
    let mut names = dataset.schema().numeric.clone();
    names.push("price".to_string());
    let columns: Vec<Vec<Option<f64>>> = (0..names.len())
        .map(|col| {
            dataset
                .rows()
                .iter()
                .zip(dataset.targets())
                .map(|(row, &price)| row.numeric.get(col).copied().unwrap_or(Some(price)))
                .collect()
        })
        .collect();
    let matrix = columns
        .iter()
        .map(|a| columns.iter().map(|b| pearson(a, b)).collect())
        .collect();
    (names, matrix)
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    sxy / (sxx.sqrt() * syy.sqrt())
}

fn svg_open(out: &mut String, title: &str) {
    let _ = write!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    );
    let _ = write!(
        out,
        r#"<rect width="100%" height="100%" fill="white"/><text x="{}" y="24" text-anchor="middle" font-size="16">{}</text>"#,
        WIDTH / 2.0,
        html_escape::encode_text(title)
    );
}

/// Bar chart of [`histogram`] counts.
pub fn histogram_svg(title: &str, values: &[f64], bins: usize) -> String {
    let (counts, min, max) = histogram(values, bins);
    let peak = counts.iter().copied().max().unwrap_or(0).max(1) as f64;
    let plot_w = WIDTH - 2.0 * MARGIN;
    let plot_h = HEIGHT - 2.0 * MARGIN;
    let bar_w = plot_w / counts.len() as f64;

    let mut out = String::new();
    svg_open(&mut out, title);
    for (i, count) in counts.iter().enumerate() {
        let h = *count as f64 / peak * plot_h;
        let _ = write!(
            out,
            r##"<rect class="bar" x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#4c72b0"/>"##,
            MARGIN + i as f64 * bar_w,
            HEIGHT - MARGIN - h,
            (bar_w - 1.0).max(0.5),
            h
        );
    }
    axis_labels(&mut out, &format!("{min:.0}"), &format!("{max:.0}"), &format!("{peak:.0}"));
    out.push_str("</svg>\n");
    out
}

/// Grid of correlation cells, blue for negative and red for positive.
pub fn heatmap_svg(title: &str, names: &[String], matrix: &[Vec<f64>]) -> String {
    let n = names.len().max(1) as f64;
    let left = 120.0;
    let top = 50.0;
    let cell = ((WIDTH - left - 20.0).min(HEIGHT - top - 100.0) / n).max(4.0);

    let mut out = String::new();
    svg_open(&mut out, title);
    for (i, row) in matrix.iter().enumerate() {
        let _ = write!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
            left - 6.0,
            top + (i as f64 + 0.6) * cell,
            html_escape::encode_text(&names[i])
        );
        for (j, value) in row.iter().enumerate() {
            let intensity = (value.abs().min(1.0) * 255.0) as u8;
            let fill = if *value >= 0.0 {
                format!("rgb(255,{0},{0})", 255 - intensity)
            } else {
                format!("rgb({0},{0},255)", 255 - intensity)
            };
            let _ = write!(
                out,
                r#"<rect class="cell" x="{:.1}" y="{:.1}" width="{cell:.1}" height="{cell:.1}" fill="{fill}"><title>{} / {}: {value:.2}</title></rect>"#,
                left + j as f64 * cell,
                top + i as f64 * cell,
                html_escape::encode_text(&names[i]),
                html_escape::encode_text(&names[j]),
            );
        }
    }
    for (j, name) in names.iter().enumerate() {
        let x = left + (j as f64 + 0.5) * cell;
        let y = top + n * cell + 10.0;
        let _ = write!(
            out,
            r#"<text x="{x:.1}" y="{y:.1}" transform="rotate(45 {x:.1} {y:.1})">{}</text>"#,
            html_escape::encode_text(name)
        );
    }
    out.push_str("</svg>\n");
    out
}

/// Scatter plot of `(x, y)` points.
pub fn scatter_svg(title: &str, x_label: &str, y_label: &str, points: &[(f64, f64)]) -> String {
    let (x_min, x_max) = bounds(points.iter().map(|p| p.0));
    let (y_min, y_max) = bounds(points.iter().map(|p| p.1));
    let plot_w = WIDTH - 2.0 * MARGIN;
    let plot_h = HEIGHT - 2.0 * MARGIN;

    let mut out = String::new();
    svg_open(&mut out, title);
    for (x, y) in points {
        let cx = MARGIN + (x - x_min) / (x_max - x_min) * plot_w;
        let cy = HEIGHT - MARGIN - (y - y_min) / (y_max - y_min) * plot_h;
        let _ = write!(
            out,
            r##"<circle class="point" cx="{cx:.1}" cy="{cy:.1}" r="3" fill="#dd8452" fill-opacity="0.6"/>"##
        );
    }
    let _ = write!(
        out,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text><text x="16" y="{:.1}" transform="rotate(-90 16 {:.1})" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        HEIGHT - 12.0,
        html_escape::encode_text(x_label),
        HEIGHT / 2.0,
        HEIGHT / 2.0,
        html_escape::encode_text(y_label)
    );
    axis_labels(&mut out, &format!("{x_min:.0}"), &format!("{x_max:.0}"), &format!("{y_max:.0}"));
    out.push_str("</svg>\n");
    out
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    if max > min {
        (min, max)
    } else {
        (min - 0.5, max + 0.5)
    }
}

fn axis_labels(out: &mut String, x_min: &str, x_max: &str, y_max: &str) {
    let base = HEIGHT - MARGIN;
    let _ = write!(
        out,
        r#"<line x1="{MARGIN}" y1="{base}" x2="{}" y2="{base}" stroke="black"/><line x1="{MARGIN}" y1="{MARGIN}" x2="{MARGIN}" y2="{base}" stroke="black"/>"#,
        WIDTH - MARGIN
    );
    let _ = write!(
        out,
        r#"<text x="{MARGIN}" y="{:.1}">{x_min}</text><text x="{:.1}" y="{:.1}" text-anchor="end">{x_max}</text><text x="{:.1}" y="{MARGIN}" text-anchor="end">{y_max}</text>"#,
        base + 16.0,
        WIDTH - MARGIN,
        base + 16.0,
        MARGIN - 4.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{FeatureRow, FeatureSchema};

    #[test]
    fn histogram_places_extremes_in_end_bins() {
        let (counts, min, max) = histogram(&[0.0, 1.0, 2.0, 10.0], 5);
        assert_eq!(counts, vec![2, 1, 0, 0, 1]);
        assert_eq!((min, max), (0.0, 10.0));
        assert_eq!(histogram(&[3.0, 3.0], 4).0, vec![2, 0, 0, 0]);
    }

    #[test]
    fn price_histogram_has_fifty_bars() {
        let values: Vec<f64> = (0..200).map(|i| 500_000.0 + i as f64 * 1000.0).collect();
        let svg = histogram_svg("Sale price distribution", &values, PRICE_BINS);
        assert_eq!(svg.matches(r#"class="bar""#).count(), 50);
        assert!(svg.starts_with("<svg"));
    }

    #[test]
    fn correlation_includes_price_column() {
        let schema = FeatureSchema {
            numeric: vec!["land_size".into(), "bedrooms".into()],
            categorical: vec![],
        };
        let rows = (0..10)
            .map(|i| FeatureRow {
                numeric: vec![Some(i as f64), if i % 2 == 0 { None } else { Some(3.0) }],
                categorical: vec![],
            })
            .collect();
        let targets = (0..10).map(|i| 100.0 + 10.0 * i as f64).collect();
        let dataset = Dataset::from_parts(schema, rows, targets);
        let (names, matrix) = correlation_matrix(&dataset);
        assert_eq!(names, vec!["land_size", "bedrooms", "price"]);
        assert!((matrix[0][2] - 1.0).abs() < 1e-12);
        assert_eq!(matrix[1][2], 0.0);
        assert!((matrix[2][2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = FeatureSchema {
            numeric: vec!["land_size".into()],
            categorical: vec![],
        };
        let rows = vec![
            FeatureRow {
                numeric: vec![Some(300.0)],
                categorical: vec![],
            },
            FeatureRow {
                numeric: vec![None],
                categorical: vec![],
            },
        ];
        let dataset = Dataset::from_parts(schema, rows, vec![1.0, 2.0]);
        let written = write_plots(&dir.path().join("eda"), &dataset).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));
        let scatter = fs::read_to_string(&written[2]).unwrap();
        assert_eq!(scatter.matches(r#"class="point""#).count(), 1);
    }
}
