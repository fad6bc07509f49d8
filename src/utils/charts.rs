//! SVG Chart Generator for Training Reports
//!
//! Produces the two report images of a run: the training-curve chart (accuracy and
//! loss panels side by side) and the confusion-matrix heatmap.

use std::fs;
use std::path::Path;

/// Chart styling constants
const PANEL_WIDTH: f64 = 600.0;
const CHART_HEIGHT: f64 = 460.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_LEFT: f64 = 70.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#e67e22";
const COLOR_PHASE: &str = "#95a5a6";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const HEATMAP_CELL: f64 = 64.0;
const HEATMAP_LABEL_SPACE: f64 = 180.0;

/// A data point for a line chart
#[derive(Debug, Clone)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A data series for charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, color: &str, points: Vec<(f64, f64)>) -> Self {
        Self {
            name: name.to_string(),
            points: points.into_iter().map(|(x, y)| DataPoint { x, y }).collect(),
            color: color.to_string(),
        }
    }
}

/// One panel of a multi-panel line chart
#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub y_label: String,
    pub series: Vec<DataSeries>,
    /// Render y ticks as percentages of a [0, 1] quantity
    pub percent: bool,
}

/// Generate the training-history chart: one panel per metric group
///
/// `phase_boundary` draws a dashed vertical marker where fine-tuning began.
pub fn generate_training_chart(
    title: &str,
    panels: &[Panel],
    phase_boundary: Option<f64>,
    output_path: &Path,
) -> std::io::Result<()> {
    let width = PANEL_WIDTH * panels.len().max(1) as f64;
    let mut svg = svg_header(width, CHART_HEIGHT);

    svg.push_str(&format!(
        r#"<text x="{}" y="28" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        width / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    ));

    for (i, panel) in panels.iter().enumerate() {
        render_line_panel(&mut svg, i as f64 * PANEL_WIDTH, panel, phase_boundary);
    }

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

fn render_line_panel(svg: &mut String, x_offset: f64, panel: &Panel, phase_boundary: Option<f64>) {
    let plot_width = PANEL_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let left = x_offset + MARGIN_LEFT;

    let (x_min, x_max, y_min, y_max) = padded_ranges(&panel.series, panel.percent);
    let to_x = |x: f64| left + ((x - x_min) / (x_max - x_min)) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    svg.push_str(&format!(
        r#"<text x="{}" y="50" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" font-weight="bold" fill="{}">{}</text>"#,
        left + plot_width / 2.0,
        COLOR_TEXT,
        escape_xml(&panel.title)
    ));

    // Grid lines
    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            left,
            y,
            left + plot_width,
            y,
            COLOR_GRID
        ));
        let tick = if panel.percent {
            format!("{:.0}%", value * 100.0)
        } else {
            format!("{:.2}", value)
        };
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            left - 8.0,
            y + 4.0,
            COLOR_TEXT,
            tick
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left,
        MARGIN_TOP + plot_height,
        left + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left,
        MARGIN_TOP,
        left,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    ));

    // Axis labels
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">Epoch</text>"#,
        left + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT
    ));
    let label_x = x_offset + 18.0;
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}" transform="rotate(-90 {} {})">{}</text>"#,
        label_x,
        CHART_HEIGHT / 2.0,
        COLOR_TEXT,
        label_x,
        CHART_HEIGHT / 2.0,
        escape_xml(&panel.y_label)
    ));

    // X-axis ticks, at most ten
    let x_span = (x_max - x_min).max(1.0);
    let step = (x_span / 10.0).ceil().max(1.0);
    let mut tick = x_min.ceil();
    while tick <= x_max {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
            to_x(tick),
            MARGIN_TOP + plot_height + 18.0,
            COLOR_TEXT,
            tick
        ));
        tick += step;
    }

    if let Some(boundary) = phase_boundary {
        if boundary > x_min && boundary < x_max {
            let x = to_x(boundary);
            svg.push_str(&format!(
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1.5" stroke-dasharray="6,4"/>"#,
                x,
                MARGIN_TOP,
                x,
                MARGIN_TOP + plot_height,
                COLOR_PHASE
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="10" fill="{}">fine-tune</text>"#,
                x + 4.0,
                MARGIN_TOP + 12.0,
                COLOR_PHASE
            ));
        }
    }

    for series in &panel.series {
        if series.points.is_empty() {
            continue;
        }

        let mut path = String::new();
        for (i, point) in series.points.iter().enumerate() {
            let cmd = if i == 0 { "M" } else { " L" };
            path.push_str(&format!("{} {:.2} {:.2}", cmd, to_x(point.x), to_y(point.y)));
        }
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
            path, series.color
        ));

        for point in &series.points {
            svg.push_str(&format!(
                r#"<circle cx="{:.2}" cy="{:.2}" r="3" fill="{}"/>"#,
                to_x(point.x),
                to_y(point.y),
                series.color
            ));
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 8.0;
    for series in &panel.series {
        let legend_x = left + plot_width - 110.0;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="12" height="12" fill="{}"/>"#,
            legend_x, legend_y, series.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            legend_x + 18.0,
            legend_y + 10.0,
            COLOR_TEXT,
            escape_xml(&series.name)
        ));
        legend_y += 20.0;
    }
}

/// Generate a confusion-matrix heatmap (rows true class, columns predicted)
///
/// Cells are shaded by row-normalized frequency and labeled with raw counts.
pub fn generate_confusion_heatmap(
    title: &str,
    matrix: &[Vec<usize>],
    class_names: &[String],
    output_path: &Path,
) -> std::io::Result<()> {
    let n = matrix.len();
    let grid = HEATMAP_CELL * n as f64;
    let width = HEATMAP_LABEL_SPACE + grid + MARGIN_RIGHT;
    let height = MARGIN_TOP + grid + HEATMAP_LABEL_SPACE;
    let mut svg = svg_header(width, height);

    svg.push_str(&format!(
        r#"<text x="{}" y="30" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        width / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    ));

    for (row, counts) in matrix.iter().enumerate() {
        let row_total: usize = counts.iter().sum();
        for (col, &count) in counts.iter().enumerate() {
            let frac = if row_total > 0 {
                count as f64 / row_total as f64
            } else {
                0.0
            };
            let x = HEATMAP_LABEL_SPACE + col as f64 * HEATMAP_CELL;
            let y = MARGIN_TOP + row as f64 * HEATMAP_CELL;
            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x,
                y,
                HEATMAP_CELL,
                HEATMAP_CELL,
                heat_color(frac)
            ));
            let text_color = if frac > 0.5 { "white" } else { COLOR_TEXT };
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">{}</text>"#,
                x + HEATMAP_CELL / 2.0,
                y + HEATMAP_CELL / 2.0 + 5.0,
                text_color,
                count
            ));
        }
    }

    for (i, name) in class_names.iter().enumerate().take(n) {
        let center = i as f64 * HEATMAP_CELL + HEATMAP_CELL / 2.0;
        // row labels (true class)
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}">{}</text>"#,
            HEATMAP_LABEL_SPACE - 8.0,
            MARGIN_TOP + center + 4.0,
            COLOR_TEXT,
            escape_xml(name)
        ));
        // column labels (predicted class), rotated
        let lx = HEATMAP_LABEL_SPACE + center;
        let ly = MARGIN_TOP + grid + 12.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="11" fill="{}" transform="rotate(-45 {} {})">{}</text>"#,
            lx,
            ly,
            COLOR_TEXT,
            lx,
            ly,
            escape_xml(name)
        ));
    }

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}">Predicted</text>"#,
        HEATMAP_LABEL_SPACE + grid / 2.0,
        height - 15.0,
        COLOR_TEXT
    ));
    svg.push_str(&format!(
        r#"<text x="16" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="13" fill="{}" transform="rotate(-90 16 {})">True</text>"#,
        MARGIN_TOP + grid / 2.0,
        COLOR_TEXT,
        MARGIN_TOP + grid / 2.0
    ));

    svg.push_str("</svg>");
    fs::write(output_path, svg)
}

fn svg_header(width: f64, height: f64) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        width, height, width, height
    );
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        width, height
    ));
    svg
}

/// White to deep blue
fn heat_color(frac: f64) -> String {
    let t = frac.clamp(0.0, 1.0);
    let lerp = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for s in series {
        for p in &s.points {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
    }

    (x_min, x_max, y_min, y_max)
}

/// Data ranges widened so that single points and flat lines still render
fn padded_ranges(series: &[DataSeries], percent: bool) -> (f64, f64, f64, f64) {
    let (mut x_min, mut x_max, mut y_min, mut y_max) = find_ranges(series);
    if !x_min.is_finite() || !x_max.is_finite() {
        (x_min, x_max) = (0.0, 1.0);
    }
    if !y_min.is_finite() || !y_max.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }
    if x_max - x_min < 1.0 {
        x_max = x_min + 1.0;
    }

    if percent {
        return (x_min, x_max, 0.0, 1.0);
    }

    let pad = ((y_max - y_min) * 0.1).max(1e-3);
    (x_min, x_max, (y_min - pad).max(0.0), y_max + pad)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_training_chart_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("training_history.svg");
        let panels = vec![
            Panel {
                title: "Accuracy".into(),
                y_label: "Accuracy".into(),
                series: vec![
                    DataSeries::new("train", COLOR_PRIMARY, vec![(1.0, 0.4), (2.0, 0.6), (3.0, 0.7)]),
                    DataSeries::new("val", COLOR_SECONDARY, vec![(1.0, 0.35), (2.0, 0.5), (3.0, 0.65)]),
                ],
                percent: true,
            },
            Panel {
                title: "Loss".into(),
                y_label: "Cross-entropy".into(),
                series: vec![DataSeries::new("train", COLOR_PRIMARY, vec![(1.0, 1.9), (2.0, 1.2), (3.0, 0.9)])],
                percent: false,
            },
        ];

        generate_training_chart("Training History", &panels, Some(2.5), &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("fine-tune"));
        assert_eq!(svg.matches("<path").count(), 3);
    }

    #[test]
    fn test_single_point_series_renders_finite_coordinates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.svg");
        let panels = vec![Panel {
            title: "Loss".into(),
            y_label: "Loss".into(),
            series: vec![DataSeries::new("val", COLOR_SECONDARY, vec![(1.0, 0.5)])],
            percent: false,
        }];

        generate_training_chart("One epoch", &panels, None, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
    }

    #[test]
    fn test_confusion_heatmap_labels_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("confusion_matrix.svg");
        let matrix = vec![vec![5, 1], vec![2, 7]];
        let names = vec!["melanoma".to_string(), "benign_nevi".to_string()];

        generate_confusion_heatmap("Confusion Matrix", &matrix, &names, &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains(">7</text>"));
        assert!(svg.contains("benign_nevi"));
        assert_eq!(svg.matches("stroke=\"white\"").count(), 4);
    }

    #[test]
    fn test_heat_color_endpoints() {
        assert_eq!(heat_color(0.0), "#f7fbff");
        assert_eq!(heat_color(1.0), "#08306b");
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & c"), "a&lt;b &amp; c");
    }
}
