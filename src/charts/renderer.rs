//! Static Chart Renderer
//! Writes simple labelled bar charts as PNG files.
//!
//! Layout:
//! 1. Caption centered on top
//! 2. One bar per entry on a segmented x axis, label under each bar
//! 3. Rounded value printed above (or below, when negative) each bar

use plotters::prelude::*;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Drawing error: {0}")]
    Drawing(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("chart '{0}' has no bars")]
    Empty(String),
}

fn drawing<E: Display>(e: E) -> ChartError {
    ChartError::Drawing(e.to_string())
}

/// Bar fill colors, cycled per bar
pub const PALETTE: [RGBColor; 6] = [
    RGBColor(52, 152, 219),  // Blue
    RGBColor(231, 76, 60),   // Red
    RGBColor(46, 204, 113),  // Green
    RGBColor(155, 89, 182),  // Purple
    RGBColor(243, 156, 18),  // Orange
    RGBColor(26, 188, 156),  // Teal
];

pub const DEFAULT_SIZE: (u32, u32) = (1000, 600);

const FONT: &str = "sans-serif";

/// One labelled bar
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub label: String,
    pub value: f64,
}

/// Everything needed to draw one bar chart
#[derive(Debug, Clone, PartialEq)]
pub struct BarChart {
    pub title: String,
    pub x_desc: String,
    pub y_desc: String,
    pub bars: Vec<Bar>,
}

impl BarChart {
    /// A student's grade in each test. Tests without a grade get no bar.
    pub fn test_results(id: i64, grades: &[(String, Option<f64>)]) -> Self {
        Self {
            title: format!("All Test Results For ResearchId {id}"),
            x_desc: "Test Name".to_string(),
            y_desc: "Percentage Grade".to_string(),
            bars: grades
                .iter()
                .filter_map(|(test, grade)| {
                    grade.map(|value| Bar {
                        label: test.clone(),
                        value,
                    })
                })
                .collect(),
        }
    }

    /// A student's standardized grade and relative performance on one question.
    pub fn question_performance(id: i64, table: &str, question: &str, grade: f64, relative: f64) -> Self {
        Self {
            title: format!("Performance in {question} of {table} for ResearchId {id}"),
            x_desc: String::new(),
            y_desc: "Score".to_string(),
            bars: vec![
                Bar {
                    label: format!("{question} Grade"),
                    value: grade,
                },
                Bar {
                    label: format!("{question} Relative"),
                    value: relative,
                },
            ],
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.value).collect()
    }
}

pub struct BarChartRenderer;

impl BarChartRenderer {
    /// Y axis range covering every value and zero, with some headroom for
    /// the value labels.
    pub fn y_range(values: &[f64]) -> (f64, f64) {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return (0.0, 100.0);
        }

        let min = finite.iter().copied().fold(0.0, f64::min);
        let max = finite.iter().copied().fold(0.0, f64::max);
        let pad = ((max - min) / 10.0).max(1.0);
        let low = if min < 0.0 { (min - pad).floor() } else { 0.0 };
        (low, (max + pad).ceil())
    }

    pub fn bar_color(index: usize) -> RGBColor {
        PALETTE[index % PALETTE.len()]
    }

    /// Render `chart` to a PNG at `path`, creating parent directories.
    pub fn render(chart: &BarChart, path: &Path, size: (u32, u32)) -> Result<(), ChartError> {
        if chart.bars.is_empty() {
            return Err(ChartError::Empty(chart.title.clone()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let n = chart.bars.len() as i32;
        let (y_min, y_max) = Self::y_range(&chart.values());
        let label_offset = (y_max - y_min) * 0.02;
        let labels: Vec<String> = chart.bars.iter().map(|b| b.label.clone()).collect();

        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(drawing)?;

        let mut ctx = ChartBuilder::on(&root)
            .caption(&chart.title, (FONT, 28))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(60)
            .build_cartesian_2d((0..n).into_segmented(), y_min..y_max)
            .map_err(drawing)?;

        ctx.configure_mesh()
            .disable_x_mesh()
            .x_labels(chart.bars.len())
            .x_label_formatter(&|x| match x {
                SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
                _ => String::new(),
            })
            .x_desc(chart.x_desc.as_str())
            .y_desc(chart.y_desc.as_str())
            .axis_desc_style((FONT, 18))
            .draw()
            .map_err(drawing)?;

        ctx.draw_series(chart.bars.iter().enumerate().map(|(i, bar)| {
            let i = i as i32;
            Rectangle::new(
                [(SegmentValue::Exact(i), 0.0), (SegmentValue::Exact(i + 1), bar.value)],
                Self::bar_color(i as usize).filled(),
            )
        }))
        .map_err(drawing)?;

        ctx.draw_series(chart.bars.iter().enumerate().map(|(i, bar)| {
            let y = if bar.value < 0.0 {
                bar.value - label_offset * 2.0
            } else {
                bar.value + label_offset
            };
            Text::new(
                format!("{:.0}", bar.value),
                (SegmentValue::CenterOf(i as i32), y),
                (FONT, 16).into_font(),
            )
        }))
        .map_err(drawing)?;

        root.present().map_err(drawing)?;
        info!(path = %path.display(), "chart saved");
        Ok(())
    }
}
