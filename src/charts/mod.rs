//! Charts module - PNG bar chart rendering

mod renderer;

pub use renderer::{Bar, BarChart, BarChartRenderer, ChartError, DEFAULT_SIZE, PALETTE};
