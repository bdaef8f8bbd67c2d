//! Grade Insight - cleaning, storage and reporting of student test results.

pub mod charts;
pub mod config;
pub mod data;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod store;
