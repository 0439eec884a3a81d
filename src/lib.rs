//! Shared functionality for the chart agent server and the chartctl tool.
pub mod agent;
pub mod chart;
pub mod csv_table;
pub mod error;
pub mod llama;
pub mod models;
pub mod settings;
pub mod token;
pub mod utils;
