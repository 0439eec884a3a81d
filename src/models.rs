//! Shapes returned to the frontend. Field names follow what the Chart.js
//! wrapper on the client side expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single cell after numeric conversion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Datum {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Datum {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            Datum::Text(_) | Datum::Null => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
}

impl ChartType {
    /// Chart types the model is asked to choose between.
    pub const SUGGESTIBLE: [ChartType; 3] = [ChartType::Bar, ChartType::Line, ChartType::Pie];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
        }
    }

    /// Pie and doughnut charts have no axes.
    pub fn is_radial(&self) -> bool {
        matches!(self, ChartType::Pie | ChartType::Doughnut)
    }
}

impl std::fmt::Display for ChartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChartOptionsScalesAxisTitle {
    pub display: bool,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChartOptionsScalesAxis {
    #[serde(rename = "beginAtZero")]
    pub begin_at_zero: Option<bool>,
    pub title: Option<ChartOptionsScalesAxisTitle>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChartOptionsScales {
    pub y: Option<ChartOptionsScalesAxis>,
    pub x: Option<ChartOptionsScalesAxis>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChartOptions {
    pub scales: Option<ChartOptionsScales>,
}

impl ChartOptions {
    /// Options for charts with an x and y axis. The y axis always starts at
    /// zero.
    pub fn with_axes(x_title: &str, y_title: &str) -> Self {
        ChartOptions {
            scales: Some(ChartOptionsScales {
                y: Some(ChartOptionsScalesAxis {
                    begin_at_zero: Some(true),
                    title: Some(ChartOptionsScalesAxisTitle {
                        display: true,
                        text: y_title.to_string(),
                    }),
                }),
                x: Some(ChartOptionsScalesAxis {
                    begin_at_zero: None,
                    title: Some(ChartOptionsScalesAxisTitle {
                        display: true,
                        text: x_title.to_string(),
                    }),
                }),
            }),
        }
    }
}

pub type ChartRecord = BTreeMap<String, Datum>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChartDataOutput {
    #[serde(rename = "chartType")]
    pub chart_type: ChartType,
    pub data: Vec<ChartRecord>,
    #[serde(rename = "labelsKey")]
    pub labels_key: String,
    #[serde(rename = "valuesKey")]
    pub values_key: String,
    pub options: ChartOptions,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub chart_data: Option<ChartDataOutput>,
    pub summary: String,
    pub error: Option<String>,
}
