use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

// ─── ChartType ──────────────────────────────────────────────────────────────

/// Closed set of chart kinds accepted by the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Heatmap,
}

impl ChartType {
    pub const ALL: [ChartType; 4] = [
        ChartType::Line,
        ChartType::Bar,
        ChartType::Pie,
        ChartType::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Heatmap => "heatmap",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown chart type: {s}"))
    }
}

// ─── Position ───────────────────────────────────────────────────────────────

/// Grid placement of a chart on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Position {
    pub const fn at(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            width: 6,
            height: 4,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::at(0, 0)
    }
}

// ─── ChartConfig ────────────────────────────────────────────────────────────

/// A row of `chart_configs`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChartConfig {
    pub id: i32,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub chart_type: String,
    pub title: String,
    pub data_source_id: String,
    pub options: serde_json::Value,
    pub position: Json<Position>,
    /// Nullable on tables created before the timestamps became `NOT NULL`.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Default row inserted at bootstrap. Identified by `(data_source_id, title)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRow {
    pub chart_type: ChartType,
    pub title: &'static str,
    pub data_source_id: &'static str,
    pub options: serde_json::Value,
    pub position: Position,
}
