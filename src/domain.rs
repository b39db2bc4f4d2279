use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// a single soil sensor record as delivered by the sensor feed
///
/// field names on the wire follow the feed (`ec`, `valid`,
/// `corrected_created_at`); the rust names are spelled out.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SensorReading {
    /// sensor group that produced the record
    #[serde(default)]
    pub group_id: i64,

    /// soil moisture (%)
    #[serde(default)]
    pub moisture: f64,

    /// soil temperature (°C)
    #[serde(default)]
    pub temperature: f64,

    /// electrical conductivity (μS/cm)
    #[serde(rename = "ec", default)]
    pub electrical_conductivity: f64,

    #[serde(default)]
    pub ph: f64,

    /// nitrogen (mg/kg)
    #[serde(default)]
    pub nitrogen: f64,

    /// phosphorus (mg/kg)
    #[serde(default)]
    pub phosphorus: f64,

    /// potassium (mg/kg)
    #[serde(default)]
    pub potassium: f64,

    /// validity flag as reported by the feed (e.g. "Y")
    #[serde(rename = "valid", default)]
    pub validity_flag: String,

    /// raw capture time, e.g. "27-OCT-2025 14:49:04"
    #[serde(rename = "corrected_created_at", default)]
    pub captured_at: String,
}

impl SensorReading {
    /// capture time normalized to a wall-clock instant (sentinel if unparseable)
    pub fn captured_instant(&self) -> NaiveDateTime {
        timestamp::parse_timestamp(&self.captured_at)
    }
}

/// one day of the short-range forecast
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ForecastDay {
    /// positional label: "Tomorrow", "In 2 days", "In 3 days"
    pub label: String,
    /// daily max temperature, rounded (°C)
    pub temperature: i64,
    pub description: String,
    pub icon: String,
    /// daily mean relative humidity, rounded (%)
    pub humidity: i64,
    /// daily max wind speed, rounded (km/h)
    pub wind_speed_kmh: i64,
}

/// current conditions plus up to three forecast days
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct WeatherSnapshot {
    /// rounded (°C)
    pub temperature: i64,
    /// relative humidity as reported (%)
    pub humidity: f64,
    /// today's precipitation total (mm)
    pub rainfall_mm: f64,
    /// rounded (km/h)
    pub wind_speed_kmh: i64,
    pub description: String,
    pub icon: String,
    pub forecast: Vec<ForecastDay>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Priority {
    #[serde(alias = "high", alias = "HIGH")]
    High,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "low", alias = "LOW")]
    Low,
}

/// one AI-generated recommendation
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// one message in a chat session
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, text: text.into() }
    }
}
