//! Open-Meteo forecast request and payload mapping.

use serde::Deserialize;

use crate::config::SourcesConfig;
use crate::domain::{ForecastDay, WeatherSnapshot};
use crate::gateway::{GatewayError, WEATHER_FEED};

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";
const DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,relative_humidity_2m_mean,precipitation_sum,wind_speed_10m_max";

/// labels for daily indices 1..=3 (index 0 is today)
const FORECAST_LABELS: [&str; 3] = ["Tomorrow", "In 2 days", "In 3 days"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeatherInfo {
    pub description: &'static str,
    /// Material Symbols icon name
    pub icon: &'static str,
}

/// describe a WMO weather code
pub fn weather_info(code: i64) -> WeatherInfo {
    let (description, icon) = match code {
        0 => ("Clear sky", "wb_sunny"),
        1 => ("Mainly clear", "wb_sunny"),
        2 => ("Partly cloudy", "partly_cloudy_day"),
        3 => ("Overcast", "cloud"),
        45 => ("Fog", "foggy"),
        48 => ("Depositing rime fog", "foggy"),
        51 => ("Light drizzle", "grain"),
        53 => ("Moderate drizzle", "grain"),
        55 => ("Dense drizzle", "grain"),
        56 => ("Light freezing drizzle", "ac_unit"),
        57 => ("Dense freezing drizzle", "ac_unit"),
        61 => ("Slight rain", "rainy"),
        63 => ("Moderate rain", "rainy"),
        65 => ("Heavy rain", "rainy"),
        66 => ("Light freezing rain", "ac_unit"),
        67 => ("Heavy freezing rain", "ac_unit"),
        71 => ("Slight snow fall", "weather_snowy"),
        73 => ("Moderate snow fall", "weather_snowy"),
        75 => ("Heavy snow fall", "weather_snowy"),
        77 => ("Snow grains", "weather_snowy"),
        80 => ("Slight rain showers", "rainy"),
        81 => ("Moderate rain showers", "rainy"),
        82 => ("Violent rain showers", "rainy"),
        85 => ("Slight snow showers", "weather_snowy"),
        86 => ("Heavy snow showers", "weather_snowy"),
        95 => ("Thunderstorm", "thunderstorm"),
        96 => ("Thunderstorm with hail", "thunderstorm"),
        99 => ("Thunderstorm with heavy hail", "thunderstorm"),
        _ => ("Unknown", "help"),
    };
    WeatherInfo { description, icon }
}

/// full forecast url with coordinates and requested fields embedded
pub fn forecast_url(sources: &SourcesConfig) -> String {
    format!(
        "{}?latitude={}&longitude={}&current={}&daily={}&forecast_days={}&timezone={}",
        sources.weather_url,
        sources.latitude,
        sources.longitude,
        CURRENT_FIELDS,
        DAILY_FIELDS,
        sources.forecast_days,
        sources.timezone,
    )
}

#[derive(Deserialize)]
struct ForecastPayload {
    current: CurrentBlock,
    daily: DailyBlock,
}

#[derive(Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: i64,
}

#[derive(Deserialize)]
struct DailyBlock {
    weather_code: Vec<i64>,
    temperature_2m_max: Vec<f64>,
    relative_humidity_2m_mean: Vec<f64>,
    precipitation_sum: Vec<f64>,
    wind_speed_10m_max: Vec<f64>,
}

impl DailyBlock {
    fn day(&self, index: usize, label: &str) -> Option<ForecastDay> {
        let info = weather_info(*self.weather_code.get(index)?);
        Some(ForecastDay {
            label: label.to_string(),
            temperature: round_half_up(*self.temperature_2m_max.get(index)?),
            description: info.description.to_string(),
            icon: info.icon.to_string(),
            humidity: round_half_up(*self.relative_humidity_2m_mean.get(index)?),
            wind_speed_kmh: round_half_up(*self.wind_speed_10m_max.get(index)?),
        })
    }
}

/// map a forecast response body into a snapshot
pub fn parse_forecast(body: &str) -> Result<WeatherSnapshot, GatewayError> {
    let payload: ForecastPayload = serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
    snapshot_from(payload)
}

fn snapshot_from(payload: ForecastPayload) -> Result<WeatherSnapshot, GatewayError> {
    let ForecastPayload { current, daily } = payload;

    let rainfall_mm = *daily
        .precipitation_sum
        .first()
        .ok_or_else(|| parse_error("daily precipitation_sum is empty".to_string()))?;

    let forecast = FORECAST_LABELS
        .iter()
        .enumerate()
        .map_while(|(offset, label)| daily.day(offset + 1, label))
        .collect();

    let info = weather_info(current.weather_code);
    Ok(WeatherSnapshot {
        temperature: round_half_up(current.temperature_2m),
        humidity: current.relative_humidity_2m,
        rainfall_mm,
        wind_speed_kmh: round_half_up(current.wind_speed_10m),
        description: info.description.to_string(),
        icon: info.icon.to_string(),
        forecast,
    })
}

fn parse_error(reason: String) -> GatewayError {
    GatewayError::Parse { feed: WEATHER_FEED, reason }
}

/// nearest whole unit, halves toward +infinity
fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}
