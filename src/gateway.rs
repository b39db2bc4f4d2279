//! ==============================================================================
//! gateway.rs - remote data gateway (sensor feed + weather forecast)
//! ==============================================================================
//!
//! purpose:
//!     fetches soil sensor records and the weather forecast from their REST
//!     APIs and maps the payloads into the records in domain.rs.
//!
//! relationships:
//!     - used by: poller.rs (initial load + freshness cycles)
//!     - uses: weather.rs (forecast url, payload mapping, weather codes)
//!     - sources sit behind SensorSource / WeatherSource so the poller can
//!       run against fakes in tests
//!
//! failures are typed: a transport error or non-success status is a network
//! failure, a body that does not match the expected shape is a parse failure.
//!
//! ==============================================================================

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::SourcesConfig;
use crate::domain::{SensorReading, WeatherSnapshot};
use crate::weather;

pub const SENSOR_FEED: &str = "sensor feed";
pub const WEATHER_FEED: &str = "weather forecast";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{feed} request failed: {source}")]
    Transport {
        feed: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{feed} returned HTTP {status}")]
    Status {
        feed: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("{feed} payload could not be parsed: {reason}")]
    Parse { feed: &'static str, reason: String },
}

impl GatewayError {
    /// transport error or non-success HTTP status
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }

    /// malformed JSON or unexpected schema
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch_readings(&self) -> Result<Vec<SensorReading>, GatewayError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_weather(&self) -> Result<WeatherSnapshot, GatewayError>;
}

/// reqwest-backed implementation of both sources
pub struct HttpGateway {
    http: reqwest::Client,
    sensor_url: String,
    weather_url: String,
}

impl HttpGateway {
    pub fn new(sources: &SourcesConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(sources.request_timeout_seconds))
            .build()
            .context("failed to build gateway http client")?;

        Ok(Self {
            http,
            sensor_url: sources.sensor_url.clone(),
            weather_url: weather::forecast_url(sources),
        })
    }

    async fn get_body(&self, feed: &'static str, url: &str) -> Result<String, GatewayError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| GatewayError::Transport { feed, source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status { feed, status });
        }

        resp.text()
            .await
            .map_err(|source| GatewayError::Transport { feed, source })
    }
}

#[async_trait]
impl SensorSource for HttpGateway {
    async fn fetch_readings(&self) -> Result<Vec<SensorReading>, GatewayError> {
        let body = self.get_body(SENSOR_FEED, &self.sensor_url).await?;
        parse_sensor_payload(&body)
    }
}

#[async_trait]
impl WeatherSource for HttpGateway {
    async fn fetch_weather(&self) -> Result<WeatherSnapshot, GatewayError> {
        let body = self.get_body(WEATHER_FEED, &self.weather_url).await?;
        weather::parse_forecast(&body)
    }
}

#[derive(Deserialize)]
struct SensorPayload {
    #[serde(default)]
    items: Option<Vec<SensorReading>>,
}

/// records from the feed's `items` array (empty when the field is absent)
pub fn parse_sensor_payload(body: &str) -> Result<Vec<SensorReading>, GatewayError> {
    let payload: SensorPayload = serde_json::from_str(body).map_err(|e| GatewayError::Parse {
        feed: SENSOR_FEED,
        reason: e.to_string(),
    })?;
    Ok(payload.items.unwrap_or_default())
}
