//! Prompt text for the agronomy assistant.
//!
//! Everything here is pure string building so the wording can be tested
//! without a model behind it.

use chrono::NaiveDate;
use serde_json::json;

use crate::domain::{ChatRole, ChatTurn, SensorReading, WeatherSnapshot};

/// farm facts shared by every prompt
#[derive(Debug, Clone, Copy)]
pub struct FarmContext<'a> {
    pub location: &'a str,
    pub today: NaiveDate,
}

impl FarmContext<'_> {
    fn date(&self) -> String {
        self.today.format("%B %-d, %Y").to_string()
    }

    fn block(&self, instruction: &str) -> String {
        format!(
            "FARM CONTEXT:\n- Location: {}.\n- Today's Date: {}\n- Instruction: {}\n",
            self.location,
            self.date(),
            instruction
        )
    }
}

pub fn soil_block(reading: &SensorReading) -> String {
    format!(
        "- Soil Moisture: {}%\n\
         - Soil Temperature: {}°C\n\
         - Electrical Conductivity (EC): {} μS/cm\n\
         - pH Level: {}\n\
         - Nitrogen (N): {} mg/kg\n\
         - Phosphorus (P): {} mg/kg\n\
         - Potassium (K): {} mg/kg\n",
        reading.moisture,
        reading.temperature,
        reading.electrical_conductivity,
        reading.ph,
        reading.nitrogen,
        reading.phosphorus,
        reading.potassium,
    )
}

pub fn weather_block(weather: &WeatherSnapshot) -> String {
    let mut out = format!(
        "- Current Temperature: {}°C\n\
         - Humidity: {}%\n\
         - Recent Rainfall: {} mm\n\
         - Wind Speed: {} km/h\n\
         - Weather Description: {}\n",
        weather.temperature, weather.humidity, weather.rainfall_mm, weather.wind_speed_kmh, weather.description,
    );
    if !weather.forecast.is_empty() {
        out.push_str("- Forecast:\n");
        for day in &weather.forecast {
            out.push_str(&format!("  - {}: {}°C, {}\n", day.label, day.temperature, day.description));
        }
    }
    out
}

fn latest_soil_section(readings: &[SensorReading]) -> String {
    readings
        .first()
        .map(soil_block)
        .unwrap_or_else(|| "- No soil readings available.\n".to_string())
}

/// moisture, pH and nitrogen from the oldest to the newest held reading
pub fn trend_summary(readings: &[SensorReading]) -> String {
    let (Some(newest), Some(oldest)) = (readings.first(), readings.last()) else {
        return "- No historical readings available.\n".to_string();
    };
    format!(
        "Here's a summary of the soil data trend over the last few days:\n\
         - Moisture has gone from {}% to {}%.\n\
         - pH has trended from {} to {}.\n\
         - Nitrogen has trended from {} to {}.\n",
        oldest.moisture, newest.moisture, oldest.ph, newest.ph, oldest.nitrogen, newest.nitrogen,
    )
}

pub fn actionable_prompt(ctx: &FarmContext<'_>, latest: &SensorReading, weather: &WeatherSnapshot) -> String {
    format!(
        "As an expert agronomist advising a farmer, analyze the following latest soil sensor data and weather conditions for a farm.\n\
         Provide one single, concise, and direct \"Actionable Insight\" for the farmer to perform today.\n\
         Keep the insight to a maximum of two sentences. Start directly with the action.\n\n\
         {}\n\
         Latest Soil Data:\n{}\n\
         Current Weather Data:\n{}\n\
         Example responses:\n\
         - \"Soil is becoming compacted and moisture is high; consider aerating the topsoil to improve drainage and root health.\"\n\
         - \"Given the forecast for a hot, dry week, a deep irrigation cycle is recommended to prevent crop stress.\"\n\
         - \"Potassium levels are dropping. Plan for a potassium-rich fertilizer application to support overall plant health.\"\n",
        ctx.block(
            "Your advice should be practical for general farming operations. Consider the time of year (as indicated by the date) and the typical climate of the region."
        ),
        soil_block(latest),
        weather_block(weather),
    )
}

/// `readings` newest first
pub fn recommendations_prompt(ctx: &FarmContext<'_>, readings: &[SensorReading], weather: &WeatherSnapshot) -> String {
    format!(
        "You are an expert AI agronomy assistant. Analyze the latest soil data, historical trends, and weather forecast for a farm.\n\
         Generate a list of 3 actionable recommendations for a farmer.\n\
         For each recommendation, provide a title, a brief description, and a priority level ('High', 'Medium', or 'Low').\n\
         Base your recommendations on potential issues or opportunities you identify.\n\n\
         {}\n\
         Latest Soil Data:\n{}\n\
         Historical Trends:\n{}\n\
         Weather Forecast:\n{}",
        ctx.block(
            "Your advice must be practical for general agriculture and take into account the local climate, time of year (as indicated by the date), and the provided weather forecast."
        ),
        latest_soil_section(readings),
        trend_summary(readings),
        weather_block(weather),
    )
}

pub fn chat_prompt(
    ctx: &FarmContext<'_>,
    query: &str,
    readings: &[SensorReading],
    weather: &WeatherSnapshot,
    history: &[ChatTurn],
) -> String {
    let conversation = history
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                ChatRole::User => "Farmer",
                ChatRole::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an expert AI agronomy assistant in a chat with a farmer.\n\
         The farmer's query is: \"{}\"\n\n\
         Use the following context, real-time data, and conversation history to provide a clear, helpful, and concise answer.\n\
         Always return your answer in plain text only - no markdown formatting, no bullet points, no bold or italic text, no emojis. Write full sentences and use line breaks for clarity.\n\n\
         {}\n\
         LATEST SOIL DATA:\n{}\n\
         WEATHER FORECAST:\n{}\n\
         CONVERSATION HISTORY:\n{}\n\n\
         Your Answer (as Assistant):\n",
        query,
        ctx.block(
            "Always consider the location, time of year, and provided data in your answers. Your advice should be for general agricultural purposes."
        ),
        latest_soil_section(readings),
        weather_block(weather),
        conversation,
    )
}

/// response schema for the recommendation batch (Gemini `responseSchema` dialect)
pub fn recommendation_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": {
                    "type": "STRING",
                    "description": "A short, catchy title for the recommendation, specific to agriculture."
                },
                "description": {
                    "type": "STRING",
                    "description": "A detailed explanation of the recommendation and why it's necessary given the data."
                },
                "priority": {
                    "type": "STRING",
                    "enum": ["High", "Medium", "Low"],
                    "description": "The priority level: 'High', 'Medium', or 'Low'."
                }
            },
            "required": ["title", "description", "priority"]
        }
    })
}
