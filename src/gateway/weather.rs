//! Weather gateway - current conditions from OpenWeatherMap

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Gateway, GatewayError, ToolPayload, optional_string_arg, string_arg, unsupported_tool};
use crate::tools::{ParamSpec, ParamType, ToolSpec};

/// OpenWeatherMap API root
pub const OPENWEATHER_API_URL: &str = "https://api.openweathermap.org";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

pub const GET_WEATHER_TOOL: &str = "get_weather";

/// Normalized current-conditions reading
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub city: String,
    pub country: String,
    /// Degrees Celsius with metric units
    pub temperature: f64,
    pub feels_like: f64,
    /// Percent
    pub humidity: i64,
    /// hPa
    pub pressure: i64,
    /// m/s with metric units
    pub wind_speed: f64,
    /// Degrees
    pub wind_direction: i64,
    pub condition: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl WeatherReading {
    pub fn to_model_json(&self) -> Value {
        json!({
            "location": {
                "city": self.city,
                "country": self.country
            },
            "temperature": {
                "current": self.temperature,
                "feels_like": self.feels_like
            },
            "conditions": {
                "description": self.condition,
                "humidity": self.humidity,
                "pressure": self.pressure
            },
            "wind": {
                "speed": self.wind_speed,
                "direction": self.wind_direction
            },
            "timestamp": self.timestamp.map(|t| t.to_rfc3339())
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    name: String,
    dt: i64,
    main: OwmMain,
    wind: OwmWind,
    weather: Vec<OwmCondition>,
    sys: OwmSys,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: f64,
    humidity: i64,
    pressure: i64,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
    #[serde(default)]
    deg: i64,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmSys {
    #[serde(default)]
    country: String,
}

impl From<OwmResponse> for WeatherReading {
    fn from(r: OwmResponse) -> Self {
        Self {
            city: r.name,
            country: r.sys.country,
            temperature: r.main.temp,
            feels_like: r.main.feels_like,
            humidity: r.main.humidity,
            pressure: r.main.pressure,
            wind_speed: r.wind.speed,
            wind_direction: r.wind.deg,
            condition: r
                .weather
                .into_iter()
                .next()
                .map(|c| c.description)
                .unwrap_or_default(),
            timestamp: DateTime::from_timestamp(r.dt, 0),
        }
    }
}

/// Parse the body of `GET /data/2.5/weather`
pub fn parse_weather(body: Value) -> Result<WeatherReading, GatewayError> {
    serde_json::from_value::<OwmResponse>(body)
        .map(WeatherReading::from)
        .map_err(|e| GatewayError::Upstream(format!("Failed to parse API response: {}", e)))
}

/// Gateway serving `get_weather`
pub struct WeatherGateway {
    client: Client,
    base_url: String,
    api_key: String,
    units: String,
}

impl WeatherGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        units: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            units: units.into(),
        })
    }

    /// Fetch current weather for a city, optionally qualified by country code
    pub async fn current(&self, city: &str, country: Option<&str>) -> Result<WeatherReading, GatewayError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(GatewayError::InvalidArgument("City name cannot be empty".to_string()));
        }
        let location = match country.map(str::trim).filter(|c| !c.is_empty()) {
            Some(country) => format!("{},{}", city, country),
            None => city.to_string(),
        };

        let url = format!("{}/data/2.5/weather", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", location.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", self.units.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            log::info!("OpenWeatherMap has no city matching '{}'", location);
            return Err(GatewayError::NotFound(format!("city '{}' not found", location)));
        }
        if !status.is_success() {
            log::error!("Failed to fetch weather data: HTTP {}", status);
            return Err(GatewayError::Upstream(format!(
                "OpenWeatherMap returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("Failed to parse API response: {}", e.without_url())))?;
        parse_weather(body)
    }
}

impl std::fmt::Debug for WeatherGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherGateway")
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .finish()
    }
}

#[async_trait]
impl Gateway for WeatherGateway {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                GET_WEATHER_TOOL,
                "Get current weather information for a specific city. Returns temperature, \
                 humidity, wind speed, and other weather conditions.",
            )
            .with_param(ParamSpec::required("city", ParamType::String, "Name of the city to get weather for"))
            .with_param(ParamSpec::optional(
                "country",
                ParamType::String,
                "Optional ISO 3166 country code to disambiguate the city",
            )),
        ]
    }

    async fn invoke(&self, tool_name: &str, args: &Map<String, Value>) -> Result<ToolPayload, GatewayError> {
        if tool_name != GET_WEATHER_TOOL {
            return Err(unsupported_tool(self.name(), tool_name));
        }
        let city = string_arg(args, "city")?;
        let country = optional_string_arg(args, "country");
        log::info!("Getting weather for city: {}", city);
        self.current(city, country).await.map(ToolPayload::Weather)
    }
}
