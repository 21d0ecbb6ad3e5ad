//! Aviation gateway - live aircraft state vectors from the OpenSky Network

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Map, Value, json};

use super::{Gateway, GatewayError, ToolPayload, number_arg, unsupported_tool};
use crate::tools::{ParamSpec, ParamType, ToolSpec};

/// OpenSky REST API root
pub const OPENSKY_API_URL: &str = "https://opensky-network.org/api";

pub const GET_AIRCRAFT_TOOL: &str = "get_aircraft";

// Positions in an OpenSky state vector
const ICAO24: usize = 0;
const CALLSIGN: usize = 1;
const ORIGIN_COUNTRY: usize = 2;
const TIME_POSITION: usize = 3;
const LAST_CONTACT: usize = 4;
const LONGITUDE: usize = 5;
const LATITUDE: usize = 6;
const BARO_ALTITUDE: usize = 7;
const VELOCITY: usize = 9;
const TRUE_TRACK: usize = 10;

/// Rectangular region in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Build a box, rejecting out-of-range or inverted bounds
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self, GatewayError> {
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);

        if !lat_ok(min_lat) || !lat_ok(max_lat) {
            return Err(GatewayError::InvalidArgument(
                "Latitude must be between -90 and 90 degrees".to_string(),
            ));
        }
        if !lon_ok(min_lon) || !lon_ok(max_lon) {
            return Err(GatewayError::InvalidArgument(
                "Longitude must be between -180 and 180 degrees".to_string(),
            ));
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(GatewayError::InvalidArgument(
                "Minimum coordinates must be less than maximum coordinates".to_string(),
            ));
        }

        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    fn from_args(args: &Map<String, Value>) -> Result<Self, GatewayError> {
        Self::new(
            number_arg(args, "min_lat")?,
            number_arg(args, "max_lat")?,
            number_arg(args, "min_lon")?,
            number_arg(args, "max_lon")?,
        )
    }
}

/// One aircraft as reported by OpenSky
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftState {
    pub icao24: String,
    pub callsign: Option<String>,
    pub origin_country: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Barometric altitude in metres
    pub altitude: f64,
    /// Ground speed in m/s
    pub velocity: f64,
    /// True track in degrees clockwise from north
    pub heading: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AircraftState {
    /// Parse one state vector. Returns None when position or motion fields are null.
    fn from_state_vector(state: &Value) -> Option<Self> {
        let fields = state.as_array()?;
        let number = |i: usize| fields.get(i).and_then(Value::as_f64);
        let text = |i: usize| fields.get(i).and_then(Value::as_str);

        let timestamp = fields
            .get(TIME_POSITION)
            .and_then(Value::as_i64)
            .or_else(|| fields.get(LAST_CONTACT).and_then(Value::as_i64))
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Some(Self {
            icao24: text(ICAO24)?.to_string(),
            callsign: text(CALLSIGN)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            origin_country: text(ORIGIN_COUNTRY).unwrap_or_default().to_string(),
            longitude: number(LONGITUDE)?,
            latitude: number(LATITUDE)?,
            altitude: number(BARO_ALTITUDE)?,
            velocity: number(VELOCITY)?,
            heading: number(TRUE_TRACK)?,
            timestamp,
        })
    }

    pub fn to_model_json(&self) -> Value {
        json!({
            "icao24": self.icao24,
            "callsign": self.callsign,
            "country": self.origin_country,
            "position": {
                "latitude": self.latitude,
                "longitude": self.longitude,
                "altitude": self.altitude
            },
            "velocity": self.velocity,
            "heading": self.heading,
            "timestamp": self.timestamp.map(|t| t.to_rfc3339())
        })
    }
}

/// Parse the body of `GET /states/all`
pub fn parse_states(body: &Value) -> Result<Vec<AircraftState>, GatewayError> {
    match body.get("states") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(states)) => Ok(states.iter().filter_map(AircraftState::from_state_vector).collect()),
        Some(_) => Err(GatewayError::Upstream(
            "Failed to parse API response: 'states' is not a list".to_string(),
        )),
    }
}

/// Gateway serving `get_aircraft`
pub struct AviationGateway {
    client: Client,
    base_url: String,
}

impl AviationGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch aircraft inside the box
    pub async fn aircraft_in_box(&self, bbox: BoundingBox) -> Result<Vec<AircraftState>, GatewayError> {
        let url = format!("{}/states/all", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lamin", bbox.min_lat),
                ("lamax", bbox.max_lat),
                ("lomin", bbox.min_lon),
                ("lomax", bbox.max_lon),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::error!("OpenSky request failed with status {}", status);
            return Err(GatewayError::Upstream(format!("OpenSky returned HTTP {}", status.as_u16())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("Failed to parse API response: {}", e.without_url())))?;

        let aircraft = parse_states(&body)?;
        if aircraft.is_empty() {
            log::info!("No aircraft found in the specified region");
        } else {
            log::info!("Found {} aircraft in the specified region", aircraft.len());
        }
        Ok(aircraft)
    }
}

#[async_trait]
impl Gateway for AviationGateway {
    fn name(&self) -> &'static str {
        "aviation"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                GET_AIRCRAFT_TOOL,
                "Get real-time information about aircraft within a specified geographic bounding box. \
                 Returns a list of aircraft with their positions, callsigns, and other flight data. \
                 Resolve place names to coordinates yourself before calling.",
            )
            .with_param(ParamSpec::required("min_lat", ParamType::Number, "Minimum latitude of bounding box"))
            .with_param(ParamSpec::required("max_lat", ParamType::Number, "Maximum latitude of bounding box"))
            .with_param(ParamSpec::required("min_lon", ParamType::Number, "Minimum longitude of bounding box"))
            .with_param(ParamSpec::required("max_lon", ParamType::Number, "Maximum longitude of bounding box")),
        ]
    }

    async fn invoke(&self, tool_name: &str, args: &Map<String, Value>) -> Result<ToolPayload, GatewayError> {
        if tool_name != GET_AIRCRAFT_TOOL {
            return Err(unsupported_tool(self.name(), tool_name));
        }
        let bbox = BoundingBox::from_args(args)?;
        self.aircraft_in_box(bbox).await.map(ToolPayload::Aircraft)
    }
}
