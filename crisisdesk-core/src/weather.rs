//! Current conditions and daily forecast from Open-Meteo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, CrisisError};
use crate::geo::Coordinates;
use crate::http_client::HttpClient;

const SERVICE: &str = "open-meteo";
const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,weather_code";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum";
const FORECAST_DAYS: u8 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConditions {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub wind_speed_kmh: f64,
    pub weather_code: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyForecast {
    /// ISO date, e.g. `2024-09-14`.
    pub date: String,
    pub weather_code: u16,
    pub temp_max_c: f64,
    pub temp_min_c: f64,
    pub precipitation_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub current: CurrentConditions,
    pub daily: Vec<DailyForecast>,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn forecast(&self, at: Coordinates) -> CoreResult<Forecast>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteo {
    http: HttpClient,
    base: String,
}

impl OpenMeteo {
    pub fn new(http: HttpClient, base: String) -> Self {
        Self { http, base }
    }
}

// ---- Wire structs ----
#[derive(Deserialize)]
struct OMResp {
    current: OMCurrent,
    daily: OMDaily,
}

#[derive(Deserialize)]
struct OMCurrent {
    temperature_2m: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    weather_code: u16,
}

/// Daily values arrive as parallel arrays keyed by `time`.
#[derive(Deserialize)]
struct OMDaily {
    time: Vec<String>,
    weather_code: Vec<u16>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    precipitation_sum: Vec<f64>,
}

impl OMDaily {
    fn into_rows(self) -> CoreResult<Vec<DailyForecast>> {
        let n = self.time.len();
        let lens = [
            self.weather_code.len(),
            self.temperature_2m_max.len(),
            self.temperature_2m_min.len(),
            self.precipitation_sum.len(),
        ];
        if lens.iter().any(|&l| l != n) {
            return Err(CrisisError::Decode(format!(
                "daily arrays disagree in length: time={n}, others={lens:?}"
            )));
        }
        let rows = self
            .time
            .into_iter()
            .zip(self.weather_code)
            .zip(self.temperature_2m_max)
            .zip(self.temperature_2m_min)
            .zip(self.precipitation_sum)
            .map(|((((date, code), max), min), precip)| DailyForecast {
                date,
                weather_code: code,
                temp_max_c: max,
                temp_min_c: min,
                precipitation_mm: precip,
            })
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteo {
    async fn forecast(&self, at: Coordinates) -> CoreResult<Forecast> {
        let url = format!("{}/v1/forecast", self.base);
        let query = [
            ("latitude", at.lat.to_string()),
            ("longitude", at.lon.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
            ("timezone", "auto".to_string()),
        ];
        let resp: OMResp = self.http.get_json(&url, &query, SERVICE).await?;
        let current = CurrentConditions {
            temperature_c: resp.current.temperature_2m,
            humidity_pct: resp.current.relative_humidity_2m,
            wind_speed_kmh: resp.current.wind_speed_10m,
            weather_code: resp.current.weather_code,
        };
        Ok(Forecast {
            current,
            daily: resp.daily.into_rows()?,
        })
    }
}

/// Short label for a WMO weather interpretation code.
pub fn describe_weather_code(code: u16) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow grains",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}
