//! Location lookups backed by Nominatim (OpenStreetMap).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, CrisisError};
use crate::http_client::HttpClient;

const SERVICE: &str = "nominatim";
const MIN_QUERY_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> CoreResult<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(CrisisError::Validation(format!(
                "coordinates out of range: {lat}, {lon}"
            )));
        }
        Ok(Self { lat, lon })
    }
}

/// A search candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub display_name: String,
    pub coords: Coordinates,
}

/// Turns a position into a human place name.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Locality name (city, town or village), if the service knows one.
    async fn locate(&self, at: Coordinates) -> CoreResult<Option<String>>;
}

/// Autocomplete for the location search box.
#[async_trait]
pub trait LocationSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> CoreResult<Vec<Place>>;
}

#[derive(Debug, Clone)]
pub struct Nominatim {
    http: HttpClient,
    base: String,
}

impl Nominatim {
    pub fn new(http: HttpClient, base: String) -> Self {
        Self { http, base }
    }
}

#[derive(Deserialize)]
struct NReverse {
    #[serde(default)]
    address: Option<NAddress>,
}

#[derive(Deserialize)]
struct NAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

// Nominatim encodes coordinates as strings.
#[derive(Deserialize)]
struct NPlace {
    display_name: String,
    lat: String,
    lon: String,
}

impl NPlace {
    fn into_place(self) -> CoreResult<Place> {
        let parse = |v: &str| {
            v.parse::<f64>().map_err(|e| CrisisError::Upstream {
                service: SERVICE.into(),
                code: "200".into(),
                message: format!("bad coordinate {v:?}: {e}"),
            })
        };
        let coords = Coordinates::new(parse(&self.lat)?, parse(&self.lon)?)?;
        Ok(Place {
            display_name: self.display_name,
            coords,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for Nominatim {
    async fn locate(&self, at: Coordinates) -> CoreResult<Option<String>> {
        let url = format!("{}/reverse", self.base);
        let query = [
            ("format", "json".to_string()),
            ("lat", at.lat.to_string()),
            ("lon", at.lon.to_string()),
        ];
        let resp: NReverse = self.http.get_json(&url, &query, SERVICE).await?;
        Ok(resp
            .address
            .and_then(|a| a.city.or(a.town).or(a.village)))
    }
}

#[async_trait]
impl LocationSearch for Nominatim {
    async fn search(&self, query: &str, limit: usize) -> CoreResult<Vec<Place>> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS || limit == 0 {
            return Ok(Vec::new());
        }
        let url = format!("{}/search", self.base);
        let params = [
            ("format", "json".to_string()),
            ("q", query.to_string()),
            ("limit", limit.to_string()),
        ];
        let found: Vec<NPlace> = self.http.get_json(&url, &params, SERVICE).await?;
        found.into_iter().map(NPlace::into_place).collect()
    }
}
