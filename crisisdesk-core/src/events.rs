use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::config::parse_by_extension;
use crate::error::{CoreResult, CrisisError};

/// Severity tier shown on the map. Ordered low < medium < high.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Severity {
    type Err = CrisisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CrisisError::Validation(format!("unknown severity '{other}'"))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DisasterEvent {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub title: String,
    /// Free-form hazard type, e.g. "flood" or "wildfire".
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    /// Administrative region the event belongs to.
    pub region: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    events: Vec<DisasterEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    events: Vec<DisasterEvent>,
}

impl EventCatalog {
    pub fn new(events: Vec<DisasterEvent>) -> CoreResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for e in &events {
            if !seen.insert(e.id.as_str()) {
                return Err(CrisisError::Validation(format!("duplicate event id '{}'", e.id)));
            }
        }
        Ok(Self { events })
    }

    /// Load `{ "events": [...] }` (JSON) or `[[events]]` tables (TOML).
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let file: CatalogFile = parse_by_extension(path, &text)?;
        Self::new(file.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DisasterEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Events at or above `min_severity`, optionally limited to one region
    /// (case-insensitive), most severe first. Ties keep file order.
    pub fn query(&self, min_severity: Severity, region: Option<&str>) -> Vec<&DisasterEvent> {
        let mut out: Vec<&DisasterEvent> = self
            .events
            .iter()
            .filter(|e| e.severity >= min_severity)
            .filter(|e| region.is_none_or(|r| e.region.eq_ignore_ascii_case(r.trim())))
            .collect();
        out.sort_by(|a, b| b.severity.cmp(&a.severity));
        out
    }
}
