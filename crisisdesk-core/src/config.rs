use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use secrecy::SecretString;

use crate::error::{CoreResult, CrisisError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatCfg {
    /// URL of the streaming chat function.
    pub endpoint: String,
    /// Name of the environment variable that contains the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Assistant message the transcript starts with.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Assistant message appended when an exchange fails.
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Optional cap on a whole exchange, handshake included.
    #[serde(default)]
    pub exchange_timeout_ms: Option<u64>,
}

impl Default for ChatCfg {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:54321/functions/v1/chat".into(),
            api_key_env: default_api_key_env(),
            greeting: default_greeting(),
            fallback: default_fallback(),
            exchange_timeout_ms: None,
        }
    }
}

impl ChatCfg {
    /// Read the bearer token from the configured environment variable.
    pub fn api_key(&self) -> CoreResult<SecretString> {
        std::env::var(&self.api_key_env)
            .map(|key| SecretString::new(key.into()))
            .map_err(|_| {
                CrisisError::Validation(format!(
                    "environment variable {} is not set",
                    self.api_key_env
                ))
            })
    }
}

fn default_api_key_env() -> String {
    "CRISISDESK_CHAT_KEY".into()
}
fn default_greeting() -> String {
    "Hello! I can help with emergency information, weather and safety guidance. What do you need?"
        .into()
}
fn default_fallback() -> String {
    "Sorry, I couldn't get a response right now. Please try again.".into()
}

/// Limits applied by the stream assembler.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerCfg {
    /// How many read iterations a line that fails to parse is kept before it
    /// is dropped.
    #[serde(default = "default_max_line_retries")]
    pub max_line_retries: u32,
    /// Largest unterminated line the buffer may hold.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for AssemblerCfg {
    fn default() -> Self {
        Self {
            max_line_retries: default_max_line_retries(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_max_line_retries() -> u32 {
    1
}
fn default_max_line_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    /// Nominatim rejects requests without an identifying agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_user_agent() -> String {
    concat!("crisisdesk/", env!("CARGO_PKG_VERSION")).into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GeoCfg {
    #[serde(default = "default_nominatim_base")]
    pub nominatim_base: String,
    #[serde(default = "default_open_meteo_base")]
    pub open_meteo_base: String,
}

impl Default for GeoCfg {
    fn default() -> Self {
        Self {
            nominatim_base: default_nominatim_base(),
            open_meteo_base: default_open_meteo_base(),
        }
    }
}

fn default_nominatim_base() -> String {
    "https://nominatim.openstreetmap.org".into()
}
fn default_open_meteo_base() -> String {
    "https://api.open-meteo.com".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct EventsCfg {
    /// JSON or TOML file holding the disaster event list.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatCfg,
    #[serde(default)]
    pub assembler: AssemblerCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub geo: GeoCfg,
    #[serde(default)]
    pub events: EventsCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(CrisisError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| CrisisError::Other(e.into()))?;
        parse_by_extension(path, s)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.chat.endpoint.trim().is_empty() {
            return Err(CrisisError::Validation("chat.endpoint must not be empty".into()));
        }
        if self.assembler.max_line_bytes == 0 {
            return Err(CrisisError::Validation(
                "assembler.max_line_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Shared JSON/TOML loader, also used for event catalogs.
pub(crate) fn parse_by_extension<T: serde::de::DeserializeOwned>(
    path: &Path,
    s: &str,
) -> CoreResult<T> {
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            serde_json::from_str::<T>(s).map_err(|e| CrisisError::Other(e.into()))?
        }
        Some("toml") => toml::from_str::<T>(s).map_err(|e| CrisisError::Other(e.into()))?,
        _ => serde_json::from_str::<T>(s)
            .map_err(|e| CrisisError::Other(e.into()))
            .or_else(|_| toml::from_str::<T>(s).map_err(|e| CrisisError::Other(e.into())))?,
    };
    Ok(parsed)
}
