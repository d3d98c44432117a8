use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, CrisisError};
use crate::stream::ByteStream;

const ERROR_BODY_LIMIT: usize = 300;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| CrisisError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: cfg.user_agent.clone(),
        })
    }

    /// POST JSON and hand back the response body as a raw chunk stream.
    ///
    /// Fails with `StreamStart` before any body byte is read when the status is
    /// not 2xx.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<ByteStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CrisisError::Network(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrisisError::StreamStart {
                status: status.as_u16(),
                message: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let byte_stream = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| CrisisError::Network(format!("stream read failed: {e}")))
        });
        Ok(Box::pin(byte_stream))
    }

    /// GET with query parameters and decode a JSON body.
    ///
    /// `service` names the upstream in errors (e.g. "nominatim").
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        service: &str,
    ) -> CoreResult<R> {
        let resp = self
            .inner
            .get(url)
            .query(query)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| CrisisError::Network(format!("{service} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(service, status, &text));
        }

        resp.json::<R>().await.map_err(|e| CrisisError::Upstream {
            service: service.into(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }
}

fn map_http_error(service: &str, status: StatusCode, body: &str) -> CrisisError {
    CrisisError::Upstream {
        service: service.to_string(),
        code: status.as_u16().to_string(),
        message: truncate(body, ERROR_BODY_LIMIT),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut t = s[..idx].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}
