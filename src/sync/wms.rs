//! WMS `GetMap` tile fetcher over blocking HTTP.

use super::fetch::{FetchError, TileFetcher, TileRequest};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("radar-sync/", env!("CARGO_PKG_VERSION"));
const GETMAP_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Build the WMS 1.1.1 `GetMap` URL for one tile.
pub fn build_getmap_url(base_url: &Url, request: &TileRequest<'_>) -> Url {
    let b = &request.bbox;
    let mut url = base_url.clone();
    url.query_pairs_mut()
        .append_pair("REQUEST", "GetMap")
        .append_pair("SERVICE", "WMS")
        .append_pair("VERSION", "1.1.1")
        .append_pair("FORMAT", "image/png")
        .append_pair("STYLES", "")
        .append_pair("TRANSPARENT", "true")
        .append_pair("TIME", &request.timestamp.format(GETMAP_TIME_FORMAT).to_string())
        .append_pair("LAYERS", request.layer)
        .append_pair("WIDTH", &request.pixel_width.to_string())
        .append_pair("HEIGHT", &request.pixel_height.to_string())
        .append_pair("SRS", request.crs)
        .append_pair("BBOX", &format!("{},{},{},{}", b.minx, b.miny, b.maxx, b.maxy));
    url
}

/// Map an HTTP status to a fetch error, or `None` on success.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(FetchError::transient(message))
    } else {
        Some(FetchError::permanent(message))
    }
}

fn classify_transport(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        FetchError::transient(error.to_string())
    } else {
        FetchError::permanent(error.to_string())
    }
}

/// Accepts only `image/*` bodies; WMS servers report errors as XML with 200.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), FetchError> {
    match content_type {
        Some(ct) if ct.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
        other => Err(FetchError::permanent(format!(
            "Unexpected content type: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct WmsFetcher {
    client: Client,
    base_url: Url,
}

impl WmsFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, base_url })
    }
}

impl TileFetcher for WmsFetcher {
    fn fetch_tile(&self, request: &TileRequest<'_>) -> Result<Vec<u8>, FetchError> {
        let url = build_getmap_url(&self.base_url, request);
        debug!(%url, "fetching tile");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| classify_transport(&e))?;
        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        check_content_type(content_type.as_deref())?;

        let bytes = response.bytes().map_err(|e| classify_transport(&e))?;
        Ok(bytes.to_vec())
    }

    fn describe(&self, request: &TileRequest<'_>) -> Option<String> {
        Some(build_getmap_url(&self.base_url, request).to_string())
    }
}
