//! Pluggable HTTP transport.
//!
//! # Design
//! The client only needs three verbs. `Transport` is that capability; the
//! default `UreqTransport` is a blocking `ureq` agent and tests substitute
//! their own implementation. Transports return every status as data: the
//! status-code contract is interpreted by the client, not here.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::error::TransportError;
use crate::http::{encode_params, HttpResponse};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("threescale-rust/", env!("CARGO_PKG_VERSION"));

pub trait Transport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError>;

    /// Sends `params` as an `application/x-www-form-urlencoded` body.
    fn post(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError>;

    fn delete(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        (**self).get(url, params)
    }

    fn post(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        (**self).post(url, params)
    }

    fn delete(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        (**self).delete(url, params)
    }
}

/// Blocking transport backed by a `ureq` agent.
///
/// Redirects are not followed and non-2xx statuses are returned as
/// responses rather than errors.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    #[instrument(skip_all, fields(url = %url))]
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        debug!("GET request");
        let response = self
            .agent
            .get(&with_query(url, params))
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        into_response(response)
    }

    #[instrument(skip_all, fields(url = %url))]
    fn post(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        debug!("POST request with form data");
        let response = self
            .agent
            .post(url)
            .header("User-Agent", USER_AGENT)
            .content_type("application/x-www-form-urlencoded")
            .send(encode_params(params).as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;
        into_response(response)
    }

    #[instrument(skip_all, fields(url = %url))]
    fn delete(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        debug!("DELETE request");
        let response = self
            .agent
            .delete(&with_query(url, params))
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        into_response(response)
    }
}

fn with_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        url.to_string()
    } else {
        format!("{url}?{}", encode_params(params))
    }
}

fn into_response(mut response: ureq::http::Response<ureq::Body>) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| TransportError::Body(e.to_string()))?;
    debug!(status, "Response received");

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
