//! HTTP request/response types for the metering backend.
//!
//! # Design
//! Requests and responses are plain data. `ThreeScaleClient::build_*` methods
//! produce an `HttpRequest`; whoever executes it (a `Transport`, or a host
//! doing its own I/O) hands back an `HttpResponse` for `parse_*`.
//!
//! Parameters are kept as an ordered list of raw `(key, value)` pairs with
//! bracketed nested keys (`transactions[0][usage][hits]`). Percent-encoding
//! happens exactly once, here, when the pairs are rendered for the wire.

use url::form_urlencoded;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    /// Look up the first parameter with the given (unencoded) key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parameters rendered as `application/x-www-form-urlencoded`.
    pub fn form_body(&self) -> String {
        encode_params(&self.params)
    }

    /// URL with the parameters appended as a query string. Used for GET and
    /// DELETE, where parameters travel in the URL.
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }
        format!("{}?{}", self.url, self.form_body())
    }
}

/// Percent-encode a parameter list into `k=v&k=v` form.
pub fn encode_params(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }
}

/// How the backend status code contract buckets a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx.
    Success,
    /// 409: the backend understood the request and answers with a regular
    /// envelope (e.g. `authorized=false` once limits are exceeded).
    Conflict,
    /// 400..=404: business-rule rejection with an `<error>` body.
    ClientError,
    /// Anything else. The backend itself misbehaved.
    ServerError,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            409 => StatusClass::Conflict,
            400..=404 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(params: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://server.3scale.net/transactions/authorize.xml".to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn full_url_without_params_is_bare() {
        let req = request(&[]);
        assert_eq!(req.full_url(), "http://server.3scale.net/transactions/authorize.xml");
    }

    #[test]
    fn full_url_appends_encoded_query() {
        let req = request(&[("provider_key", "1234abcd"), ("usage[hits]", "1")]);
        assert_eq!(
            req.full_url(),
            "http://server.3scale.net/transactions/authorize.xml?provider_key=1234abcd&usage%5Bhits%5D=1"
        );
    }

    #[test]
    fn form_body_escapes_timestamp_once() {
        let req = request(&[("transactions[0][timestamp]", "2010-04-27 13:42:17+00:00")]);
        assert_eq!(
            req.form_body(),
            "transactions%5B0%5D%5Btimestamp%5D=2010-04-27+13%3A42%3A17%2B00%3A00"
        );
    }

    #[test]
    fn param_lookup_returns_first_match() {
        let req = request(&[("app_id", "foo"), ("app_key", "bar")]);
        assert_eq!(req.param("app_key"), Some("bar"));
        assert_eq!(req.param("user_key"), None);
    }

    #[test]
    fn status_classes_follow_backend_contract() {
        assert_eq!(StatusClass::of(200), StatusClass::Success);
        assert_eq!(StatusClass::of(202), StatusClass::Success);
        assert_eq!(StatusClass::of(299), StatusClass::Success);
        assert_eq!(StatusClass::of(409), StatusClass::Conflict);
        assert_eq!(StatusClass::of(400), StatusClass::ClientError);
        assert_eq!(StatusClass::of(403), StatusClass::ClientError);
        assert_eq!(StatusClass::of(404), StatusClass::ClientError);
        assert_eq!(StatusClass::of(405), StatusClass::ServerError);
        assert_eq!(StatusClass::of(500), StatusClass::ServerError);
        assert_eq!(StatusClass::of(503), StatusClass::ServerError);
        assert_eq!(StatusClass::of(301), StatusClass::ServerError);
    }
}
