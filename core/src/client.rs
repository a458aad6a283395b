//! Stateless client for the 3scale metering backend.
//!
//! # Design
//! `ThreeScaleClient` holds a base URL and a transport and nothing else, so
//! one instance can be shared by any number of callers. Each operation is
//! split into a pure `build_*` method producing an `HttpRequest` and a pure
//! `parse_*` method consuming an `HttpResponse`; the convenience methods
//! (`authorize`, `report`, ...) run the pair through the transport.
//!
//! Status handling is the same for every operation: 2xx (and 409) carry an
//! envelope, 400..=404 carry `<error>` nodes and become `Response::Error`,
//! anything else is `ClientError::Server`.

use tracing::{debug, instrument, warn};

use crate::encode::{
    push_authrep_options, push_credentials, push_principal, push_transactions, push_usage, Params,
};
use crate::error::ClientError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, StatusClass};
use crate::parser::{parse_authorize_body, parse_error_body};
use crate::response::{AuthorizeStatus, Response};
use crate::transport::{Transport, UreqTransport};
use crate::types::{AuthrepOptions, Credentials, Principal, Transaction, Usage};

/// Hostname of the public backend.
pub const DEFAULT_HOST: &str = "server.3scale.net";

const AUTHORIZE_PATH: &str = "/transactions/authorize.xml";
const OAUTH_AUTHORIZE_PATH: &str = "/transactions/oauth_authorize.xml";
const AUTHREP_PATH: &str = "/transactions/authrep.xml";
const REPORT_PATH: &str = "/transactions.xml";

/// Synchronous, stateless client for the metering backend.
#[derive(Debug, Clone)]
pub struct ThreeScaleClient<T = UreqTransport> {
    base_url: String,
    transport: T,
}

impl ThreeScaleClient<UreqTransport> {
    /// Client for the public backend using the default transport.
    pub fn new() -> Self {
        Self::with_host(DEFAULT_HOST)
    }

    pub fn with_host(host: &str) -> Self {
        Self::with_base_url(&format!("http://{host}"))
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self::with_transport(base_url, UreqTransport::new())
    }
}

impl Default for ThreeScaleClient<UreqTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ThreeScaleClient<T> {
    pub fn with_transport(base_url: &str, transport: T) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn build_authorize(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<HttpRequest, ClientError> {
        expect_oauth(principal, false)?;
        self.build_authorize_at(AUTHORIZE_PATH, principal, credentials, usage)
    }

    pub fn build_oauth_authorize(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<HttpRequest, ClientError> {
        expect_oauth(principal, true)?;
        self.build_authorize_at(OAUTH_AUTHORIZE_PATH, principal, credentials, usage)
    }

    pub fn build_authrep(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
        options: &AuthrepOptions,
    ) -> Result<HttpRequest, ClientError> {
        expect_oauth(principal, false)?;
        let mut request = self.build_authorize_at(AUTHREP_PATH, principal, credentials, usage)?;
        push_authrep_options(&mut request.params, options);
        Ok(request)
    }

    pub fn build_report(
        &self,
        transactions: &[Transaction],
        credentials: &Credentials,
    ) -> Result<HttpRequest, ClientError> {
        if transactions.is_empty() {
            return Err(ClientError::InvalidArgument(
                "no transactions to report".to_string(),
            ));
        }

        let mut params = Params::new();
        push_credentials(&mut params, credentials)?;
        push_transactions(&mut params, transactions)?;

        Ok(HttpRequest {
            method: HttpMethod::Post,
            url: self.url(REPORT_PATH),
            params,
        })
    }

    /// Parse the response to an authorize, oauth_authorize or authrep call.
    pub fn parse_authorize(
        &self,
        response: HttpResponse,
    ) -> Result<Response<AuthorizeStatus>, ClientError> {
        match response.status_class() {
            StatusClass::Success | StatusClass::Conflict => parse_authorize_body(&response.body),
            StatusClass::ClientError => Ok(Response::Error(parse_error_body(&response.body))),
            StatusClass::ServerError => Err(server_error(response)),
        }
    }

    /// Parse the response to a batch report. Success has no body.
    pub fn parse_report(&self, response: HttpResponse) -> Result<Response<()>, ClientError> {
        match response.status_class() {
            StatusClass::Success | StatusClass::Conflict => Ok(Response::Success(())),
            StatusClass::ClientError => Ok(Response::Error(parse_error_body(&response.body))),
            StatusClass::ServerError => Err(server_error(response)),
        }
    }

    fn build_authorize_at(
        &self,
        path: &str,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<HttpRequest, ClientError> {
        let mut params = Params::new();
        push_credentials(&mut params, credentials)?;
        push_principal(&mut params, None, principal)?;
        if let Some(usage) = usage {
            push_usage(&mut params, None, usage);
        }

        Ok(HttpRequest {
            method: HttpMethod::Get,
            url: self.url(path),
            params,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl<T: Transport> ThreeScaleClient<T> {
    /// Check whether `principal` may make a call costing `usage`.
    ///
    /// Business-rule rejections come back as `Response::Error`; only an
    /// unexpected status, a transport failure or a bad argument is `Err`.
    #[instrument(skip_all, fields(endpoint = AUTHORIZE_PATH))]
    pub fn authorize(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<Response<AuthorizeStatus>, ClientError> {
        let request = self.build_authorize(principal, credentials, usage)?;
        let response = self.execute(&request)?;
        self.parse_authorize(response)
    }

    /// Shorthand for `authorize` with a `Principal::UserKey`.
    pub fn authorize_with_user_key(
        &self,
        user_key: &str,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<Response<AuthorizeStatus>, ClientError> {
        self.authorize(&Principal::user_key(user_key)?, credentials, usage)
    }

    #[instrument(skip_all, fields(endpoint = OAUTH_AUTHORIZE_PATH))]
    pub fn oauth_authorize(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
    ) -> Result<Response<AuthorizeStatus>, ClientError> {
        let request = self.build_oauth_authorize(principal, credentials, usage)?;
        let response = self.execute(&request)?;
        self.parse_authorize(response)
    }

    /// Authorize and, if allowed, commit `usage` in one round trip.
    #[instrument(skip_all, fields(endpoint = AUTHREP_PATH))]
    pub fn authorize_and_report(
        &self,
        principal: &Principal,
        credentials: &Credentials,
        usage: Option<&Usage>,
        options: &AuthrepOptions,
    ) -> Result<Response<AuthorizeStatus>, ClientError> {
        let request = self.build_authrep(principal, credentials, usage, options)?;
        let response = self.execute(&request)?;
        self.parse_authorize(response)
    }

    /// Report a batch of transactions. Errors in the result carry the index
    /// of the transaction they belong to.
    #[instrument(skip_all, fields(endpoint = REPORT_PATH, transactions = transactions.len()))]
    pub fn report(
        &self,
        transactions: &[Transaction],
        credentials: &Credentials,
    ) -> Result<Response<()>, ClientError> {
        let request = self.build_report(transactions, credentials)?;
        let response = self.execute(&request)?;
        self.parse_report(response)
    }

    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        debug!(method = request.method.as_str(), url = %request.url, "calling backend");
        let response = match request.method {
            HttpMethod::Get => self.transport.get(&request.url, &request.params),
            HttpMethod::Post => self.transport.post(&request.url, &request.params),
            HttpMethod::Delete => self.transport.delete(&request.url, &request.params),
        }?;
        debug!(status = response.status, "backend responded");
        Ok(response)
    }
}

/// OAuth principals go to `oauth_authorize.xml` only, and only they do.
fn expect_oauth(principal: &Principal, oauth: bool) -> Result<(), ClientError> {
    match (principal, oauth) {
        (Principal::OAuth { .. }, false) => Err(ClientError::InvalidArgument(
            "OAuth principals must use oauth_authorize".to_string(),
        )),
        (Principal::AppId { .. } | Principal::UserKey(_), true) => Err(
            ClientError::InvalidArgument("oauth_authorize needs an OAuth principal".to_string()),
        ),
        _ => Ok(()),
    }
}

fn server_error(response: HttpResponse) -> ClientError {
    warn!(status = response.status, "backend returned an unexpected status");
    ClientError::Server {
        status: response.status,
        body: response.body,
    }
}
