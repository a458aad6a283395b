//! Blocking client for the 3scale metering backend.
//!
//! # Overview
//! Authorizes applications and users against their plan's usage limits and
//! reports usage for metering. Every call is one HTTP round trip: build the
//! parameters, GET or POST them, read the XML answer into a typed
//! `Response`.
//!
//! # Design
//! - `ThreeScaleClient` is stateless: a base URL plus a `Transport`.
//! - Each operation is split into `build_*` (produces an `HttpRequest`) and
//!   `parse_*` (consumes an `HttpResponse`); the convenience methods glue the
//!   two together through the transport. Hosts that do their own I/O can
//!   call the halves directly.
//! - Business-rule rejections are `Response::Error` values. `ClientError` is
//!   reserved for bad arguments, transport failures and backend statuses
//!   outside the contract.
//!
//! ```no_run
//! use threescale_core::{Credentials, Principal, ThreeScaleClient, Usage};
//!
//! # fn main() -> Result<(), threescale_core::ClientError> {
//! let client = ThreeScaleClient::new();
//! let credentials = Credentials::service_token("my-token", "my-service")?;
//! let app = Principal::app_id_with_key("app-id", "app-key")?;
//!
//! let response = client.authorize(&app, &credentials, Some(&Usage::new().with("hits", 1)))?;
//! if response.is_success() {
//!     // serve the request
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod http;
pub mod parser;
pub mod response;
pub mod transport;
pub mod types;

pub use client::{ThreeScaleClient, DEFAULT_HOST};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorCode, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, StatusClass};
pub use response::{AuthorizeStatus, Period, Response, ResponseError, UsageReport};
pub use transport::{Transport, UreqTransport};
pub use types::{AuthrepOptions, Credentials, Principal, Timestamp, Transaction, Usage};
