//! Request-side domain types: who is calling, who is being metered, and what
//! was used.
//!
//! Every value here is built per call and never mutated afterwards.
//! Constructors reject blank identifiers with `ClientError::InvalidArgument`
//! so a malformed call never reaches the network.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crate::error::ClientError;

/// Identifies the API provider (service owner) making the backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Account-wide provider key. `service_id` is only needed when the
    /// account has more than one service.
    ProviderKey {
        provider_key: String,
        service_id: Option<String>,
    },
    /// Per-service token.
    ServiceToken {
        service_token: String,
        service_id: String,
    },
}

impl Credentials {
    pub fn provider_key(provider_key: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Credentials::ProviderKey {
            provider_key: required("provider_key", provider_key.into())?,
            service_id: None,
        })
    }

    pub fn provider_key_for_service(
        provider_key: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Credentials::ProviderKey {
            provider_key: required("provider_key", provider_key.into())?,
            service_id: Some(required("service_id", service_id.into())?),
        })
    }

    pub fn service_token(
        service_token: impl Into<String>,
        service_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Credentials::ServiceToken {
            service_token: required("service_token", service_token.into())?,
            service_id: required("service_id", service_id.into())?,
        })
    }

    /// Re-check a value that may have been built without the constructors.
    pub fn validate(&self) -> Result<(), ClientError> {
        match self {
            Credentials::ProviderKey { provider_key, .. } => {
                check("provider_key", provider_key)
            }
            Credentials::ServiceToken {
                service_token,
                service_id,
            } => {
                check("service_token", service_token)?;
                check("service_id", service_id)
            }
        }
    }

    pub fn service_id(&self) -> Option<&str> {
        match self {
            Credentials::ProviderKey { service_id, .. } => service_id.as_deref(),
            Credentials::ServiceToken { service_id, .. } => Some(service_id),
        }
    }
}

/// The application or user being authorized or metered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    AppId {
        app_id: String,
        app_key: Option<String>,
    },
    UserKey(String),
    /// OAuth-style application; the backend returns the app's secrets rather
    /// than checking them.
    OAuth {
        app_id: String,
        access_token: Option<String>,
    },
}

impl Principal {
    pub fn app_id(app_id: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Principal::AppId {
            app_id: required("app_id", app_id.into())?,
            app_key: None,
        })
    }

    pub fn app_id_with_key(
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Principal::AppId {
            app_id: required("app_id", app_id.into())?,
            app_key: non_empty(app_key.into()),
        })
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        match self {
            Principal::AppId { app_id, .. } | Principal::OAuth { app_id, .. } => {
                check("app_id", app_id)
            }
            Principal::UserKey(user_key) => check("user_key", user_key),
        }
    }

    pub fn user_key(user_key: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Principal::UserKey(required("user_key", user_key.into())?))
    }

    pub fn oauth(app_id: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Principal::OAuth {
            app_id: required("app_id", app_id.into())?,
            access_token: None,
        })
    }

    pub fn oauth_with_token(
        app_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Principal::OAuth {
            app_id: required("app_id", app_id.into())?,
            access_token: non_empty(access_token.into()),
        })
    }
}

/// Metric name to numeric delta. Ordered so the encoded request is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage(BTreeMap<String, i64>);

impl Usage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, metric: impl Into<String>, value: i64) -> Self {
        self.0.insert(metric.into(), value);
        self
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: i64) {
        self.0.insert(metric.into(), value);
    }

    pub fn get(&self, metric: &str) -> Option<i64> {
        self.0.get(metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for Usage {
    fn from_iter<I: IntoIterator<Item = (K, i64)>>(iter: I) -> Self {
        Usage(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// When a reported transaction happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    /// Seconds since the Unix epoch. Rendered in UTC.
    Epoch(i64),
    /// An instant with an explicit offset, rendered in that offset.
    Zoned(DateTime<FixedOffset>),
    /// Sent as given; the caller owns its format.
    Raw(String),
}

/// Wire format for encoded timestamps: `YYYY-MM-DD HH:MM:SS±HH:MM`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

impl Timestamp {
    /// Render for the backend. Always carries an explicit offset unless the
    /// caller supplied a raw string.
    pub fn encode(&self) -> Result<String, ClientError> {
        match self {
            Timestamp::Epoch(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .map(|dt| dt.fixed_offset().format(TIMESTAMP_FORMAT).to_string())
                .ok_or_else(|| {
                    ClientError::InvalidArgument(format!("timestamp {secs} is out of range"))
                }),
            Timestamp::Zoned(dt) => Ok(dt.format(TIMESTAMP_FORMAT).to_string()),
            Timestamp::Raw(raw) => Ok(raw.clone()),
        }
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Timestamp::Epoch(secs)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::Zoned(dt.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Timestamp::Zoned(dt)
    }
}

/// One entry of a batch report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub principal: Principal,
    pub usage: Usage,
    /// Defaults to the time the backend receives the report.
    pub timestamp: Option<Timestamp>,
}

impl Transaction {
    pub fn new(principal: Principal, usage: Usage) -> Self {
        Self {
            principal,
            usage,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Extra parameters accepted only by authrep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthrepOptions {
    pub user_id: Option<String>,
    pub object: Option<String>,
    /// Ask the backend to skip the response body.
    pub no_body: bool,
}

fn check(name: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidArgument(format!("missing {name}")));
    }
    Ok(())
}

fn required(name: &str, value: String) -> Result<String, ClientError> {
    check(name, &value)?;
    Ok(value)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
