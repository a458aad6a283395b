//! Response-side types: the two-outcome `Response` and what a successful
//! authorization carries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorCode;

/// Outcome of one backend call. Never both at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Response<T> {
    Success(T),
    /// One entry for a single rejection; one per failing transaction for a
    /// rejected batch report.
    Error(Vec<ResponseError>),
}

impl<T> Response<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Response::Success(value) => Some(value),
            Response::Error(_) => None,
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Response::Success(value) => Some(value),
            Response::Error(_) => None,
        }
    }

    /// Empty on success.
    pub fn errors(&self) -> &[ResponseError] {
        match self {
            Response::Success(_) => &[],
            Response::Error(errors) => errors,
        }
    }

    /// Code of the first error, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.errors().first().and_then(|e| e.code.as_deref())
    }

    /// Message of the first error, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.errors().first().map(|e| e.message.as_str())
    }
}

/// A business-rule rejection reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseError {
    /// Machine code, verbatim (`user.invalid_key`, `application_not_found`).
    /// Absent for an `authorized=false` status, which only gives a reason.
    pub code: Option<String>,
    pub message: String,
    /// Index of the submitted transaction this error belongs to (batch
    /// report only).
    pub index: Option<usize>,
}

impl ResponseError {
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            index: None,
        }
    }

    pub fn kind(&self) -> Option<ErrorCode> {
        self.code.as_deref().map(ErrorCode::from_code)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.index {
            write!(f, "[{index}] ")?;
        }
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Payload of a successful authorize / authrep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorizeStatus {
    /// Name of the plan the application is signed up to. Empty when the
    /// backend sent no body.
    pub plan: String,
    /// One entry per usage limit on the plan.
    pub usage_reports: Vec<UsageReport>,
}

impl AuthorizeStatus {
    /// Reports whose limit is already exceeded.
    pub fn exceeded(&self) -> impl Iterator<Item = &UsageReport> {
        self.usage_reports.iter().filter(|r| r.is_exceeded())
    }
}

/// Current vs. allowed value of one metric in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub metric: String,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub current_value: i64,
    pub max_value: i64,
}

impl UsageReport {
    pub fn is_exceeded(&self) -> bool {
        self.current_value > self.max_value
    }
}

/// Length of the window a usage limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Year => "year",
            Period::Month => "month",
            Period::Week => "week",
            Period::Day => "day",
            Period::Hour => "hour",
            Period::Minute => "minute",
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "year" => Ok(Period::Year),
            "month" => Ok(Period::Month),
            "week" => Ok(Period::Week),
            "day" => Ok(Period::Day),
            "hour" => Ok(Period::Hour),
            "minute" => Ok(Period::Minute),
            other => Err(format!("unknown period {other:?}")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
