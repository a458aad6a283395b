//! Fixture data and the authorize/report rules of the mock backend.

use std::collections::{BTreeMap, HashMap};

use axum::http::StatusCode;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::xml::{self, UsageReportXml};

/// A registered application.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: String,
    pub keys: Vec<String>,
    pub user_key: Option<String>,
    pub plan: String,
}

/// A usage limit on every application's plan.
#[derive(Debug, Clone)]
pub struct Limit {
    pub metric: String,
    pub period: String,
    pub max_value: i64,
}

/// Everything the mock backend knows about.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub provider_key: String,
    pub service_id: String,
    pub service_token: String,
    pub metrics: Vec<String>,
    pub limits: Vec<Limit>,
    pub applications: Vec<Application>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            provider_key: "pk-test".to_string(),
            service_id: "42".to_string(),
            service_token: "st-test".to_string(),
            metrics: vec!["hits".to_string(), "transfer".to_string()],
            limits: vec![
                Limit {
                    metric: "hits".to_string(),
                    period: "day".to_string(),
                    max_value: 100,
                },
                Limit {
                    metric: "hits".to_string(),
                    period: "month".to_string(),
                    max_value: 1000,
                },
            ],
            applications: vec![
                Application {
                    id: "app-1".to_string(),
                    keys: vec!["key-1".to_string()],
                    user_key: Some("uk-1".to_string()),
                    plan: "Basic".to_string(),
                },
                Application {
                    id: "app-2".to_string(),
                    keys: Vec::new(),
                    user_key: Some("uk-2".to_string()),
                    plan: "Ultimate".to_string(),
                },
            ],
        }
    }
}

/// A transaction accepted by the report endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub app_id: String,
    pub usage: Vec<(String, i64)>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Which authorize-style endpoint is being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Authorize,
    OAuthAuthorize,
    Authrep,
}

/// Status code and XML body.
pub type Reply = (StatusCode, String);

/// A request the backend refuses with an `<error>` body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejection {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl Rejection {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn into_reply(self) -> Reply {
        (self.status, xml::error(self.code, &self.message, None))
    }
}

type Params = [(String, String)];

/// Mock backend state: fixture plus per-application counters.
#[derive(Debug, Default)]
pub struct Backend {
    fixture: Fixture,
    counters: RwLock<HashMap<(String, String), i64>>,
    recorded: RwLock<Vec<Recorded>>,
}

impl Backend {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            counters: RwLock::default(),
            recorded: RwLock::default(),
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// Transactions accepted by `report`, in arrival order.
    pub async fn recorded(&self) -> Vec<Recorded> {
        self.recorded.read().await.clone()
    }

    pub async fn current_value(&self, app_id: &str, metric: &str) -> i64 {
        let counters = self.counters.read().await;
        counters
            .get(&(app_id.to_string(), metric.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Serve authorize, oauth_authorize and authrep.
    pub async fn transact(&self, params: &Params, mode: Mode) -> Reply {
        self.try_transact(params, mode)
            .await
            .unwrap_or_else(Rejection::into_reply)
    }

    async fn try_transact(&self, params: &Params, mode: Mode) -> Result<Reply, Rejection> {
        self.check_credentials(|key| lookup(params, key))?;
        let app = self.resolve(|key| lookup(params, key))?;
        let usage = self.usage(params)?;

        // OAuth authorize hands the key back instead of checking it.
        if mode != Mode::OAuthAuthorize && lookup(params, "app_id").is_some() {
            if let Some(reason) = key_mismatch(app, lookup(params, "app_key")) {
                let current = self.reports(app, &[]).await;
                return Ok(denied(app, &reason, &current));
            }
        }

        let predicted = self.reports(app, &usage).await;
        if predicted.iter().any(|r| r.current_value > r.max_value) {
            let current = self.reports(app, &[]).await;
            return Ok(denied(app, "usage limits are exceeded", &current));
        }

        let reports = if mode == Mode::Authrep {
            self.commit(&app.id, &usage).await;
            predicted
        } else {
            self.reports(app, &[]).await
        };

        if mode == Mode::Authrep && lookup(params, "no_body") == Some("true") {
            return Ok((StatusCode::OK, String::new()));
        }

        let application = (mode == Mode::OAuthAuthorize).then(|| {
            (
                app.id.as_str(),
                app.keys.first().map(String::as_str).unwrap_or_default(),
            )
        });
        Ok((
            StatusCode::OK,
            xml::status(true, None, &app.plan, application, &reports),
        ))
    }

    /// Serve a batch report. Either every transaction is accepted or none is.
    pub async fn report(&self, params: &Params) -> Reply {
        if let Err(rejection) = self.check_credentials(|key| lookup(params, key)) {
            return rejection.into_reply();
        }

        let transactions = group_transactions(params);
        if transactions.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                xml::error("transactions_empty", "no transactions to report", None),
            );
        }

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        for (index, fields) in &transactions {
            match self.check_transaction(fields) {
                Ok(recorded) => accepted.push(recorded),
                Err(rejection) => failures.push((
                    *index,
                    rejection.code.to_string(),
                    rejection.message,
                )),
            }
        }

        if !failures.is_empty() {
            debug!(failed = failures.len(), "rejecting report batch");
            return (StatusCode::FORBIDDEN, xml::errors(&failures));
        }

        for recorded in &accepted {
            self.commit(&recorded.app_id, &recorded.usage).await;
        }
        self.recorded.write().await.extend(accepted);
        (StatusCode::ACCEPTED, String::new())
    }

    fn check_transaction(&self, fields: &Params) -> Result<Recorded, Rejection> {
        let get = |key: &str| lookup(fields, key);

        let app = self.resolve(get)?;
        let usage = self.usage(fields)?;
        let timestamp = match get("timestamp") {
            None => None,
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| {
                Rejection::new(
                    StatusCode::BAD_REQUEST,
                    "timestamp_invalid",
                    format!("timestamp {raw:?} is invalid"),
                )
            })?),
        };

        Ok(Recorded {
            app_id: app.id.clone(),
            usage,
            timestamp,
        })
    }

    fn check_credentials<'a>(&self, get: impl Fn(&str) -> Option<&'a str>) -> Result<(), Rejection> {
        let fixture = &self.fixture;
        if let Some(token) = get("service_token") {
            if token != fixture.service_token || get("service_id") != Some(fixture.service_id.as_str()) {
                return Err(Rejection::new(
                    StatusCode::FORBIDDEN,
                    "service_token_invalid",
                    format!("service token \"{token}\" is invalid"),
                ));
            }
            return Ok(());
        }

        match get("provider_key") {
            Some(key) if key == fixture.provider_key => {
                match get("service_id") {
                    Some(id) if id != fixture.service_id => Err(Rejection::new(
                        StatusCode::NOT_FOUND,
                        "service_id_invalid",
                        format!("service id \"{id}\" is invalid"),
                    )),
                    _ => Ok(()),
                }
            }
            Some(key) => Err(Rejection::new(
                StatusCode::FORBIDDEN,
                "provider_key_invalid",
                format!("provider key \"{key}\" is invalid"),
            )),
            None => Err(Rejection::new(
                StatusCode::FORBIDDEN,
                "provider_key_invalid",
                "provider key is missing",
            )),
        }
    }

    fn resolve<'a>(&self, get: impl Fn(&str) -> Option<&'a str>) -> Result<&Application, Rejection> {
        if let Some(app_id) = get("app_id") {
            return self
                .fixture
                .applications
                .iter()
                .find(|app| app.id == app_id)
                .ok_or_else(|| {
                    Rejection::new(
                        StatusCode::NOT_FOUND,
                        "application_not_found",
                        format!("application with id=\"{app_id}\" was not found"),
                    )
                });
        }
        if let Some(user_key) = get("user_key") {
            return self
                .fixture
                .applications
                .iter()
                .find(|app| app.user_key.as_deref() == Some(user_key))
                .ok_or_else(|| {
                    Rejection::new(
                        StatusCode::FORBIDDEN,
                        "user_key_invalid",
                        format!("user key \"{user_key}\" is invalid"),
                    )
                });
        }
        Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "application_not_found",
            "application id or user key is missing",
        ))
    }

    /// Collect `usage[metric]=value` pairs, rejecting unknown metrics and
    /// non-integer values.
    fn usage(&self, params: &Params) -> Result<Vec<(String, i64)>, Rejection> {
        let mut usage = Vec::new();
        for (key, value) in params {
            let Some(metric) = key
                .strip_prefix("usage")
                .and_then(|rest| rest.strip_prefix('['))
                .and_then(|rest| rest.strip_suffix(']'))
            else {
                continue;
            };
            if !self.fixture.metrics.iter().any(|m| m == metric) {
                return Err(Rejection::new(
                    StatusCode::NOT_FOUND,
                    "metric_invalid",
                    format!("metric \"{metric}\" is invalid"),
                ));
            }
            let value = value.trim().parse::<i64>().map_err(|_| {
                Rejection::new(
                    StatusCode::BAD_REQUEST,
                    "usage_value_invalid",
                    format!("usage value {value:?} for metric \"{metric}\" is invalid"),
                )
            })?;
            usage.push((metric.to_string(), value));
        }
        Ok(usage)
    }

    /// One report per limit, with `delta` added to the current value.
    async fn reports(&self, app: &Application, delta: &[(String, i64)]) -> Vec<UsageReportXml> {
        let now = Utc::now();
        let counters = self.counters.read().await;
        self.fixture
            .limits
            .iter()
            .filter_map(|limit| {
                let (period_start, period_end) = period_bounds(&limit.period, now)?;
                let current = counters
                    .get(&(app.id.clone(), limit.metric.clone()))
                    .copied()
                    .unwrap_or(0);
                let added: i64 = delta
                    .iter()
                    .filter(|(metric, _)| *metric == limit.metric)
                    .map(|(_, value)| *value)
                    .sum();
                Some(UsageReportXml {
                    metric: limit.metric.clone(),
                    period: limit.period.clone(),
                    period_start,
                    period_end,
                    current_value: current + added,
                    max_value: limit.max_value,
                })
            })
            .collect()
    }

    async fn commit(&self, app_id: &str, usage: &[(String, i64)]) {
        let mut counters = self.counters.write().await;
        for (metric, value) in usage {
            *counters
                .entry((app_id.to_string(), metric.clone()))
                .or_insert(0) += value;
        }
    }
}

fn lookup<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn key_mismatch(app: &Application, given: Option<&str>) -> Option<String> {
    if app.keys.is_empty() {
        return None;
    }
    match given {
        None => Some("application key is missing".to_string()),
        Some(key) if app.keys.iter().any(|k| k == key) => None,
        Some(key) => Some(format!("application key \"{key}\" is invalid")),
    }
}

fn denied(app: &Application, reason: &str, reports: &[UsageReportXml]) -> Reply {
    (
        StatusCode::CONFLICT,
        xml::status(false, Some(reason), &app.plan, None, reports),
    )
}

/// Split `transactions[<i>][<field>]` pairs into per-index field lists with
/// the prefix removed (`transactions[0][usage][hits]` becomes `usage[hits]`).
fn group_transactions(params: &Params) -> BTreeMap<usize, Vec<(String, String)>> {
    let mut grouped: BTreeMap<usize, Vec<(String, String)>> = BTreeMap::new();
    for (key, value) in params {
        let Some(rest) = key.strip_prefix("transactions[") else {
            continue;
        };
        let Some((index, field)) = rest.split_once(']') else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        let Some(field) = field.strip_prefix('[') else {
            continue;
        };
        // `app_id]` -> `app_id`, `usage][hits]` -> `usage[hits]`
        let field = match field.split_once("][") {
            Some((head, tail)) => format!("{head}[{tail}"),
            None => field.trim_end_matches(']').to_string(),
        };
        grouped.entry(index).or_default().push((field, value.clone()));
    }
    grouped
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    const ZONED: &[&str] = &["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S %:z", "%Y-%m-%d %H:%M:%S %z"];
    ZONED
        .iter()
        .find_map(|format| DateTime::parse_from_str(raw.trim(), format).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

fn period_bounds(period: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = |date: NaiveDate| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let today = now.date_naive();
    match period {
        "minute" => {
            let start = now.with_second(0)?.with_nanosecond(0)?;
            Some((start, start + Duration::minutes(1)))
        }
        "hour" => {
            let start = now.with_minute(0)?.with_second(0)?.with_nanosecond(0)?;
            Some((start, start + Duration::hours(1)))
        }
        "day" => {
            let start = midnight(today);
            Some((start, start + Duration::days(1)))
        }
        "week" => {
            let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            let start = midnight(monday);
            Some((start, start + Duration::weeks(1)))
        }
        "month" => {
            let first = today.with_day(1)?;
            let next = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
            };
            Some((midnight(first), midnight(next)))
        }
        "year" => {
            let first = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
            let next = NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?;
            Some((midnight(first), midnight(next)))
        }
        _ => None,
    }
}
