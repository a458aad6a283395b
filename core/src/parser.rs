//! XML body parsing.
//!
//! Two body shapes come back from the backend:
//!
//! - a status document for authorize/authrep:
//!   `<status><authorized>true</authorized><plan>..</plan><usage_reports>..`
//!   (older backends omit `<authorized>` and list bare `<usage>` nodes; a
//!   document whose root is not `<error>` then means success),
//! - one or more `<error>` nodes, each with a `code` (or legacy `id`)
//!   attribute, an optional `index` and the message as text.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use roxmltree::{Document, Node};
use tracing::warn;

use crate::error::ClientError;
use crate::response::{AuthorizeStatus, Response, ResponseError, UsageReport};

/// Parse an authorize/authrep success-envelope body.
///
/// An empty body (authrep with `no_body`) is a success with no plan.
pub fn parse_authorize_body(body: &str) -> Result<Response<AuthorizeStatus>, ClientError> {
    if body.trim().is_empty() {
        return Ok(Response::Success(AuthorizeStatus::default()));
    }

    let doc = Document::parse(body).map_err(|e| ClientError::Parse(e.to_string()))?;
    let root = doc.root_element();

    if root.has_tag_name("error") {
        return Ok(Response::Error(vec![error_from_node(root)]));
    }

    if let Some(authorized) = child(root, "authorized") {
        if !text_of(authorized).eq_ignore_ascii_case("true") {
            let reason = child(root, "reason")
                .map(text_of)
                .unwrap_or_else(|| "not authorized".to_string());
            return Ok(Response::Error(vec![ResponseError::new(None, reason)]));
        }
    }

    let plan = child(root, "plan").map(text_of).unwrap_or_default();
    let usage_reports = root
        .descendants()
        .filter(|n| n.has_tag_name("usage_report") || n.has_tag_name("usage"))
        .filter(|n| n.attribute("metric").is_some())
        .filter_map(|n| usage_report_from_node(n).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Response::Success(AuthorizeStatus {
        plan,
        usage_reports,
    }))
}

/// Parse a client-error body into one `ResponseError` per `<error>` node.
///
/// Never fails: a body that is not XML, or has no `<error>` node, becomes a
/// single error carrying the trimmed body as its message.
pub fn parse_error_body(body: &str) -> Vec<ResponseError> {
    let fallback = || vec![ResponseError::new(None, body.trim())];

    let Ok(doc) = Document::parse(body) else {
        return fallback();
    };

    let errors: Vec<ResponseError> = doc
        .descendants()
        .filter(|n| n.has_tag_name("error"))
        .map(error_from_node)
        .collect();

    if errors.is_empty() {
        fallback()
    } else {
        errors
    }
}

/// Parse a period boundary. Accepts `YYYY-MM-DD HH:MM:SS` (UTC) or the same
/// followed by a zone offset (`+0000`, `+02:00`, with or without a space),
/// and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ClientError> {
    const ZONED: &[&str] = &[
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %:z",
        "%Y-%m-%d %H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S%:z",
    ];

    let raw = raw.trim();
    for format in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| ClientError::Parse(format!("invalid timestamp {raw:?}")))
}

/// `Ok(None)` for a report on a period this client does not model; the
/// rest of the status is still usable.
fn usage_report_from_node(node: Node) -> Result<Option<UsageReport>, ClientError> {
    let metric = node.attribute("metric").unwrap_or_default().trim().to_string();
    let period = match node.attribute("period").unwrap_or_default().parse() {
        Ok(period) => period,
        Err(reason) => {
            warn!(%metric, %reason, "skipping usage report");
            return Ok(None);
        }
    };

    let period_start = required_child(node, "period_start").and_then(|t| parse_timestamp(&t))?;
    let period_end = required_child(node, "period_end").and_then(|t| parse_timestamp(&t))?;
    if period_end < period_start {
        return Err(ClientError::Parse(format!(
            "usage report for {metric} ends before it starts"
        )));
    }

    Ok(Some(UsageReport {
        metric,
        period,
        period_start,
        period_end,
        current_value: integer_child(node, "current_value")?,
        max_value: integer_child(node, "max_value")?,
    }))
}

/// An unreadable `index` is dropped, never the error itself.
fn error_from_node(node: Node) -> ResponseError {
    let code = node
        .attribute("code")
        .or_else(|| node.attribute("id"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let index = node.attribute("index").and_then(|i| match i.trim().parse::<usize>() {
        Ok(index) => Some(index),
        Err(_) => {
            warn!(index = i, "ignoring unreadable error index");
            None
        }
    });

    ResponseError {
        code,
        message: text_of(node),
        index,
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// All text under `node`, trimmed.
fn text_of(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn required_child(node: Node, name: &str) -> Result<String, ClientError> {
    child(node, name)
        .map(text_of)
        .ok_or_else(|| ClientError::Parse(format!("usage report is missing <{name}>")))
}

/// Missing counters read as zero.
fn integer_child(node: Node, name: &str) -> Result<i64, ClientError> {
    match child(node, name).map(text_of) {
        None => Ok(0),
        Some(text) if text.is_empty() => Ok(0),
        Some(text) => text
            .parse()
            .map_err(|_| ClientError::Parse(format!("<{name}> is not an integer: {text:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::response::Period;

    #[test]
    fn parses_authorized_status_with_usage_reports() {
        let body = r#"<status>
            <authorized>true</authorized>
            <plan>Ultimate</plan>
            <usage_reports>
              <usage_report metric="hits" period="day">
                <period_start>2010-04-26 00:00:00 +0000</period_start>
                <period_end>2010-04-27 00:00:00 +0000</period_end>
                <current_value>10023</current_value>
                <max_value>50000</max_value>
              </usage_report>
              <usage_report metric="hits" period="month">
                <period_start>2010-04-01 00:00:00 +0000</period_start>
                <period_end>2010-05-01 00:00:00 +0000</period_end>
                <current_value>999872</current_value>
                <max_value>150000</max_value>
              </usage_report>
            </usage_reports>
          </status>"#;

        let status = parse_authorize_body(body).unwrap().into_success().unwrap();
        assert_eq!(status.plan, "Ultimate");
        assert_eq!(status.usage_reports.len(), 2);

        let day = &status.usage_reports[0];
        assert_eq!(day.metric, "hits");
        assert_eq!(day.period, Period::Day);
        assert_eq!(day.period_start, Utc.with_ymd_and_hms(2010, 4, 26, 0, 0, 0).unwrap());
        assert_eq!(day.period_end, Utc.with_ymd_and_hms(2010, 4, 27, 0, 0, 0).unwrap());
        assert_eq!(day.current_value, 10023);
        assert_eq!(day.max_value, 50000);
        assert!(!day.is_exceeded());

        let month = &status.usage_reports[1];
        assert_eq!(month.period, Period::Month);
        assert_eq!(month.current_value, 999872);
        assert!(month.is_exceeded());
    }

    #[test]
    fn parses_legacy_status_without_authorized_node() {
        let body = r#"<status>
               <plan>Ultimate</plan>
               <usage metric="hits" period="day">
                 <period_start>2010-04-26 00:00:00</period_start>
                 <period_end>2010-04-26 23:59:59</period_end>
                 <current_value>10023</current_value>
                 <max_value>50000</max_value>
               </usage>
             </status>"#;

        let status = parse_authorize_body(body).unwrap().into_success().unwrap();
        assert_eq!(status.plan, "Ultimate");
        assert_eq!(status.usage_reports.len(), 1);
        assert_eq!(
            status.usage_reports[0].period_end,
            Utc.with_ymd_and_hms(2010, 4, 26, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn missing_usage_reports_is_empty_list() {
        let body = "<status><authorized>true</authorized><plan>Ultimate</plan></status>";
        let status = parse_authorize_body(body).unwrap().into_success().unwrap();
        assert_eq!(status.plan, "Ultimate");
        assert!(status.usage_reports.is_empty());
    }

    #[test]
    fn not_authorized_carries_reason() {
        let body = r#"<status>
            <authorized>false</authorized>
            <reason>usage limits are exceeded</reason>
            <plan>Basic</plan>
          </status>"#;
        let response = parse_authorize_body(body).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error_code(), None);
        assert_eq!(response.error_message(), Some("usage limits are exceeded"));
    }

    #[test]
    fn legacy_error_root_is_error_response() {
        let body = r#"<error id="user.invalid_key">blah blah</error>"#;
        let response = parse_authorize_body(body).unwrap();
        assert_eq!(response.error_code(), Some("user.invalid_key"));
        assert_eq!(response.error_message(), Some("blah blah"));
    }

    #[test]
    fn empty_body_is_bare_success() {
        let status = parse_authorize_body("  ").unwrap().into_success().unwrap();
        assert_eq!(status, AuthorizeStatus::default());
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        let err = parse_authorize_body("<status><plan>").unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }

    #[test]
    fn non_integer_counter_is_parse_error() {
        let body = r#"<status><usage_reports>
            <usage_report metric="hits" period="day">
              <period_start>2010-04-26 00:00:00</period_start>
              <period_end>2010-04-27 00:00:00</period_end>
              <current_value>lots</current_value>
              <max_value>5</max_value>
            </usage_report></usage_reports></status>"#;
        let err = parse_authorize_body(body).unwrap_err();
        assert!(matches!(err, ClientError::Parse(ref m) if m.contains("current_value")));
    }

    #[test]
    fn period_ending_before_start_is_rejected() {
        let body = r#"<status><usage_reports>
            <usage_report metric="hits" period="day">
              <period_start>2010-04-27 00:00:00</period_start>
              <period_end>2010-04-26 00:00:00</period_end>
            </usage_report></usage_reports></status>"#;
        assert!(parse_authorize_body(body).is_err());
    }

    #[test]
    fn single_error_with_code() {
        let body = r#"<error code="user.exceeded_limits">
                       usage limits are exceeded
                     </error>"#;
        let errors = parse_error_body(body);
        assert_eq!(
            errors,
            vec![ResponseError::new(
                Some("user.exceeded_limits".to_string()),
                "usage limits are exceeded"
            )]
        );
    }

    #[test]
    fn indexed_batch_errors() {
        let body = r#"<errors>
                        <error code="user.invalid_key" index="0">
                          user key is invalid
                        </error>
                        <error code="provider.invalid_metric" index="1">
                          metric does not exist
                        </error>
                      </errors>"#;
        let errors = parse_error_body(body);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, Some(0));
        assert_eq!(errors[0].code.as_deref(), Some("user.invalid_key"));
        assert_eq!(errors[0].message, "user key is invalid");
        assert_eq!(errors[1].index, Some(1));
        assert_eq!(errors[1].code.as_deref(), Some("provider.invalid_metric"));
        assert_eq!(errors[1].message, "metric does not exist");
    }

    #[test]
    fn unreadable_index_keeps_the_error() {
        let body = r#"<errors>
                        <error code="user.invalid_key" index="x">bad</error>
                        <error code="metric_invalid" index="1">m</error>
                      </errors>"#;
        let errors = parse_error_body(body);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code.as_deref(), Some("user.invalid_key"));
        assert_eq!(errors[0].message, "bad");
        assert_eq!(errors[0].index, None);
        assert_eq!(errors[1].code.as_deref(), Some("metric_invalid"));
        assert_eq!(errors[1].index, Some(1));
    }

    #[test]
    fn unknown_period_is_skipped_not_fatal() {
        let body = r#"<status>
            <authorized>true</authorized>
            <plan>Basic</plan>
            <usage_reports>
              <usage_report metric="hits" period="eternity">
                <period_start>2010-04-26 00:00:00</period_start>
                <period_end>2010-04-27 00:00:00</period_end>
                <current_value>1</current_value>
                <max_value>5</max_value>
              </usage_report>
              <usage_report metric="hits" period="day">
                <period_start>2010-04-26 00:00:00</period_start>
                <period_end>2010-04-27 00:00:00</period_end>
                <current_value>2</current_value>
                <max_value>5</max_value>
              </usage_report>
            </usage_reports>
          </status>"#;
        let status = parse_authorize_body(body).unwrap().into_success().unwrap();
        assert_eq!(status.plan, "Basic");
        assert_eq!(status.usage_reports.len(), 1);
        assert_eq!(status.usage_reports[0].period, Period::Day);
        assert_eq!(status.usage_reports[0].current_value, 2);
    }

    #[test]
    fn non_xml_error_body_falls_back_to_text() {
        let errors = parse_error_body("  Forbidden\n");
        assert_eq!(errors, vec![ResponseError::new(None, "Forbidden")]);
    }

    #[test]
    fn timestamps_with_and_without_offset_are_the_same_instant() {
        let bare = parse_timestamp("2010-04-26 00:00:00").unwrap();
        assert_eq!(parse_timestamp("2010-04-26 00:00:00 +0000").unwrap(), bare);
        assert_eq!(parse_timestamp("2010-04-26 02:00:00 +02:00").unwrap(), bare);
        assert_eq!(parse_timestamp("2010-04-26 02:00:00+02:00").unwrap(), bare);
        assert_eq!(parse_timestamp("2010-04-26T00:00:00Z").unwrap(), bare);
        assert_eq!(bare.timestamp(), 1_272_240_000);
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
