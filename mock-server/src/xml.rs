//! XML bodies in the backend's wire format.

use std::io;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::error;

/// One `<usage_report>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReportXml {
    pub metric: String,
    pub period: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub current_value: i64,
    pub max_value: i64,
}

/// `<error code="..">message</error>`, optionally with an `index`.
pub fn error(code: &str, message: &str, index: Option<usize>) -> String {
    render(false, |out| out.error(code, message, index))
}

/// Several indexed errors wrapped in `<errors>`.
pub fn errors(entries: &[(usize, String, String)]) -> String {
    render(true, |out| {
        out.open("errors", &[])?;
        for (index, code, message) in entries {
            out.error(code, message, Some(*index))?;
        }
        out.close("errors")
    })
}

pub fn status(
    authorized: bool,
    reason: Option<&str>,
    plan: &str,
    application: Option<(&str, &str)>,
    reports: &[UsageReportXml],
) -> String {
    render(true, |out| {
        out.open("status", &[])?;
        out.leaf("authorized", if authorized { "true" } else { "false" })?;
        if let Some(reason) = reason {
            out.leaf("reason", reason)?;
        }
        out.leaf("plan", plan)?;
        if let Some((id, key)) = application {
            out.open("application", &[])?;
            out.leaf("id", id)?;
            out.leaf("key", key)?;
            out.close("application")?;
        }
        if !reports.is_empty() {
            out.open("usage_reports", &[])?;
            for report in reports {
                out.usage_report(report)?;
            }
            out.close("usage_reports")?;
        }
        out.close("status")
    })
}

/// Run `build` against a fresh writer. Writing into memory cannot fail in
/// practice; if it ever does the body is left empty and the failure logged.
fn render(declaration: bool, build: impl FnOnce(&mut XmlOut) -> io::Result<()>) -> String {
    let mut out = XmlOut(Writer::new(Vec::new()));
    let written = if declaration {
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .and_then(|()| build(&mut out))
    } else {
        build(&mut out)
    };
    match written {
        Ok(()) => String::from_utf8_lossy(&out.0.into_inner()).into_owned(),
        Err(e) => {
            error!(error = %e, "failed to render XML body");
            String::new()
        }
    }
}

struct XmlOut(Writer<Vec<u8>>);

impl XmlOut {
    fn event(&mut self, event: Event<'_>) -> io::Result<()> {
        self.0.write_event(event).map_err(io::Error::other)
    }

    fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> io::Result<()> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> io::Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// `<name>text</name>`, text escaped.
    fn leaf(&mut self, name: &str, text: &str) -> io::Result<()> {
        self.open(name, &[])?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    fn error(&mut self, code: &str, message: &str, index: Option<usize>) -> io::Result<()> {
        let index = index.map(|i| i.to_string());
        let mut attributes = vec![("code", code)];
        if let Some(index) = &index {
            attributes.push(("index", index.as_str()));
        }
        self.open("error", &attributes)?;
        self.event(Event::Text(BytesText::new(message)))?;
        self.close("error")
    }

    fn usage_report(&mut self, report: &UsageReportXml) -> io::Result<()> {
        self.open(
            "usage_report",
            &[("metric", report.metric.as_str()), ("period", report.period.as_str())],
        )?;
        self.leaf("period_start", &timestamp(report.period_start))?;
        self.leaf("period_end", &timestamp(report.period_end))?;
        self.leaf("current_value", &report.current_value.to_string())?;
        self.leaf("max_value", &report.max_value.to_string())?;
        self.close("usage_report")
    }
}

/// `YYYY-MM-DD HH:MM:SS +0000`, as the backend writes period boundaries.
fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S %z").to_string()
}
