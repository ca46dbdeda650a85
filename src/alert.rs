//! Alerting sink.
//!
//! Fire-and-forget notifications for batch degradation and lifecycle
//! events. The transport (email, chat, pager) lives outside this crate;
//! callers inject an [`AlertSink`] and failures are logged and swallowed so
//! alerting can never affect batch accounting.

use anyhow::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Error => "error",
        }
    }
}

/// Outbound notification boundary.
pub trait AlertSink: Send + Sync {
    fn notify(&self, subject: &str, body: &str, severity: Severity) -> Result<()>;
}

/// Sink that writes alerts to the log. The default for deployments without
/// an external notification channel.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, subject: &str, body: &str, severity: Severity) -> Result<()> {
        match severity {
            Severity::Info => log::info!("alert [{}]: {}\n{}", severity.as_str(), subject, body),
            Severity::Error => log::error!("alert [{}]: {}\n{}", severity.as_str(), subject, body),
        }
        Ok(())
    }
}

/// Maximum failed addresses quoted in an alert body.
pub const MAX_QUOTED_FAILURES: usize = 10;

/// Send the high-failure-rate alert. Best-effort: a sink error is logged
/// and dropped.
pub fn send_failure_alert(
    sink: &dyn AlertSink,
    failed: usize,
    total: usize,
    failed_addresses: &[String],
) {
    let failure_rate = if total > 0 {
        failed as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let subject = format!(
        "High Failure Rate Alert - {failed}/{total} cameras failed ({failure_rate:.1}%)"
    );
    let sample: Vec<&str> = failed_addresses
        .iter()
        .take(MAX_QUOTED_FAILURES)
        .map(String::as_str)
        .collect();
    let body = format!(
        "High camera failure rate detected.\n\
         Failed cameras: {failed}\n\
         Total cameras: {total}\n\
         Failure rate: {failure_rate:.1}%\n\
         First failures: {sample:?}\n\
         Collection is still running and will retry failed cameras next batch."
    );
    if let Err(err) = sink.notify(&subject, &body, Severity::Error) {
        log::warn!("failed to send failure alert: {err:#}");
    }
}

/// Send the collection-started notification. Best-effort.
pub fn send_startup_notification(sink: &dyn AlertSink, total_cameras: usize, interval_mins: u64) {
    let subject = "Data Collection Started".to_string();
    let body = format!(
        "Traffic data collection has started.\n\
         Collection schedule: every {interval_mins} minutes\n\
         Total cameras: {total_cameras}\n\
         Alerts fire when the batch failure rate exceeds the configured threshold."
    );
    if let Err(err) = sink.notify(&subject, &body, Severity::Info) {
        log::warn!("failed to send startup notification: {err:#}");
    }
}
