//! Best-effort push of one cycle record to an InfluxDB-style write endpoint
//! as a single line-protocol line.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::config::{Credentials, CycleSection, UploadSection};
use crate::record::{CycleRecord, Schema};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no finite field values to upload")]
    Empty,
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

/// Escape a measurement name (commas and spaces).
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value or field key (commas, equals signs, spaces).
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Format one record as a line-protocol line:
/// `<measurement>,<tag>=<value> <key>=<value>[,...] <timestamp_ns>`.
///
/// Fields follow schema order and use each field's short key. Non-finite
/// values are left out. `timestamp_s == 0` (clock unknown) is sent as 0.
pub fn to_line_protocol(
    measurement: &str,
    tag: (&str, &str),
    schema: &Schema,
    record: &CycleRecord,
    timestamp_s: u64,
) -> Result<String, UploadError> {
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .filter_map(|f| {
            record
                .get(&f.heading)
                .filter(|v| v.is_finite())
                .map(|v| format!("{}={v}", escape_key(&f.key)))
        })
        .collect();

    if fields.is_empty() {
        return Err(UploadError::Empty);
    }

    let ts_ns = u128::from(timestamp_s) * 1_000_000_000;
    Ok(format!(
        "{},{}={} {} {ts_ns}",
        escape_measurement(measurement),
        escape_key(tag.0),
        escape_key(tag.1),
        fields.join(",")
    ))
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

pub struct Uploader {
    url: String,
    token: String,
    measurement: String,
    sensor_id: String,
    timeout: Duration,
}

impl Uploader {
    pub fn new(creds: &Credentials, cycle: &CycleSection, upload: &UploadSection) -> Self {
        Self {
            url: creds.telemetry_url.clone(),
            token: creds.api_token.clone(),
            measurement: cycle.measurement.clone(),
            sensor_id: cycle.sensor_id.clone(),
            timeout: Duration::from_millis(upload.timeout_ms),
        }
    }

    /// Push `record` once. Never retries. The HTTP client (and with it the
    /// connection) is dropped before returning, whatever the outcome.
    pub async fn upload(
        &self,
        schema: &Schema,
        record: &CycleRecord,
        timestamp_s: u64,
    ) -> Result<(), UploadError> {
        let line = to_line_protocol(
            &self.measurement,
            ("sensor_id", &self.sensor_id),
            schema,
            record,
            timestamp_s,
        )?;
        info!(payload = %line, "uploading record");

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        let resp = client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONNECTION, "close")
            .body(line)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "telemetry endpoint rejected record");
            return Err(UploadError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        // Drain so the connection closes cleanly.
        if let Err(e) = resp.bytes().await {
            debug!("response body not fully read: {e}");
        }
        info!(status = status.as_u16(), "record uploaded");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
