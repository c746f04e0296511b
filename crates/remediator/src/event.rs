//! Inbound alert events.
//!
//! Falcosidekick forwards Falco alerts as CloudEvents over HTTP. Both HTTP
//! content modes are understood:
//!
//! - binary: attributes travel in `ce-*` headers and the body is the Falco
//!   payload itself
//! - structured: `Content-Type: application/cloudevents+json` and the body is
//!   the whole envelope
//!
//! Reference: <https://github.com/cloudevents/spec/blob/v1.0.2/cloudevents/bindings/http-protocol-binding.md>

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// CloudEvent `source` emitted by Falcosidekick.
pub const FALCO_SOURCE: &str = "falco.org";

/// CloudEvent `type` for Falco rule output.
pub const FALCO_EVENT_TYPE: &str = "falco.rule.output.v1";

/// The only rule that triggers a scale-down.
pub const TERMINAL_SHELL_RULE: &str = "Terminal shell in container";

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Errors decoding an inbound event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("missing CloudEvent attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("CloudEvent header {0} is not valid UTF-8")]
    InvalidHeader(&'static str),

    #[error("malformed CloudEvent envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed Falco payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("CloudEvent data_base64 is not valid base64: {0}")]
    DataBase64(#[source] base64::DecodeError),
}

/// A CloudEvent envelope with its data left undecoded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudEvent {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

fn default_spec_version() -> String {
    "1.0".to_string()
}

/// Structured-mode body; binary data travels in `data_base64`.
#[derive(Deserialize)]
struct StructuredEvent {
    #[serde(flatten)]
    event: CloudEvent,
    #[serde(default)]
    data_base64: Option<String>,
}

/// Media types are case-insensitive and may carry parameters.
fn is_structured(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(STRUCTURED_CONTENT_TYPE))
}

/// Event data from raw bytes. Non-JSON bytes are kept as text so
/// out-of-scope events can still be ignored; an in-scope event fails later
/// when its payload is decoded.
fn data_from_bytes(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
    })
}

impl CloudEvent {
    /// Decode an envelope from an HTTP request.
    pub fn from_http(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventError> {
        if is_structured(headers) {
            let StructuredEvent {
                mut event,
                data_base64,
            } = serde_json::from_slice(body).map_err(EventError::Envelope)?;

            if let Some(encoded) = data_base64.filter(|_| event.data.is_null()) {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(EventError::DataBase64)?;
                event.data = data_from_bytes(&bytes);
            }
            return Ok(event);
        }

        let source = required_header(headers, "ce-source")?;
        let ty = required_header(headers, "ce-type")?;
        let id = optional_header(headers, "ce-id")?.unwrap_or_default();
        let specversion =
            optional_header(headers, "ce-specversion")?.unwrap_or_else(default_spec_version);
        let subject = optional_header(headers, "ce-subject")?;
        let time = optional_header(headers, "ce-time")?
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc));

        let data = data_from_bytes(body);

        Ok(Self {
            id,
            source,
            ty,
            specversion,
            time,
            subject,
            data,
        })
    }
}

fn optional_header(headers: &HeaderMap, name: &'static str) -> Result<Option<String>, EventError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::to_string)
                .map_err(|_| EventError::InvalidHeader(name))
        })
        .transpose()
}

fn required_header(headers: &HeaderMap, name: &'static str) -> Result<String, EventError> {
    optional_header(headers, name)?.ok_or(EventError::MissingAttribute(name))
}

/// The workload an alert was raised for, taken from Falco `output_fields`.
///
/// Falco emits `null` for fields it could not resolve, so everything is
/// optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Workload {
    #[serde(rename = "k8s.ns.name", default)]
    pub namespace: Option<String>,
    #[serde(rename = "k8s.pod.name", default)]
    pub pod: Option<String>,
    #[serde(rename = "container.id", default)]
    pub container_id: Option<String>,
    #[serde(rename = "container.image.repository", default)]
    pub image_repository: Option<String>,
    #[serde(rename = "proc.cmdline", default)]
    pub proc_cmdline: Option<String>,
    #[serde(rename = "proc.name", default)]
    pub proc_name: Option<String>,
    #[serde(rename = "proc.pname", default)]
    pub proc_parent_name: Option<String>,
    #[serde(rename = "proc.tty", default)]
    pub proc_tty: Option<i64>,
    #[serde(rename = "user.loginuid", default)]
    pub user_login_uid: Option<i64>,
    #[serde(rename = "user.name", default)]
    pub user_name: Option<String>,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.namespace.as_deref().unwrap_or("unknown"),
            self.pod.as_deref().unwrap_or("unknown")
        )
    }
}

/// Falco rule output as carried in the CloudEvent data.
#[derive(Debug, Deserialize)]
struct FalcoPayload {
    rule: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    output_fields: Option<Workload>,
}

/// A decoded Falco alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub id: String,
    pub source: String,
    pub ty: String,
    pub rule: String,
    pub priority: String,
    pub time: Option<DateTime<Utc>>,
    pub output: String,
    pub subject: Workload,
}

impl AlertEvent {
    /// Decode the Falco payload carried by an envelope.
    pub fn from_envelope(envelope: &CloudEvent) -> Result<Self, EventError> {
        let payload = FalcoPayload::deserialize(&envelope.data).map_err(EventError::Payload)?;

        Ok(Self {
            id: envelope.id.clone(),
            source: envelope.source.clone(),
            ty: envelope.ty.clone(),
            rule: payload.rule,
            priority: payload.priority,
            time: payload.time.or(envelope.time),
            output: payload.output,
            subject: payload.output_fields.unwrap_or_default(),
        })
    }
}

/// Whether an envelope comes from Falco at all; checked before decoding data.
pub fn envelope_in_scope(envelope: &CloudEvent) -> bool {
    envelope.source == FALCO_SOURCE && envelope.ty == FALCO_EVENT_TYPE
}

/// Whether an alert should trigger a scale-down.
pub fn accepts(event: &AlertEvent) -> bool {
    event.source == FALCO_SOURCE && event.ty == FALCO_EVENT_TYPE && event.rule == TERMINAL_SHELL_RULE
}
