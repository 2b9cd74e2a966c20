// Envelope Decoder - top-level message structure of the aggregator feed
// {"version": .., "format": .., "messageType": "INITIAL_DUMP" | "UPDATE", "records": [..]}
// Decoding is fail-open: unknown message types become an empty update batch

use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::layer2::classifier::{decode_record, decode_update, ContentRecord, ContentUpdate};

// ============================================================================
// Message type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    InitialDump,
    Update,
    /// Absent, non-string or unrecognized `messageType`
    UnknownDefaultsToEmptyUpdate,
}

impl MessageType {
    pub fn from_wire(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("INITIAL_DUMP") => MessageType::InitialDump,
            Some("UPDATE") => MessageType::Update,
            _ => MessageType::UnknownDefaultsToEmptyUpdate,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::InitialDump => write!(f, "INITIAL_DUMP"),
            MessageType::Update => write!(f, "UPDATE"),
            MessageType::UnknownDefaultsToEmptyUpdate => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Errors and report
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Envelope is not a JSON object")]
    NotAnObject,
}

/// Per-envelope record accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub records_seen: usize,
    pub records_kept: usize,
    pub records_dropped: usize,
}

impl fmt::Display for DecodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecodeReport(seen={}, kept={}, dropped={})",
               self.records_seen, self.records_kept, self.records_dropped)
    }
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum EnvelopeContent {
    Initial(Vec<ContentRecord>),
    Updates(Vec<ContentUpdate>),
}

/// A decoded server message, either a full snapshot or a delta batch
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    message_type: MessageType,
    version: Option<String>,
    format: Option<String>,
    content: EnvelopeContent,
    report: DecodeReport,
}

fn header_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl Envelope {
    /// Decode raw message text. Fails only when the text is not a JSON object.
    pub fn from_json(raw_json: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw_json)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        Ok(Self::from_value(&value))
    }

    /// Decode an already-parsed message. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let message_type = MessageType::from_wire(value.get("messageType"));
        let records: &[Value] = value
            .get("records")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut report = DecodeReport {
            records_seen: records.len(),
            ..Default::default()
        };

        let content = match message_type {
            MessageType::InitialDump => {
                let kept: Vec<ContentRecord> = records.iter().filter_map(decode_record).collect();
                report.records_kept = kept.len();
                EnvelopeContent::Initial(kept)
            }
            MessageType::Update => {
                let kept: Vec<ContentUpdate> = records.iter().filter_map(decode_update).collect();
                report.records_kept = kept.len();
                EnvelopeContent::Updates(kept)
            }
            MessageType::UnknownDefaultsToEmptyUpdate => {
                warn!(
                    message_type = ?value.get("messageType"),
                    records = records.len(),
                    "Unknown message type, treating as empty update"
                );
                EnvelopeContent::Updates(Vec::new())
            }
        };
        report.records_dropped = report.records_seen - report.records_kept;

        if report.records_dropped > 0 {
            debug!(message_type = %message_type, %report, "Records dropped while decoding");
        }

        Self {
            message_type,
            version: header_string(value.get("version")),
            format: header_string(value.get("format")),
            content,
            report,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn report(&self) -> DecodeReport {
        self.report
    }

    /// Records of an INITIAL_DUMP, `None` for any other envelope
    pub fn initial_content(&self) -> Option<&[ContentRecord]> {
        match &self.content {
            EnvelopeContent::Initial(records) => Some(records),
            EnvelopeContent::Updates(_) => None,
        }
    }

    /// Changes of an UPDATE (or unknown) envelope, `None` for initial dumps
    pub fn content_updates(&self) -> Option<&[ContentUpdate]> {
        match &self.content {
            EnvelopeContent::Initial(_) => None,
            EnvelopeContent::Updates(updates) => Some(updates),
        }
    }

    pub fn is_initial_dump(&self) -> bool {
        matches!(self.content, EnvelopeContent::Initial(_))
    }

    pub fn len(&self) -> usize {
        match &self.content {
            EnvelopeContent::Initial(records) => records.len(),
            EnvelopeContent::Updates(updates) => updates.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope(type={}, records={}, dropped={})",
               self.message_type, self.len(), self.report.records_dropped)
    }
}
