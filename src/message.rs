//! Decoded commands and outbound responses.
//!
//! Inbound content documents look like `{"subCommand": <int>, "data": <doc>}`.
//! Outbound documents look like
//! `{"cmdType": 1|2, "subCommand": <int>, "data": <doc>, "result": "true"|"false"}`.

use serde::ser::Serializer;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StationError};

/// Protocol-level command type (the `subCommand` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// 0x01: open a session.
    Handshake,
    /// 0x02: start a new test generation.
    BeginTest,
    /// 0x03: end the current test generation.
    EndTest,
    /// 0x05: run one test item, routed by `data.type`.
    SingleTest,
    /// 0x0A: set the station clock.
    SetSystemTime,
    /// 0x0D: run an exec order, routed by `data.order`.
    ExecOrder,
    /// 0x0F: run a combined test item, routed by `data.type`.
    CombinedTest,
    /// Any code this station does not know.
    Other(i64),
}

impl CommandType {
    /// Map a wire code to a command type.
    pub fn from_code(code: i64) -> Self {
        match code {
            0x01 => Self::Handshake,
            0x02 => Self::BeginTest,
            0x03 => Self::EndTest,
            0x05 => Self::SingleTest,
            0x0A => Self::SetSystemTime,
            0x0D => Self::ExecOrder,
            0x0F => Self::CombinedTest,
            other => Self::Other(other),
        }
    }

    /// Wire code for this command type.
    pub fn code(&self) -> i64 {
        match self {
            Self::Handshake => 0x01,
            Self::BeginTest => 0x02,
            Self::EndTest => 0x03,
            Self::SingleTest => 0x05,
            Self::SetSystemTime => 0x0A,
            Self::ExecOrder => 0x0D,
            Self::CombinedTest => 0x0F,
            Self::Other(code) => *code,
        }
    }

    /// Session-control commands supersede every in-flight test.
    #[inline]
    pub fn is_session_control(&self) -> bool {
        matches!(self, Self::Handshake | Self::BeginTest | Self::EndTest)
    }

    /// Commands that invoke a test executor.
    #[inline]
    pub fn is_test_invocation(&self) -> bool {
        matches!(self, Self::SingleTest | Self::ExecOrder | Self::CombinedTest)
    }

    /// Sub-command used for the asynchronous result report.
    pub fn report_code(&self) -> Option<i64> {
        match self {
            Self::SingleTest => Some(0x07),
            Self::ExecOrder => Some(0x0E),
            Self::CombinedTest => Some(0x10),
            _ => None,
        }
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Protocol command type; `None` when the document has no `subCommand`.
    pub command_type: Option<CommandType>,
    /// Inbound sequence number from the frame header.
    pub sequence: u16,
    /// The `data` member, or the whole document when `subCommand` is absent.
    pub payload: Value,
}

impl Command {
    /// Create a command directly.
    pub fn new(command_type: CommandType, sequence: u16, payload: Value) -> Self {
        Self {
            command_type: Some(command_type),
            sequence,
            payload,
        }
    }

    /// Build a command from a decoded content document.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if `subCommand` is present but not an integer.
    pub fn from_document(sequence: u16, document: Value) -> Result<Self> {
        let mut map = match document {
            Value::Object(map) => map,
            other => {
                return Ok(Self {
                    command_type: None,
                    sequence,
                    payload: other,
                })
            }
        };

        let Some(sub_command) = map.get("subCommand") else {
            return Ok(Self {
                command_type: None,
                sequence,
                payload: Value::Object(map),
            });
        };

        let code = sub_command.as_i64().ok_or_else(|| {
            StationError::Protocol(format!("subCommand must be an integer, got {}", sub_command))
        })?;

        Ok(Self {
            command_type: Some(CommandType::from_code(code)),
            sequence,
            payload: map.remove("data").unwrap_or(Value::Null),
        })
    }

    /// The `data.type` tag used to pick a test executor.
    pub fn test_tag(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// The `data.order` number used to pick an exec-order executor.
    pub fn exec_order(&self) -> Option<i64> {
        self.payload.get("order").and_then(Value::as_i64)
    }
}

/// Outbound frame kind (the `cmdType` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Asynchronous test report.
    Report = 1,
    /// Synchronous acknowledgement of an inbound command.
    Ack = 2,
}

impl Serialize for ResponseKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

fn serialize_result<S: Serializer>(
    passed: &bool,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *passed { "true" } else { "false" })
}

/// One outbound document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Report or acknowledgement.
    #[serde(rename = "cmdType")]
    pub kind: ResponseKind,
    /// Sub-command code this response answers.
    #[serde(rename = "subCommand")]
    pub sub_command: i64,
    /// Result document.
    pub data: Value,
    /// Overall verdict, written as `"true"` / `"false"`.
    #[serde(rename = "result", serialize_with = "serialize_result")]
    pub passed: bool,
    /// Optional human-readable note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl Response {
    /// Acknowledge a command.
    pub fn ack(command_type: CommandType, data: Value) -> Self {
        Self {
            kind: ResponseKind::Ack,
            sub_command: command_type.code(),
            data,
            passed: true,
            desc: Some("okay".to_string()),
        }
    }

    /// Report a test result under an explicit sub-command.
    pub fn report(sub_command: i64, data: Value, passed: bool) -> Self {
        Self {
            kind: ResponseKind::Report,
            sub_command,
            data,
            passed,
            desc: None,
        }
    }

    /// Attach a description.
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
