//! Line-delimited JSON protocol for reading fan speeds.
//!
//! Each request line gets exactly one response line.

use serde::{Deserialize, Serialize};
use tach_core::{FanReading, PinId, ReadError, SpeedBoard};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    /// Requests without a version are treated as v1.
    pub fn is_supported(&self) -> bool {
        self.major == 1 || (self.major == 0 && self.minor == 0)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadMsg {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    pub fan: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMsg {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
}

#[derive(Debug)]
pub enum Request {
    Read(ReadMsg),
    List(ListMsg),
}

impl Request {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "read" => serde_json::from_value(value).ok().map(Request::Read),
            "list" => serde_json::from_value(value).ok().map(Request::List),
            _ => None,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            Request::Read(m) => m.protocol_version,
            Request::List(m) => m.protocol_version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SpeedMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub fan: String,
    pub transitions: u32,
    pub latches: u64,
}

impl From<FanReading> for SpeedMsg {
    fn from(reading: FanReading) -> Self {
        Self {
            msg_type: "speed",
            protocol_version: ProtocolVersion::v1(),
            fan: reading.fan,
            transitions: reading.transitions,
            latches: reading.latches,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FanEntry {
    pub fan: String,
    pub label: String,
    pub pin: PinId,
}

#[derive(Debug, Serialize)]
pub struct FansMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub fans: Vec<FanEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownFan,
    BadRequest,
    UnsupportedVersion,
}

#[derive(Debug, Serialize)]
pub struct ErrorMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan: Option<String>,
    pub message: String,
}

impl ErrorMsg {
    pub fn new(kind: ErrorKind, fan: Option<String>, message: impl Into<String>) -> Self {
        Self {
            msg_type: "error",
            protocol_version: ProtocolVersion::v1(),
            kind,
            fan,
            message: message.into(),
        }
    }
}

impl From<ReadError> for ErrorMsg {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::UnknownFan(ref fan) => {
                ErrorMsg::new(ErrorKind::UnknownFan, Some(fan.clone()), err.to_string())
            }
        }
    }
}

#[derive(Debug)]
pub enum Response {
    Speed(SpeedMsg),
    Fans(FansMsg),
    Error(ErrorMsg),
}

impl Response {
    pub fn to_line(&self) -> String {
        let encoded = match self {
            Response::Speed(m) => serde_json::to_string(m),
            Response::Fans(m) => serde_json::to_string(m),
            Response::Error(m) => serde_json::to_string(m),
        };
        encoded.unwrap_or_else(|_| {
            r#"{"type":"error","kind":"bad_request","message":"encoding failed"}"#.to_string()
        })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Error(m) => Some(m.kind),
            _ => None,
        }
    }
}

/// Answer one request line against the current board.
pub fn respond(board: &SpeedBoard, line: &str) -> Response {
    let Some(request) = Request::parse(line) else {
        return Response::Error(ErrorMsg::new(
            ErrorKind::BadRequest,
            None,
            "expected {\"type\":\"read\",\"fan\":..} or {\"type\":\"list\"}",
        ));
    };

    let version = request.protocol_version();
    if !version.is_supported() {
        return Response::Error(ErrorMsg::new(
            ErrorKind::UnsupportedVersion,
            None,
            format!("protocol {}.{} not supported", version.major, version.minor),
        ));
    }

    match request {
        Request::Read(msg) => match board.reading(&msg.fan) {
            Ok(reading) => Response::Speed(reading.into()),
            Err(err) => Response::Error(err.into()),
        },
        Request::List(_) => Response::Fans(FansMsg {
            msg_type: "fans",
            protocol_version: ProtocolVersion::v1(),
            fans: board
                .snapshot()
                .into_iter()
                .map(|r| FanEntry {
                    fan: r.fan,
                    label: r.label,
                    pin: r.pin,
                })
                .collect(),
        }),
    }
}
