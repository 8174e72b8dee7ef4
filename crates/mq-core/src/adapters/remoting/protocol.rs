//! Remoting command model and JSON header handling.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{MqError, MqResult};
use std::collections::BTreeMap;

/// Request codes understood by name servers and brokers.
pub mod request_code {
    pub const SEND_MESSAGE: i32 = 10;
    pub const PULL_MESSAGE: i32 = 11;
    pub const QUERY_CONSUMER_OFFSET: i32 = 14;
    pub const UPDATE_CONSUMER_OFFSET: i32 = 15;
    pub const UPDATE_AND_CREATE_TOPIC: i32 = 17;
    pub const GET_MIN_OFFSET: i32 = 29;
    pub const GET_MAX_OFFSET: i32 = 30;
    pub const GET_ROUTEINFO_BY_TOPIC: i32 = 105;
    pub const GET_BROKER_CLUSTER_INFO: i32 = 106;
    pub const GET_ALL_TOPIC_LIST_FROM_NAMESERVER: i32 = 206;
    pub const DELETE_TOPIC_IN_BROKER: i32 = 215;
    pub const DELETE_TOPIC_IN_NAMESRV: i32 = 216;
}

pub mod response_code {
    pub const SUCCESS: i32 = 0;
    pub const SYSTEM_ERROR: i32 = 1;
    pub const SYSTEM_BUSY: i32 = 2;
    pub const REQUEST_CODE_NOT_SUPPORTED: i32 = 3;
    pub const FLUSH_DISK_TIMEOUT: i32 = 10;
    pub const SLAVE_NOT_AVAILABLE: i32 = 11;
    pub const FLUSH_SLAVE_TIMEOUT: i32 = 12;
    pub const NO_PERMISSION: i32 = 16;
    pub const TOPIC_NOT_EXIST: i32 = 17;
    pub const PULL_NOT_FOUND: i32 = 19;
    pub const PULL_RETRY_IMMEDIATELY: i32 = 20;
    pub const PULL_OFFSET_MOVED: i32 = 21;
    pub const QUERY_NOT_FOUND: i32 = 22;
}

/// Bit 0 of `flag` marks a response.
const RESPONSE_FLAG: i32 = 1;
const ONEWAY_FLAG: i32 = 1 << 1;

const LANGUAGE: &str = "OTHER";
const CLIENT_VERSION: i32 = 317;

/// JSON header as written on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHeader {
    pub code: i32,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub opaque: i32,
    #[serde(default)]
    pub flag: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default)]
    pub ext_fields: BTreeMap<String, String>,
    #[serde(default = "default_serialize_type", rename = "serializeTypeCurrentRPC")]
    pub serialize_type: String,
}

fn default_serialize_type() -> String {
    "JSON".to_string()
}

/// One request or response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotingCommand {
    pub header: CommandHeader,
    pub body: Option<Bytes>,
}

impl RemotingCommand {
    pub fn request(code: i32) -> Self {
        Self {
            header: CommandHeader {
                code,
                language: LANGUAGE.to_string(),
                version: CLIENT_VERSION,
                serialize_type: default_serialize_type(),
                ..CommandHeader::default()
            },
            body: None,
        }
    }

    pub fn response(code: i32, opaque: i32) -> Self {
        let mut cmd = Self::request(code);
        cmd.header.opaque = opaque;
        cmd.header.flag = RESPONSE_FLAG;
        cmd
    }

    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.header.ext_fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.header.remark = Some(remark.into());
        self
    }

    pub fn code(&self) -> i32 {
        self.header.code
    }

    pub fn opaque(&self) -> i32 {
        self.header.opaque
    }

    pub fn is_response(&self) -> bool {
        self.header.flag & RESPONSE_FLAG != 0
    }

    pub fn is_oneway(&self) -> bool {
        self.header.flag & ONEWAY_FLAG != 0
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.header.ext_fields.get(key).map(String::as_str)
    }

    /// Parse an integer ext field.
    pub fn field_i64(&self, key: &str) -> MqResult<i64> {
        let raw = self
            .field(key)
            .ok_or_else(|| MqError::network("response is missing a field").with_details(key.to_string()))?;
        raw.parse().map_err(|_| {
            MqError::network("response field is not a number").with_details(format!("{}={}", key, raw))
        })
    }

    pub fn remark(&self) -> &str {
        self.header.remark.as_deref().unwrap_or("")
    }

    /// Decode the JSON body.
    pub fn decode_body<T: DeserializeOwned>(&self) -> MqResult<T> {
        let body = self
            .body
            .as_ref()
            .ok_or_else(|| MqError::network("response has no body"))?;
        let text = String::from_utf8_lossy(body);
        serde_json::from_str(&normalize_json(&text))
            .map_err(|e| MqError::network("malformed response body").with_details(e.to_string()))
    }

    /// Fail unless the response code is SUCCESS.
    pub fn into_success(self) -> MqResult<Self> {
        if self.code() == response_code::SUCCESS {
            Ok(self)
        } else {
            Err(response_error(&self))
        }
    }
}

/// Map a non-success response onto the shared error model.
pub fn response_error(cmd: &RemotingCommand) -> MqError {
    use response_code::*;
    let message = format!("broker returned code {}", cmd.code());
    let base = match cmd.code() {
        NO_PERMISSION => MqError::auth(message),
        TOPIC_NOT_EXIST | QUERY_NOT_FOUND => MqError::not_found(message),
        SYSTEM_BUSY | FLUSH_DISK_TIMEOUT | FLUSH_SLAVE_TIMEOUT => MqError::timeout(message),
        SLAVE_NOT_AVAILABLE => MqError::connection(message),
        REQUEST_CODE_NOT_SUPPORTED => MqError::validation(message),
        _ => MqError::internal(message),
    };
    base.with_details(cmd.remark().to_string())
}

/// Quote the bare integer object keys fastjson emits (`{0:"a"}`), which
/// strict JSON parsers reject. String contents are left untouched.
pub fn normalize_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    // True right after `{` or `,` outside a string: a key may follow.
    let mut expect_key = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                expect_key = false;
                out.push(c);
            }
            '{' | ',' => {
                expect_key = true;
                out.push(c);
            }
            c if expect_key && (c.is_ascii_digit() || c == '-') => {
                let mut key = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        key.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // Only a key if a colon follows.
                let mut ws = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() {
                        ws.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&':') {
                    out.push('"');
                    out.push_str(&key);
                    out.push('"');
                } else {
                    out.push_str(&key);
                }
                out.push_str(&ws);
                expect_key = false;
            }
            c if c.is_whitespace() => out.push(c),
            _ => {
                expect_key = false;
                out.push(c);
            }
        }
    }
    out
}
