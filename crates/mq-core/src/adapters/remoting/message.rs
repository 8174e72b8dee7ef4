//! Message properties and the broker's binary store format.

use super::errors::RemotingError;
use bytes::{Buf, Bytes};
use flate2::read::ZlibDecoder;
use shared_types::Message;
use std::collections::HashMap;
use std::io::Read;

const NAME_VALUE_SEPARATOR: char = '\u{1}';
const PROPERTY_SEPARATOR: char = '\u{2}';

pub const PROPERTY_KEYS: &str = "KEYS";
pub const PROPERTY_TAGS: &str = "TAGS";
pub const PROPERTY_WAIT: &str = "WAIT";
pub const PROPERTY_UNIQ_KEY: &str = "UNIQ_CLIENT_MESSAGE_ID_KEYIDX";

/// Properties the broker or client sets for itself; not surfaced as headers.
const SYSTEM_PROPERTIES: &[&str] = &[
    PROPERTY_KEYS,
    PROPERTY_TAGS,
    PROPERTY_WAIT,
    PROPERTY_UNIQ_KEY,
    "MIN_OFFSET",
    "MAX_OFFSET",
    "CLUSTER",
    "TRACE_ON",
    "MSG_REGION",
    "CONSUME_START_TIME",
    "REAL_TOPIC",
    "REAL_QID",
];

const MAGIC_V1: i32 = -626_843_481;
const MAGIC_V2: i32 = -626_843_477;

const FLAG_COMPRESSED: i32 = 1;
const FLAG_BORNHOST_V6: i32 = 1 << 4;
const FLAG_STOREHOST_V6: i32 = 1 << 5;

pub fn encode_properties(properties: &[(String, String)]) -> String {
    let mut out = String::new();
    for (name, value) in properties {
        out.push_str(name);
        out.push(NAME_VALUE_SEPARATOR);
        out.push_str(value);
        out.push(PROPERTY_SEPARATOR);
    }
    out
}

pub fn decode_properties(raw: &str) -> HashMap<String, String> {
    raw.split(PROPERTY_SEPARATOR)
        .filter_map(|pair| pair.split_once(NAME_VALUE_SEPARATOR))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A message as stored by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub topic: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub born_timestamp: i64,
    pub store_timestamp: i64,
    pub body: Bytes,
    pub properties: HashMap<String, String>,
}

impl StoredMessage {
    pub fn keys(&self) -> &str {
        self.properties.get(PROPERTY_KEYS).map(String::as_str).unwrap_or("")
    }

    pub fn into_message(self) -> Message {
        let key = self.keys().to_string();
        let id = self.properties.get(PROPERTY_UNIQ_KEY).cloned();
        let headers: HashMap<String, String> = self
            .properties
            .into_iter()
            .filter(|(k, _)| !SYSTEM_PROPERTIES.contains(&k.as_str()))
            .collect();

        let mut builder = Message::builder(self.topic)
            .key(key)
            .value(String::from_utf8_lossy(&self.body).into_owned())
            .headers(headers)
            .partition(self.queue_id)
            .offset(self.queue_offset)
            .timestamp_millis(self.born_timestamp);
        if let Some(id) = id {
            builder = builder.id(id);
        }
        builder.build()
    }
}

type DecodeResult<T> = Result<T, RemotingError>;

fn take(buf: &mut Bytes, len: usize, what: &'static str) -> DecodeResult<Bytes> {
    need(buf, len, what)?;
    Ok(buf.split_to(len))
}

fn need(buf: &Bytes, len: usize, what: &'static str) -> DecodeResult<()> {
    if buf.remaining() < len {
        return Err(RemotingError::Truncated(what));
    }
    Ok(())
}

fn inflate(body: &[u8]) -> DecodeResult<Bytes> {
    let mut out = Vec::with_capacity(body.len() * 2);
    ZlibDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(RemotingError::Inflate)?;
    Ok(Bytes::from(out))
}

fn decode_one(buf: &mut Bytes) -> DecodeResult<StoredMessage> {
    need(buf, 8, "header")?;
    let total = buf.get_i32();
    let magic = buf.get_i32();
    let v2 = match magic {
        MAGIC_V1 => false,
        MAGIC_V2 => true,
        other => return Err(RemotingError::UnknownMagic(other)),
    };
    let mut rest = take(buf, usize::try_from(total).unwrap_or(0).saturating_sub(8), "record")?;

    need(&rest, 4 + 4 + 4 + 8 + 8 + 4 + 8, "fixed fields")?;
    let _body_crc = rest.get_i32();
    let queue_id = rest.get_i32();
    let _flag = rest.get_i32();
    let queue_offset = rest.get_i64();
    let _physical_offset = rest.get_i64();
    let sys_flag = rest.get_i32();
    let born_timestamp = rest.get_i64();

    let born_host_len = if sys_flag & FLAG_BORNHOST_V6 != 0 { 16 + 4 } else { 4 + 4 };
    take(&mut rest, born_host_len, "born host")?;
    need(&rest, 8, "store timestamp")?;
    let store_timestamp = rest.get_i64();
    let store_host_len = if sys_flag & FLAG_STOREHOST_V6 != 0 { 16 + 4 } else { 4 + 4 };
    take(&mut rest, store_host_len, "store host")?;

    need(&rest, 4 + 8 + 4, "reconsume fields")?;
    let _reconsume_times = rest.get_i32();
    let _prepared_offset = rest.get_i64();
    let body_len = usize::try_from(rest.get_i32()).unwrap_or(0);
    let mut body = take(&mut rest, body_len, "body")?;
    if sys_flag & FLAG_COMPRESSED != 0 {
        body = inflate(&body)?;
    }

    let topic_len = if v2 {
        need(&rest, 2, "topic length")?;
        usize::try_from(rest.get_i16()).unwrap_or(0)
    } else {
        need(&rest, 1, "topic length")?;
        usize::from(rest.get_u8())
    };
    let topic = String::from_utf8_lossy(&take(&mut rest, topic_len, "topic")?).into_owned();

    need(&rest, 2, "properties length")?;
    let props_len = usize::try_from(rest.get_i16()).unwrap_or(0);
    let properties = decode_properties(&String::from_utf8_lossy(&take(&mut rest, props_len, "properties")?));

    Ok(StoredMessage {
        topic,
        queue_id,
        queue_offset,
        born_timestamp,
        store_timestamp,
        body,
        properties,
    })
}

/// Decode every message in a pull response body.
pub(crate) fn decode_messages(mut buf: Bytes) -> DecodeResult<Vec<StoredMessage>> {
    let mut messages = Vec::new();
    while buf.has_remaining() {
        messages.push(decode_one(&mut buf)?);
    }
    Ok(messages)
}
