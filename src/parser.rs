//! Decoding of venue depth payloads
//!
//! Handles the WebSocket depth frames and the REST snapshot format. The
//! stream wraps payloads either as `{"c": channel, "d": data}` or as
//! `{"channel": ..., "data": ...}`; bare depth objects are accepted as a
//! fallback. Price levels arrive as `[price, qty]` pairs whose entries may be
//! strings or numbers; malformed rows are dropped.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

use crate::error::Result;

/// A single price level
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Decoded WebSocket depth frame
///
/// `bids`/`asks` are `None` when the key was absent from the payload, as
/// opposed to present-but-empty. Version strings are kept opaque; the
/// continuity gate parses them.
#[derive(Debug, Clone, Default)]
pub struct DepthFrame {
    pub bids: Option<Vec<PriceLevel>>,
    pub asks: Option<Vec<PriceLevel>>,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub update_id: Option<i64>,
}

impl DepthFrame {
    /// Build a frame from a depth payload object.
    pub fn from_value(payload: &Value) -> Self {
        let bids = payload.get("bids").map(parse_levels);
        let asks = payload.get("asks").map(parse_levels);

        let from_version = payload.get("fromVersion").and_then(string_of);
        let to_version = payload.get("toVersion").and_then(string_of);

        let update_id = payload
            .get("version")
            .and_then(int_of)
            .or_else(|| payload.get("lastUpdateId").and_then(int_of));

        Self {
            bids,
            asks,
            from_version,
            to_version,
            update_id,
        }
    }

    /// True when the frame carries at least one level on either side.
    pub fn has_levels(&self) -> bool {
        self.bids.as_ref().is_some_and(|b| !b.is_empty())
            || self.asks.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn has_both_sides(&self) -> bool {
        self.bids.as_ref().is_some_and(|b| !b.is_empty())
            && self.asks.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Subscription / ping acknowledgement
    Ack { code: i64, msg: String },
    /// Depth frame for the subscribed symbol
    Depth(DepthFrame),
    /// Anything else (ignored upstream)
    Unknown,
}

/// Decode a raw WebSocket text message.
pub fn parse_ws_message(raw: &str) -> Result<WsMessage> {
    let value: Value = serde_json::from_str(raw)?;

    // Acks look like {"id":0,"code":0,"msg":"spot@public....""}
    if value.get("code").is_some() && value.get("c").is_none() && value.get("data").is_none() {
        let code = value.get("code").and_then(int_of).unwrap_or(-1);
        let msg = value
            .get("msg")
            .and_then(string_of)
            .unwrap_or_default();
        return Ok(WsMessage::Ack { code, msg });
    }

    let (payload, envelope_ts) = if let (Some(data), Some(_)) = (value.get("d"), value.get("c")) {
        (data, None)
    } else if let (Some(data), Some(_)) = (value.get("data"), value.get("channel")) {
        (data, value.get("ts").and_then(int_of))
    } else {
        (&value, None)
    };

    let mut frame = DepthFrame::from_value(payload);
    if frame.update_id.is_none() {
        frame.update_id = envelope_ts.or_else(|| {
            value
                .get("version")
                .and_then(int_of)
                .or_else(|| value.get("lastUpdateId").and_then(int_of))
        });
    }

    if frame.bids.is_none() && frame.asks.is_none() {
        return Ok(WsMessage::Unknown);
    }

    Ok(WsMessage::Depth(frame))
}

/// Order book snapshot from the REST depth endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RestDepth {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,

    #[serde(deserialize_with = "deserialize_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(deserialize_with = "deserialize_levels")]
    pub asks: Vec<PriceLevel>,
}

/// Parse an array of `[price, qty]` rows, skipping malformed entries.
pub fn parse_levels(value: &Value) -> Vec<PriceLevel> {
    let Some(rows) = value.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let pair = row.as_array()?;
            if pair.len() < 2 {
                return None;
            }
            let price = decimal_of(&pair[0])?;
            let quantity = decimal_of(&pair[1])?;
            if price <= Decimal::ZERO || quantity < Decimal::ZERO {
                return None;
            }
            Some(PriceLevel { price, quantity })
        })
        .collect()
}

/// Decimal from a JSON string or number.
pub fn decimal_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64_retain)
            }
        }
        _ => None,
    }
}

/// Integer from a JSON string or number.
pub fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_levels<'de, D>(deserializer: D) -> std::result::Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(parse_levels(&raw))
}
