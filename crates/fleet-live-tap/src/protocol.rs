//! Tap request/response wire format.
//!
//! Requests are published as JSON:
//! `{"uid", "from", "to", "distance_km", "reader_id", "ts"}` with `ts` in
//! Unix seconds. Responses are JSON objects whose fields are all optional;
//! a field of an unexpected JSON type is read leniently or treated as absent.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Demo route origin.
pub const DEFAULT_FROM: &str = "Central";
/// Demo route destination.
pub const DEFAULT_TO: &str = "Airport";
/// Demo route length in kilometres.
pub const DEFAULT_DISTANCE_KM: u32 = 18;
/// Reader the simulated taps originate from.
pub const DEFAULT_READER: &str = "BUS_12";

/// Placeholder for absent response text.
const MISSING: &str = "—";

/// A named test card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardPreset {
    pub label: &'static str,
    pub uid: &'static str,
}

/// Cards offered by the simulator, the first being the default.
pub const CARD_PRESETS: [CardPreset; 3] = [
    CardPreset {
        label: "Valid Card (GO)",
        uid: "04A1B2C3D4",
    },
    CardPreset {
        label: "Blocked Card (DENIED)",
        uid: "04DEADBEEF01",
    },
    CardPreset {
        label: "Low Balance (DENIED)",
        uid: "0433CCDD9911",
    },
];

/// Tap protocol error.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("Response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response is not a JSON object")]
    NotAnObject,
}

/// Tap request published on the request topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapRequest {
    pub uid: String,
    #[serde(rename = "from")]
    pub origin: String,
    #[serde(rename = "to")]
    pub destination: String,
    pub distance_km: u32,
    pub reader_id: String,
    /// Unix seconds.
    #[serde(rename = "ts")]
    pub issued_at: i64,
}

impl TapRequest {
    /// Request for `uid` on the demo route.
    #[must_use]
    pub fn demo(uid: impl Into<String>, issued_at: i64) -> Self {
        Self {
            uid: uid.into(),
            origin: DEFAULT_FROM.to_string(),
            destination: DEFAULT_TO.to_string(),
            distance_km: DEFAULT_DISTANCE_KM,
            reader_id: DEFAULT_READER.to_string(),
            issued_at,
        }
    }
}

/// Validator verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Go,
    Denied,
}

impl Decision {
    /// Classify a wire decision: only `"GO"` admits.
    #[must_use]
    pub fn from_wire(decision: Option<&str>) -> Self {
        match decision {
            Some("GO") => Self::Go,
            _ => Self::Denied,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Go => "GO",
            Self::Denied => "DENIED",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validator response received on the response topic.
///
/// The validator is not under our control, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TapResponse {
    pub uid: Option<String>,
    pub decision: Option<String>,
    pub trip_state: Option<String>,
    pub fare: Option<f64>,
    pub prev_balance: Option<f64>,
    pub remaining_balance: Option<f64>,
    pub reason: Option<String>,
    pub request_id: Option<String>,
    pub device_ip: Option<String>,
    pub validator_version: Option<String>,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
    #[serde(rename = "from")]
    pub origin: Option<String>,
    #[serde(rename = "to")]
    pub destination: Option<String>,
    pub distance_km: Option<f64>,
    /// Unix seconds.
    pub ts: Option<i64>,
}

impl TapResponse {
    /// Parse a response payload.
    ///
    /// Text fields accept numbers and booleans in their JSON spelling,
    /// numeric fields accept numeric strings, and anything else is absent.
    ///
    /// # Errors
    /// Returns error if the payload is not a JSON object.
    pub fn parse(payload: &[u8]) -> Result<Self, TapError> {
        let Value::Object(fields) = serde_json::from_slice::<Value>(payload)? else {
            return Err(TapError::NotAnObject);
        };
        let text = |key: &str| field(&fields, key).and_then(lenient_text);
        let number = |key: &str| field(&fields, key).and_then(lenient_number);

        Ok(Self {
            uid: text("uid"),
            decision: text("decision"),
            trip_state: text("trip_state"),
            fare: number("fare"),
            prev_balance: number("prev_balance"),
            remaining_balance: number("remaining_balance"),
            reason: text("reason"),
            request_id: text("request_id"),
            device_ip: text("device_ip"),
            validator_version: text("validator_version"),
            latency_ms: number("latency_ms"),
            message: text("message"),
            origin: text("from"),
            destination: text("to"),
            distance_km: number("distance_km"),
            ts: field(&fields, "ts").and_then(lenient_seconds),
        })
    }

    /// Classified verdict.
    #[must_use]
    pub fn decision(&self) -> Decision {
        Decision::from_wire(self.decision.as_deref())
    }

    /// History projection of this response.
    #[must_use]
    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            ts: self.ts,
            uid: self.uid.clone(),
            decision: self.decision(),
            trip_state: self.trip_state.clone(),
            fare: self.fare,
            remaining_balance: self.remaining_balance,
            reason: self.reason.clone(),
            request_id: self.request_id.clone(),
        }
    }
}

fn field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn lenient_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok().filter(|f: &f64| f.is_finite()),
        _ => None,
    }
}

/// Whole seconds; fractions are dropped and out-of-range values saturate.
#[allow(clippy::cast_possible_truncation)]
fn lenient_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One line of tap history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub ts: Option<i64>,
    pub uid: Option<String>,
    pub decision: Decision,
    pub trip_state: Option<String>,
    pub fare: Option<f64>,
    pub remaining_balance: Option<f64>,
    pub reason: Option<String>,
    pub request_id: Option<String>,
}

/// Fare panel contents with every gap filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct FareDetails {
    pub uid: String,
    /// Raw wire decision, empty if absent.
    pub decision: String,
    pub origin: String,
    pub destination: String,
    pub distance_km: f64,
    pub fare: f64,
    pub prev_balance: f64,
    pub remaining_balance: f64,
    pub trip_state: String,
    pub reason: String,
    pub request_id: String,
    pub device_ip: String,
    pub validator_version: String,
    /// `"<n> ms"`, or the placeholder.
    pub latency: String,
    pub message: String,
}

impl FareDetails {
    /// Project `response` (or nothing yet) for display; `selected_uid`
    /// stands in for a missing response uid.
    #[must_use]
    pub fn project(response: Option<&TapResponse>, selected_uid: &str) -> Self {
        let empty = TapResponse::default();
        let r = response.unwrap_or(&empty);
        let text = |v: &Option<String>| v.clone().unwrap_or_else(|| MISSING.to_string());

        Self {
            uid: r.uid.clone().unwrap_or_else(|| selected_uid.to_string()),
            decision: r.decision.clone().unwrap_or_default(),
            origin: r.origin.clone().unwrap_or_else(|| DEFAULT_FROM.to_string()),
            destination: r.destination.clone().unwrap_or_else(|| DEFAULT_TO.to_string()),
            distance_km: r.distance_km.unwrap_or(f64::from(DEFAULT_DISTANCE_KM)),
            fare: r.fare.unwrap_or_default(),
            prev_balance: r.prev_balance.unwrap_or_default(),
            remaining_balance: r.remaining_balance.unwrap_or_default(),
            trip_state: text(&r.trip_state),
            reason: text(&r.reason),
            request_id: text(&r.request_id),
            device_ip: text(&r.device_ip),
            validator_version: text(&r.validator_version),
            latency: r
                .latency_ms
                .map_or_else(|| MISSING.to_string(), |ms| format!("{ms} ms")),
            message: r.message.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = TapRequest::demo("04A1B2C3D4", 1_700_000_000);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "uid": "04A1B2C3D4",
                "from": "Central",
                "to": "Airport",
                "distance_km": 18,
                "reader_id": "BUS_12",
                "ts": 1_700_000_000
            })
        );
    }

    #[test]
    fn test_parse_full_response() {
        let payload = br#"{"uid":"04A1B2C3D4","decision":"GO","fare":45,"remaining_balance":75,
            "request_id":"r1","ts":1700000000,"trip_state":"ON_TRIP","device_ip":"10.0.0.7",
            "latency_ms":12,"unknown":"ignored"}"#;
        let response = TapResponse::parse(payload).unwrap();

        assert_eq!(response.decision(), Decision::Go);
        assert_eq!(response.fare, Some(45.0));
        assert_eq!(response.ts, Some(1_700_000_000));
        assert_eq!(response.device_ip.as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn test_anything_but_go_is_denied() {
        for payload in [
            &br#"{"decision":"DENIED"}"#[..],
            br#"{"decision":"go"}"#,
            br#"{"decision":null}"#,
            b"{}",
        ] {
            let response = TapResponse::parse(payload).unwrap();
            assert_eq!(response.decision(), Decision::Denied);
        }
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(TapResponse::parse(b"not json"), Err(TapError::Json(_))));
        assert!(matches!(TapResponse::parse(b"[]"), Err(TapError::NotAnObject)));
        assert!(matches!(TapResponse::parse(b"null"), Err(TapError::NotAnObject)));
        assert!(matches!(TapResponse::parse(b"42"), Err(TapError::NotAnObject)));
    }

    #[test]
    fn test_mistyped_fields_read_leniently() {
        let payload = br#"{"decision":"GO","request_id":42,"ts":1700000000.75,"fare":"45.00",
            "remaining_balance":"lots","trip_state":{"nested":true},"uid":null,"latency_ms":[12]}"#;
        let response = TapResponse::parse(payload).unwrap();

        assert_eq!(response.decision(), Decision::Go);
        assert_eq!(response.request_id.as_deref(), Some("42"));
        assert_eq!(response.ts, Some(1_700_000_000));
        assert_eq!(response.fare, Some(45.0));
        assert_eq!(response.remaining_balance, None);
        assert_eq!(response.trip_state, None);
        assert_eq!(response.uid, None);
        assert_eq!(response.latency_ms, None);
    }

    #[test]
    fn test_non_string_decision_is_denied() {
        let response = TapResponse::parse(br#"{"decision":true,"ts":"1700000000"}"#).unwrap();
        assert_eq!(response.decision(), Decision::Denied);
        assert_eq!(response.ts, Some(1_700_000_000));
    }

    #[test]
    fn test_history_entry_projection() {
        let response = TapResponse {
            uid: Some("04DEADBEEF01".to_string()),
            decision: Some("DENIED".to_string()),
            reason: Some("BLOCKED".to_string()),
            message: Some("not kept".to_string()),
            ts: Some(1_700_000_001),
            ..TapResponse::default()
        };
        let entry = response.to_history_entry();

        assert_eq!(entry.decision, Decision::Denied);
        assert_eq!(entry.reason.as_deref(), Some("BLOCKED"));
        assert_eq!(entry.ts, Some(1_700_000_001));
        assert_eq!(entry.fare, None);
    }

    #[test]
    fn test_fare_details_defaults() {
        let details = FareDetails::project(None, "0433CCDD9911");

        assert_eq!(details.uid, "0433CCDD9911");
        assert_eq!(details.origin, "Central");
        assert_eq!(details.destination, "Airport");
        assert!((details.distance_km - 18.0).abs() < f64::EPSILON);
        assert!(details.fare.abs() < f64::EPSILON);
        assert_eq!(details.trip_state, "—");
        assert_eq!(details.latency, "—");
        assert_eq!(details.decision, "");
        assert_eq!(details.message, "");
    }

    #[test]
    fn test_fare_details_from_response() {
        let response = TapResponse {
            uid: Some("04A1B2C3D4".to_string()),
            fare: Some(45.0),
            latency_ms: Some(12.0),
            origin: Some("Harbour".to_string()),
            ..TapResponse::default()
        };
        let details = FareDetails::project(Some(&response), "ignored");

        assert_eq!(details.uid, "04A1B2C3D4");
        assert_eq!(details.origin, "Harbour");
        assert_eq!(details.latency, "12 ms");
        assert!((details.fare - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_preset_is_valid_card() {
        assert_eq!(CARD_PRESETS[0].uid, "04A1B2C3D4");
        assert!(CARD_PRESETS.iter().all(|c| !c.label.is_empty()));
    }
}
