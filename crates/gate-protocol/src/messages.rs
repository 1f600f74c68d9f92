use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::GateAction;

// ============================================================================
// Commands
// ============================================================================

/// Command request published on `gate/control`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub action: GateAction,
}

impl CommandRequest {
    pub fn new(action: GateAction) -> Self {
        Self { action }
    }
}

/// Outcome reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "success")]
    Success,
    /// Older device builds report `"failed"`.
    #[serde(rename = "failure", alias = "failed")]
    Failure,
}

/// Command response published on the requester's response topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echo of the executed action. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl CommandResponse {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            error: None,
            action: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failure,
            error: Some(error.into()),
            action: None,
        }
    }

    pub fn with_action(mut self, action: GateAction) -> Self {
        self.action = Some(action.as_str().to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

// ============================================================================
// Liveness
// ============================================================================

/// Timestamp carried by a heartbeat: epoch millis or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeartbeatStamp {
    EpochMillis(i64),
    Text(String),
}

impl HeartbeatStamp {
    /// Parses the stamp for display. The device clock is not trusted for ordering.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| s.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())),
        }
    }
}

/// Heartbeat published by the device on `gate/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub hb: HeartbeatStamp,
}

impl Heartbeat {
    /// Heartbeat stamped with `now` in RFC 3339, as the device emits it.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            hb: HeartbeatStamp::Text(now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        }
    }
}

// ============================================================================
// Presence
// ============================================================================

/// Client presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Presence announcement on `gate/clients`, also used as the will message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPresence {
    pub session_id: String,
    pub status: PresenceStatus,
}

impl ClientPresence {
    pub fn online(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: PresenceStatus::Online,
        }
    }

    pub fn offline(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: PresenceStatus::Offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_request_wire_format() {
        let json = serde_json::to_string(&CommandRequest::new(GateAction::Right)).unwrap();
        assert_eq!(json, r#"{"action":"right"}"#);
    }

    #[test]
    fn unknown_action_rejected() {
        let res: Result<CommandRequest, _> = serde_json::from_str(r#"{"action":"open"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn response_success_omits_error() {
        let json = serde_json::to_string(&CommandResponse::success()).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);
    }

    #[test]
    fn response_failure_carries_error() {
        let json = serde_json::to_string(&CommandResponse::failure("pin stuck")).unwrap();
        assert_eq!(json, r#"{"status":"failure","error":"pin stuck"}"#);
    }

    #[test]
    fn response_accepts_failed_alias() {
        let resp: CommandResponse =
            serde_json::from_str(r#"{"status":"failed","action":"full","error":"gpio"}"#).unwrap();
        assert_eq!(resp.status, ResponseStatus::Failure);
        assert_eq!(resp.error.as_deref(), Some("gpio"));
        assert_eq!(resp.action.as_deref(), Some("full"));
        assert!(!resp.is_success());
    }

    #[test]
    fn heartbeat_epoch_millis() {
        let hb: Heartbeat = serde_json::from_str(r#"{"hb":1700000000000}"#).unwrap();
        assert_eq!(hb.hb, HeartbeatStamp::EpochMillis(1_700_000_000_000));
        let dt = hb.hb.to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn heartbeat_rfc3339() {
        let hb: Heartbeat = serde_json::from_str(r#"{"hb":"2024-01-01T12:00:00Z"}"#).unwrap();
        let dt = hb.hb.to_datetime().unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T12:00:00+00:00");
    }

    #[test]
    fn heartbeat_garbage_stamp_still_parses() {
        let hb: Heartbeat = serde_json::from_str(r#"{"hb":"yesterday"}"#).unwrap();
        assert!(hb.hb.to_datetime().is_none());
    }

    #[test]
    fn heartbeat_at_formats_seconds() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let json = serde_json::to_string(&Heartbeat::at(now)).unwrap();
        assert_eq!(json, r#"{"hb":"2024-05-06T07:08:09Z"}"#);
    }

    #[test]
    fn presence_wire_format() {
        let json = serde_json::to_string(&ClientPresence::offline("gate_app_01")).unwrap();
        assert_eq!(json, r#"{"sessionId":"gate_app_01","status":"offline"}"#);
    }
}
