fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use gate_protocol::{
        ClientPresence, CommandRequest, CommandResponse, GateAction, Heartbeat, PresenceStatus,
        ResponseStatus,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  device: {fixture}\n  Rust:   {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_command_request() {
        let req = roundtrip_test::<CommandRequest>("command_request.json");
        assert_eq!(req.action, GateAction::Pedestrian);
    }

    #[test]
    fn fixture_ack_success() {
        let ack = roundtrip_test::<CommandResponse>("ack_success.json");
        assert!(ack.is_success());
        assert_eq!(ack.action.as_deref(), Some("full"));
    }

    #[test]
    fn fixture_ack_failed_legacy_status() {
        let ack: CommandResponse = serde_json::from_value(load_fixture("ack_failed.json")).unwrap();
        assert_eq!(ack.status, ResponseStatus::Failure);
        assert_eq!(ack.error.as_deref(), Some("GPIO error: pin 17 busy"));

        // Written back in the current spelling.
        let out = serde_json::to_value(&ack).unwrap();
        assert_eq!(out["status"], "failure");
    }

    #[test]
    fn fixture_heartbeat_rfc3339() {
        let hb = roundtrip_test::<Heartbeat>("heartbeat_rfc3339.json");
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(hb.hb.to_datetime(), Some(expected));

        // The device emits exactly the fixture bytes.
        let msg = gate_device::heartbeat_message(expected).unwrap();
        let emitted: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(emitted, load_fixture("heartbeat_rfc3339.json"));
    }

    #[test]
    fn fixture_heartbeat_epoch_millis() {
        let hb = roundtrip_test::<Heartbeat>("heartbeat_epoch.json");
        assert_eq!(
            hb.hb.to_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn fixture_client_presence() {
        let presence = roundtrip_test::<ClientPresence>("client_presence.json");
        assert_eq!(presence.session_id, "gate_app_1a2b3c4d");
        assert_eq!(presence.status, PresenceStatus::Offline);
    }
}
