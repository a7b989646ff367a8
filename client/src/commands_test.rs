use super::*;

#[test]
fn unit_directives_carry_only_type() {
    let fields = LightCommand::WhiteAll.fields();
    assert_eq!(Value::Object(fields), json!({"type": "white_all"}));
}

#[test]
fn relay_toggle_uses_lowercase_relay_name() {
    let fields = LightCommand::RelayToggle { relay: Relay::Terrace }.fields();
    assert_eq!(Value::Object(fields), json!({"type": "relay_toggle", "relay": "terrace"}));
}

#[test]
fn envelope_appends_identity_and_timestamp() {
    let cmd = LightCommand::CustomLeds { floor: AMENITY_FLOOR, count: 80, r: 0, g: 255, b: 100 };
    let payload = cmd.envelope("abc", "Sales Person 1", 42);
    assert_eq!(
        payload,
        json!({
            "type": "custom_leds",
            "floor": 16,
            "count": 80,
            "r": 0,
            "g": 255,
            "b": 100,
            "clientId": "abc",
            "clientName": "Sales Person 1",
            "ts": 42
        })
    );
}

#[test]
fn raw_directive_passes_data_through() {
    let mut data = Map::new();
    data.insert("zone".into(), json!("lobby"));
    let cmd = LightCommand::Raw { kind: "pulse".into(), data };
    assert_eq!(cmd.kind(), "pulse");
    assert_eq!(Value::Object(cmd.fields()), json!({"type": "pulse", "zone": "lobby"}));
}

#[test]
fn show_available_filters_on_available() {
    assert_eq!(
        Value::Object(LightCommand::show_available().fields()),
        json!({"type": "availability_filter", "status": "available"})
    );
}
