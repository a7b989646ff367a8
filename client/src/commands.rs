//! Lighting directives for the LED controller.
//!
//! Commands travel on `ui/cmd` as a flat JSON object: the directive's
//! `type`, its own fields, then the sender's identity and a timestamp.
//! The controller's firmware format beyond that envelope is not modelled.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// The podium floor that hosts the amenity LEDs.
pub const AMENITY_FLOOR: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relay {
    Surrounding,
    Terrace,
}

impl Relay {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Surrounding => "surrounding",
            Self::Terrace => "terrace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LightCommand {
    WhiteAll,
    SetAllFloorsOff,
    ClassicAll,
    AvailabilityFilter { status: String },
    RelayToggle { relay: Relay },
    SetFloorColor { floor: u32 },
    CustomLeds { floor: u32, count: u16, r: u8, g: u8, b: u8 },
    /// Any other directive, passed through untouched.
    #[serde(skip)]
    Raw { kind: String, data: Map<String, Value> },
}

impl LightCommand {
    /// Highlight available units only.
    #[must_use]
    pub fn show_available() -> Self {
        Self::AvailabilityFilter { status: "available".to_owned() }
    }

    /// Directive name as sent in `type`.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::WhiteAll => "white_all",
            Self::SetAllFloorsOff => "set_all_floors_off",
            Self::ClassicAll => "classic_all",
            Self::AvailabilityFilter { .. } => "availability_filter",
            Self::RelayToggle { .. } => "relay_toggle",
            Self::SetFloorColor { .. } => "set_floor_color",
            Self::CustomLeds { .. } => "custom_leds",
            Self::Raw { kind, .. } => kind.as_str(),
        }
    }

    /// `type` plus the directive's own fields.
    #[must_use]
    pub fn fields(&self) -> Map<String, Value> {
        if let Self::Raw { kind, data } = self {
            let mut fields = data.clone();
            fields.insert("type".into(), json!(kind));
            return fields;
        }
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                let mut fields = Map::new();
                fields.insert("type".into(), json!(self.kind()));
                fields
            }
        }
    }

    /// Full `ui/cmd` payload: fields, then sender identity and timestamp.
    #[must_use]
    pub fn envelope(&self, client_id: &str, client_name: &str, ts: i64) -> Value {
        let mut payload = self.fields();
        payload.insert("clientId".into(), json!(client_id));
        payload.insert("clientName".into(), json!(client_name));
        payload.insert("ts".into(), json!(ts));
        Value::Object(payload)
    }
}

#[cfg(test)]
#[path = "commands_test.rs"]
mod tests;
