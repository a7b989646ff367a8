//! Project-scoped topic names.

/// Outbound lighting commands and heartbeats.
pub const UI_CMD: &str = "ui/cmd";
/// Acknowledgements from the LED controller.
pub const UI_ACK: &str = "ui/ack";
/// Retained cast lock record.
pub const CAST_STATE: &str = "cast/state";
pub const RELAY_STATE: &str = "relay/state";
pub const CONTROL_STATE: &str = "control/state";

/// Prefixes relative topic paths with the project namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    project: String,
}

impl Topics {
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self { project: project.into() }
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// `"{project}/{path}"`.
    #[must_use]
    pub fn t(&self, path: &str) -> String {
        format!("{}/{}", self.project, path)
    }

    /// Strip the project prefix, or `None` for topics outside the project.
    #[must_use]
    pub fn relative<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic.strip_prefix(self.project.as_str())?.strip_prefix('/')
    }

    #[must_use]
    pub fn ui_cmd(&self) -> String {
        self.t(UI_CMD)
    }

    #[must_use]
    pub fn cast_state(&self) -> String {
        self.t(CAST_STATE)
    }

    /// Topics a kiosk subscribes to on every (re)connect.
    #[must_use]
    pub fn kiosk_subscriptions(&self) -> [String; 4] {
        [self.t(UI_ACK), self.t(CAST_STATE), self.t(RELAY_STATE), self.t(CONTROL_STATE)]
    }
}

#[cfg(test)]
#[path = "topics_test.rs"]
mod tests;
