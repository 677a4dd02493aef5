//! Domain types for the persisted service configuration.
//!
//! Every record here is written by the application layer and read back by the
//! lifecycle reconciler. All types are serializable via serde + serde_yaml.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifies the application entry point the callback bridge should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(pub i64);

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for CallbackHandle {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Service status
// ---------------------------------------------------------------------------

/// The desired service action, as last persisted by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    #[default]
    Start,
    Reboot,
    Restart,
    Update,
    Stop,
}

impl ServiceAction {
    pub fn all() -> [ServiceAction; 5] {
        [
            ServiceAction::Start,
            ServiceAction::Reboot,
            ServiceAction::Restart,
            ServiceAction::Update,
            ServiceAction::Stop,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Reboot => "reboot",
            ServiceAction::Restart => "restart",
            ServiceAction::Update => "update",
            ServiceAction::Stop => "stop",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceStatus {
    pub action: ServiceAction,
    /// Set by whoever persisted the record; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServiceStatus {
    pub fn new(action: ServiceAction) -> Self {
        Self {
            action,
            updated_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// Task options
// ---------------------------------------------------------------------------

/// Cadence of the repeat event delivered to the application callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Nothing,
    Once,
    Repeat,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Nothing => write!(f, "nothing"),
            EventType::Once => write!(f, "once"),
            EventType::Repeat => write!(f, "repeat"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct EventAction {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default)]
    pub interval_millis: u64,
}

impl EventAction {
    pub fn nothing() -> Self {
        Self {
            kind: EventType::Nothing,
            interval_millis: 0,
        }
    }

    pub fn once() -> Self {
        Self {
            kind: EventType::Once,
            interval_millis: 0,
        }
    }

    pub fn repeat(interval_millis: u64) -> Self {
        Self {
            kind: EventType::Repeat,
            interval_millis,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventType::Repeat => write!(f, "repeat({}ms)", self.interval_millis),
            other => other.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskOptions {
    #[serde(default)]
    pub event_action: EventAction,
    #[serde(default)]
    pub allow_wake_lock: bool,
    #[serde(default)]
    pub allow_network_lock: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskCallbackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_handle: Option<CallbackHandle>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelImportance {
    None,
    Min,
    #[default]
    Low,
    Default,
    High,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Min,
    #[default]
    Low,
    Default,
    High,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationVisibility {
    #[default]
    Public,
    Private,
    Secret,
}

fn default_service_id() -> i32 {
    1000
}

fn default_channel_id() -> String {
    "keepalive".to_string()
}

fn default_channel_name() -> String {
    "Keepalive service".to_string()
}

/// Channel identity and presentation flags of the ongoing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default = "default_service_id")]
    pub service_id: i32,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_description: Option<String>,
    #[serde(default)]
    pub channel_importance: ChannelImportance,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub visibility: NotificationVisibility,
    #[serde(default)]
    pub enable_vibration: bool,
    #[serde(default)]
    pub play_sound: bool,
    #[serde(default)]
    pub show_when: bool,
    #[serde(default = "default_true")]
    pub show_badge: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            channel_id: default_channel_id(),
            channel_name: default_channel_name(),
            channel_description: None,
            channel_importance: ChannelImportance::default(),
            priority: NotificationPriority::default(),
            visibility: NotificationVisibility::default(),
            enable_vibration: false,
            play_sound: false,
            show_when: false,
            show_badge: true,
        }
    }
}

/// Icon resource reference. Empty fields mean "use the application icon".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotificationIcon {
    pub res_type: String,
    pub res_prefix: String,
    pub name: String,
    /// `"r,g,b"` colour string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color_rgb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationButton {
    pub id: String,
    pub text: String,
    /// `"r,g,b"` colour string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color_rgb: Option<String>,
}

impl NotificationButton {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            text_color_rgb: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotificationContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    /// Percentage, clamped to 100 when presented.
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<NotificationIcon>,
    #[serde(default)]
    pub buttons: Vec<NotificationButton>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_action_parse_is_case_insensitive() {
        assert_eq!(ServiceAction::parse("STOP"), Some(ServiceAction::Stop));
        assert_eq!(ServiceAction::parse(" reboot "), Some(ServiceAction::Reboot));
        assert_eq!(ServiceAction::parse("pause"), None);
    }

    #[test]
    fn event_action_yaml_uses_type_key() {
        let yaml = serde_yaml::to_string(&EventAction::repeat(5000)).expect("serialize");
        assert!(yaml.contains("type: repeat"), "got: {yaml}");
        assert!(yaml.contains("interval_millis: 5000"), "got: {yaml}");
    }

    #[test]
    fn task_options_tolerate_missing_fields() {
        let options: TaskOptions = serde_yaml::from_str("allow_wake_lock: true\n").expect("parse");
        assert!(options.allow_wake_lock);
        assert!(!options.allow_network_lock);
        assert_eq!(options.event_action, EventAction::nothing());
    }

    #[test]
    fn callback_handle_is_a_bare_integer_in_yaml() {
        let config = TaskCallbackConfig {
            callback_handle: Some(CallbackHandle(42)),
        };
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        assert_eq!(yaml.trim(), "callback_handle: 42");
    }

    #[test]
    fn event_action_display() {
        assert_eq!(EventAction::repeat(250).to_string(), "repeat(250ms)");
        assert_eq!(EventAction::once().to_string(), "once");
    }
}
