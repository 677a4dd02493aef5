//! Roundtrip serialisation tests for `keepalive-core` records.
//!
//! Each `#[case]` is isolated: no shared state.

use keepalive_core::{
    CallbackHandle, ChannelImportance, EventAction, NotificationButton, NotificationContent,
    NotificationIcon, NotificationOptions, NotificationPriority, NotificationVisibility,
    ServiceAction, ServiceStatus, TaskCallbackConfig, TaskOptions,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minimal_content() -> NotificationContent {
    NotificationContent::default()
}

fn full_content() -> NotificationContent {
    NotificationContent {
        title: "Uploading".to_string(),
        text: "photo 12 of 40".to_string(),
        progress: 30,
        icon: Some(NotificationIcon {
            res_type: "mipmap".to_string(),
            res_prefix: "ic".to_string(),
            name: "upload".to_string(),
            background_color_rgb: Some("255,128,0".to_string()),
        }),
        buttons: vec![
            NotificationButton {
                id: "stop".to_string(),
                text: "Stop".to_string(),
                text_color_rgb: Some("200,0,0".to_string()),
            },
            NotificationButton::new("later", "Later"),
        ],
    }
}

fn unicode_content() -> NotificationContent {
    NotificationContent {
        title: "同期中 — синхронизация".to_string(),
        text: "émojis 🚀 & spéçïal chars: <>&\"'".to_string(),
        progress: 100,
        icon: None,
        buttons: vec![NotificationButton::new("ok-✓", "好")],
    }
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("minimal", minimal_content())]
#[case("all_fields", full_content())]
#[case("unicode_strings", unicode_content())]
fn notification_content_roundtrip(#[case] label: &str, #[case] content: NotificationContent) {
    let yaml = serde_yaml::to_string(&content)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: NotificationContent = serde_yaml::from_str(&yaml)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(content, back, "[{label}]");
}

#[rstest]
#[case(ServiceAction::Start, "start")]
#[case(ServiceAction::Reboot, "reboot")]
#[case(ServiceAction::Restart, "restart")]
#[case(ServiceAction::Update, "update")]
#[case(ServiceAction::Stop, "stop")]
fn service_action_wire_names(#[case] action: ServiceAction, #[case] expected: &str) {
    let yaml = serde_yaml::to_string(&ServiceStatus {
        action,
        updated_at: None,
    })
    .expect("serialize");
    assert_eq!(yaml.trim(), format!("action: {expected}"));
    assert_eq!(ServiceAction::parse(expected), Some(action));
}

#[test]
fn notification_options_defaults_fill_missing_keys() {
    let options: NotificationOptions =
        serde_yaml::from_str("channel_id: uploads\nvisibility: secret\n").expect("parse");
    assert_eq!(options.channel_id, "uploads");
    assert_eq!(options.visibility, NotificationVisibility::Secret);
    assert_eq!(options.service_id, 1000);
    assert_eq!(options.channel_importance, ChannelImportance::Low);
    assert_eq!(options.priority, NotificationPriority::Low);
    assert!(options.show_badge);
}

#[test]
fn task_records_roundtrip() {
    let options = TaskOptions {
        event_action: EventAction::repeat(5000),
        allow_wake_lock: true,
        allow_network_lock: false,
    };
    let yaml = serde_yaml::to_string(&options).expect("serialize");
    assert_eq!(serde_yaml::from_str::<TaskOptions>(&yaml).expect("parse"), options);

    let callback = TaskCallbackConfig {
        callback_handle: Some(CallbackHandle(-9_007_199_254_740_993)),
    };
    let yaml = serde_yaml::to_string(&callback).expect("serialize");
    assert_eq!(
        serde_yaml::from_str::<TaskCallbackConfig>(&yaml).expect("parse"),
        callback
    );
}
