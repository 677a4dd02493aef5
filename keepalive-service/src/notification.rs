//! Notification presentation: options + content → [`PresentationRequest`].
//!
//! Pending-action identities are `(request_code, generation)` pairs. The
//! generation advances whenever the button set changes so a stale identity is
//! never reused for a different button.

use std::fs;
use std::path::{Path, PathBuf};

use keepalive_core::{
    ChannelImportance, NotificationButton, NotificationContent, NotificationIcon,
    NotificationOptions, NotificationPriority, NotificationVisibility,
};
use serde::{Deserialize, Serialize};

use crate::bridge::{METHOD_BUTTON_PRESSED, METHOD_NOTIFICATION_DISMISSED, METHOD_NOTIFICATION_PRESSED};
use crate::error::{io_err, ServiceError};

/// Request code of the "notification pressed" action.
pub const CONTENT_REQUEST_CODE: i32 = 20_000;
/// Request code of the "notification dismissed" action.
pub const DISMISS_REQUEST_CODE: i32 = 20_001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionIdentity {
    pub request_code: i32,
    pub generation: u64,
}

/// Generation counter for pending-action identities.
#[derive(Debug, Default)]
pub struct ActionIdentities {
    generation: u64,
}

impl ActionIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance the generation when `rebuild` is set; returns the generation
    /// the next presentation must use.
    pub fn refresh(&mut self, rebuild: bool) -> u64 {
        if rebuild {
            self.generation = self.generation.wrapping_add(1);
        }
        self.generation
    }
}

/// True when there is no previous content, the button count differs, or any
/// button differs.
pub fn needs_action_rebuild(previous: Option<&NotificationContent>, current: &NotificationContent) -> bool {
    match previous {
        None => true,
        Some(previous) => previous.buttons != current.buttons,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Parse `"r,g,b"`. Anything malformed yields `None`.
pub fn parse_rgb(raw: &str) -> Option<Rgb> {
    let mut parts = raw.split(',').map(|part| part.trim().parse::<u8>());
    let (r, g, b) = (parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?);
    if parts.next().is_some() {
        return None;
    }
    Some(Rgb { r, g, b })
}

/// `ic_<name>` when the prefix mentions "ic", otherwise `img_<name>`.
/// Empty fields resolve to `None` and the application icon is used.
pub fn icon_resource_name(icon: &NotificationIcon) -> Option<String> {
    if icon.res_type.is_empty() || icon.res_prefix.is_empty() || icon.name.is_empty() {
        return None;
    }
    if icon.res_prefix.contains("ic") {
        Some(format!("ic_{}", icon.name))
    } else {
        Some(format!("img_{}", icon.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub importance: ChannelImportance,
    pub enable_vibration: bool,
    pub play_sound: bool,
    pub show_badge: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconSpec {
    pub res_type: String,
    pub resource_name: String,
    pub background_color: Option<Rgb>,
}

/// An action the platform fires back as an external event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub method: String,
    pub data: Option<String>,
    pub identity: ActionIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSpec {
    pub id: String,
    pub text: String,
    pub text_color: Option<Rgb>,
    pub action: PendingAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationRequest {
    pub service_id: i32,
    pub channel: ChannelSpec,
    pub priority: NotificationPriority,
    pub visibility: NotificationVisibility,
    pub show_when: bool,
    pub ongoing: bool,
    pub title: String,
    pub text: String,
    pub progress: u8,
    pub icon: Option<IconSpec>,
    pub content_action: PendingAction,
    pub dismiss_action: PendingAction,
    pub buttons: Vec<ButtonSpec>,
    /// Set when the button actions were rebuilt for this presentation.
    pub actions_rebuilt: bool,
}

pub fn build_presentation_request(
    options: &NotificationOptions,
    content: &NotificationContent,
    generation: u64,
    rebuilt: bool,
) -> PresentationRequest {
    let action = |method: &str, data: Option<String>, request_code: i32| PendingAction {
        method: method.to_string(),
        data,
        identity: ActionIdentity {
            request_code,
            generation,
        },
    };

    let icon = content.icon.as_ref().and_then(|icon| {
        icon_resource_name(icon).map(|resource_name| IconSpec {
            res_type: icon.res_type.clone(),
            resource_name,
            background_color: icon.background_color_rgb.as_deref().and_then(parse_rgb),
        })
    });

    let buttons = content
        .buttons
        .iter()
        .enumerate()
        .map(|(i, button): (usize, &NotificationButton)| ButtonSpec {
            id: button.id.clone(),
            text: button.text.clone(),
            text_color: button.text_color_rgb.as_deref().and_then(parse_rgb),
            action: action(METHOD_BUTTON_PRESSED, Some(button.id.clone()), i as i32 + 1),
        })
        .collect();

    PresentationRequest {
        service_id: options.service_id,
        channel: ChannelSpec {
            id: options.channel_id.clone(),
            name: options.channel_name.clone(),
            description: options.channel_description.clone(),
            importance: options.channel_importance,
            enable_vibration: options.enable_vibration,
            play_sound: options.play_sound,
            show_badge: options.show_badge,
        },
        priority: options.priority,
        visibility: options.visibility,
        show_when: options.show_when,
        ongoing: true,
        title: content.title.clone(),
        text: content.text.clone(),
        progress: content.progress.min(100),
        icon,
        content_action: action(METHOD_NOTIFICATION_PRESSED, None, CONTENT_REQUEST_CODE),
        dismiss_action: action(METHOD_NOTIFICATION_DISMISSED, None, DISMISS_REQUEST_CODE),
        buttons,
        actions_rebuilt: rebuilt,
    }
}

/// Returned by a presenter for the notification it is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationHandle {
    pub service_id: i32,
    pub revision: u64,
}

/// Shows and hides the ongoing notification. Implemented by the host.
pub trait NotificationPresenter: Send {
    fn present(&mut self, request: &PresentationRequest) -> Result<NotificationHandle, ServiceError>;
    fn dismiss(&mut self) -> Result<(), ServiceError>;
}

// ---------------------------------------------------------------------------
// File presenter
// ---------------------------------------------------------------------------

/// Writes the current presentation to a JSON file for desktop hosts.
#[derive(Debug)]
pub struct FilePresenter {
    path: PathBuf,
    revision: u64,
}

impl FilePresenter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            revision: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationPresenter for FilePresenter {
    fn present(&mut self, request: &PresentationRequest) -> Result<NotificationHandle, ServiceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(request)?;
        fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;

        self.revision += 1;
        tracing::info!(
            service_id = request.service_id,
            title = %request.title,
            buttons = request.buttons.len(),
            rebuilt = request.actions_rebuilt,
            revision = self.revision,
            "notification presented",
        );
        Ok(NotificationHandle {
            service_id: request.service_id,
            revision: self.revision,
        })
    }

    fn dismiss(&mut self) -> Result<(), ServiceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&self.path, err)),
        }
        tracing::info!("notification dismissed");
        Ok(())
    }
}
