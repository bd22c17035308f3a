use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::Role, error::ErrorCode};

/// Profile record stored under `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub role: Role,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Account requested by an admin, stored under `pendingUsers/{key}` until it
/// is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUser {
    pub email: String,
    pub room_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// Panel-wide preferences stored under `Settings`. Missing keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PanelSettings {
    pub temp_threshold: i64,
    pub humidity_threshold: i64,
    pub auto_off: bool,
    pub notifications: NotificationSettings,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            temp_threshold: 35,
            humidity_threshold: 80,
            auto_off: true,
            notifications: NotificationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub temp: bool,
    pub humidity: bool,
    pub presence: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            temp: true,
            humidity: true,
            presence: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient, user-visible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, None, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, None, message)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, Some(code), message)
    }

    fn new(level: NoticeLevel, code: Option<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            level,
            code,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_profile_uses_camel_case_wire_names() {
        let raw = r#"{"email":"a1@smartclass.local","roomId":"A1","role":"user","createdAt":1700000000000}"#;
        let profile: UserProfile = serde_json::from_str(raw).expect("profile");
        assert_eq!(profile.room_id.as_deref(), Some("A1"));
        assert_eq!(profile.role, Role::User);

        let encoded = serde_json::to_value(&profile).expect("encode");
        assert_eq!(encoded["roomId"], "A1");
    }

    #[test]
    fn panel_settings_fill_missing_keys_with_defaults() {
        let raw = r#"{"tempThreshold":30,"notifications":{"presence":true}}"#;
        let settings: PanelSettings = serde_json::from_str(raw).expect("settings");
        assert_eq!(settings.temp_threshold, 30);
        assert_eq!(settings.humidity_threshold, 80);
        assert!(settings.auto_off);
        assert!(settings.notifications.temp);
        assert!(settings.notifications.presence);

        let encoded = serde_json::to_value(PanelSettings::default()).expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({
                "tempThreshold": 35,
                "humidityThreshold": 80,
                "autoOff": true,
                "notifications": {"temp": true, "humidity": true, "presence": false}
            })
        );
    }

    #[test]
    fn admin_profile_may_omit_room() {
        let raw = r#"{"email":"root@smartclass.local","role":"admin"}"#;
        let profile: UserProfile = serde_json::from_str(raw).expect("profile");
        assert_eq!(profile.role, Role::Admin);
        assert!(profile.room_id.is_none());
    }
}
