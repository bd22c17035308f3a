use std::{fs, path::Path, str::FromStr};

use anyhow::{bail, Context};
use remote_store::RemoteStore;
use serde::Deserialize;
use shared::domain::{FieldNames, Role, RoomId, RoomSchema, DEFAULT_DEVICE_COUNT};
use sync_core::{load_session, Session};

const ENV_PREFIX: &str = "PANEL__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Firebase,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "firebase" => Ok(StoreKind::Firebase),
            other => bail!("unknown store kind {other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub auth_token: Option<String>,
    pub identity: String,
    pub role: Role,
    pub home_room: Option<String>,
    pub device_count: u8,
    pub log_level: String,
    pub fields: FieldNames,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            database_url: None,
            auth_token: None,
            identity: "admin@smartclass.local".into(),
            role: Role::Admin,
            home_room: None,
            device_count: DEFAULT_DEVICE_COUNT,
            log_level: "info".into(),
            fields: FieldNames::default(),
        }
    }
}

impl Settings {
    pub fn schema(&self) -> RoomSchema {
        RoomSchema::new(self.fields.clone(), self.device_count)
    }

    /// Builds the session from the configured identity. A user without a
    /// configured room is resolved through their stored profile.
    pub async fn session(&self, store: &dyn RemoteStore) -> anyhow::Result<Session> {
        match (self.role, self.home_room.as_deref()) {
            (Role::Admin, _) => Ok(Session::admin(&self.identity)),
            (Role::User, Some(room)) => Ok(Session::user(&self.identity, RoomId::parse(room)?)),
            (Role::User, None) => load_session(store, &self.identity)
                .await
                .with_context(|| format!("loading profile for {}", self.identity)),
        }
    }
}

/// Defaults, then `config_path` when it exists, then `PANEL__*` variables.
pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(config_path, |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    config_path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = if config_path.exists() {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        toml::from_str::<Settings>(&raw)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        Settings::default()
    };

    apply_env_overrides(&mut settings, env)?;
    Ok(settings)
}

fn apply_env_overrides(
    settings: &mut Settings,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let var = |name: &str| env(&format!("{ENV_PREFIX}{name}"));

    if let Some(v) = var("STORE") {
        settings.store = v.parse()?;
    }
    if let Some(v) = var("DATABASE_URL") {
        settings.database_url = Some(v);
    }
    if let Some(v) = var("AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Some(v) = var("IDENTITY") {
        settings.identity = v;
    }
    if let Some(v) = var("ROLE") {
        settings.role = v.parse()?;
    }
    if let Some(v) = var("HOME_ROOM") {
        settings.home_room = Some(v);
    }
    if let Some(v) = var("DEVICE_COUNT") {
        settings.device_count = v
            .parse()
            .with_context(|| format!("{ENV_PREFIX}DEVICE_COUNT={v:?}"))?;
    }
    if let Some(v) = var("LOG_LEVEL") {
        settings.log_level = v;
    }

    let fields = &mut settings.fields;
    for (name, slot) in [
        ("TEMPERATURE", &mut fields.temperature),
        ("HUMIDITY", &mut fields.humidity),
        ("LIGHT_LEVEL", &mut fields.light_level),
        ("PRESENCE", &mut fields.presence),
        ("LIGHT", &mut fields.light),
        ("FAN", &mut fields.fan),
        ("FAN_SPEED", &mut fields.fan_speed),
        ("AUTO_MODE", &mut fields.auto_mode),
        ("ACTUAL_PREFIX", &mut fields.actual_prefix),
    ] {
        if let Some(v) = var(&format!("FIELDS__{name}")) {
            *slot = v;
        }
    }

    if settings.device_count == 0 {
        bail!("device_count must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
