use std::sync::Arc;

use chrono::Utc;
use remote_store::RemoteStore;
use serde::Serialize;
use serde_json::{json, Map, Value};
use shared::{
    domain::{
        DeviceKind, Field, FieldNames, Role, RoomId, RoomSchema, Sensor, StorePath,
        PENDING_USERS_ROOT, SETTINGS_ROOT, USERS_ROOT,
    },
    error::{DomainError, StoreError},
    protocol::{Notice, PanelSettings, PendingUser},
};
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    codec::{DecodeError, FieldCodec, SyncValue},
    error::SyncError,
    render::{OverviewRenderer, OverviewStats, RoomSummary},
    synchronizer::{SubscriptionHandle, Synchronizer},
};

const DEFAULT_TEMPERATURE: f64 = 25.0;
const DEFAULT_HUMIDITY: f64 = 60.0;
const DEFAULT_LIGHT_LEVEL: f64 = 300.0;
const DEFAULT_FAN_SPEED: u8 = 50;

/// One non-admin account as listed in user management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub uid: String,
    /// Falls back to the uid when the profile has no email.
    pub email: String,
    pub room_id: Option<String>,
}

/// Admin dashboard over every room, fed by a single subscription on the
/// rooms root.
pub struct OverviewView {
    schema: RoomSchema,
    role: Role,
    sync: Synchronizer,
    renderer: Arc<dyn OverviewRenderer>,
    handles: Mutex<Vec<SubscriptionHandle>>,
    notice_task: JoinHandle<()>,
}

impl OverviewView {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        schema: RoomSchema,
        role: Role,
        renderer: Arc<dyn OverviewRenderer>,
    ) -> Self {
        let sync = Synchronizer::new(store);
        let mut notices = sync.subscribe_notices();
        let notice_renderer = Arc::clone(&renderer);
        let notice_task = tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => notice_renderer.notice(&notice),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "overview notices dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            schema,
            role,
            sync,
            renderer,
            handles: Mutex::new(Vec::new()),
            notice_task,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub async fn attach(&self) {
        let mut handles = self.handles.lock().await;

        let renderer = Arc::clone(&self.renderer);
        let connectivity = self
            .sync
            .subscribe(StorePath::connectivity(), FieldCodec::Flag, move |value| {
                renderer.connectivity(value.as_ref().and_then(SyncValue::as_bool).unwrap_or(false))
            })
            .await;
        if let Ok(handle) = connectivity {
            handles.push(handle);
        }

        let renderer = Arc::clone(&self.renderer);
        let names = self.schema.names.clone();
        let rooms = self
            .sync
            .subscribe(StorePath::rooms(), FieldCodec::Tree, move |value| {
                let summaries = summarize_rooms(&names, value.as_ref().and_then(SyncValue::as_tree));
                let stats = overview_stats(&summaries);
                renderer.rooms(&summaries, &stats);
            })
            .await;
        if let Ok(handle) = rooms {
            handles.push(handle);
        }

        info!(subscriptions = handles.len(), "overview attached");
    }

    pub async fn detach(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        if handles.is_empty() {
            return;
        }
        self.sync.unsubscribe_all(&handles).await;
        info!("overview detached");
    }

    /// Creates a room with default readings, automatic mode on and every
    /// device off. Returns the normalized room id.
    pub async fn create_room(&self, raw_id: &str) -> Result<RoomId, SyncError> {
        self.ensure_admin()?;
        let room_id = RoomId::parse(raw_id).map_err(|err| self.rejected(err.into()))?;

        let path = self.schema.room_path(&room_id);
        self.sync.write(&path, default_room(&self.schema)).await?;

        info!(room = %room_id, "room created");
        self.sync.notify(Notice::success(format!("room {room_id} added")));
        Ok(room_id)
    }

    pub async fn delete_room(&self, raw_id: &str) -> Result<(), SyncError> {
        self.ensure_admin()?;
        let room_id = RoomId::parse(raw_id).map_err(|err| self.rejected(err.into()))?;

        self.sync.remove(&self.schema.room_path(&room_id)).await?;

        info!(room = %room_id, "room deleted");
        self.sync.notify(Notice::success(format!("room {room_id} deleted")));
        Ok(())
    }

    /// Every non-admin profile under `users`, sorted by uid.
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, SyncError> {
        self.ensure_admin()?;
        let users = self
            .sync
            .get(&StorePath::parse(USERS_ROOT)?, FieldCodec::Tree)
            .await?;
        Ok(summarize_users(users.as_ref().and_then(SyncValue::as_tree)))
    }

    /// Queues an account for `email` bound to an existing room. Returns the
    /// key of the `pendingUsers` entry.
    pub async fn add_user(&self, email: &str, raw_room: &str) -> Result<String, SyncError> {
        self.ensure_admin()?;
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(self.rejected(DomainError::InvalidEmail(email.to_string()).into()));
        }
        let room_id = RoomId::parse(raw_room).map_err(|err| self.rejected(err.into()))?;
        let room = self
            .sync
            .get(&self.schema.room_path(&room_id), FieldCodec::Tree)
            .await?;
        if room.is_none() {
            return Err(self.rejected(SyncError::UnknownRoom { room_id }));
        }

        let key = Uuid::new_v4().simple().to_string();
        let path = StorePath::parse(PENDING_USERS_ROOT)?.child(&key)?;
        let pending = PendingUser {
            email: email.to_string(),
            room_id: room_id.to_string(),
            created_at: Utc::now().timestamp_millis(),
        };
        let value = serde_json::to_value(&pending).map_err(|err| {
            self.rejected(SyncError::Write {
                path: path.clone(),
                source: StoreError::Malformed(err.to_string()),
            })
        })?;
        self.sync.write(&path, value).await?;

        info!(%email, room = %room_id, "user queued");
        self.sync.notify(Notice::success(format!("user {email} added")));
        Ok(key)
    }

    pub async fn delete_user(&self, uid: &str) -> Result<(), SyncError> {
        self.ensure_admin()?;
        let path = StorePath::parse(USERS_ROOT)?
            .child(uid.trim())
            .map_err(|err| self.rejected(err.into()))?;
        self.sync.remove(&path).await?;

        info!(uid, "user deleted");
        self.sync.notify(Notice::success(format!("user {} deleted", uid.trim())));
        Ok(())
    }

    /// Reads the shared `Settings` document. A document that cannot be decoded
    /// is reported and the defaults are returned.
    pub async fn panel_settings(&self) -> Result<PanelSettings, SyncError> {
        let path = StorePath::parse(SETTINGS_ROOT)?;
        let Some(SyncValue::Tree(raw)) = self.sync.get(&path, FieldCodec::Tree).await? else {
            return Ok(PanelSettings::default());
        };
        match serde_json::from_value(raw.clone()) {
            Ok(settings) => Ok(settings),
            Err(_) => {
                self.sync.report(&SyncError::Decode {
                    path,
                    source: DecodeError {
                        expected: "panel settings",
                        raw,
                    },
                });
                Ok(PanelSettings::default())
            }
        }
    }

    pub async fn save_panel_settings(&self, settings: &PanelSettings) -> Result<(), SyncError> {
        self.ensure_admin()?;
        let path = StorePath::parse(SETTINGS_ROOT)?;
        let value = serde_json::to_value(settings).map_err(|err| {
            self.rejected(SyncError::Write {
                path: path.clone(),
                source: StoreError::Malformed(err.to_string()),
            })
        })?;
        self.sync.write(&path, value).await?;

        info!("panel settings saved");
        self.sync.notify(Notice::success("settings saved"));
        Ok(())
    }

    fn ensure_admin(&self) -> Result<(), SyncError> {
        if self.role != Role::Admin {
            return Err(self.rejected(SyncError::Forbidden));
        }
        Ok(())
    }

    fn rejected(&self, err: SyncError) -> SyncError {
        self.sync.report(&err);
        err
    }
}

impl Drop for OverviewView {
    fn drop(&mut self) {
        self.notice_task.abort();
    }
}

/// Document written for a new room.
pub fn default_room(schema: &RoomSchema) -> Value {
    let mut room = Map::new();
    let mut put = |field: Field, value: Value| {
        room.insert(schema.field_name(&field), value);
    };

    put(Field::Sensor(Sensor::Temperature), json!(DEFAULT_TEMPERATURE));
    put(Field::Sensor(Sensor::Humidity), json!(DEFAULT_HUMIDITY));
    put(Field::Sensor(Sensor::LightLevel), json!(DEFAULT_LIGHT_LEVEL));
    put(Field::Sensor(Sensor::Presence), SyncValue::Switch(false).to_wire());
    put(Field::AutoMode, SyncValue::Flag(true).to_wire());
    for index in schema.indices() {
        for kind in DeviceKind::ALL {
            put(Field::Command(kind, index), SyncValue::Switch(false).to_wire());
        }
        put(Field::FanSpeed(index), SyncValue::Percent(DEFAULT_FAN_SPEED).to_wire());
    }

    Value::Object(room)
}

/// Decodes the rooms subtree into one summary per room, sorted by id.
/// Entries that are not objects or have invalid ids are skipped.
pub fn summarize_rooms(names: &FieldNames, rooms: Option<&Value>) -> Vec<RoomSummary> {
    let Some(Value::Object(rooms)) = rooms else {
        return Vec::new();
    };

    let mut summaries: Vec<RoomSummary> = rooms
        .iter()
        .filter_map(|(id, room)| {
            let room = room.as_object()?;
            let room_id = RoomId::parse(id).ok()?;
            let reading = |sensor: Sensor| {
                FieldCodec::Reading
                    .decode(room.get(names.sensor(sensor)))
                    .ok()
                    .flatten()
                    .and_then(|value| value.as_f64())
            };
            let flag = |key: &str| {
                FieldCodec::Flag
                    .decode(room.get(key))
                    .ok()
                    .flatten()
                    .and_then(|value| value.as_bool())
                    .unwrap_or(false)
            };

            Some(RoomSummary {
                room_id,
                temperature: reading(Sensor::Temperature),
                humidity: reading(Sensor::Humidity),
                light_level: reading(Sensor::LightLevel),
                occupied: flag(names.sensor(Sensor::Presence)),
                automatic: flag(&names.auto_mode),
            })
        })
        .collect();

    summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
    summaries
}

/// Non-admin entries of the `users` subtree. Admin profiles and entries that
/// are not objects are skipped.
pub fn summarize_users(users: Option<&Value>) -> Vec<UserSummary> {
    let Some(Value::Object(users)) = users else {
        return Vec::new();
    };

    let text = |user: &Map<String, Value>, key: &str| {
        user.get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    };
    let mut summaries: Vec<UserSummary> = users
        .iter()
        .filter_map(|(uid, user)| {
            let user = user.as_object()?;
            if text(user, "role").as_deref() == Some("admin") {
                return None;
            }
            Some(UserSummary {
                uid: uid.clone(),
                email: text(user, "email").unwrap_or_else(|| uid.clone()),
                room_id: text(user, "roomId"),
            })
        })
        .collect();

    summaries.sort_by(|a, b| a.uid.cmp(&b.uid));
    summaries
}

pub fn overview_stats(rooms: &[RoomSummary]) -> OverviewStats {
    OverviewStats {
        total_rooms: rooms.len(),
        active_rooms: rooms.iter().filter(|room| room.occupied).count(),
        average_temperature: average(rooms.iter().filter_map(|room| room.temperature)),
        average_humidity: average(rooms.iter().filter_map(|room| room.humidity)),
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}
