use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use remote_store::RemoteStore;
use serde::Serialize;
use shared::domain::{DeviceIndex, DeviceKind, Field, RoomId, RoomSchema, Sensor, StorePath};
use tokio::{
    sync::{broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{FieldCodec, SyncValue},
    error::{LockReason, SyncError},
    render::{Mode, Occupancy, RoomRenderer},
    synchronizer::{SubscriptionHandle, Synchronizer},
};

/// Point-in-time copy of what a room panel shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub mode: Mode,
    pub occupancy: Occupancy,
    pub controls_enabled: bool,
    pub online: Option<bool>,
    pub readings: Vec<(Sensor, Option<f64>)>,
    pub devices: Vec<DeviceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub kind: DeviceKind,
    pub index: DeviceIndex,
    pub commanded: bool,
    pub actual: bool,
    /// What the panel shows: the device's reported state in automatic mode,
    /// the commanded state otherwise.
    pub displayed: bool,
    /// Only set for fans.
    pub speed: Option<u8>,
}

type DeviceKey = (DeviceKind, DeviceIndex);

struct RoomModel {
    devices: Vec<DeviceKey>,
    mode: Option<Mode>,
    occupancy: Option<Occupancy>,
    online: Option<bool>,
    readings: HashMap<Sensor, Option<f64>>,
    commanded: HashMap<DeviceKey, bool>,
    actual: HashMap<DeviceKey, bool>,
    fan_speed: HashMap<DeviceIndex, Option<u8>>,
    displayed: HashMap<DeviceKey, bool>,
    controls_enabled: Option<bool>,
    detached: bool,
}

impl RoomModel {
    fn new(schema: &RoomSchema) -> Self {
        let devices = schema
            .indices()
            .flat_map(|index| DeviceKind::ALL.map(|kind| (kind, index)))
            .collect();
        Self {
            devices,
            mode: None,
            occupancy: None,
            online: None,
            readings: HashMap::new(),
            commanded: HashMap::new(),
            actual: HashMap::new(),
            fan_speed: HashMap::new(),
            displayed: HashMap::new(),
            controls_enabled: None,
            detached: false,
        }
    }

    fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    fn occupied(&self) -> bool {
        self.occupancy.is_some_and(Occupancy::is_present)
    }

    fn lock_reason(&self) -> Option<LockReason> {
        if self.mode().is_automatic() {
            Some(LockReason::AutomaticMode)
        } else if !self.occupied() {
            Some(LockReason::RoomUnoccupied)
        } else {
            None
        }
    }

    fn apply(&mut self, renderer: &dyn RoomRenderer, field: Field, value: Option<SyncValue>) {
        if self.detached {
            debug!(?field, "view detached, dropping render");
            return;
        }

        let flag = value.as_ref().and_then(SyncValue::as_bool).unwrap_or(false);
        match field {
            Field::Sensor(Sensor::Presence) => {
                let occupancy = Occupancy::from_flag(flag);
                if self.occupancy != Some(occupancy) {
                    self.occupancy = Some(occupancy);
                    renderer.occupancy(occupancy);
                }
                self.refresh_controls(renderer);
            }
            Field::Sensor(sensor) => {
                let reading = value.as_ref().and_then(SyncValue::as_f64);
                if self.readings.get(&sensor) != Some(&reading) {
                    self.readings.insert(sensor, reading);
                    renderer.sensor_reading(sensor, reading);
                }
            }
            Field::Command(kind, index) => {
                self.commanded.insert((kind, index), flag);
                self.refresh_device(renderer, (kind, index));
            }
            Field::Actual(kind, index) => {
                self.actual.insert((kind, index), flag);
                self.refresh_device(renderer, (kind, index));
            }
            Field::FanSpeed(index) => {
                let speed = value.as_ref().and_then(SyncValue::as_percent);
                if self.fan_speed.get(&index) != Some(&speed) {
                    self.fan_speed.insert(index, speed);
                    renderer.fan_speed(index, speed);
                }
            }
            Field::AutoMode => {
                let mode = Mode::from_flag(flag);
                if self.mode != Some(mode) {
                    self.mode = Some(mode);
                    renderer.mode(mode);
                    for key in self.devices.clone() {
                        self.refresh_device(renderer, key);
                    }
                }
                self.refresh_controls(renderer);
            }
        }
    }

    fn displayed_state(&self, key: &DeviceKey) -> bool {
        let source = if self.mode().is_automatic() {
            &self.actual
        } else {
            &self.commanded
        };
        source.get(key).copied().unwrap_or(false)
    }

    fn refresh_device(&mut self, renderer: &dyn RoomRenderer, key: DeviceKey) {
        let shown = self.displayed_state(&key);
        if self.displayed.get(&key) != Some(&shown) {
            self.displayed.insert(key, shown);
            renderer.device(key.0, key.1, shown);
        }
    }

    fn refresh_controls(&mut self, renderer: &dyn RoomRenderer) {
        let enabled = self.lock_reason().is_none();
        if self.controls_enabled != Some(enabled) {
            self.controls_enabled = Some(enabled);
            renderer.controls_enabled(enabled);
        }
    }
}

fn lock_model(model: &StdMutex<RoomModel>) -> MutexGuard<'_, RoomModel> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_field(
    model: &StdMutex<RoomModel>,
    renderer: &dyn RoomRenderer,
    field: Field,
    value: Option<SyncValue>,
) {
    lock_model(model).apply(renderer, field, value);
}

/// Applies several field values at once. The mode flag goes last so device
/// rows are re-rendered once against the final commanded values.
fn apply_fields(
    model: &StdMutex<RoomModel>,
    renderer: &dyn RoomRenderer,
    fields_by_path: &HashMap<StorePath, Field>,
    values: Vec<(StorePath, Option<SyncValue>)>,
) {
    let mut fields: Vec<(Field, Option<SyncValue>)> = values
        .into_iter()
        .filter_map(|(path, value)| fields_by_path.get(&path).map(|field| (*field, value)))
        .collect();
    fields.sort_by_key(|(field, _)| matches!(field, Field::AutoMode));

    let mut guard = lock_model(model);
    for (field, value) in fields {
        guard.apply(renderer, field, value);
    }
}

/// Live panel for a single room.
///
/// Owns one [`Synchronizer`] with a subscription per room field plus the
/// connectivity flag. Commands go through the synchronizer's optimistic write
/// path so the panel reacts immediately and rolls back on failure.
pub struct RoomView {
    room_id: RoomId,
    schema: RoomSchema,
    sync: Synchronizer,
    model: Arc<StdMutex<RoomModel>>,
    renderer: Arc<dyn RoomRenderer>,
    fields_by_path: Arc<HashMap<StorePath, Field>>,
    handles: Mutex<Vec<SubscriptionHandle>>,
    notice_task: JoinHandle<()>,
}

impl std::fmt::Debug for RoomView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomView")
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

impl RoomView {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        schema: RoomSchema,
        room_id: RoomId,
        renderer: Arc<dyn RoomRenderer>,
    ) -> Result<Self, SyncError> {
        let fields_by_path = schema
            .fields()
            .into_iter()
            .map(|field| Ok((schema.path(&room_id, &field)?, field)))
            .collect::<Result<HashMap<_, _>, SyncError>>()?;

        let sync = Synchronizer::new(store);
        let mut notices = sync.subscribe_notices();
        let notice_renderer = Arc::clone(&renderer);
        let notice_task = tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => notice_renderer.notice(&notice),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "room notices dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            model: Arc::new(StdMutex::new(RoomModel::new(&schema))),
            room_id,
            schema,
            sync,
            renderer,
            fields_by_path: Arc::new(fields_by_path),
            handles: Mutex::new(Vec::new()),
            notice_task,
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Subscribes every room field and the connectivity flag. A field that
    /// fails to subscribe is reported and the rest still attach.
    pub async fn attach(&self) {
        let mut handles = self.handles.lock().await;
        lock_model(&self.model).detached = false;

        let model = Arc::clone(&self.model);
        let renderer = Arc::clone(&self.renderer);
        let connectivity = self
            .sync
            .subscribe(StorePath::connectivity(), FieldCodec::Flag, move |value| {
                let online = value.as_ref().and_then(SyncValue::as_bool).unwrap_or(false);
                let mut guard = lock_model(&model);
                if guard.detached {
                    return;
                }
                guard.online = Some(online);
                renderer.connectivity(online);
            })
            .await;
        if let Ok(handle) = connectivity {
            handles.push(handle);
        }

        for field in self.schema.fields() {
            let path = match self.schema.path(&self.room_id, &field) {
                Ok(path) => path,
                Err(err) => {
                    self.sync.report(&err.into());
                    continue;
                }
            };
            let model = Arc::clone(&self.model);
            let renderer = Arc::clone(&self.renderer);
            let subscribed = self
                .sync
                .subscribe(path, FieldCodec::for_field(&field), move |value| {
                    apply_field(&model, renderer.as_ref(), field, value)
                })
                .await;
            if let Ok(handle) = subscribed {
                handles.push(handle);
            }
        }

        info!(room = %self.room_id, subscriptions = handles.len(), "room view attached");
    }

    /// Releases every subscription. Safe to call more than once.
    pub async fn detach(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        lock_model(&self.model).detached = true;
        if handles.is_empty() {
            return;
        }
        self.sync.unsubscribe_all(&handles).await;
        info!(room = %self.room_id, "room view detached");
    }

    /// True once the mode flag and presence have both been delivered, which is
    /// when the control lock state is known.
    pub fn is_synced(&self) -> bool {
        let model = lock_model(&self.model);
        model.mode.is_some() && model.occupancy.is_some()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let model = lock_model(&self.model);
        let devices = model
            .devices
            .iter()
            .map(|key| DeviceSnapshot {
                kind: key.0,
                index: key.1,
                commanded: model.commanded.get(key).copied().unwrap_or(false),
                actual: model.actual.get(key).copied().unwrap_or(false),
                displayed: model.displayed_state(key),
                speed: match key.0 {
                    DeviceKind::Fan => model.fan_speed.get(&key.1).copied().flatten(),
                    DeviceKind::Light => None,
                },
            })
            .collect();

        RoomSnapshot {
            room_id: self.room_id.clone(),
            mode: model.mode(),
            occupancy: Occupancy::from_flag(model.occupied()),
            controls_enabled: model.lock_reason().is_none(),
            online: model.online,
            readings: Sensor::ALL
                .iter()
                .map(|sensor| (*sensor, model.readings.get(sensor).copied().flatten()))
                .collect(),
            devices,
        }
    }

    /// Flips the commanded state of one device.
    pub async fn toggle_device(&self, kind: DeviceKind, index: DeviceIndex) -> Result<(), SyncError> {
        self.check_index(index)?;
        self.ensure_controls()?;

        let target = {
            let model = lock_model(&self.model);
            !model.commanded.get(&(kind, index)).copied().unwrap_or(false)
        };
        self.command_device(kind, index, target).await
    }

    /// Commands one device to an explicit state.
    pub async fn set_device(
        &self,
        kind: DeviceKind,
        index: DeviceIndex,
        on: bool,
    ) -> Result<(), SyncError> {
        self.check_index(index)?;
        self.ensure_controls()?;
        self.command_device(kind, index, on).await
    }

    async fn command_device(
        &self,
        kind: DeviceKind,
        index: DeviceIndex,
        on: bool,
    ) -> Result<(), SyncError> {
        let field = Field::Command(kind, index);
        let path = self.field_path(&field)?;
        self.write_field(field, &path, SyncValue::Switch(on)).await
    }

    pub async fn set_fan_speed(&self, index: DeviceIndex, percent: u8) -> Result<(), SyncError> {
        self.check_index(index)?;
        self.ensure_controls()?;

        let field = Field::FanSpeed(index);
        let path = self.field_path(&field)?;
        self.write_field(field, &path, SyncValue::Percent(percent.min(100)))
            .await
    }

    /// Commands every light and fan in the room in one atomic update.
    pub async fn turn_all(&self, on: bool) -> Result<(), SyncError> {
        self.ensure_controls()?;

        let mut writes = BTreeMap::new();
        for index in self.schema.indices() {
            for kind in DeviceKind::ALL {
                let path = self.field_path(&Field::Command(kind, index))?;
                writes.insert(path, SyncValue::Switch(on));
            }
        }
        self.write_fields(writes).await
    }

    /// Switches between automatic and manual mode.
    ///
    /// Leaving automatic mode copies each device's reported state into its
    /// command so nothing changes physically at the handover; the copy and the
    /// mode flag go out as one update. Every other request only sets the flag,
    /// so commands issued in manual mode are never overwritten.
    pub async fn set_automatic(&self, automatic: bool) -> Result<(), SyncError> {
        let mode_path = self.field_path(&Field::AutoMode)?;
        let leaving_automatic =
            !automatic && lock_model(&self.model).mode == Some(Mode::Automatic);
        if !leaving_automatic {
            return self
                .write_field(Field::AutoMode, &mode_path, SyncValue::Flag(automatic))
                .await;
        }

        let mut writes = BTreeMap::new();
        for index in self.schema.indices() {
            for kind in DeviceKind::ALL {
                let actual = self.read_switch(&Field::Actual(kind, index)).await?;
                let command = self.field_path(&Field::Command(kind, index))?;
                writes.insert(command, SyncValue::Switch(actual));
            }
        }
        writes.insert(mode_path, SyncValue::Flag(false));
        self.write_fields(writes).await
    }

    async fn read_switch(&self, field: &Field) -> Result<bool, SyncError> {
        let path = self.field_path(field)?;
        let value = match self.sync.mirrored(&path).await {
            Some(value) => value,
            None => self.sync.get(&path, FieldCodec::Switch).await?,
        };
        Ok(value.as_ref().and_then(SyncValue::as_bool).unwrap_or(false))
    }

    async fn write_field(
        &self,
        field: Field,
        path: &StorePath,
        value: SyncValue,
    ) -> Result<(), SyncError> {
        let apply_model = Arc::clone(&self.model);
        let apply_renderer = Arc::clone(&self.renderer);
        let revert_model = Arc::clone(&self.model);
        let revert_renderer = Arc::clone(&self.renderer);

        self.sync
            .write_optimistic(
                path,
                value,
                move |value| {
                    apply_field(&apply_model, apply_renderer.as_ref(), field, Some(value.clone()))
                },
                move |previous| {
                    apply_field(&revert_model, revert_renderer.as_ref(), field, previous)
                },
            )
            .await
    }

    async fn write_fields(&self, writes: BTreeMap<StorePath, SyncValue>) -> Result<(), SyncError> {
        let apply_model = Arc::clone(&self.model);
        let apply_renderer = Arc::clone(&self.renderer);
        let apply_fields_by_path = Arc::clone(&self.fields_by_path);
        let revert_model = Arc::clone(&self.model);
        let revert_renderer = Arc::clone(&self.renderer);
        let revert_fields_by_path = Arc::clone(&self.fields_by_path);

        self.sync
            .batch_write(
                writes,
                move |writes| {
                    let values = writes
                        .iter()
                        .map(|(path, value)| (path.clone(), Some(value.clone())))
                        .collect();
                    apply_fields(
                        &apply_model,
                        apply_renderer.as_ref(),
                        &apply_fields_by_path,
                        values,
                    )
                },
                move |previous| {
                    apply_fields(
                        &revert_model,
                        revert_renderer.as_ref(),
                        &revert_fields_by_path,
                        previous,
                    )
                },
            )
            .await
    }

    fn field_path(&self, field: &Field) -> Result<StorePath, SyncError> {
        self.schema.path(&self.room_id, field).map_err(SyncError::from)
    }

    fn check_index(&self, index: DeviceIndex) -> Result<(), SyncError> {
        self.schema
            .check_index(index)
            .map_err(|err| self.rejected(err.into()))
    }

    fn ensure_controls(&self) -> Result<(), SyncError> {
        let reason = lock_model(&self.model).lock_reason();
        match reason {
            Some(reason) => Err(self.rejected(SyncError::ControlsLocked(reason))),
            None => Ok(()),
        }
    }

    fn rejected(&self, err: SyncError) -> SyncError {
        self.sync.report(&err);
        err
    }
}

impl Drop for RoomView {
    fn drop(&mut self) {
        self.notice_task.abort();
    }
}
