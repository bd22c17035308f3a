#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use remote_store::MemoryStore;
use shared::{
    domain::{DeviceIndex, DeviceKind, Sensor},
    protocol::{Notice, NoticeLevel},
};
use sync_core::{
    Mode, Occupancy, OverviewRenderer, OverviewStats, PanelRenderers, RoomRenderer, RoomSummary,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Sensor(Sensor, Option<f64>),
    Occupancy(&'static str),
    Device(DeviceKind, u8, bool),
    FanSpeed(u8, Option<u8>),
    Mode(Mode),
    Controls(bool),
    Connectivity(bool),
    Notice(NoticeLevel, String),
    Rooms(Vec<RoomSummary>, OverviewStats),
}

#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().expect("events").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("events").clear();
    }

    pub fn count(&self, matches: impl Fn(&RenderEvent) -> bool) -> usize {
        self.events().iter().filter(|event| matches(event)).count()
    }

    pub fn last_rooms(&self) -> Option<(Vec<RoomSummary>, OverviewStats)> {
        self.events().into_iter().rev().find_map(|event| match event {
            RenderEvent::Rooms(rooms, stats) => Some((rooms, stats)),
            _ => None,
        })
    }

    fn record(&self, event: RenderEvent) {
        self.events.lock().expect("events").push(event);
    }
}

impl RoomRenderer for RecordingRenderer {
    fn sensor_reading(&self, sensor: Sensor, value: Option<f64>) {
        self.record(RenderEvent::Sensor(sensor, value));
    }

    fn occupancy(&self, occupancy: Occupancy) {
        self.record(RenderEvent::Occupancy(occupancy.label()));
    }

    fn device(&self, kind: DeviceKind, index: DeviceIndex, on: bool) {
        self.record(RenderEvent::Device(kind, index.0, on));
    }

    fn fan_speed(&self, index: DeviceIndex, percent: Option<u8>) {
        self.record(RenderEvent::FanSpeed(index.0, percent));
    }

    fn mode(&self, mode: Mode) {
        self.record(RenderEvent::Mode(mode));
    }

    fn controls_enabled(&self, enabled: bool) {
        self.record(RenderEvent::Controls(enabled));
    }

    fn connectivity(&self, online: bool) {
        self.record(RenderEvent::Connectivity(online));
    }

    fn notice(&self, notice: &Notice) {
        self.record(RenderEvent::Notice(notice.level, notice.message.clone()));
    }
}

impl OverviewRenderer for RecordingRenderer {
    fn rooms(&self, rooms: &[RoomSummary], stats: &OverviewStats) {
        self.record(RenderEvent::Rooms(rooms.to_vec(), stats.clone()));
    }

    fn connectivity(&self, online: bool) {
        self.record(RenderEvent::Connectivity(online));
    }

    fn notice(&self, notice: &Notice) {
        self.record(RenderEvent::Notice(notice.level, notice.message.clone()));
    }
}

pub fn renderers(renderer: &Arc<RecordingRenderer>) -> PanelRenderers {
    PanelRenderers {
        room: renderer.clone(),
        overview: renderer.clone(),
    }
}

pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

pub async fn wait_for_subscribers(store: &MemoryStore, expected: usize) {
    let mut seen = 0;
    for _ in 0..200 {
        seen = store.subscriber_count().await;
        if seen == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} store subscribers, found {seen}");
}

/// Lets queued pushes drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(40)).await;
}
