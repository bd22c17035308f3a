use serde::Serialize;
use shared::{
    domain::{DeviceIndex, DeviceKind, RoomId, Sensor},
    protocol::Notice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Manual,
    Automatic,
}

impl Mode {
    pub fn from_flag(automatic: bool) -> Self {
        if automatic {
            Mode::Automatic
        } else {
            Mode::Manual
        }
    }

    pub fn is_automatic(self) -> bool {
        self == Mode::Automatic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Present,
    Absent,
}

impl Occupancy {
    pub fn from_flag(present: bool) -> Self {
        if present {
            Occupancy::Present
        } else {
            Occupancy::Absent
        }
    }

    pub fn is_present(self) -> bool {
        self == Occupancy::Present
    }

    pub fn label(self) -> &'static str {
        match self {
            Occupancy::Present => "present",
            Occupancy::Absent => "absent",
        }
    }
}

/// UI surface of one room panel. State methods are called with the owning
/// view's state lock held; no method may block or call back into the view.
pub trait RoomRenderer: Send + Sync {
    fn sensor_reading(&self, sensor: Sensor, value: Option<f64>);
    fn occupancy(&self, occupancy: Occupancy);
    /// Displayed on/off state of one device.
    fn device(&self, kind: DeviceKind, index: DeviceIndex, on: bool);
    /// `None` when the store holds no speed for the fan.
    fn fan_speed(&self, index: DeviceIndex, percent: Option<u8>);
    fn mode(&self, mode: Mode);
    fn controls_enabled(&self, enabled: bool);
    fn connectivity(&self, online: bool);
    fn notice(&self, notice: &Notice);
}

/// One row of the admin overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light_level: Option<f64>,
    pub occupied: bool,
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OverviewStats {
    pub total_rooms: usize,
    /// Rooms where someone is present.
    pub active_rooms: usize,
    pub average_temperature: Option<f64>,
    pub average_humidity: Option<f64>,
}

pub trait OverviewRenderer: Send + Sync {
    fn rooms(&self, rooms: &[RoomSummary], stats: &OverviewStats);
    fn connectivity(&self, online: bool);
    fn notice(&self, notice: &Notice);
}
