use chrono::Local;
use shared::{
    domain::{DeviceIndex, DeviceKind, Sensor},
    protocol::{Notice, NoticeLevel},
};
use sync_core::{Mode, Occupancy, OverviewRenderer, OverviewStats, RoomRenderer, RoomSummary};

/// Prints one line per render callback.
pub struct TerminalRenderer {
    label: String,
}

impl TerminalRenderer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

fn reading(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(value) => format!("{value:.1}{unit}"),
        None => "--".to_string(),
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Notice line stamped with the local wall-clock time.
fn notice_line(label: &str, notice: &Notice) -> String {
    let level = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    format!(
        "[{label}] {} {level}: {}",
        notice.at.with_timezone(&Local).format("%H:%M:%S"),
        notice.message
    )
}

fn print_notice(label: &str, notice: &Notice) {
    println!("{}", notice_line(label, notice));
}

impl RoomRenderer for TerminalRenderer {
    fn sensor_reading(&self, sensor: Sensor, value: Option<f64>) {
        let unit = match sensor {
            Sensor::Temperature => " °C",
            Sensor::Humidity => " %",
            Sensor::LightLevel => " lux",
            Sensor::Presence => "",
        };
        println!("[{}] {sensor}: {}", self.label, reading(value, unit));
    }

    fn occupancy(&self, occupancy: Occupancy) {
        println!("[{}] presence: {}", self.label, occupancy.label());
    }

    fn device(&self, kind: DeviceKind, index: DeviceIndex, on: bool) {
        println!("[{}] {kind} {index}: {}", self.label, on_off(on));
    }

    fn fan_speed(&self, index: DeviceIndex, percent: Option<u8>) {
        let speed = percent.map_or_else(|| "--".to_string(), |percent| format!("{percent}%"));
        println!("[{}] fan {index} speed: {speed}", self.label);
    }

    fn mode(&self, mode: Mode) {
        let mode = match mode {
            Mode::Automatic => "automatic",
            Mode::Manual => "manual",
        };
        println!("[{}] mode: {mode}", self.label);
    }

    fn controls_enabled(&self, enabled: bool) {
        let state = if enabled { "enabled" } else { "locked" };
        println!("[{}] controls: {state}", self.label);
    }

    fn connectivity(&self, online: bool) {
        let state = if online { "connected" } else { "offline" };
        println!("[{}] {state}", self.label);
    }

    fn notice(&self, notice: &Notice) {
        print_notice(&self.label, notice);
    }
}

impl OverviewRenderer for TerminalRenderer {
    fn rooms(&self, rooms: &[RoomSummary], stats: &OverviewStats) {
        println!(
            "[{}] rooms: {} total, {} active, avg {} / {}",
            self.label,
            stats.total_rooms,
            stats.active_rooms,
            reading(stats.average_temperature, " °C"),
            reading(stats.average_humidity, " %"),
        );
        for room in rooms {
            let occupancy = Occupancy::from_flag(room.occupied).label();
            let mode = if room.automatic { "auto" } else { "manual" };
            println!(
                "  {:<8} {:>9} {:>7} {:>9} {occupancy:<7} {mode}",
                room.room_id.as_str(),
                reading(room.temperature, " °C"),
                reading(room.humidity, " %"),
                reading(room.light_level, " lux"),
            );
        }
    }

    fn connectivity(&self, online: bool) {
        let state = if online { "connected" } else { "offline" };
        println!("[{}] {state}", self.label);
    }

    fn notice(&self, notice: &Notice) {
        print_notice(&self.label, notice);
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
