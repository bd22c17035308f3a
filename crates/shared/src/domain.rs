use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

pub const CONNECTIVITY_PATH: &str = ".info/connected";
pub const ROOMS_ROOT: &str = "Rooms";
pub const USERS_ROOT: &str = "users";
pub const PENDING_USERS_ROOT: &str = "pendingUsers";
pub const SETTINGS_ROOT: &str = "Settings";
pub const DEFAULT_DEVICE_COUNT: u8 = 3;

const RESERVED_PREFIX: &str = ".info";
const FORBIDDEN_KEY_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Slash-separated key into the remote tree. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath(String);

impl StorePath {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        for (position, segment) in trimmed.split('/').enumerate() {
            let reserved = position == 0 && segment == RESERVED_PREFIX;
            if !reserved && !is_valid_key(segment) {
                return Err(DomainError::InvalidPath(raw.to_string()));
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn connectivity() -> Self {
        Self(CONNECTIVITY_PATH.to_string())
    }

    pub fn rooms() -> Self {
        Self(ROOMS_ROOT.to_string())
    }

    pub fn child(&self, segment: &str) -> Result<Self, DomainError> {
        if !is_valid_key(segment) {
            return Err(DomainError::InvalidPath(format!("{}/{segment}", self.0)));
        }
        if self.is_root() {
            return Ok(Self(segment.to_string()));
        }
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_reserved(&self) -> bool {
        self.segments().next() == Some(RESERVED_PREFIX)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// True when `other` equals this path or lives below it.
    pub fn contains(&self, other: &StorePath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }

    /// Segments of `other` below this path, when `other` is contained in it.
    pub fn relative<'a>(&self, other: &'a StorePath) -> Option<Vec<&'a str>> {
        if !self.contains(other) {
            return None;
        }
        let skip = self.segments().count();
        Some(other.segments().skip(skip).collect())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StorePath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorePath> for String {
    fn from(value: StorePath) -> Self {
        value.0
    }
}

fn is_valid_key(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.contains('/')
        && !segment
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_KEY_CHARS.contains(&c))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Room ids are entered by hand, so they are trimmed and upper-cased.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized = raw.trim().to_uppercase();
        if !is_valid_key(&normalized) {
            return Err(DomainError::InvalidRoomId(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Fan,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Light, DeviceKind::Fan];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Light => f.write_str("light"),
            DeviceKind::Fan => f.write_str("fan"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(DeviceKind::Light),
            "fan" => Ok(DeviceKind::Fan),
            other => Err(DomainError::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// One-based device slot within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIndex(pub u8);

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Temperature,
    Humidity,
    LightLevel,
    Presence,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [
        Sensor::Temperature,
        Sensor::Humidity,
        Sensor::LightLevel,
        Sensor::Presence,
    ];
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensor::Temperature => f.write_str("temperature"),
            Sensor::Humidity => f.write_str("humidity"),
            Sensor::LightLevel => f.write_str("light_level"),
            Sensor::Presence => f.write_str("presence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Sensor(Sensor),
    Command(DeviceKind, DeviceIndex),
    Actual(DeviceKind, DeviceIndex),
    FanSpeed(DeviceIndex),
    AutoMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub temperature: String,
    pub humidity: String,
    pub light_level: String,
    pub presence: String,
    pub light: String,
    pub fan: String,
    pub fan_speed: String,
    pub auto_mode: String,
    pub actual_prefix: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            temperature: "NhietDo".into(),
            humidity: "DoAm".into(),
            light_level: "AnhSang".into(),
            presence: "ChuyenDong".into(),
            light: "Den".into(),
            fan: "Quat".into(),
            fan_speed: "TocDoQuat".into(),
            auto_mode: "AutoMode".into(),
            actual_prefix: "Actual".into(),
        }
    }
}

impl FieldNames {
    pub fn sensor(&self, sensor: Sensor) -> &str {
        match sensor {
            Sensor::Temperature => &self.temperature,
            Sensor::Humidity => &self.humidity,
            Sensor::LightLevel => &self.light_level,
            Sensor::Presence => &self.presence,
        }
    }

    fn device(&self, kind: DeviceKind) -> &str {
        match kind {
            DeviceKind::Light => &self.light,
            DeviceKind::Fan => &self.fan,
        }
    }
}

/// Field naming and device layout shared by every room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSchema {
    pub names: FieldNames,
    pub device_count: u8,
}

impl Default for RoomSchema {
    fn default() -> Self {
        Self {
            names: FieldNames::default(),
            device_count: DEFAULT_DEVICE_COUNT,
        }
    }
}

impl RoomSchema {
    pub fn new(names: FieldNames, device_count: u8) -> Self {
        Self {
            names,
            device_count,
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = DeviceIndex> {
        (1..=self.device_count).map(DeviceIndex)
    }

    pub fn check_index(&self, index: DeviceIndex) -> Result<(), DomainError> {
        if index.0 == 0 || index.0 > self.device_count {
            return Err(DomainError::DeviceIndexOutOfRange {
                index: index.0,
                count: self.device_count,
            });
        }
        Ok(())
    }

    pub fn field_name(&self, field: &Field) -> String {
        match field {
            Field::Sensor(sensor) => self.names.sensor(*sensor).to_string(),
            Field::Command(kind, index) => format!("{}{}", self.names.device(*kind), index.0),
            Field::Actual(kind, index) => format!(
                "{}{}{}",
                self.names.actual_prefix,
                self.names.device(*kind),
                index.0
            ),
            Field::FanSpeed(index) => format!("{}{}", self.names.fan_speed, index.0),
            Field::AutoMode => self.names.auto_mode.clone(),
        }
    }

    pub fn room_path(&self, room: &RoomId) -> StorePath {
        StorePath(format!("{ROOMS_ROOT}/{}", room.as_str()))
    }

    pub fn path(&self, room: &RoomId, field: &Field) -> Result<StorePath, DomainError> {
        self.room_path(room).child(&self.field_name(field))
    }

    /// Every field a room view listens to.
    pub fn fields(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = Sensor::ALL.iter().copied().map(Field::Sensor).collect();
        fields.push(Field::AutoMode);
        for index in self.indices() {
            for kind in DeviceKind::ALL {
                fields.push(Field::Command(kind, index));
                fields.push(Field::Actual(kind, index));
            }
            fields.push(Field::FanSpeed(index));
        }
        fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_joins_paths() {
        let path = StorePath::parse("/Rooms/A1/").expect("path");
        assert_eq!(path.as_str(), "Rooms/A1");
        assert_eq!(path.child("Den1").expect("child").as_str(), "Rooms/A1/Den1");
        assert!(StorePath::parse("Rooms//A1").is_err());
        assert!(StorePath::parse("Rooms/A.1").is_err());
    }

    #[test]
    fn connectivity_path_is_reserved_but_valid() {
        let path = StorePath::parse(CONNECTIVITY_PATH).expect("reserved path");
        assert!(path.is_reserved());
        assert_eq!(path, StorePath::connectivity());
    }

    #[test]
    fn containment_respects_segment_boundaries() {
        let room = StorePath::parse("Rooms/A1").expect("room");
        let field = StorePath::parse("Rooms/A1/Den1").expect("field");
        let sibling = StorePath::parse("Rooms/A10").expect("sibling");
        assert!(room.contains(&field));
        assert!(!room.contains(&sibling));
        assert!(StorePath::root().contains(&sibling));
        assert_eq!(room.relative(&field), Some(vec!["Den1"]));
    }

    #[test]
    fn room_ids_are_normalized() {
        assert_eq!(RoomId::parse("  a1 ").expect("room").as_str(), "A1");
        assert!(RoomId::parse("   ").is_err());
        assert!(RoomId::parse("A/1").is_err());
    }

    #[test]
    fn schema_builds_command_and_actual_paths() {
        let schema = RoomSchema::default();
        let room = RoomId::parse("A1").expect("room");
        let command = schema
            .path(&room, &Field::Command(DeviceKind::Fan, DeviceIndex(2)))
            .expect("command path");
        let actual = schema
            .path(&room, &Field::Actual(DeviceKind::Light, DeviceIndex(3)))
            .expect("actual path");
        assert_eq!(command.as_str(), "Rooms/A1/Quat2");
        assert_eq!(actual.as_str(), "Rooms/A1/ActualDen3");
    }

    #[test]
    fn presence_field_name_is_configurable() {
        let names = FieldNames {
            presence: "PhatHienNguoi".into(),
            ..FieldNames::default()
        };
        let schema = RoomSchema::new(names, 3);
        assert_eq!(
            schema.field_name(&Field::Sensor(Sensor::Presence)),
            "PhatHienNguoi"
        );
    }

    #[test]
    fn device_index_bounds_are_checked() {
        let schema = RoomSchema::default();
        assert!(schema.check_index(DeviceIndex(1)).is_ok());
        assert!(schema.check_index(DeviceIndex(0)).is_err());
        assert!(schema.check_index(DeviceIndex(4)).is_err());
        assert_eq!(schema.fields().len(), 4 + 1 + 3 * 5);
    }
}
