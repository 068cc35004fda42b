use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    time::Duration,
};

use chrono::{Duration as TimeOfDay, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    room::OccupancyPolicy,
    types::{ActiveWindow, Room, User},
};

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub name: String,
    pub plug_address: String,
    #[serde(default)]
    pub occupants: Vec<String>,
    pub target_temp: f64,
    pub start_time: String,
    pub stop_time: String,
}

/// Contents of the room file: known users by MAC address and the rooms they
/// occupy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub allow_unoccupied_rooms: bool,
    #[serde(default = "default_presence_window_secs")]
    pub presence_window_secs: u64,
    #[serde(default = "default_temperature_window_secs")]
    pub temperature_window_secs: u64,
}

fn default_presence_window_secs() -> u64 {
    300
}

fn default_temperature_window_secs() -> u64 {
    600
}

/// How far back the store looks for presence and temperature readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindows {
    pub presence: Duration,
    pub temperature: Duration,
}

impl Default for RecencyWindows {
    fn default() -> Self {
        Self {
            presence: Duration::from_secs(default_presence_window_secs()),
            temperature: Duration::from_secs(default_temperature_window_secs()),
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn occupancy_policy(&self) -> OccupancyPolicy {
        OccupancyPolicy {
            allow_unoccupied: self.allow_unoccupied_rooms,
        }
    }

    pub fn recency_windows(&self) -> RecencyWindows {
        RecencyWindows {
            presence: Duration::from_secs(self.presence_window_secs),
            temperature: Duration::from_secs(self.temperature_window_secs),
        }
    }

    /// Resolves occupant names and parses active hours for every room. Room
    /// names key the telemetry series, so each must be unique.
    pub fn rooms(&self) -> Result<Vec<Room>, ConfigError> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.rooms.iter().find(|rc| !seen.insert(rc.name.as_str())) {
            return Err(ConfigError::DuplicateRoom {
                room: dup.name.clone(),
            });
        }

        self.rooms
            .iter()
            .map(|rc| -> Result<Room, ConfigError> {
                let start = parse_time_of_day(&rc.name, "start", &rc.start_time)?;
                let stop = parse_time_of_day(&rc.name, "stop", &rc.stop_time)?;

                let users = rc
                    .occupants
                    .iter()
                    .map(|name| {
                        self.users
                            .get(name)
                            .map(|mac| User::new(name.clone(), mac.clone()))
                            .ok_or_else(|| ConfigError::UnknownUser {
                                room: rc.name.clone(),
                                user: name.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Room {
                    name: rc.name.clone(),
                    users,
                    target_temp: rc.target_temp,
                    plug_address: rc.plug_address.clone(),
                    window: ActiveWindow::new(start, stop),
                })
            })
            .collect()
    }
}

/// Parses `HH:MM` into an offset from midnight. `24:00` marks the end of day.
fn parse_time_of_day(
    room: &str,
    field: &'static str,
    value: &str,
) -> Result<TimeOfDay, ConfigError> {
    if value.trim() == "24:00" {
        return Ok(TimeOfDay::hours(24));
    }

    let time = NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|_| {
        ConfigError::InvalidTime {
            room: room.to_string(),
            field,
            value: value.to_string(),
        }
    })?;

    Ok(TimeOfDay::hours(i64::from(time.hour())) + TimeOfDay::minutes(i64::from(time.minute())))
}
