pub mod config;
pub mod error;
pub mod poller;
pub mod ports;
pub mod room;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfigFile, RecencyWindows, RoomConfig};
pub use error::{ActuatorError, CheckError, ConfigError, InitError, TelemetryError};
pub use poller::{Poller, RoomOutcome};
pub use ports::{Actuator, Clock, TelemetryStore};
pub use room::{Decision, OccupancyPolicy, RoomController};
pub use types::{ActiveWindow, HeatingState, Room, User};
