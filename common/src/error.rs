use std::time::Duration;

use thiserror::Error;

/// Fatal problems found while bringing a room online.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("room requires a name")]
    EmptyName,
    #[error("room {room}: start time cannot be greater than stop time")]
    WindowReversed { room: String },
    #[error("room {room}: stop time must be at most 24h")]
    WindowTooLong { room: String },
    #[error("room {room}: start time must be >= 0")]
    WindowNegative { room: String },
    #[error("room {room}: at least one user is required")]
    NoOccupants { room: String },
    #[error("room {room}: initializing plug at {address}")]
    ActuatorUnreachable {
        room: String,
        address: String,
        #[source]
        source: ActuatorError,
    },
}

/// A telemetry lookup failed, so the room was left untouched this cycle.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("checking for present user: {0}")]
    Presence(#[source] TelemetryError),
    #[error("getting current temp: {0}")]
    Temperature(#[source] TelemetryError),
    #[error("check aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("no {metric} in last {}m with location {location}", .window.as_secs() / 60)]
    NotFound {
        metric: &'static str,
        location: String,
        window: Duration,
    },
    #[error("querying telemetry store: {0}")]
    Query(String),
    #[error("writing to telemetry store: {0}")]
    Write(String),
    #[error("malformed telemetry response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("invalid plug address {0:?}")]
    InvalidAddress(String),
    #[error("plug i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("plug did not answer within {0:?}")]
    Timeout(Duration),
    #[error("plug protocol: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading file: {0}")]
    Read(#[from] std::io::Error),
    #[error("unmarshaling file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("room {room}: parsing {field} time {value:?}")]
    InvalidTime {
        room: String,
        field: &'static str,
        value: String,
    },
    #[error("room {room}: no such user {user}")]
    UnknownUser { room: String, user: String },
    #[error("room {room}: name is used by more than one room")]
    DuplicateRoom { room: String },
}
