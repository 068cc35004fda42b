use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::{
    error::{ActuatorError, TelemetryError},
    types::{HeatingState, User},
};

/// A switchable heating outlet owned by exactly one room.
#[async_trait]
pub trait Actuator: Send + Sync {
    fn address(&self) -> &str;

    /// Confirms the device answers. Called once while the room is initialized.
    async fn probe(&self) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn turn_on(&self) -> Result<(), ActuatorError>;

    async fn turn_off(&self) -> Result<(), ActuatorError>;
}

/// Time-series backend shared by every room. Implementations must tolerate
/// concurrent calls from all rooms in a cycle.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Reports whether any of the given users has been seen recently.
    async fn any_user_present(&self, users: &[User]) -> Result<bool, TelemetryError>;

    /// Latest temperature reported for a room. Stale or missing readings are
    /// returned as [`TelemetryError::NotFound`].
    async fn current_temperature(&self, room: &str) -> Result<f64, TelemetryError>;

    async fn record_heating_state(
        &self,
        room: &str,
        state: HeatingState,
    ) -> Result<(), TelemetryError>;

    async fn record_actuator_fault(
        &self,
        _room: &str,
        _error: &ActuatorError,
    ) -> Result<(), TelemetryError> {
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}
