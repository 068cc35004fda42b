use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset};
use tracing::{debug, info, warn};

use crate::{
    error::{ActuatorError, CheckError, InitError, TelemetryError},
    ports::{Actuator, TelemetryStore},
    types::{HeatingState, Room},
};

/// How rooms without configured occupants are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OccupancyPolicy {
    /// Accept rooms with no users and treat them as always occupied.
    pub allow_unoccupied: bool,
}

/// Outcome of one applied check. The command and the record are attempted
/// independently; their failures are reported here and never abort the cycle.
#[derive(Debug)]
pub struct Decision {
    pub state: HeatingState,
    pub actuator_error: Option<ActuatorError>,
    pub record_error: Option<TelemetryError>,
}

impl Decision {
    pub fn is_clean(&self) -> bool {
        self.actuator_error.is_none() && self.record_error.is_none()
    }
}

pub struct RoomController {
    room: Room,
    plug: Box<dyn Actuator>,
    store: Arc<dyn TelemetryStore>,
}

impl RoomController {
    /// Validates the room and confirms its plug answers.
    pub async fn initialize(
        room: Room,
        plug: Box<dyn Actuator>,
        store: Arc<dyn TelemetryStore>,
        policy: OccupancyPolicy,
    ) -> Result<Self, InitError> {
        Self::validate(&room, policy)?;

        plug.probe()
            .await
            .map_err(|source| InitError::ActuatorUnreachable {
                room: room.name.clone(),
                address: plug.address().to_string(),
                source,
            })?;

        Ok(Self { room, plug, store })
    }

    pub fn validate(room: &Room, policy: OccupancyPolicy) -> Result<(), InitError> {
        if room.name.is_empty() {
            return Err(InitError::EmptyName);
        }

        let window = room.window;
        if window.start > window.stop {
            return Err(InitError::WindowReversed {
                room: room.name.clone(),
            });
        } else if window.stop > Duration::hours(24) {
            return Err(InitError::WindowTooLong {
                room: room.name.clone(),
            });
        } else if window.start < Duration::zero() {
            return Err(InitError::WindowNegative {
                room: room.name.clone(),
            });
        }

        if room.users.is_empty() && !policy.allow_unoccupied {
            return Err(InitError::NoOccupants {
                room: room.name.clone(),
            });
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.room.name
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Runs one control iteration. A failed lookup returns early without
    /// commanding the plug, so the last applied state persists.
    pub async fn check(&self, now: DateTime<FixedOffset>) -> Result<Decision, CheckError> {
        let state = self.decide(now).await?;
        Ok(self.apply(state).await)
    }

    async fn decide(&self, now: DateTime<FixedOffset>) -> Result<HeatingState, CheckError> {
        if !self.active_hours(now) {
            return Ok(HeatingState::Idle);
        }

        let someone_home = if self.room.users.is_empty() {
            true
        } else {
            self.store
                .any_user_present(&self.room.users)
                .await
                .map_err(CheckError::Presence)?
        };

        let temp = self
            .store
            .current_temperature(&self.room.name)
            .await
            .map_err(CheckError::Temperature)?;

        debug!(
            "room {}: present={someone_home} temp={temp:.1} target={:.1}",
            self.room.name, self.room.target_temp
        );

        Ok(HeatingState::from_heating(
            someone_home && temp < self.room.target_temp,
        ))
    }

    async fn apply(&self, state: HeatingState) -> Decision {
        let command = if state.is_heating() {
            info!("room {}: heating", self.room.name);
            self.plug.turn_on().await
        } else {
            info!("room {}: cooling", self.room.name);
            self.plug.turn_off().await
        };

        let actuator_error = command.err();
        if let Some(err) = &actuator_error {
            warn!(
                "room {}: commanding plug {}: {err}",
                self.room.name,
                self.plug.address()
            );
            if let Err(fault_err) = self.store.record_actuator_fault(&self.room.name, err).await {
                warn!("room {}: recording plug fault: {fault_err}", self.room.name);
            }
        }

        let record_error = self
            .store
            .record_heating_state(&self.room.name, state)
            .await
            .err();
        if let Some(err) = &record_error {
            warn!("room {}: recording heating status: {err}", self.room.name);
        }

        Decision {
            state,
            actuator_error,
            record_error,
        }
    }

    fn active_hours(&self, now: DateTime<FixedOffset>) -> bool {
        let window = self.room.window;
        let time = now.time();
        if window.is_always() {
            return true;
        }

        let remaining = window.remaining(time);
        if window.contains(time) {
            debug!(
                "room {}: inside active hours for the next {}m",
                self.room.name,
                remaining.num_minutes()
            );
            true
        } else {
            debug!(
                "room {}: outside active hours for the next {}m",
                self.room.name,
                remaining.num_minutes()
            );
            false
        }
    }
}
