//! In-memory doubles for the actuator and telemetry capabilities.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};

use crate::{
    error::{ActuatorError, TelemetryError},
    ports::{Actuator, Clock, TelemetryStore},
    types::{ActiveWindow, HeatingState, Room, User},
};

pub fn fixed_time(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(3600)
        .unwrap()
        .with_ymd_and_hms(2026, 1, 5, hour, minute, 0)
        .unwrap()
}

pub fn room(name: &str, users: Vec<User>) -> Room {
    Room {
        name: name.to_string(),
        users,
        target_temp: 21.0,
        plug_address: format!("{}.plug.local", name.to_lowercase()),
        window: ActiveWindow::from_minutes(7 * 60, 22 * 60),
    }
}

#[derive(Default)]
pub struct FakeStore {
    present_macs: HashSet<String>,
    failing_macs: HashSet<String>,
    temperatures: HashMap<String, f64>,
    fail_writes: bool,
    presence_queries: AtomicUsize,
    temperature_queries: AtomicUsize,
    records: Mutex<Vec<(String, HeatingState)>>,
    faults: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_present(mut self, mac: &str) -> Self {
        self.present_macs.insert(mac.to_string());
        self
    }

    pub fn with_failing_presence(mut self, mac: &str) -> Self {
        self.failing_macs.insert(mac.to_string());
        self
    }

    pub fn with_temperature(mut self, room: &str, temp: f64) -> Self {
        self.temperatures.insert(room.to_string(), temp);
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn presence_queries(&self) -> usize {
        self.presence_queries.load(Ordering::SeqCst)
    }

    pub fn temperature_queries(&self) -> usize {
        self.temperature_queries.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<(String, HeatingState)> {
        self.records.lock().unwrap().clone()
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryStore for FakeStore {
    async fn any_user_present(&self, users: &[User]) -> Result<bool, TelemetryError> {
        self.presence_queries.fetch_add(1, Ordering::SeqCst);
        if users
            .iter()
            .any(|user| self.failing_macs.contains(&user.mac_address))
        {
            return Err(TelemetryError::Query("connection refused".to_string()));
        }
        Ok(users
            .iter()
            .any(|user| self.present_macs.contains(&user.mac_address)))
    }

    async fn current_temperature(&self, room: &str) -> Result<f64, TelemetryError> {
        self.temperature_queries.fetch_add(1, Ordering::SeqCst);
        self.temperatures
            .get(room)
            .copied()
            .ok_or_else(|| TelemetryError::NotFound {
                metric: "temperature",
                location: room.to_string(),
                window: Duration::from_secs(600),
            })
    }

    async fn record_heating_state(
        &self,
        room: &str,
        state: HeatingState,
    ) -> Result<(), TelemetryError> {
        if self.fail_writes {
            return Err(TelemetryError::Write("disk full".to_string()));
        }
        self.records.lock().unwrap().push((room.to_string(), state));
        Ok(())
    }

    async fn record_actuator_fault(
        &self,
        room: &str,
        _error: &ActuatorError,
    ) -> Result<(), TelemetryError> {
        self.faults.lock().unwrap().push(room.to_string());
        Ok(())
    }
}

pub struct FakePlug {
    address: String,
    commands: Arc<Mutex<Vec<HeatingState>>>,
    fail_commands: bool,
    unreachable: bool,
}

impl FakePlug {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            commands: Arc::new(Mutex::new(Vec::new())),
            fail_commands: false,
            unreachable: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Handle to the command log that survives boxing the plug.
    pub fn commands(&self) -> Arc<Mutex<Vec<HeatingState>>> {
        Arc::clone(&self.commands)
    }

    fn command(&self, state: HeatingState) -> Result<(), ActuatorError> {
        self.commands.lock().unwrap().push(state);
        if self.fail_commands {
            return Err(ActuatorError::Protocol("err_code -1".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for FakePlug {
    fn address(&self) -> &str {
        &self.address
    }

    async fn probe(&self) -> Result<(), ActuatorError> {
        if self.unreachable {
            return Err(ActuatorError::Timeout(Duration::from_secs(5)));
        }
        Ok(())
    }

    async fn turn_on(&self) -> Result<(), ActuatorError> {
        self.command(HeatingState::Heating)
    }

    async fn turn_off(&self) -> Result<(), ActuatorError> {
        self.command(HeatingState::Idle)
    }
}

pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}
