use chrono::{Duration, NaiveTime, Timelike};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub mac_address: String,
}

impl User {
    pub fn new(name: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac_address: mac_address.into(),
        }
    }
}

/// Daily interval during which a room may heat, as offsets from midnight.
///
/// `0..0` means the room is always active. Windows crossing midnight are not
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: Duration,
    pub stop: Duration,
}

impl ActiveWindow {
    pub fn always() -> Self {
        Self::new(Duration::zero(), Duration::zero())
    }

    pub fn new(start: Duration, stop: Duration) -> Self {
        Self { start, stop }
    }

    pub fn from_minutes(start: i64, stop: i64) -> Self {
        Self::new(Duration::minutes(start), Duration::minutes(stop))
    }

    pub fn is_always(&self) -> bool {
        self.start.is_zero() && self.stop.is_zero()
    }

    /// Boundary minutes are outside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.is_always() {
            return true;
        }
        let now = minute_of_day(time);
        now > self.start && now < self.stop
    }

    /// Time left until the window closes, or until it next opens when outside.
    pub fn remaining(&self, time: NaiveTime) -> Duration {
        let now = minute_of_day(time);
        if self.contains(time) {
            self.stop - now
        } else if now <= self.start {
            self.start - now
        } else {
            self.start + Duration::hours(24) - now
        }
    }
}

fn minute_of_day(time: NaiveTime) -> Duration {
    Duration::hours(i64::from(time.hour())) + Duration::minutes(i64::from(time.minute()))
}

/// Static configuration of one physical room.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub name: String,
    pub users: Vec<User>,
    pub target_temp: f64,
    pub plug_address: String,
    pub window: ActiveWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatingState {
    Idle,
    Heating,
}

impl HeatingState {
    pub fn from_heating(heating: bool) -> Self {
        if heating {
            Self::Heating
        } else {
            Self::Idle
        }
    }

    pub fn is_heating(self) -> bool {
        self == Self::Heating
    }

    /// Numeric code written alongside the boolean heating field.
    pub fn status_code(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Heating => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
        }
    }
}
