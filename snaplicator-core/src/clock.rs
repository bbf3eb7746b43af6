//! Time source for volume and container naming.

use chrono::{DateTime, Local, TimeZone};
use std::sync::Mutex;

/// Format used in every generated name: second resolution, sorts chronologically.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Supplies the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// Current time as `YYYYMMDD-HHMMSS`.
    fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Local system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to a settable instant. Used by tests and dry runs.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Clock pinned to the given local date and time.
    ///
    /// # Panics
    /// Panics if the components do not form a valid local time.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        let now = Local
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .expect("valid local time");
        Self::new(now)
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}
