//! Battery precondition for installs.
//!
//! Some fuel gauges report a placeholder capacity until their profile loads.
//! `BatteryGate` waits that out in one-second steps against an injectable
//! `Clock`, bounded by a hard deadline, then decides once.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::InstallConfig;
use crate::logger::session::LogHandle;

const SETTLE_STEP: Duration = Duration::from_secs(1);

// ──────────────────── readings ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Unknown,
    Charging,
    Discharging,
    NotCharging,
    Full,
}

impl ChargeStatus {
    /// Parse a sysfs `status` value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Charging" => Self::Charging,
            "Discharging" => Self::Discharging,
            "Not charging" => Self::NotCharging,
            "Full" => Self::Full,
            _ => Self::Unknown,
        }
    }

    /// Unknown counts as charged.
    #[must_use]
    pub const fn is_charged(self) -> bool {
        !matches!(self, Self::Discharging | Self::NotCharging)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub status: ChargeStatus,
    /// `None` when the capacity could not be read.
    pub capacity: Option<i32>,
}

pub trait BatteryMonitor: Send + Sync {
    fn read(&self) -> BatteryReading;
}

/// Battery telemetry from `/sys/class/power_supply`.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new("/sys/class/power_supply")
    }
}

impl SysfsBattery {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn battery_dir(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.root).ok()?;
        entries.flatten().map(|entry| entry.path()).find(|dir| {
            fs::read_to_string(dir.join("type")).is_ok_and(|kind| kind.trim() == "Battery")
        })
    }

    fn read_value(dir: &Path, name: &str) -> Option<String> {
        fs::read_to_string(dir.join(name)).ok()
    }
}

impl BatteryMonitor for SysfsBattery {
    fn read(&self) -> BatteryReading {
        let Some(dir) = self.battery_dir() else {
            return BatteryReading {
                status: ChargeStatus::Unknown,
                capacity: None,
            };
        };
        BatteryReading {
            status: Self::read_value(&dir, "status")
                .map_or(ChargeStatus::Unknown, |raw| ChargeStatus::parse(&raw)),
            capacity: Self::read_value(&dir, "capacity").and_then(|raw| raw.trim().parse().ok()),
        }
    }
}

/// Replays readings in order, repeating the last one forever.
#[derive(Debug)]
pub struct ScriptedBattery {
    readings: Mutex<VecDeque<BatteryReading>>,
    reads: Mutex<usize>,
}

impl ScriptedBattery {
    #[must_use]
    pub fn new<I: IntoIterator<Item = BatteryReading>>(readings: I) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            reads: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn steady(status: ChargeStatus, capacity: i32) -> Self {
        Self::new([BatteryReading {
            status,
            capacity: Some(capacity),
        }])
    }

    #[must_use]
    pub fn reads(&self) -> usize {
        *self.reads.lock()
    }
}

impl BatteryMonitor for ScriptedBattery {
    fn read(&self) -> BatteryReading {
        *self.reads.lock() += 1;
        let mut readings = self.readings.lock();
        if readings.len() > 1
            && let Some(reading) = readings.pop_front()
        {
            return reading;
        }
        readings.front().copied().unwrap_or(BatteryReading {
            status: ChargeStatus::Unknown,
            capacity: None,
        })
    }
}

// ──────────────────── clocks ────────────────────

pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock whose `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock() += duration;
        self.sleeps.lock().push(duration);
    }
}

// ──────────────────── gate ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryThresholds {
    pub ok_pct: i32,
    pub with_charger_ok_pct: i32,
    pub placeholder_capacity: i32,
    pub settle_timeout: Duration,
}

impl BatteryThresholds {
    #[must_use]
    pub fn from_config(install: &InstallConfig) -> Self {
        Self {
            ok_pct: install.battery_ok_pct,
            with_charger_ok_pct: install.battery_with_charger_ok_pct,
            placeholder_capacity: install.battery_placeholder_capacity,
            settle_timeout: Duration::from_secs(install.battery_settle_timeout_secs),
        }
    }

    #[must_use]
    pub fn is_sufficient(&self, charged: bool, capacity: i32) -> bool {
        (charged && capacity >= self.with_charger_ok_pct)
            || (!charged && capacity >= self.ok_pct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Reading,
    Settling,
    Decided(bool),
}

pub struct BatteryGate<'a> {
    monitor: &'a dyn BatteryMonitor,
    clock: &'a dyn Clock,
    thresholds: BatteryThresholds,
    log: &'a LogHandle,
}

impl<'a> BatteryGate<'a> {
    #[must_use]
    pub fn new(
        monitor: &'a dyn BatteryMonitor,
        clock: &'a dyn Clock,
        thresholds: BatteryThresholds,
        log: &'a LogHandle,
    ) -> Self {
        Self {
            monitor,
            clock,
            thresholds,
            log,
        }
    }

    /// Whether there is enough charge to start an install.
    #[must_use]
    pub fn check(&self) -> bool {
        let deadline = self.clock.now() + self.thresholds.settle_timeout;
        let mut state = GateState::Reading;
        loop {
            state = match state {
                GateState::Reading => {
                    let reading = self.monitor.read();
                    let charged = reading.status.is_charged();
                    self.log.info(format!(
                        "charge_status {:?}, charged {}, capacity {}",
                        reading.status,
                        u8::from(charged),
                        reading
                            .capacity
                            .map_or_else(|| "unknown".to_string(), |c| c.to_string())
                    ));
                    match reading.capacity {
                        Some(capacity)
                            if capacity == self.thresholds.placeholder_capacity
                                && self.clock.now() < deadline =>
                        {
                            GateState::Settling
                        }
                        // No readable capacity: probably no battery at all.
                        None => GateState::Decided(self.thresholds.is_sufficient(charged, 100)),
                        Some(capacity) => {
                            GateState::Decided(self.thresholds.is_sufficient(charged, capacity))
                        }
                    }
                }
                GateState::Settling => {
                    self.clock.sleep(SETTLE_STEP);
                    GateState::Reading
                }
                GateState::Decided(ok) => return ok,
            };
        }
    }
}
