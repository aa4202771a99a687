//! Fused acquisition loop
//!
//! Polls the MAX30102 FIFO on a fixed cadence, refreshes die temperature on a
//! slower cadence, smooths the INA219 readings with a single-pole EMA and
//! emits one [`FusedRecord`] per successful FIFO read.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::delay::DelayNs;
use log::{debug, error, info};

use crate::common::MonotonicClock;
use crate::ina219::PowerMonitor;
use crate::max30102::{OpticalSensor, RawOpticalSample, TemperatureReading};
use crate::transport::RegisterTransport;

/// CSV header matching [`FusedRecord`]'s `Display` output; the offline PPG
/// analysis and serial logger scripts key on these column names
pub const CSV_HEADER: &str = "Time(ms),Red,IR,Temp,Bus_V,Current_mA";

const DEFAULT_CADENCE_MS: u32 = 10;
const DEFAULT_TEMPERATURE_REFRESH_MS: u64 = 2000;
const DEFAULT_ALPHA: f64 = 0.1;

/// Control flow for streaming operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Continue streaming
    Continue,
    /// Stop streaming
    Break,
}

/// What a failed INA219 read feeds into the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerFailurePolicy {
    /// A failed channel reads as 0.0 and the filter update proceeds. A cold
    /// filter is only seeded by a complete reading and reports 0.0 until then.
    #[default]
    BestEffort,
    /// A failed channel keeps its previous smoothed value; a cold filter
    /// stays cold until both channels read successfully
    HoldLast,
}

/// Loop timing and filter settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    /// Delay after every cycle, successful or not
    pub cadence_ms: u32,
    /// Minimum age of the temperature before a new conversion is started
    pub temperature_refresh_ms: u64,
    /// EMA weight of the newest power reading
    pub alpha: f64,
    /// Settling time before the first cycle
    pub warmup_ms: u32,
    pub power_policy: PowerFailurePolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cadence_ms: DEFAULT_CADENCE_MS,
            temperature_refresh_ms: DEFAULT_TEMPERATURE_REFRESH_MS,
            alpha: DEFAULT_ALPHA,
            warmup_ms: 0,
            power_policy: PowerFailurePolicy::BestEffort,
        }
    }
}

/// Smoothed bus voltage and current
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SmoothedPower {
    pub bus_voltage_v: f64,
    pub current_ma: f64,
}

/// Exponential moving average over bus voltage and current
///
/// Cold until the first update, which seeds both channels with the raw values
/// instead of blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    alpha: f64,
    ema: Option<SmoothedPower>,
}

impl FilterState {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, ema: None }
    }

    pub fn is_cold(&self) -> bool {
        self.ema.is_none()
    }

    /// Current smoothed values, `None` while cold
    pub fn smoothed(&self) -> Option<SmoothedPower> {
        self.ema
    }

    /// Fold in one raw reading of both channels
    pub fn update(&mut self, bus_voltage_v: f64, current_ma: f64) -> SmoothedPower {
        let next = match self.ema {
            None => SmoothedPower {
                bus_voltage_v,
                current_ma,
            },
            Some(prev) => SmoothedPower {
                bus_voltage_v: self.blend(bus_voltage_v, prev.bus_voltage_v),
                current_ma: self.blend(current_ma, prev.current_ma),
            },
        };
        self.ema = Some(next);
        next
    }

    /// Fold in whichever channels were read; missing channels keep their
    /// previous value. A cold filter only seeds from a complete reading.
    pub fn update_available(
        &mut self,
        bus_voltage_v: Option<f64>,
        current_ma: Option<f64>,
    ) -> Option<SmoothedPower> {
        match (self.ema, bus_voltage_v, current_ma) {
            (None, Some(v), Some(i)) => Some(self.update(v, i)),
            (None, _, _) => None,
            (Some(prev), v, i) => {
                let next = SmoothedPower {
                    bus_voltage_v: v.map_or(prev.bus_voltage_v, |v| self.blend(v, prev.bus_voltage_v)),
                    current_ma: i.map_or(prev.current_ma, |i| self.blend(i, prev.current_ma)),
                };
                self.ema = Some(next);
                Some(next)
            }
        }
    }

    fn blend(&self, raw: f64, prev: f64) -> f64 {
        self.alpha * raw + (1.0 - self.alpha) * prev
    }
}

/// One output line: raw optical counts, latest temperature, smoothed power
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedRecord {
    pub timestamp_ms: u64,
    pub red: u32,
    pub ir: u32,
    pub temperature_c: f32,
    pub bus_voltage_v: f64,
    pub current_ma: f64,
}

impl fmt::Display for FusedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{:.2},{:.3},{:.3}",
            self.timestamp_ms,
            self.red,
            self.ir,
            self.temperature_c,
            self.bus_voltage_v,
            self.current_ma
        )
    }
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionStats {
    pub cycles: u64,
    pub records: u64,
    pub fifo_failures: u64,
    pub power_failures: u64,
    pub temperature_failures: u64,
    pub temperature_timeouts: u64,
}

/// Drives both sensors and fuses their output
pub struct AcquisitionLoop<O, P, C, D> {
    optical: OpticalSensor<O>,
    power: PowerMonitor<P>,
    clock: C,
    delay: D,
    config: LoopConfig,
    filter: FilterState,
    temperature: Option<TemperatureReading>,
    last_temperature_refresh_ms: u64,
    stats: AcquisitionStats,
}

impl<O, P, C, D> AcquisitionLoop<O, P, C, D>
where
    O: RegisterTransport,
    P: RegisterTransport,
    C: MonotonicClock,
    D: DelayNs,
{
    /// Both sensors must already be initialized
    pub fn new(
        optical: OpticalSensor<O>,
        power: PowerMonitor<P>,
        clock: C,
        delay: D,
        config: LoopConfig,
    ) -> Self {
        Self {
            optical,
            power,
            clock,
            delay,
            filter: FilterState::new(config.alpha),
            config,
            temperature: None,
            last_temperature_refresh_ms: 0,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Latest temperature in Celsius, 0.0 before the first successful read
    pub fn temperature_c(&self) -> f32 {
        self.temperature.map_or(0.0, |t| t.celsius())
    }

    /// Run until `stop` is raised or the sink returns `StreamControl::Break`
    ///
    /// Waits out the warm-up, takes one priming temperature reading, then
    /// cycles every `cadence_ms`. Sensor failures never end the loop.
    ///
    /// # Arguments
    /// * `stop` - Checked before the warm-up, before the priming read and
    ///   before every cycle
    /// * `sink` - Called with each fused record
    ///
    /// # Returns
    /// Counters for the whole run
    pub fn run<F>(&mut self, stop: &AtomicBool, mut sink: F) -> AcquisitionStats
    where
        F: FnMut(&FusedRecord) -> StreamControl,
    {
        if stop.load(Ordering::SeqCst) {
            return self.stats;
        }

        if self.config.warmup_ms > 0 {
            info!("Warming up for {} ms", self.config.warmup_ms);
            self.delay.delay_ms(self.config.warmup_ms);
        }

        if stop.load(Ordering::SeqCst) {
            return self.stats;
        }

        // First reading so the early records carry a real temperature
        self.read_temperature();

        while !stop.load(Ordering::SeqCst) {
            if let Some(record) = self.step() {
                if sink(&record) == StreamControl::Break {
                    break;
                }
            }
            self.delay.delay_ms(self.config.cadence_ms);
        }

        debug!("Acquisition stopped: {:?}", self.stats);
        self.stats
    }

    /// One cycle body, without the cadence delay
    ///
    /// Returns `None` when the FIFO read fails; the failure is only counted.
    pub fn step(&mut self) -> Option<FusedRecord> {
        self.stats.cycles += 1;

        let sample: RawOpticalSample = match self.optical.read_fifo_sample() {
            Ok(sample) => sample,
            Err(_) => {
                self.stats.fifo_failures += 1;
                return None;
            }
        };

        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_temperature_refresh_ms) > self.config.temperature_refresh_ms {
            self.read_temperature();
            self.last_temperature_refresh_ms = self.clock.now_ms();
        }

        let smoothed = self.update_power();

        self.stats.records += 1;
        Some(FusedRecord {
            timestamp_ms: self.clock.now_ms(),
            red: sample.red,
            ir: sample.ir,
            temperature_c: self.temperature_c(),
            bus_voltage_v: smoothed.bus_voltage_v,
            current_ma: smoothed.current_ma,
        })
    }

    fn read_temperature(&mut self) {
        match self.optical.read_temperature(&mut self.delay) {
            Ok(reading) => {
                if reading.conversion_timed_out {
                    self.stats.temperature_timeouts += 1;
                }
                self.temperature = Some(reading);
            }
            Err(e) => {
                error!("Temperature read failed: {}", e);
                self.stats.temperature_failures += 1;
            }
        }
    }

    fn update_power(&mut self) -> SmoothedPower {
        let bus_voltage = self.power.read_bus_voltage().ok().map(f64::from);
        let current = self.power.read_current().ok().map(f64::from);
        if bus_voltage.is_none() || current.is_none() {
            self.stats.power_failures += 1;
        }

        match self.config.power_policy {
            PowerFailurePolicy::BestEffort => match (bus_voltage, current) {
                (Some(v), Some(i)) => self.filter.update(v, i),
                _ if self.filter.is_cold() => SmoothedPower::default(),
                (v, i) => self.filter.update(v.unwrap_or(0.0), i.unwrap_or(0.0)),
            },
            PowerFailurePolicy::HoldLast => self
                .filter
                .update_available(bus_voltage, current)
                .unwrap_or_default(),
        }
    }
}
