//! FT232H-based biosensor interface library for the MAX30102 and INA219
//!
//! This library drives a MAX30102 pulse-oximetry sensor (red/IR optical
//! samples and die temperature) and an INA219 power monitor (bus voltage and
//! current) sharing one I2C bus, and fuses their readings into a single
//! timestamped record stream.
//!
//! The drivers are written against [`RegisterTransport`], implemented by:
//! - [`ft232h::Ft232hTransport`] - FTDI FT232H via libMPSSE (feature `ftdi`)
//! - [`HalTransport`] - any `embedded-hal` 1.0 I2C bus
//! - [`SharedBus`] - one of the above shared between both drivers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use ft232_biosensor_interface::{
//!     AcquisitionLoop, LoopConfig, OpticalSensor, OpticalSensorConfig, PowerMonitor,
//!     RegisterTransport, SharedBus, StdDelay, StreamControl, TimeKeeper,
//! };
//!
//! fn log_forever<B: RegisterTransport>(bus: B) -> ft232_biosensor_interface::Result<()> {
//!     let bus = SharedBus::new(bus);
//!
//!     let mut optical = OpticalSensor::new(bus.clone());
//!     optical.init(&OpticalSensorConfig::default().with_led_current(0x32), &mut StdDelay)?;
//!
//!     let mut power = PowerMonitor::new(bus);
//!     power.init(0.1, 0.4)?;
//!
//!     let mut acquisition =
//!         AcquisitionLoop::new(optical, power, TimeKeeper::new(), StdDelay, LoopConfig::default());
//!
//!     let stop = AtomicBool::new(false);
//!     acquisition.run(&stop, |record| {
//!         println!("{}", record);
//!         StreamControl::Continue
//!     });
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod common;
pub mod error;
#[cfg(feature = "ftdi")]
mod ffi;
#[cfg(feature = "ftdi")]
pub mod ft232h;
pub mod ina219;
pub mod max30102;
pub mod transport;

#[cfg(test)]
mod fake;

// Re-export public API
pub use acquisition::{
    AcquisitionLoop, AcquisitionStats, FilterState, FusedRecord, LoopConfig, PowerFailurePolicy,
    StreamControl, CSV_HEADER,
};
pub use common::{MonotonicClock, StdDelay, TimeKeeper};
pub use error::{Result, SensorError, TransportError};
pub use ina219::{CalibrationConfig, PowerMonitor, PowerMonitorConfig, PowerReading};
pub use max30102::{
    LedMode, OpticalSensor, OpticalSensorConfig, RawOpticalSample, TemperatureReading,
};
pub use transport::{HalTransport, RegisterTransport, RegisterValue, SharedBus, Timeout};
