//! INA219 power monitor driver (bus voltage + shunt current)

use log::{debug, info, warn};

use crate::error::{Result, SensorError, TransportError};
use crate::transport::{RegisterTransport, RegisterValue, Timeout};

/// Default INA219 I2C address (A0 = A1 = GND)
pub const INA219_ADDRESS: u8 = 0x40;

// INA219 register addresses
const REG_CONFIG: u8 = 0x00;
const REG_SHUNT_VOLTAGE: u8 = 0x01;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_POWER: u8 = 0x03;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

// Fixed scale factors
const CURRENT_LSB_MA: f32 = 0.01;         // 10 uA per count
const BUS_VOLTAGE_LSB_V: f32 = 0.004;     // 4 mV per count
const SHUNT_VOLTAGE_LSB_MV: f32 = 0.01;   // 10 uV per count
const POWER_LSB_FACTOR: f32 = 20.0;       // Power LSB = 20 x current LSB
const BUS_VOLTAGE_STATUS_BITS: u16 = 3;   // CNVR, OVF and a reserved bit

// Calibration = trunc(0.04096 / (Current_LSB * R_shunt))
const CALIBRATION_SCALE: f64 = 0.04096;
const CURRENT_LSB_A: f64 = 1e-5;
const CURRENT_FULL_SCALE_COUNTS: f64 = 32768.0;

/// Bus voltage full-scale range (config bit 13)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusVoltageRange {
    V16 = 0,
    V32 = 1,
}

/// Shunt PGA gain and range (config bits 12-11)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuntGain {
    /// Gain 1, +/-40 mV
    Div1 = 0,
    /// Gain 1/2, +/-80 mV
    Div2 = 1,
    /// Gain 1/4, +/-160 mV
    Div4 = 2,
    /// Gain 1/8, +/-320 mV
    Div8 = 3,
}

impl ShuntGain {
    fn from_code(code: u16) -> Self {
        match code & 0b11 {
            0 => ShuntGain::Div1,
            1 => ShuntGain::Div2,
            2 => ShuntGain::Div4,
            _ => ShuntGain::Div8,
        }
    }
}

/// ADC resolution / averaging (BADC bits 10-7, SADC bits 6-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcSetting {
    Bits9 = 0b0000,
    Bits10 = 0b0001,
    Bits11 = 0b0010,
    Bits12 = 0b0011,
    Samples2 = 0b1001,
    Samples4 = 0b1010,
    Samples8 = 0b1011,
    Samples16 = 0b1100,
    Samples32 = 0b1101,
    Samples64 = 0b1110,
    Samples128 = 0b1111,
}

impl AdcSetting {
    /// Decode a 4-bit field. Bit 2 is don't-care for single-sample codes,
    /// and 0b1000 is an alias of 12-bit.
    fn from_code(code: u16) -> Self {
        if code & 0b1000 == 0 {
            match code & 0b11 {
                0 => AdcSetting::Bits9,
                1 => AdcSetting::Bits10,
                2 => AdcSetting::Bits11,
                _ => AdcSetting::Bits12,
            }
        } else {
            match code & 0b111 {
                0 => AdcSetting::Bits12,
                1 => AdcSetting::Samples2,
                2 => AdcSetting::Samples4,
                3 => AdcSetting::Samples8,
                4 => AdcSetting::Samples16,
                5 => AdcSetting::Samples32,
                6 => AdcSetting::Samples64,
                _ => AdcSetting::Samples128,
            }
        }
    }
}

/// Operating mode (config bits 2-0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    PowerDown = 0,
    ShuntTriggered = 1,
    BusTriggered = 2,
    ShuntBusTriggered = 3,
    AdcOff = 4,
    ShuntContinuous = 5,
    BusContinuous = 6,
    ShuntBusContinuous = 7,
}

impl OperatingMode {
    fn from_code(code: u16) -> Self {
        match code & 0b111 {
            0 => OperatingMode::PowerDown,
            1 => OperatingMode::ShuntTriggered,
            2 => OperatingMode::BusTriggered,
            3 => OperatingMode::ShuntBusTriggered,
            4 => OperatingMode::AdcOff,
            5 => OperatingMode::ShuntContinuous,
            6 => OperatingMode::BusContinuous,
            _ => OperatingMode::ShuntBusContinuous,
        }
    }
}

/// Configuration register (0x00) as named fields
///
/// | Bits  | Field           |
/// |-------|-----------------|
/// | 13    | bus range       |
/// | 12-11 | PGA gain        |
/// | 10-7  | bus ADC         |
/// | 6-3   | shunt ADC       |
/// | 2-0   | operating mode  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerMonitorConfig {
    pub bus_range: BusVoltageRange,
    pub gain: ShuntGain,
    pub bus_adc: AdcSetting,
    pub shunt_adc: AdcSetting,
    pub mode: OperatingMode,
}

impl PowerMonitorConfig {
    /// 16 V range, +/-40 mV, 128-sample averaging on both ADCs, continuous
    pub const LOW_CURRENT: Self = Self {
        bus_range: BusVoltageRange::V16,
        gain: ShuntGain::Div1,
        bus_adc: AdcSetting::Samples128,
        shunt_adc: AdcSetting::Samples128,
        mode: OperatingMode::ShuntBusContinuous,
    };

    pub fn pack(&self) -> u16 {
        ((self.bus_range as u16) << 13)
            | ((self.gain as u16) << 11)
            | ((self.bus_adc as u16) << 7)
            | ((self.shunt_adc as u16) << 3)
            | self.mode as u16
    }

    pub fn unpack(raw: u16) -> Self {
        Self {
            bus_range: if raw & (1 << 13) != 0 {
                BusVoltageRange::V32
            } else {
                BusVoltageRange::V16
            },
            gain: ShuntGain::from_code(raw >> 11),
            bus_adc: AdcSetting::from_code((raw >> 7) & 0x0F),
            shunt_adc: AdcSetting::from_code((raw >> 3) & 0x0F),
            mode: OperatingMode::from_code(raw),
        }
    }
}

/// Shunt resistor and expected current range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    pub shunt_ohms: f64,
    pub max_current_amps: f64,
}

impl Default for CalibrationConfig {
    /// 0.1 Ohm shunt, 400 mA
    fn default() -> Self {
        Self {
            shunt_ohms: 0.1,
            max_current_amps: 0.4,
        }
    }
}

impl CalibrationConfig {
    /// Calibration register value for the fixed 0.01 mA current LSB
    ///
    /// # Returns
    /// * `Ok(u16)` - Value for register 0x05 (0.1 Ohm gives 40960)
    /// * `Err(SensorError::InvalidParameter)` - Non-positive input, or a
    ///   value that does not fit the 16-bit register
    pub fn calibration_register(&self) -> Result<u16> {
        let shunt = self.shunt_ohms;
        let max_current = self.max_current_amps;

        if !(shunt.is_finite() && shunt > 0.0) {
            return Err(SensorError::InvalidParameter(format!(
                "Shunt resistance must be positive, got {}",
                self.shunt_ohms
            )));
        }
        if !(max_current.is_finite() && max_current > 0.0) {
            return Err(SensorError::InvalidParameter(format!(
                "Max current must be positive, got {}",
                self.max_current_amps
            )));
        }

        let calibration = (CALIBRATION_SCALE / (CURRENT_LSB_A * shunt)).floor();

        if calibration < 1.0 || calibration > u16::MAX as f64 {
            return Err(SensorError::InvalidParameter(format!(
                "Calibration {} out of range for {} Ohm shunt",
                calibration, self.shunt_ohms
            )));
        }

        Ok(calibration as u16)
    }

    /// Smallest current LSB that covers `max_current_amps` over 15 bits
    pub fn minimum_current_lsb_amps(&self) -> f64 {
        self.max_current_amps / CURRENT_FULL_SCALE_COUNTS
    }
}

/// One bus voltage + current sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerReading {
    pub bus_voltage_v: f32,
    pub current_ma: f32,
}

/// Convert a raw current register value to milliamps
pub fn current_from_raw(raw: u16) -> f32 {
    raw as i16 as f32 * CURRENT_LSB_MA
}

/// Convert a raw bus voltage register value to volts
pub fn bus_voltage_from_raw(raw: u16) -> f32 {
    (raw >> BUS_VOLTAGE_STATUS_BITS) as f32 * BUS_VOLTAGE_LSB_V
}

/// INA219 power monitor on a register transport
pub struct PowerMonitor<T> {
    bus: T,
    address: u8,
    timeout: Timeout,
}

impl<T: RegisterTransport> PowerMonitor<T> {
    /// Create a driver at the default address. Nothing is written until `init`.
    pub fn new(bus: T) -> Self {
        Self {
            bus,
            address: INA219_ADDRESS,
            timeout: Timeout::Blocking,
        }
    }

    /// Use a different I2C address (A0/A1 strapping)
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Bound each bus transaction
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Release the transport
    pub fn release(self) -> T {
        self.bus
    }

    /// Program calibration and the fixed configuration word
    ///
    /// # Arguments
    /// * `shunt_ohms` - Shunt resistance in ohms
    /// * `max_current_amps` - Largest current expected through the shunt
    ///
    /// # Returns
    /// * `Ok(())` - Both registers written
    /// * `Err(SensorError)` - Invalid calibration inputs or a failed write;
    ///   no partial-success recovery is attempted
    pub fn init(&mut self, shunt_ohms: f64, max_current_amps: f64) -> Result<()> {
        let calibration = CalibrationConfig {
            shunt_ohms,
            max_current_amps,
        };
        let cal = calibration.calibration_register()?;

        let full_scale_amps = CURRENT_LSB_A * CURRENT_FULL_SCALE_COUNTS;
        if max_current_amps > full_scale_amps {
            warn!(
                "Max current {:.3} A exceeds current register full scale {:.3} A (LSB {} mA)",
                max_current_amps, full_scale_amps, CURRENT_LSB_MA
            );
        }
        debug!(
            "INA219 minimum LSB for {:.3} A: {:.3e} A",
            max_current_amps,
            calibration.minimum_current_lsb_amps()
        );

        self.write_word(REG_CALIBRATION, cal)?;

        let config = PowerMonitorConfig::LOW_CURRENT;
        self.write_word(REG_CONFIG, config.pack())?;

        info!(
            "INA219 at 0x{:02X}: calibration {}, config 0x{:04X}",
            self.address,
            cal,
            config.pack()
        );
        Ok(())
    }

    /// Read the current register in milliamps (signed, 0.01 mA per count)
    pub fn read_current(&mut self) -> std::result::Result<f32, TransportError> {
        Ok(current_from_raw(self.read_word(REG_CURRENT)?))
    }

    /// Read the bus voltage in volts (status bits dropped, 4 mV per count)
    pub fn read_bus_voltage(&mut self) -> std::result::Result<f32, TransportError> {
        Ok(bus_voltage_from_raw(self.read_word(REG_BUS_VOLTAGE)?))
    }

    /// Read the shunt voltage in millivolts (signed, 10 uV per count)
    pub fn read_shunt_voltage(&mut self) -> std::result::Result<f32, TransportError> {
        let raw = self.read_word(REG_SHUNT_VOLTAGE)?;
        Ok(raw as i16 as f32 * SHUNT_VOLTAGE_LSB_MV)
    }

    /// Read the power register in milliwatts
    pub fn read_power(&mut self) -> std::result::Result<f32, TransportError> {
        let raw = self.read_word(REG_POWER)?;
        Ok(raw as f32 * POWER_LSB_FACTOR * CURRENT_LSB_MA)
    }

    /// Read bus voltage then current
    pub fn read(&mut self) -> std::result::Result<PowerReading, TransportError> {
        Ok(PowerReading {
            bus_voltage_v: self.read_bus_voltage()?,
            current_ma: self.read_current()?,
        })
    }

    /// Read back the configuration register
    pub fn read_config(&mut self) -> std::result::Result<PowerMonitorConfig, TransportError> {
        Ok(PowerMonitorConfig::unpack(self.read_word(REG_CONFIG)?))
    }

    fn write_word(&mut self, reg: u8, value: u16) -> std::result::Result<(), TransportError> {
        self.bus
            .write_register(self.address, reg, RegisterValue::Word(value), self.timeout)
    }

    fn read_word(&mut self, reg: u8) -> std::result::Result<u16, TransportError> {
        let data = self.bus.read_registers(self.address, reg, 2, self.timeout)?;
        if data.len() < 2 {
            return Err(TransportError::ShortRead {
                expected: 2,
                actual: data.len(),
            });
        }
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }
}
